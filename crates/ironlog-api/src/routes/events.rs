//! Routes for publishing events and inspecting their deliveries.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::{
    Json, Router,
    routing::{get, post},
};
use ironlog_core::error::PipelineError;
use ironlog_core::work_item::{DeliveryRecord, EventRecord};
use ironlog_events::application::publisher::{PublishReport, PublishRequest};
use serde::{Deserialize, Serialize};
use tracing::instrument;
use uuid::Uuid;

use crate::error::ApiError;
use crate::state::AppState;

/// Request body for POST /.
#[derive(Debug, Deserialize)]
pub struct PublishEventRequest {
    /// Event type, e.g. `training.completed`.
    pub event_type: String,
    /// Optional business correlation identifier.
    #[serde(default)]
    pub correlation_id: Option<String>,
    /// Event payload.
    #[serde(default)]
    pub payload: serde_json::Value,
}

/// Response body for GET /{id}/deliveries.
#[derive(Debug, Serialize)]
pub struct EventDeliveriesResponse {
    pub event: EventRecord,
    pub deliveries: Vec<DeliveryRecord>,
}

/// POST /
#[instrument(skip(state, request), fields(event_type = %request.event_type))]
async fn publish_event(
    State(state): State<AppState>,
    Json(request): Json<PublishEventRequest>,
) -> Result<(StatusCode, Json<PublishReport>), ApiError> {
    let report = state
        .publisher
        .publish(PublishRequest {
            event_type: request.event_type,
            correlation_id: request.correlation_id,
            payload: request.payload,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(report)))
}

/// GET /{id}/deliveries
async fn list_deliveries(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<EventDeliveriesResponse>, ApiError> {
    let event = state
        .events
        .find_event(id)
        .await
        .map_err(PipelineError::from)?
        .ok_or(PipelineError::NotFound(id))?;
    let deliveries = state
        .events
        .list_deliveries(id)
        .await
        .map_err(PipelineError::from)?;
    Ok(Json(EventDeliveriesResponse { event, deliveries }))
}

/// POST /{id}/retrigger
#[instrument(skip(state))]
async fn retrigger_event(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<PublishReport>, ApiError> {
    let report = state.publisher.retrigger(id).await?;
    Ok(Json(report))
}

/// Returns the router for events.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(publish_event))
        .route("/{id}/deliveries", get(list_deliveries))
        .route("/{id}/retrigger", post(retrigger_event))
}
