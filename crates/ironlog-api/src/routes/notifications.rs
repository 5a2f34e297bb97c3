//! Routes for scheduling and inspecting notifications.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::{
    Json, Router,
    routing::{get, post},
};
use ironlog_core::error::PipelineError;
use ironlog_core::work_item::NotificationRecord;
use ironlog_notifications::application::scheduler::{ScheduleOutcome, ScheduleRequest};
use ironlog_notifications::domain::error::PayloadError;
use ironlog_notifications::domain::payload::NotificationPayload;
use serde::Deserialize;
use tracing::instrument;
use uuid::Uuid;

use crate::error::ApiError;
use crate::state::AppState;

const DEFAULT_DEAD_LETTER_LIMIT: u32 = 100;

/// Request body for POST /.
#[derive(Debug, Deserialize)]
pub struct ScheduleNotificationRequest {
    /// Notification kind, e.g. `user.registration.welcome`.
    pub kind: String,
    /// Business identifier the notification is about.
    pub correlation_id: String,
    /// Recipient address.
    pub recipient: String,
    /// Typed payload; must suit `kind`.
    pub payload: NotificationPayload,
}

/// Query parameters for GET /dead-letters.
#[derive(Debug, Deserialize)]
pub struct DeadLetterQuery {
    /// Maximum rows returned.
    pub limit: Option<u32>,
}

/// POST /
#[instrument(skip(state, request), fields(kind = %request.kind))]
async fn schedule_notification(
    State(state): State<AppState>,
    Json(request): Json<ScheduleNotificationRequest>,
) -> Result<(StatusCode, Json<ScheduleOutcome>), ApiError> {
    if !request.payload.matches_kind(&request.kind) {
        let mismatch = PayloadError::KindMismatch {
            kind: request.kind.clone(),
            payload_type: request.payload.type_name(),
        };
        return Err(PipelineError::Payload {
            kind: request.kind,
            message: mismatch.to_string(),
        }
        .into());
    }

    let outcome = state
        .scheduler
        .schedule_kind(
            &request.kind,
            ScheduleRequest {
                correlation_id: request.correlation_id,
                recipient: request.recipient,
                payload: request.payload,
            },
        )
        .await?;

    let status = match outcome {
        ScheduleOutcome::Created(_) => StatusCode::CREATED,
        _ => StatusCode::OK,
    };
    Ok((status, Json(outcome)))
}

/// GET /{id}
async fn get_notification(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<NotificationRecord>, ApiError> {
    let record = state
        .notifications
        .find_by_id(id)
        .await
        .map_err(PipelineError::from)?
        .ok_or(PipelineError::NotFound(id))?;
    Ok(Json(record))
}

/// GET /dead-letters
async fn list_dead_letters(
    State(state): State<AppState>,
    Query(query): Query<DeadLetterQuery>,
) -> Result<Json<Vec<NotificationRecord>>, ApiError> {
    let records = state
        .notifications
        .list_exhausted(
            state.max_attempts,
            query.limit.unwrap_or(DEFAULT_DEAD_LETTER_LIMIT),
        )
        .await
        .map_err(PipelineError::from)?;
    Ok(Json(records))
}

/// Returns the router for notifications.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(schedule_notification))
        .route("/dead-letters", get(list_dead_letters))
        .route("/{id}", get(get_notification))
}
