//! Liveness and readiness endpoints.

use axum::extract::State;
use axum::http::StatusCode;
use axum::{Json, Router, routing::get};
use serde::Serialize;

use crate::state::AppState;

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// `ok`, or `unavailable` when a store cannot be queried.
    pub status: &'static str,
    /// Service version.
    pub version: &'static str,
}

impl HealthResponse {
    fn with_status(status: &'static str) -> Json<Self> {
        Json(Self {
            status,
            version: env!("CARGO_PKG_VERSION"),
        })
    }
}

/// GET /health
async fn health_check() -> Json<HealthResponse> {
    HealthResponse::with_status("ok")
}

/// GET /ready: both stores answer a dead-letter query.
async fn readiness(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let notifications = state.notifications.list_exhausted(state.max_attempts, 1).await;
    let events = state.events.list_exhausted(state.max_attempts, 1).await;
    match (notifications, events) {
        (Ok(_), Ok(_)) => (StatusCode::OK, HealthResponse::with_status("ok")),
        (Err(e), _) | (_, Err(e)) => {
            tracing::warn!(error = %e, "readiness probe failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                HealthResponse::with_status("unavailable"),
            )
        }
    }
}

/// Returns the health check router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness))
}
