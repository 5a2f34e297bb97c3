//! Ironlog: API error types.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use ironlog_core::error::PipelineError;
use serde::Serialize;
use thiserror::Error;

/// Startup and runtime errors for the API server.
#[derive(Debug, Error)]
pub enum AppError {
    /// A required environment variable is missing or invalid.
    #[error("configuration error: {0}")]
    Config(String),

    /// Database connection or pool error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Schema migration failed.
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// The metrics recorder could not be installed.
    #[error("metrics error: {0}")]
    Metrics(String),

    /// Network binding or I/O error.
    #[error("server error: {0}")]
    Server(#[from] std::io::Error),
}

/// JSON body returned for error responses.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    /// Machine-readable error code.
    pub error: &'static str,
    /// Human-readable error message.
    pub message: String,
}

/// HTTP-layer wrapper around `PipelineError` that implements `IntoResponse`.
#[derive(Debug)]
pub struct ApiError(pub PipelineError);

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code) = match &self.0 {
            PipelineError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            PipelineError::Payload { .. } => (StatusCode::BAD_REQUEST, "invalid_payload"),
            PipelineError::UnknownKind(_) => (StatusCode::BAD_REQUEST, "unknown_kind"),
            PipelineError::Store(_) => (StatusCode::INTERNAL_SERVER_ERROR, "store_error"),
            PipelineError::Compose(_) => (StatusCode::INTERNAL_SERVER_ERROR, "compose_error"),
            PipelineError::Delivery(_) | PipelineError::Handler { .. } => {
                (StatusCode::BAD_GATEWAY, "delivery_error")
            }
            PipelineError::Cancelled => (StatusCode::SERVICE_UNAVAILABLE, "cancelled"),
        };

        if status.is_server_error() {
            tracing::error!(error = %self.0, "request failed");
        }

        let body = ErrorBody {
            error: error_code,
            message: self.0.to_string(),
        };

        (status, Json(body)).into_response()
    }
}
