//! Pipeline error types.

use thiserror::Error;
use uuid::Uuid;

use crate::sanitize::sanitize_error;

/// Errors raised by work-item store implementations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// An infrastructure/persistence error.
    #[error("infrastructure error: {0}")]
    Infrastructure(String),

    /// A stored row could not be mapped back into the domain model.
    #[error("corrupt row {id}: {message}")]
    CorruptRow {
        /// The offending row.
        id: Uuid,
        /// What could not be decoded.
        message: String,
    },
}

/// Top-level error type for producing and processing work items.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The work item (or its parent event) does not exist.
    #[error("work item not found: {0}")]
    NotFound(Uuid),

    /// The store rejected or failed a read/write.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The stored payload could not be decoded for its kind.
    #[error("invalid payload for {kind}: {message}")]
    Payload {
        /// Kind or event type of the work item.
        kind: String,
        /// Decoder message.
        message: String,
    },

    /// No policy, composer or handler is registered under this name.
    #[error("nothing registered for {0}")]
    UnknownKind(String),

    /// The composer failed to render a message.
    #[error("composition failed: {0}")]
    Compose(String),

    /// The sender failed while attempting delivery.
    #[error("delivery failed: {0}")]
    Delivery(String),

    /// A fan-out handler failed.
    #[error("handler {handler} failed: {message}")]
    Handler {
        /// Name of the failing handler.
        handler: String,
        /// Handler message.
        message: String,
    },

    /// Processing was cancelled before any state was mutated.
    #[error("cancelled before processing started")]
    Cancelled,
}

impl PipelineError {
    /// Short type name used as the prefix of persisted error summaries.
    #[must_use]
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "NotFound",
            Self::Store(_) => "StoreError",
            Self::Payload { .. } => "PayloadError",
            Self::UnknownKind(_) => "UnknownKind",
            Self::Compose(_) => "ComposeError",
            Self::Delivery(_) => "DeliveryError",
            Self::Handler { .. } => "HandlerError",
            Self::Cancelled => "Cancelled",
        }
    }

    /// Bounded, single-line summary suitable for the `last_error` column.
    #[must_use]
    pub fn sanitized(&self) -> String {
        sanitize_error(self.kind_name(), &self.to_string())
    }

    /// Whether a job runner should invoke the handler again.
    ///
    /// Missing rows and cancellations will not change on retry.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::NotFound(_) | Self::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitized_prefixes_kind_name() {
        let err = PipelineError::Delivery("smtp 421\r\ntry later".into());

        let summary = err.sanitized();

        assert_eq!(summary, "DeliveryError: delivery failed: smtp 421  try later");
    }

    #[test]
    fn test_store_error_is_transparent() {
        let err = PipelineError::from(StoreError::Infrastructure("pool timed out".into()));

        assert_eq!(err.to_string(), "infrastructure error: pool timed out");
        assert_eq!(err.kind_name(), "StoreError");
    }

    #[test]
    fn test_not_found_and_cancelled_are_not_retryable() {
        assert!(!PipelineError::NotFound(Uuid::new_v4()).is_retryable());
        assert!(!PipelineError::Cancelled.is_retryable());
        assert!(PipelineError::Compose("missing variable".into()).is_retryable());
    }
}
