//! The handler seam.

use async_trait::async_trait;
use ironlog_core::work_item::EventRecord;
use thiserror::Error;

/// Non-error result of a handler invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandlerOutcome {
    /// The handler acted on the event.
    Delivered,
    /// The handler declined by policy. The delivery is failed and not
    /// retried automatically.
    Skipped(String),
}

/// A handler failed while acting on an event.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// The event payload is not what the handler expects.
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    /// The handler's own side effect failed.
    #[error("{0}")]
    Failed(String),
}

/// Acts on events of the types it is subscribed to. Invocations for the
/// same event may repeat, so handlers must be idempotent.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Stable name, part of the delivery key.
    fn name(&self) -> &str;

    /// Acts on one event.
    ///
    /// # Errors
    ///
    /// Returns `HandlerError` if the side effect failed and should be
    /// retried.
    async fn handle(&self, event: &EventRecord) -> Result<HandlerOutcome, HandlerError>;
}
