//! Composed messages and the composer/sender seams.

use async_trait::async_trait;

use super::error::{ComposeError, SendError};
use super::payload::NotificationPayload;

/// Subject and bodies produced by a composer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedMessage {
    /// Subject line.
    pub subject: String,
    /// Plain-text body.
    pub text_body: String,
    /// Optional HTML alternative.
    pub html_body: Option<String>,
}

/// Turns a payload into a message. Must be deterministic for a given payload
/// so that redelivery is safe.
pub trait Composer: Send + Sync {
    /// Renders the payload.
    ///
    /// # Errors
    ///
    /// Returns `ComposeError` if the payload cannot be rendered.
    fn compose(&self, payload: &NotificationPayload) -> Result<RenderedMessage, ComposeError>;
}

/// Delivers a composed message to a recipient.
#[async_trait]
pub trait Sender: Send + Sync {
    /// Sends the message. `Ok(false)` means delivery was not attempted by
    /// policy (e.g. sending is disabled), not a transient failure.
    ///
    /// # Errors
    ///
    /// Returns `SendError` if delivery was attempted and failed.
    async fn send(&self, recipient: &str, message: &RenderedMessage) -> Result<bool, SendError>;
}
