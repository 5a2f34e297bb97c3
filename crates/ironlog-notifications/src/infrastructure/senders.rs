//! Senders that never touch the network.

use async_trait::async_trait;

use crate::domain::error::SendError;
use crate::domain::message::{RenderedMessage, Sender};

/// Logs the message and reports it delivered. Used in development.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSender;

#[async_trait]
impl Sender for LogSender {
    async fn send(&self, recipient: &str, message: &RenderedMessage) -> Result<bool, SendError> {
        tracing::info!(
            recipient,
            subject = %message.subject,
            body_len = message.text_body.len(),
            "email delivered to log"
        );
        Ok(true)
    }
}

/// Reports every message as not delivered. Rows end up `failed` with
/// "sender disabled" and are only retried by an explicit re-schedule.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledSender;

#[async_trait]
impl Sender for DisabledSender {
    async fn send(&self, recipient: &str, message: &RenderedMessage) -> Result<bool, SendError> {
        tracing::debug!(recipient, subject = %message.subject, "email sending disabled");
        Ok(false)
    }
}
