//! Audit trail handler.

use async_trait::async_trait;
use ironlog_core::work_item::EventRecord;

use crate::domain::handler::{EventHandler, HandlerError, HandlerOutcome};

/// Writes every event it receives to the structured log under the
/// `ironlog::audit` target.
#[derive(Debug, Clone, Copy, Default)]
pub struct AuditLogHandler;

impl AuditLogHandler {
    /// Handler name used in delivery keys.
    pub const NAME: &'static str = "audit-log";
}

#[async_trait]
impl EventHandler for AuditLogHandler {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn handle(&self, event: &EventRecord) -> Result<HandlerOutcome, HandlerError> {
        tracing::info!(
            target: "ironlog::audit",
            event_id = %event.id,
            event_type = %event.event_type,
            correlation_id = event.correlation_id.as_deref().unwrap_or_default(),
            occurred_at = %event.occurred_at,
            payload = %event.payload,
            "domain event"
        );
        Ok(HandlerOutcome::Delivered)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;

    #[tokio::test]
    async fn test_audit_handler_always_delivers() {
        let event = EventRecord::new(
            "training.completed",
            None,
            serde_json::json!({"training_id": "t-1"}),
            Utc.with_ymd_and_hms(2026, 1, 15, 10, 0, 0).unwrap(),
        );

        let outcome = AuditLogHandler.handle(&event).await.unwrap();

        assert_eq!(outcome, HandlerOutcome::Delivered);
    }
}
