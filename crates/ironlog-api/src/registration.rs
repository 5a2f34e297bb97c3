//! Bridges `user.registered` events to the welcome notification.

use std::sync::Arc;

use async_trait::async_trait;
use ironlog_core::work_item::EventRecord;
use ironlog_events::domain::handler::{EventHandler, HandlerError, HandlerOutcome};
use ironlog_notifications::application::scheduler::{
    NotificationScheduler, ScheduleOutcome, ScheduleRequest,
};
use ironlog_notifications::domain::payload::{NotificationPayload, WelcomePayload};
use ironlog_notifications::domain::policy::NotificationPolicy;
use serde::Deserialize;

/// Event type published when a user signs up.
pub const USER_REGISTERED: &str = "user.registered";

#[derive(Debug, Deserialize)]
struct UserRegistered {
    user_id: String,
    email: String,
    display_name: String,
}

/// Schedules the welcome email for every registered user. Scheduling is
/// idempotent per user and address, so repeated deliveries are harmless.
pub struct WelcomeOnRegistration {
    scheduler: Arc<NotificationScheduler>,
}

impl WelcomeOnRegistration {
    /// Handler name used in delivery keys.
    pub const NAME: &'static str = "welcome-email";

    #[must_use]
    pub fn new(scheduler: Arc<NotificationScheduler>) -> Self {
        Self { scheduler }
    }
}

#[async_trait]
impl EventHandler for WelcomeOnRegistration {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn handle(&self, event: &EventRecord) -> Result<HandlerOutcome, HandlerError> {
        let registered: UserRegistered = serde_json::from_value(event.payload.clone())
            .map_err(|e| HandlerError::InvalidPayload(e.to_string()))?;

        let request = ScheduleRequest {
            correlation_id: registered.user_id.clone(),
            recipient: registered.email,
            payload: NotificationPayload::Welcome(WelcomePayload {
                user_id: registered.user_id,
                display_name: registered.display_name,
            }),
        };
        let outcome = self
            .scheduler
            .schedule(&NotificationPolicy::welcome(), request)
            .await
            .map_err(|e| HandlerError::Failed(e.to_string()))?;

        match outcome {
            ScheduleOutcome::Disabled => Ok(HandlerOutcome::Skipped(
                "welcome notifications disabled".to_owned(),
            )),
            ScheduleOutcome::Exhausted(id) => Ok(HandlerOutcome::Skipped(format!(
                "welcome notification {id} has no attempts left"
            ))),
            _ => Ok(HandlerOutcome::Delivered),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use ironlog_notifications::domain::flags::StaticFeatureFlags;
    use ironlog_test_support::{FixedClock, InMemoryNotificationStore, RecordingTrigger};

    use super::*;

    fn registered_event(payload: serde_json::Value) -> EventRecord {
        EventRecord::new(
            USER_REGISTERED,
            None,
            payload,
            Utc.with_ymd_and_hms(2026, 1, 15, 10, 0, 0).unwrap(),
        )
    }

    fn handler_with(store: Arc<InMemoryNotificationStore>, flags: StaticFeatureFlags) -> WelcomeOnRegistration {
        let scheduler = NotificationScheduler::new(
            store,
            Arc::new(RecordingTrigger::new()),
            Arc::new(FixedClock(Utc.with_ymd_and_hms(2026, 1, 15, 10, 0, 0).unwrap())),
        )
        .with_flags(Arc::new(flags));
        WelcomeOnRegistration::new(Arc::new(scheduler))
    }

    #[tokio::test]
    async fn test_registration_schedules_one_welcome() {
        // Arrange
        let store = Arc::new(InMemoryNotificationStore::new());
        let handler = handler_with(store.clone(), StaticFeatureFlags::all_enabled());
        let event = registered_event(serde_json::json!({
            "user_id": "user-42",
            "email": "ada@example.com",
            "display_name": "Ada",
        }));

        // Act
        let first = handler.handle(&event).await.unwrap();
        let second = handler.handle(&event).await.unwrap();

        // Assert
        assert_eq!(first, HandlerOutcome::Delivered);
        assert_eq!(second, HandlerOutcome::Delivered);
        let records = store.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].kind, "user.registration.welcome");
        assert_eq!(records[0].correlation_id, "user-42");
        assert_eq!(records[0].recipient, "ada@example.com");
    }

    #[tokio::test]
    async fn test_disabled_welcome_is_skipped() {
        let store = Arc::new(InMemoryNotificationStore::new());
        let handler = handler_with(
            store.clone(),
            StaticFeatureFlags::with_disabled(["notifications.welcome"]),
        );
        let event = registered_event(serde_json::json!({
            "user_id": "user-42",
            "email": "ada@example.com",
            "display_name": "Ada",
        }));

        let outcome = handler.handle(&event).await.unwrap();

        assert!(matches!(outcome, HandlerOutcome::Skipped(_)));
        assert!(store.records().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_registration_is_invalid_payload() {
        let handler = handler_with(
            Arc::new(InMemoryNotificationStore::new()),
            StaticFeatureFlags::all_enabled(),
        );

        let err = handler
            .handle(&registered_event(serde_json::json!({"user_id": "user-42"})))
            .await
            .unwrap_err();

        assert!(matches!(err, HandlerError::InvalidPayload(_)));
    }
}
