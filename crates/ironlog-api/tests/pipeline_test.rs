//! End-to-end delivery through the job runner over in-memory stores.

mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::http::StatusCode;
use ironlog_core::work_item::WorkItemStatus;
use ironlog_jobs::queue::job_queue;
use ironlog_notifications::domain::error::SendError;
use ironlog_notifications::domain::message::{RenderedMessage, Sender};
use ironlog_notifications::infrastructure::senders::DisabledSender;
use ironlog_test_support::{InMemoryEventStore, InMemoryNotificationStore};
use tokio_util::sync::CancellationToken;

#[derive(Default)]
struct RecordingSender {
    sent: Mutex<Vec<(String, RenderedMessage)>>,
}

impl RecordingSender {
    fn sent(&self) -> Vec<(String, RenderedMessage)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Sender for RecordingSender {
    async fn send(&self, recipient: &str, message: &RenderedMessage) -> Result<bool, SendError> {
        self.sent
            .lock()
            .unwrap()
            .push((recipient.to_owned(), message.clone()));
        Ok(true)
    }
}

async fn wait_for(condition: impl Fn() -> bool) {
    for _ in 0..300 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached");
}

fn user_registered() -> serde_json::Value {
    serde_json::json!({
        "event_type": "user.registered",
        "correlation_id": "user-42",
        "payload": {"user_id": "user-42", "email": "ada@example.com", "display_name": "Ada"},
    })
}

struct Harness {
    app: common::TestApp,
    notifications: Arc<InMemoryNotificationStore>,
    events: Arc<InMemoryEventStore>,
    cancel: CancellationToken,
    runner: tokio::task::JoinHandle<()>,
}

fn start(sender: Arc<dyn Sender>) -> Harness {
    let notifications = Arc::new(InMemoryNotificationStore::new());
    let events = Arc::new(InMemoryEventStore::new());
    let (trigger, queue) = job_queue(64);
    let mut deps = common::TestDeps::new(notifications.clone(), events.clone());
    deps.trigger = Arc::new(trigger);
    deps.sender = sender;
    let app = common::build_app(deps);
    let cancel = CancellationToken::new();
    let runner = app.pipeline.job_runner(&app.settings).spawn(queue, cancel.clone());
    Harness {
        app,
        notifications,
        events,
        cancel,
        runner,
    }
}

impl Harness {
    async fn stop(self) {
        self.cancel.cancel();
        self.runner.await.unwrap();
    }

    fn all_deliveries_settled(&self) -> bool {
        let deliveries = self.events.deliveries();
        !deliveries.is_empty()
            && deliveries
                .iter()
                .all(|d| d.state.status == WorkItemStatus::Sent)
    }
}

#[tokio::test]
async fn test_registration_event_delivers_one_welcome_email() {
    // Arrange
    let sender = Arc::new(RecordingSender::default());
    let harness = start(sender.clone());

    // Act
    let (status, json) =
        common::post_json(harness.app.router.clone(), "/api/v1/events", &user_registered()).await;
    wait_for(|| {
        harness
            .notifications
            .records()
            .first()
            .is_some_and(|r| r.state.status == WorkItemStatus::Sent)
    })
    .await;
    wait_for(|| harness.all_deliveries_settled()).await;

    // Assert
    assert_eq!(status, StatusCode::CREATED);
    let handlers: Vec<&str> = json["deliveries"]
        .as_array()
        .unwrap()
        .iter()
        .map(|d| d["handler_name"].as_str().unwrap())
        .collect();
    assert_eq!(handlers, vec!["welcome-email", "audit-log"]);

    let sent = sender.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, "ada@example.com");
    assert_eq!(sent[0].1.subject, "Welcome to Ironlog, Ada!");

    let record = harness.notifications.records().remove(0);
    assert_eq!(record.state.attempts, 1);
    assert!(record.state.sent_at.is_some());
    harness.stop().await;
}

#[tokio::test]
async fn test_repeated_registration_sends_welcome_once() {
    // Arrange
    let sender = Arc::new(RecordingSender::default());
    let harness = start(sender.clone());

    // Act
    common::post_json(harness.app.router.clone(), "/api/v1/events", &user_registered()).await;
    common::post_json(harness.app.router.clone(), "/api/v1/events", &user_registered()).await;
    wait_for(|| harness.events.deliveries().len() == 4 && harness.all_deliveries_settled()).await;
    wait_for(|| {
        harness
            .notifications
            .records()
            .iter()
            .all(|r| r.state.status == WorkItemStatus::Sent)
    })
    .await;

    // Assert
    assert_eq!(harness.events.events().len(), 2);
    assert_eq!(harness.notifications.records().len(), 1);
    assert_eq!(sender.sent().len(), 1);
    harness.stop().await;
}

#[tokio::test]
async fn test_disabled_sender_leaves_failed_row_visible_over_http() {
    // Arrange
    let harness = start(Arc::new(DisabledSender));
    let body = serde_json::json!({
        "kind": "user.registration.welcome",
        "correlation_id": "user-7",
        "recipient": "grace@example.com",
        "payload": {"type": "welcome", "user_id": "user-7", "display_name": "Grace"},
    });

    // Act
    let (status, created) =
        common::post_json(harness.app.router.clone(), "/api/v1/notifications", &body).await;
    wait_for(|| {
        harness
            .notifications
            .records()
            .first()
            .is_some_and(|r| r.state.status == WorkItemStatus::Failed)
    })
    .await;
    let id = created["notification_id"].as_str().unwrap().to_owned();
    let (get_status, json) = common::get_json(
        harness.app.router.clone(),
        &format!("/api/v1/notifications/{id}"),
    )
    .await;

    // Assert
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(get_status, StatusCode::OK);
    assert_eq!(json["state"]["status"], "failed");
    assert_eq!(json["state"]["last_error"], "sender disabled");
    assert!(json["state"]["next_attempt_at"].is_null());
    harness.stop().await;
}
