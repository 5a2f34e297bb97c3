//! Notification processor.
//!
//! Invoked by the job runner with a notification id, possibly more than once.
//! The claim increments `attempts` in the store before any risky work, and
//! every failure is persisted before it is returned.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ironlog_core::clock::Clock;
use ironlog_core::error::PipelineError;
use ironlog_core::job::{JobHandler, NOTIFICATION_JOB};
use ironlog_core::metrics::{CounterMetrics, MetricsSink, WorkItemFamily};
use ironlog_core::repository::NotificationStore;
use ironlog_core::retry::RetryPolicy;
use ironlog_core::rng::{DeterministicRng, ThreadRng};
use ironlog_core::work_item::{NotificationRecord, WorkItemStatus};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::domain::catalog::NotificationCatalog;
use crate::domain::message::Sender;
use crate::domain::payload::NotificationPayload;

/// `last_error` recorded when the sender declines to deliver.
pub const SENDER_DISABLED_REASON: &str = "sender disabled";

/// Non-error results of processing one notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// No row with this id.
    Missing,
    /// Already sent; nothing changed.
    AlreadySent,
    /// Another worker holds the row, or it is not ready or out of attempts.
    NotClaimable,
    /// The sender declined by policy; the row is failed without automatic
    /// retry.
    NotDelivered,
    /// Delivered and marked sent.
    Sent,
}

/// Claims, composes and sends notifications.
pub struct NotificationProcessor {
    store: Arc<dyn NotificationStore>,
    catalog: Arc<NotificationCatalog>,
    sender: Arc<dyn Sender>,
    clock: Arc<dyn Clock>,
    metrics: Arc<dyn MetricsSink>,
    retry: RetryPolicy,
    rng: Mutex<Box<dyn DeterministicRng>>,
}

impl NotificationProcessor {
    /// Creates a processor with the default retry policy, counter metrics
    /// and thread-local jitter.
    #[must_use]
    pub fn new(
        store: Arc<dyn NotificationStore>,
        catalog: Arc<NotificationCatalog>,
        sender: Arc<dyn Sender>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            catalog,
            sender,
            clock,
            metrics: Arc::new(CounterMetrics),
            retry: RetryPolicy::default(),
            rng: Mutex::new(Box::new(ThreadRng)),
        }
    }

    /// Replaces the retry policy.
    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Replaces the metrics sink.
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Replaces the jitter source.
    #[must_use]
    pub fn with_rng(mut self, rng: Box<dyn DeterministicRng>) -> Self {
        self.rng = Mutex::new(rng);
        self
    }

    /// Processes one notification.
    ///
    /// Cancellation is honoured only before the claim. Once `attempts` has
    /// been incremented the attempt runs to completion.
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::Cancelled` if cancelled before the claim,
    /// `PipelineError::Store` if the store fails, or the payload, compose or
    /// delivery error of a failed attempt after it has been persisted.
    pub async fn process(
        &self,
        id: Uuid,
        cancel: &CancellationToken,
    ) -> Result<ProcessOutcome, PipelineError> {
        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }

        let Some(mut record) = self.store.find_by_id(id).await? else {
            tracing::warn!(notification_id = %id, "notification not found");
            return Ok(ProcessOutcome::Missing);
        };
        if record.state.status == WorkItemStatus::Sent {
            tracing::debug!(notification_id = %id, "notification already sent");
            return Ok(ProcessOutcome::AlreadySent);
        }

        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }
        let now = self.clock.now();
        if !self.store.try_claim(id, now, self.retry.max_attempts).await? {
            tracing::debug!(
                notification_id = %id,
                status = %record.state.status,
                attempts = record.state.attempts,
                "notification not claimable"
            );
            return Ok(ProcessOutcome::NotClaimable);
        }

        let retried = record.state.attempts > 0;
        record.state.claim(now);
        record.updated_at = now;
        if retried {
            self.metrics.retried(WorkItemFamily::Notification, &record.kind);
        }
        tracing::info!(
            notification_id = %id,
            kind = %record.kind,
            attempt = record.state.attempts,
            "notification claimed"
        );

        match self.attempt(&record).await {
            Ok(true) => {
                let now = self.clock.now();
                record.state.succeed(now);
                record.updated_at = now;
                self.store.save(&record).await?;
                self.metrics.sent(WorkItemFamily::Notification, &record.kind);
                tracing::info!(notification_id = %id, kind = %record.kind, "notification sent");
                Ok(ProcessOutcome::Sent)
            }
            Ok(false) => {
                record.state.fail(SENDER_DISABLED_REASON.to_owned(), None);
                record.updated_at = self.clock.now();
                self.store.save(&record).await?;
                self.metrics.failed(WorkItemFamily::Notification, &record.kind);
                tracing::warn!(
                    notification_id = %id,
                    kind = %record.kind,
                    "notification not delivered: sender disabled"
                );
                Ok(ProcessOutcome::NotDelivered)
            }
            Err(err) => {
                let now = self.clock.now();
                let retry_at = self.next_attempt_at(record.state.attempts, now);
                record.state.fail(err.sanitized(), retry_at);
                record.updated_at = now;
                self.store.save(&record).await?;
                self.metrics.failed(WorkItemFamily::Notification, &record.kind);
                tracing::warn!(
                    notification_id = %id,
                    kind = %record.kind,
                    attempt = record.state.attempts,
                    next_attempt_at = ?retry_at,
                    error = %err,
                    "notification attempt failed"
                );
                Err(err)
            }
        }
    }

    async fn attempt(&self, record: &NotificationRecord) -> Result<bool, PipelineError> {
        let payload = NotificationPayload::decode(&record.kind, &record.payload).map_err(|e| {
            PipelineError::Payload {
                kind: record.kind.clone(),
                message: e.to_string(),
            }
        })?;
        let message = self.catalog.compose(&record.kind, &payload)?;
        self.sender
            .send(&record.recipient, &message)
            .await
            .map_err(|e| PipelineError::Delivery(e.to_string()))
    }

    fn next_attempt_at(&self, attempts: u32, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        self.retry.next_attempt_at(attempts, now, &mut **rng)
    }
}

#[async_trait]
impl JobHandler for NotificationProcessor {
    fn handler_type(&self) -> &'static str {
        NOTIFICATION_JOB
    }

    async fn run(&self, work_item_id: Uuid, cancel: &CancellationToken) -> Result<(), PipelineError> {
        self.process(work_item_id, cancel).await.map(|_| ())
    }

    async fn retry_after(&self, work_item_id: Uuid) -> Result<Option<Duration>, PipelineError> {
        let record = self.store.find_by_id(work_item_id).await?;
        Ok(record.and_then(|r| r.state.retry_after(self.clock.now())))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use chrono::{DateTime, TimeDelta, TimeZone, Utc};
    use ironlog_core::error::PipelineError;
    use ironlog_core::job::JobHandler;
    use ironlog_core::metrics::WorkItemFamily;
    use ironlog_core::retry::RetryPolicy;
    use ironlog_core::sanitize::MAX_ERROR_CHARS;
    use ironlog_core::work_item::{CorrelationKey, NotificationRecord, WorkItemStatus};
    use ironlog_test_support::{
        FixedClock, InMemoryNotificationStore, ManualClock, MetricEvent, MockRng,
        RecordingMetrics, RecordingTrigger, SequenceRng,
    };
    use tokio_util::sync::CancellationToken;
    use uuid::Uuid;

    use super::{NotificationProcessor, ProcessOutcome, SENDER_DISABLED_REASON};
    use crate::application::scheduler::{NotificationScheduler, ScheduleOutcome, ScheduleRequest};
    use crate::domain::error::SendError;
    use crate::domain::message::{RenderedMessage, Sender};
    use crate::domain::payload::{NotificationPayload, WelcomePayload};
    use crate::domain::policy::{NotificationPolicy, WELCOME_KIND};
    use crate::infrastructure::templates::standard_catalog;

    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 15, 10, 0, 0).unwrap()
    }

    #[derive(Clone, Copy)]
    enum Reply {
        Delivered,
        Declined,
        Fails,
    }

    /// Sender that answers with a fixed reply and records what it was asked
    /// to send.
    struct ScriptedSender {
        reply: Reply,
        sent: Mutex<Vec<(String, String)>>,
    }

    impl ScriptedSender {
        fn new(reply: Reply) -> Self {
            Self {
                reply,
                sent: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> usize {
            self.sent.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl Sender for ScriptedSender {
        async fn send(
            &self,
            recipient: &str,
            message: &RenderedMessage,
        ) -> Result<bool, SendError> {
            self.sent
                .lock()
                .unwrap()
                .push((recipient.to_owned(), message.subject.clone()));
            match self.reply {
                Reply::Delivered => Ok(true),
                Reply::Declined => Ok(false),
                Reply::Fails => Err(SendError::Transport("421 service busy\r\nretry".to_owned())),
            }
        }
    }

    struct Fixture {
        store: Arc<InMemoryNotificationStore>,
        sender: Arc<ScriptedSender>,
        metrics: Arc<RecordingMetrics>,
        processor: NotificationProcessor,
    }

    fn fixture(reply: Reply) -> Fixture {
        let store = Arc::new(InMemoryNotificationStore::new());
        let sender = Arc::new(ScriptedSender::new(reply));
        let metrics = Arc::new(RecordingMetrics::new());
        let processor = NotificationProcessor::new(
            store.clone(),
            Arc::new(standard_catalog().unwrap()),
            sender.clone(),
            Arc::new(FixedClock(fixed_now())),
        )
        .with_metrics(metrics.clone())
        .with_rng(Box::new(MockRng));
        Fixture {
            store,
            sender,
            metrics,
            processor,
        }
    }

    fn welcome_record() -> NotificationRecord {
        let payload = NotificationPayload::Welcome(WelcomePayload {
            user_id: "user-1".to_owned(),
            display_name: "Ada".to_owned(),
        });
        NotificationRecord::new(
            CorrelationKey {
                kind: WELCOME_KIND.to_owned(),
                correlation_id: "user-1".to_owned(),
                recipient: "a@x.com".to_owned(),
            },
            payload.to_envelope().unwrap(),
            fixed_now(),
        )
    }

    #[tokio::test]
    async fn test_process_sends_and_marks_sent() {
        // Arrange
        let f = fixture(Reply::Delivered);
        let record = welcome_record();
        f.store.insert(record.clone());

        // Act
        let outcome = f
            .processor
            .process(record.id, &CancellationToken::new())
            .await
            .unwrap();

        // Assert
        assert_eq!(outcome, ProcessOutcome::Sent);
        let stored = f.store.get(record.id).unwrap();
        assert_eq!(stored.state.status, WorkItemStatus::Sent);
        assert_eq!(stored.state.attempts, 1);
        assert_eq!(stored.state.sent_at, Some(fixed_now()));
        assert_eq!(stored.state.last_attempt_at, Some(fixed_now()));
        assert_eq!(stored.state.last_error, None);
        assert_eq!(
            f.sender.sent.lock().unwrap().clone(),
            vec![("a@x.com".to_owned(), "Welcome to Ironlog, Ada!".to_owned())]
        );
        assert_eq!(
            f.metrics.events(),
            vec![MetricEvent::Sent(
                WorkItemFamily::Notification,
                WELCOME_KIND.to_owned()
            )]
        );
    }

    #[tokio::test]
    async fn test_process_is_noop_for_sent_row() {
        // Arrange
        let f = fixture(Reply::Delivered);
        let record = welcome_record();
        f.store.insert(record.clone());
        let cancel = CancellationToken::new();
        f.processor.process(record.id, &cancel).await.unwrap();

        // Act
        let outcome = f.processor.process(record.id, &cancel).await.unwrap();

        // Assert
        assert_eq!(outcome, ProcessOutcome::AlreadySent);
        assert_eq!(f.sender.calls(), 1);
        assert_eq!(f.store.get(record.id).unwrap().state.attempts, 1);
        assert_eq!(f.metrics.events().len(), 1);
    }

    #[tokio::test]
    async fn test_process_missing_row_is_reported_not_raised() {
        let f = fixture(Reply::Delivered);

        let outcome = f
            .processor
            .process(Uuid::new_v4(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome, ProcessOutcome::Missing);
    }

    #[tokio::test]
    async fn test_process_cancelled_before_claim_leaves_row_untouched() {
        // Arrange
        let f = fixture(Reply::Delivered);
        let record = welcome_record();
        f.store.insert(record.clone());
        let cancel = CancellationToken::new();
        cancel.cancel();

        // Act
        let err = f.processor.process(record.id, &cancel).await.unwrap_err();

        // Assert
        assert!(matches!(err, PipelineError::Cancelled));
        assert_eq!(f.store.get(record.id).unwrap(), record);
        assert_eq!(f.sender.calls(), 0);
    }

    #[tokio::test]
    async fn test_disabled_sender_fails_without_automatic_retry() {
        // Arrange
        let f = fixture(Reply::Declined);
        let record = welcome_record();
        f.store.insert(record.clone());

        // Act
        let outcome = f
            .processor
            .process(record.id, &CancellationToken::new())
            .await
            .unwrap();

        // Assert
        assert_eq!(outcome, ProcessOutcome::NotDelivered);
        let stored = f.store.get(record.id).unwrap();
        assert_eq!(stored.state.status, WorkItemStatus::Failed);
        assert_eq!(stored.state.last_error.as_deref(), Some(SENDER_DISABLED_REASON));
        assert_eq!(stored.state.attempts, 1);
        assert_eq!(stored.state.next_attempt_at, None);
        assert_eq!(
            f.metrics.events(),
            vec![MetricEvent::Failed(
                WorkItemFamily::Notification,
                WELCOME_KIND.to_owned()
            )]
        );
    }

    #[tokio::test]
    async fn test_send_failure_is_persisted_with_backoff_then_raised() {
        // Arrange
        let f = fixture(Reply::Fails);
        let record = welcome_record();
        f.store.insert(record.clone());

        // Act
        let err = f
            .processor
            .process(record.id, &CancellationToken::new())
            .await
            .unwrap_err();

        // Assert
        assert!(matches!(err, PipelineError::Delivery(_)));
        let stored = f.store.get(record.id).unwrap();
        assert_eq!(stored.state.status, WorkItemStatus::Failed);
        assert_eq!(
            stored.state.last_error.as_deref(),
            Some("DeliveryError: delivery failed: transport failed: 421 service busy  retry")
        );
        assert_eq!(
            stored.state.next_attempt_at,
            Some(fixed_now() + TimeDelta::seconds(30))
        );
    }

    #[tokio::test]
    async fn test_retry_after_reports_time_until_backoff_ends() {
        // Arrange
        let failing = fixture(Reply::Fails);
        let declined = fixture(Reply::Declined);
        let record = welcome_record();
        failing.store.insert(record.clone());
        declined.store.insert(record.clone());
        let cancel = CancellationToken::new();
        failing.processor.process(record.id, &cancel).await.unwrap_err();
        declined.processor.process(record.id, &cancel).await.unwrap();

        // Act
        let after_failure = failing.processor.retry_after(record.id).await.unwrap();
        let after_decline = declined.processor.retry_after(record.id).await.unwrap();
        let missing = failing.processor.retry_after(Uuid::new_v4()).await.unwrap();

        // Assert
        assert_eq!(after_failure, Some(std::time::Duration::from_secs(30)));
        assert_eq!(after_decline, None);
        assert_eq!(missing, None);
    }

    #[tokio::test]
    async fn test_undecodable_payload_fails_with_sanitized_single_line_error() {
        // Arrange
        let f = fixture(Reply::Delivered);
        let mut record = welcome_record();
        let noise = "x".repeat(600);
        record.payload = serde_json::json!({
            "schema_version": 1,
            "payload": {"type": format!("welcome\r\n{noise}")}
        });
        f.store.insert(record.clone());

        // Act
        let err = f
            .processor
            .process(record.id, &CancellationToken::new())
            .await
            .unwrap_err();

        // Assert
        assert!(matches!(err, PipelineError::Payload { .. }));
        let stored = f.store.get(record.id).unwrap();
        let last_error = stored.state.last_error.unwrap();
        assert_eq!(stored.state.status, WorkItemStatus::Failed);
        assert!(last_error.starts_with("PayloadError: "));
        assert!(!last_error.contains('\n') && !last_error.contains('\r'));
        assert!(last_error.chars().count() <= MAX_ERROR_CHARS);
        assert_eq!(f.sender.calls(), 0);
    }

    #[tokio::test]
    async fn test_retry_after_backoff_counts_retried() {
        // Arrange
        let store = Arc::new(InMemoryNotificationStore::new());
        let clock = Arc::new(ManualClock::new(fixed_now()));
        let metrics = Arc::new(RecordingMetrics::new());
        let failing = NotificationProcessor::new(
            store.clone(),
            Arc::new(standard_catalog().unwrap()),
            Arc::new(ScriptedSender::new(Reply::Fails)),
            clock.clone(),
        )
        .with_rng(Box::new(MockRng))
        .with_metrics(metrics.clone());
        let healthy = NotificationProcessor::new(
            store.clone(),
            Arc::new(standard_catalog().unwrap()),
            Arc::new(ScriptedSender::new(Reply::Delivered)),
            clock.clone(),
        )
        .with_metrics(metrics.clone());
        let record = welcome_record();
        store.insert(record.clone());
        let cancel = CancellationToken::new();
        failing.process(record.id, &cancel).await.unwrap_err();

        // Act
        let early = healthy.process(record.id, &cancel).await.unwrap();
        clock.advance(TimeDelta::seconds(30));
        let late = healthy.process(record.id, &cancel).await.unwrap();

        // Assert
        assert_eq!(early, ProcessOutcome::NotClaimable);
        assert_eq!(late, ProcessOutcome::Sent);
        assert_eq!(store.get(record.id).unwrap().state.attempts, 2);
        assert!(metrics.events().contains(&MetricEvent::Retried(
            WorkItemFamily::Notification,
            WELCOME_KIND.to_owned()
        )));
    }

    #[tokio::test]
    async fn test_backoff_jitter_shortens_each_nominal_delay() {
        // Arrange
        let store = Arc::new(InMemoryNotificationStore::new());
        let clock = Arc::new(ManualClock::new(fixed_now()));
        let processor = NotificationProcessor::new(
            store.clone(),
            Arc::new(standard_catalog().unwrap()),
            Arc::new(ScriptedSender::new(Reply::Fails)),
            clock.clone(),
        )
        .with_rng(Box::new(SequenceRng::new(vec![0.5, 0.25])));
        let record = welcome_record();
        store.insert(record.clone());
        let cancel = CancellationToken::new();

        // Act
        processor.process(record.id, &cancel).await.unwrap_err();
        let first = store.get(record.id).unwrap().state.next_attempt_at.unwrap();
        clock.advance(first - fixed_now());
        processor.process(record.id, &cancel).await.unwrap_err();
        let second = store.get(record.id).unwrap().state.next_attempt_at.unwrap();

        // Assert
        assert_eq!(first - fixed_now(), TimeDelta::milliseconds(22_500));
        assert_eq!(second - first, TimeDelta::milliseconds(52_500));
    }

    #[tokio::test]
    async fn test_attempts_stop_at_policy_ceiling() {
        // Arrange
        let store = Arc::new(InMemoryNotificationStore::new());
        let clock = Arc::new(ManualClock::new(fixed_now()));
        let processor = NotificationProcessor::new(
            store.clone(),
            Arc::new(standard_catalog().unwrap()),
            Arc::new(ScriptedSender::new(Reply::Fails)),
            clock.clone(),
        )
        .with_retry_policy(RetryPolicy::default().with_max_attempts(2))
        .with_rng(Box::new(MockRng));
        let record = welcome_record();
        store.insert(record.clone());
        let cancel = CancellationToken::new();

        // Act
        processor.process(record.id, &cancel).await.unwrap_err();
        clock.advance(TimeDelta::hours(1));
        processor.process(record.id, &cancel).await.unwrap_err();
        clock.advance(TimeDelta::hours(1));
        let third = processor.process(record.id, &cancel).await.unwrap();

        // Assert
        let stored = store.get(record.id).unwrap();
        assert_eq!(third, ProcessOutcome::NotClaimable);
        assert_eq!(stored.state.attempts, 2);
        assert_eq!(stored.state.next_attempt_at, None);
        assert!(stored.state.is_exhausted(2));
    }

    #[tokio::test]
    async fn test_disabled_sender_requeue_cycle_stops_at_five_attempts() {
        // Arrange
        let store = Arc::new(InMemoryNotificationStore::new());
        let trigger = Arc::new(RecordingTrigger::new());
        let clock = Arc::new(FixedClock(fixed_now()));
        let scheduler = NotificationScheduler::new(store.clone(), trigger.clone(), clock.clone());
        let processor = NotificationProcessor::new(
            store.clone(),
            Arc::new(standard_catalog().unwrap()),
            Arc::new(ScriptedSender::new(Reply::Declined)),
            clock,
        );
        let policy = NotificationPolicy::welcome();
        let request = ScheduleRequest {
            correlation_id: "user-1".to_owned(),
            recipient: "a@x.com".to_owned(),
            payload: NotificationPayload::Welcome(WelcomePayload {
                user_id: "user-1".to_owned(),
                display_name: "Ada".to_owned(),
            }),
        };
        let cancel = CancellationToken::new();

        // Act
        let mut outcomes = Vec::new();
        for _ in 0..6 {
            let outcome = scheduler.schedule(&policy, request.clone()).await.unwrap();
            if let Some(id) = outcome.notification_id() {
                processor.process(id, &cancel).await.unwrap();
            }
            outcomes.push(outcome);
        }

        // Assert
        let records = store.records();
        assert_eq!(records.len(), 1);
        let id = records[0].id;
        assert_eq!(outcomes[0], ScheduleOutcome::Created(id));
        assert!(outcomes[1..5].iter().all(|o| *o == ScheduleOutcome::Requeued(id)));
        assert_eq!(outcomes[5], ScheduleOutcome::Exhausted(id));
        assert_eq!(records[0].state.attempts, 5);
        assert_eq!(records[0].state.last_error.as_deref(), Some(SENDER_DISABLED_REASON));
        assert_eq!(trigger.jobs().len(), 5);
    }

    #[tokio::test]
    async fn test_concurrent_processing_sends_once() {
        // Arrange
        let f = fixture(Reply::Delivered);
        let record = welcome_record();
        f.store.insert(record.clone());
        let cancel = CancellationToken::new();

        // Act
        let (a, b) = tokio::join!(
            f.processor.process(record.id, &cancel),
            f.processor.process(record.id, &cancel)
        );

        // Assert
        let mut outcomes = vec![a.unwrap(), b.unwrap()];
        outcomes.sort_by_key(|o| *o == ProcessOutcome::Sent);
        assert_eq!(outcomes[1], ProcessOutcome::Sent);
        assert_ne!(outcomes[0], ProcessOutcome::Sent);
        assert_eq!(f.sender.calls(), 1);
        assert_eq!(f.store.get(record.id).unwrap().state.attempts, 1);
    }
}
