//! Notification producer.
//!
//! `schedule` records the intent to notify exactly once per correlation key
//! and signals the background trigger. It never waits for delivery.

use std::sync::Arc;

use ironlog_core::clock::Clock;
use ironlog_core::error::{PipelineError, StoreError};
use ironlog_core::job::{BackgroundTrigger, JobRequest};
use ironlog_core::metrics::{CounterMetrics, MetricsSink, WorkItemFamily};
use ironlog_core::repository::NotificationStore;
use ironlog_core::retry::RetryPolicy;
use ironlog_core::work_item::{
    CorrelationKey, CreateOutcome, MAX_KEY_CHARS, MAX_RECIPIENT_CHARS, NotificationRecord,
    WorkItemStatus, ensure_fits,
};
use serde::Serialize;
use uuid::Uuid;

use crate::domain::catalog::NotificationCatalog;
use crate::domain::flags::{FeatureFlags, StaticFeatureFlags};
use crate::domain::payload::NotificationPayload;
use crate::domain::policy::NotificationPolicy;

/// What to notify, and whom.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleRequest {
    /// Business identifier the notification is about (e.g. the user id).
    pub correlation_id: String,
    /// Recipient address.
    pub recipient: String,
    /// Typed payload, stored inside a versioned envelope.
    pub payload: NotificationPayload,
}

/// How a `schedule` call was resolved. None of these are errors for the
/// calling business operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "notification_id", rename_all = "snake_case")]
pub enum ScheduleOutcome {
    /// The kind is switched off by its feature flag.
    Disabled,
    /// A live row already exists and is not failed.
    AlreadyScheduled(Uuid),
    /// A failed row was re-armed and signalled.
    Requeued(Uuid),
    /// A failed row has no manual re-enqueues left.
    Exhausted(Uuid),
    /// A new row was created and signalled.
    Created(Uuid),
    /// A concurrent caller created the row first; that row was signalled.
    JoinedExisting(Uuid),
}

impl ScheduleOutcome {
    /// The notification this outcome refers to, if any.
    #[must_use]
    pub fn notification_id(&self) -> Option<Uuid> {
        match *self {
            Self::Disabled => None,
            Self::AlreadyScheduled(id)
            | Self::Requeued(id)
            | Self::Exhausted(id)
            | Self::Created(id)
            | Self::JoinedExisting(id) => Some(id),
        }
    }
}

/// Records notification intents idempotently and signals the trigger.
pub struct NotificationScheduler {
    store: Arc<dyn NotificationStore>,
    trigger: Arc<dyn BackgroundTrigger>,
    clock: Arc<dyn Clock>,
    flags: Arc<dyn FeatureFlags>,
    metrics: Arc<dyn MetricsSink>,
    catalog: Arc<NotificationCatalog>,
    max_manual_requeue_attempts: u32,
}

impl NotificationScheduler {
    /// Creates a scheduler with every flag enabled, counter metrics, an
    /// empty catalog and the default requeue ceiling.
    #[must_use]
    pub fn new(
        store: Arc<dyn NotificationStore>,
        trigger: Arc<dyn BackgroundTrigger>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            trigger,
            clock,
            flags: Arc::new(StaticFeatureFlags::all_enabled()),
            metrics: Arc::new(CounterMetrics),
            catalog: Arc::new(NotificationCatalog::new()),
            max_manual_requeue_attempts: RetryPolicy::DEFAULT_MAX_ATTEMPTS,
        }
    }

    /// Replaces the feature flag lookup.
    #[must_use]
    pub fn with_flags(mut self, flags: Arc<dyn FeatureFlags>) -> Self {
        self.flags = flags;
        self
    }

    /// Replaces the metrics sink.
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Sets the catalog used by [`Self::schedule_kind`].
    #[must_use]
    pub fn with_catalog(mut self, catalog: Arc<NotificationCatalog>) -> Self {
        self.catalog = catalog;
        self
    }

    /// Sets how many attempts a failed row may have and still be re-enqueued.
    #[must_use]
    pub fn with_max_manual_requeue_attempts(mut self, attempts: u32) -> Self {
        self.max_manual_requeue_attempts = attempts;
        self
    }

    /// Resolves the policy for `kind` from the catalog, then schedules.
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::UnknownKind` if the catalog has no policy for
    /// `kind`, otherwise as [`Self::schedule`].
    pub async fn schedule_kind(
        &self,
        kind: &str,
        request: ScheduleRequest,
    ) -> Result<ScheduleOutcome, PipelineError> {
        let policy = self
            .catalog
            .policy_for(kind)
            .ok_or_else(|| PipelineError::UnknownKind(kind.to_owned()))?;
        self.schedule(&policy, request).await
    }

    /// Schedules a notification under `policy`.
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::Store` if the store fails, or
    /// `PipelineError::Payload` if the payload cannot be serialized or the
    /// correlation id or recipient is too long to store.
    pub async fn schedule(
        &self,
        policy: &NotificationPolicy,
        request: ScheduleRequest,
    ) -> Result<ScheduleOutcome, PipelineError> {
        if !self.flags.is_enabled(&policy.feature_flag) {
            tracing::info!(
                kind = %policy.kind,
                flag = %policy.feature_flag,
                "notification disabled by feature flag"
            );
            return Ok(ScheduleOutcome::Disabled);
        }

        ensure_fits("correlation_id", &request.correlation_id, MAX_KEY_CHARS)
            .and_then(|()| ensure_fits("recipient", &request.recipient, MAX_RECIPIENT_CHARS))
            .map_err(|message| PipelineError::Payload {
                kind: policy.kind.clone(),
                message,
            })?;

        let key = CorrelationKey {
            kind: policy.kind.clone(),
            correlation_id: request.correlation_id,
            recipient: request.recipient,
        };

        if let Some(existing) = self.store.find_by_correlation(&key).await? {
            return self.resolve_existing(existing).await;
        }

        let payload = request
            .payload
            .to_envelope()
            .map_err(|e| PipelineError::Payload {
                kind: policy.kind.clone(),
                message: e.to_string(),
            })?;
        let record = NotificationRecord::new(key, payload, self.clock.now());

        // The insert runs on its own task so that a caller dropped mid-await
        // cannot abandon a half-issued write.
        let store = Arc::clone(&self.store);
        let created = tokio::spawn(async move { store.create(record).await })
            .await
            .map_err(|e| StoreError::Infrastructure(format!("create task failed: {e}")))??;

        match created {
            CreateOutcome::Created(record) => {
                self.trigger.enqueue(JobRequest::notification(record.id));
                self.metrics.enqueued(WorkItemFamily::Notification, &record.kind);
                tracing::info!(
                    notification_id = %record.id,
                    kind = %record.kind,
                    "notification scheduled"
                );
                Ok(ScheduleOutcome::Created(record.id))
            }
            CreateOutcome::Conflict(key) => {
                let winner = self.store.find_by_correlation(&key).await?.ok_or_else(|| {
                    StoreError::Infrastructure(format!("conflict on {key} but no live row"))
                })?;
                self.trigger.enqueue(JobRequest::notification(winner.id));
                tracing::debug!(
                    notification_id = %winner.id,
                    correlation_key = %key,
                    "joined concurrently scheduled notification"
                );
                Ok(ScheduleOutcome::JoinedExisting(winner.id))
            }
        }
    }

    async fn resolve_existing(
        &self,
        existing: NotificationRecord,
    ) -> Result<ScheduleOutcome, PipelineError> {
        if existing.state.status != WorkItemStatus::Failed {
            tracing::debug!(
                notification_id = %existing.id,
                status = %existing.state.status,
                "notification already scheduled"
            );
            return Ok(ScheduleOutcome::AlreadyScheduled(existing.id));
        }

        if existing.state.attempts >= self.max_manual_requeue_attempts {
            tracing::warn!(
                notification_id = %existing.id,
                kind = %existing.kind,
                attempts = existing.state.attempts,
                last_error = existing.state.last_error.as_deref().unwrap_or_default(),
                "notification exhausted; not re-enqueued"
            );
            return Ok(ScheduleOutcome::Exhausted(existing.id));
        }

        // Conditional on the row still being failed: a worker that claimed it
        // after the lookup owns it now.
        let requeued = self
            .store
            .requeue(existing.id, self.clock.now(), self.max_manual_requeue_attempts)
            .await?;
        if !requeued {
            tracing::debug!(
                notification_id = %existing.id,
                "notification changed since lookup; not re-enqueued"
            );
            return Ok(ScheduleOutcome::AlreadyScheduled(existing.id));
        }
        self.trigger.enqueue(JobRequest::notification(existing.id));
        tracing::info!(
            notification_id = %existing.id,
            attempts = existing.state.attempts,
            "failed notification re-enqueued"
        );
        Ok(ScheduleOutcome::Requeued(existing.id))
    }
}
