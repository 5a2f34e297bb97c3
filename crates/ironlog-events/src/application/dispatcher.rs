//! Claiming dispatcher for event deliveries.
//!
//! Two entry points share one attempt path:
//!
//! * [`DeliveryDispatcher::dispatch_once`] polls ready deliveries and claims
//!   each before running it; a lost claim means another worker has it.
//! * [`DeliveryDispatcher::deliver`] is the job-runner path for a single
//!   delivery id.
//!
//! A failed delivery is scheduled for retry with exponential backoff so the
//! next poll does not immediately re-claim it.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use ironlog_core::clock::Clock;
use ironlog_core::error::PipelineError;
use ironlog_core::job::{EVENT_DELIVERY_JOB, JobHandler};
use ironlog_core::metrics::{CounterMetrics, MetricsSink, WorkItemFamily};
use ironlog_core::repository::EventStore;
use ironlog_core::retry::RetryPolicy;
use ironlog_core::rng::{DeterministicRng, ThreadRng};
use ironlog_core::sanitize::sanitize_error;
use ironlog_core::work_item::{DeliveryRecord, WorkItemStatus};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::domain::handler::HandlerOutcome;
use crate::domain::registry::HandlerRegistry;

/// Tuning for [`DeliveryDispatcher`].
#[derive(Debug, Clone, PartialEq)]
pub struct DispatcherConfig {
    /// Maximum deliveries listed per poll.
    pub batch_size: u32,
    /// Pause between polls in [`DeliveryDispatcher::run`].
    pub poll_interval: Duration,
    /// How long a delivery may stay `processing` before its claim expires.
    pub claim_timeout: Duration,
    /// Attempt ceiling and backoff.
    pub retry: RetryPolicy,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            batch_size: 50,
            poll_interval: Duration::from_secs(5),
            claim_timeout: Duration::from_secs(300),
            retry: RetryPolicy::default(),
        }
    }
}

/// Non-error results of attempting one delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// No delivery with this id.
    Missing,
    /// Already delivered; nothing changed.
    AlreadyDelivered,
    /// Another worker holds it, or it is not ready or out of attempts.
    NotClaimable,
    /// The handler acted on the event.
    Delivered,
    /// The handler declined; failed without automatic retry.
    Skipped,
}

/// Tally of one poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DispatchReport {
    /// Stale claims moved to `failed`.
    pub expired: u64,
    /// Deliveries claimed by this poll.
    pub claimed: usize,
    /// Claimed deliveries the handler acted on.
    pub delivered: usize,
    /// Claimed deliveries the handler declined.
    pub skipped: usize,
    /// Claimed deliveries that failed.
    pub failed: usize,
}

/// Claims deliveries and invokes their handlers.
pub struct DeliveryDispatcher {
    store: Arc<dyn EventStore>,
    registry: Arc<HandlerRegistry>,
    clock: Arc<dyn Clock>,
    metrics: Arc<dyn MetricsSink>,
    config: DispatcherConfig,
    rng: Mutex<Box<dyn DeterministicRng>>,
}

impl DeliveryDispatcher {
    /// Creates a dispatcher with counter metrics and thread-local jitter.
    #[must_use]
    pub fn new(
        store: Arc<dyn EventStore>,
        registry: Arc<HandlerRegistry>,
        clock: Arc<dyn Clock>,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            store,
            registry,
            clock,
            metrics: Arc::new(CounterMetrics),
            config,
            rng: Mutex::new(Box::new(ThreadRng)),
        }
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

    /// Expires stale claims, then claims and runs every ready delivery in
    /// one batch. A failing delivery does not stop the batch.
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::Store` if expiring or listing fails.
    pub async fn dispatch_once(&self) -> Result<DispatchReport, PipelineError> {
        let now = self.clock.now();
        let stale_before =
            now - TimeDelta::from_std(self.config.claim_timeout).unwrap_or(TimeDelta::MAX);
        let mut report = DispatchReport {
            expired: self
                .store
                .expire_claims(stale_before, now, self.config.retry.max_attempts)
                .await?,
            ..DispatchReport::default()
        };
        if report.expired > 0 {
            tracing::warn!(expired = report.expired, "expired stale delivery claims");
        }

        let ready = self.store.list_ready(self.config.batch_size, now).await?;
        for delivery in ready {
            let now = self.clock.now();
            match self
                .store
                .try_claim(delivery.id, now, self.config.retry.max_attempts)
                .await
            {
                Ok(true) => {}
                Ok(false) => {
                    tracing::debug!(delivery_id = %delivery.id, "delivery claimed elsewhere");
                    continue;
                }
                Err(e) => {
                    tracing::error!(delivery_id = %delivery.id, error = %e, "delivery claim failed");
                    continue;
                }
            }

            report.claimed += 1;
            match self.run_claimed(delivery, now).await {
                Ok(DeliveryOutcome::Delivered) => report.delivered += 1,
                Ok(DeliveryOutcome::Skipped) => report.skipped += 1,
                Ok(_) => {}
                Err(_) => report.failed += 1,
            }
        }

        if report.claimed > 0 {
            tracing::info!(
                claimed = report.claimed,
                delivered = report.delivered,
                skipped = report.skipped,
                failed = report.failed,
                "dispatch batch finished"
            );
        }
        Ok(report)
    }

    /// Claims and runs one delivery.
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::Cancelled` if cancelled before the claim,
    /// `PipelineError::Store` if the store fails, or the handler error of a
    /// failed attempt after it has been persisted.
    pub async fn deliver(
        &self,
        id: Uuid,
        cancel: &CancellationToken,
    ) -> Result<DeliveryOutcome, PipelineError> {
        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }
        let Some(delivery) = self.store.find_delivery_by_id(id).await? else {
            tracing::warn!(delivery_id = %id, "delivery not found");
            return Ok(DeliveryOutcome::Missing);
        };
        if delivery.state.status == WorkItemStatus::Sent {
            return Ok(DeliveryOutcome::AlreadyDelivered);
        }

        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }
        let now = self.clock.now();
        if !self
            .store
            .try_claim(id, now, self.config.retry.max_attempts)
            .await?
        {
            tracing::debug!(delivery_id = %id, "delivery not claimable");
            return Ok(DeliveryOutcome::NotClaimable);
        }
        self.run_claimed(delivery, now).await
    }

    /// Polls every `poll_interval` until cancelled.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tracing::info!(interval = ?self.config.poll_interval, "delivery dispatcher started");
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.dispatch_once().await {
                        tracing::error!(error = %e, "dispatch poll failed");
                    }
                }
            }
        }
        tracing::info!("delivery dispatcher stopped");
    }

    /// Runs an attempt on a delivery this worker has just claimed at `now`.
    async fn run_claimed(
        &self,
        mut delivery: DeliveryRecord,
        now: DateTime<Utc>,
    ) -> Result<DeliveryOutcome, PipelineError> {
        if delivery.state.attempts > 0 {
            self.metrics
                .retried(WorkItemFamily::EventDelivery, &delivery.event_type);
        }
        delivery.state.claim(now);
        delivery.updated_at = now;

        match self.invoke(&delivery).await {
            Ok(HandlerOutcome::Delivered) => {
                let now = self.clock.now();
                delivery.state.succeed(now);
                delivery.updated_at = now;
                self.store.save_delivery(&delivery).await?;
                self.metrics
                    .sent(WorkItemFamily::EventDelivery, &delivery.event_type);
                tracing::info!(
                    delivery_id = %delivery.id,
                    handler = %delivery.handler_name,
                    attempt = delivery.state.attempts,
                    "delivery delivered"
                );
                Ok(DeliveryOutcome::Delivered)
            }
            Ok(HandlerOutcome::Skipped(reason)) => {
                delivery.state.fail(sanitize_error("Skipped", &reason), None);
                delivery.updated_at = self.clock.now();
                self.store.save_delivery(&delivery).await?;
                self.metrics
                    .failed(WorkItemFamily::EventDelivery, &delivery.event_type);
                tracing::info!(
                    delivery_id = %delivery.id,
                    handler = %delivery.handler_name,
                    reason = %reason,
                    "delivery skipped by handler"
                );
                Ok(DeliveryOutcome::Skipped)
            }
            Err(err) => {
                let now = self.clock.now();
                let retry_at = if err.is_retryable() {
                    self.next_attempt_at(delivery.state.attempts, now)
                } else {
                    None
                };
                delivery.state.fail(err.sanitized(), retry_at);
                delivery.updated_at = now;
                self.store.save_delivery(&delivery).await?;
                self.metrics
                    .failed(WorkItemFamily::EventDelivery, &delivery.event_type);
                tracing::warn!(
                    delivery_id = %delivery.id,
                    handler = %delivery.handler_name,
                    attempt = delivery.state.attempts,
                    next_attempt_at = ?retry_at,
                    error = %err,
                    "delivery attempt failed"
                );
                Err(err)
            }
        }
    }

    async fn invoke(&self, delivery: &DeliveryRecord) -> Result<HandlerOutcome, PipelineError> {
        let event = self
            .store
            .find_event(delivery.event_id)
            .await?
            .ok_or(PipelineError::NotFound(delivery.event_id))?;
        let handler = self
            .registry
            .get(&delivery.handler_name)
            .ok_or_else(|| PipelineError::UnknownKind(delivery.handler_name.clone()))?;
        handler
            .handle(&event)
            .await
            .map_err(|e| PipelineError::Handler {
                handler: delivery.handler_name.clone(),
                message: e.to_string(),
            })
    }

    fn next_attempt_at(&self, attempts: u32, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        self.config.retry.next_attempt_at(attempts, now, &mut **rng)
    }
}

#[async_trait]
impl JobHandler for DeliveryDispatcher {
    fn handler_type(&self) -> &'static str {
        EVENT_DELIVERY_JOB
    }

    async fn run(&self, work_item_id: Uuid, cancel: &CancellationToken) -> Result<(), PipelineError> {
        self.deliver(work_item_id, cancel).await.map(|_| ())
    }

    async fn retry_after(&self, work_item_id: Uuid) -> Result<Option<Duration>, PipelineError> {
        let delivery = self.store.find_delivery_by_id(work_item_id).await?;
        Ok(delivery.and_then(|d| d.state.retry_after(self.clock.now())))
    }
}
