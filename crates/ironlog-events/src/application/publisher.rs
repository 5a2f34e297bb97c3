//! Fan-out producer.
//!
//! Publishing stores the event, then creates one delivery per subscribed
//! handler with the same idempotency rules as notification scheduling:
//! a live delivery is left alone, a failed one below the ceiling is
//! re-armed, an exhausted one is reported, and a creation race is resolved by
//! re-reading the winner.

use std::future::Future;
use std::sync::Arc;

use ironlog_core::clock::Clock;
use ironlog_core::error::{PipelineError, StoreError};
use ironlog_core::job::{BackgroundTrigger, JobRequest};
use ironlog_core::metrics::{CounterMetrics, MetricsSink, WorkItemFamily};
use ironlog_core::repository::EventStore;
use ironlog_core::retry::RetryPolicy;
use ironlog_core::work_item::{
    CreateOutcome, DeliveryKey, DeliveryRecord, EventRecord, MAX_KEY_CHARS, WorkItemStatus,
    ensure_fits,
};
use serde::Serialize;
use uuid::Uuid;

use crate::domain::registry::HandlerRegistry;

/// An event to publish.
#[derive(Debug, Clone, PartialEq)]
pub struct PublishRequest {
    /// Event type, e.g. `training.completed`.
    pub event_type: String,
    /// Optional business correlation identifier.
    pub correlation_id: Option<String>,
    /// Event payload.
    pub payload: serde_json::Value,
}

/// How one handler's delivery was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FanOutOutcome {
    /// A new delivery was created and signalled.
    Created,
    /// A concurrent publisher created it first; that delivery was signalled.
    JoinedExisting,
    /// A live delivery exists and is not failed.
    AlreadyScheduled,
    /// A failed delivery was re-armed and signalled.
    Requeued,
    /// A failed delivery has no re-enqueues left.
    Exhausted,
}

/// One handler's entry in a [`PublishReport`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FanOutEntry {
    /// Handler name.
    pub handler_name: String,
    /// Delivery identifier.
    pub delivery_id: Uuid,
    /// How the delivery was resolved.
    pub outcome: FanOutOutcome,
}

/// Result of publishing or re-triggering an event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PublishReport {
    /// The event.
    pub event_id: Uuid,
    /// One entry per subscribed handler.
    pub deliveries: Vec<FanOutEntry>,
}

/// Runs a store write on its own task so that a caller dropped mid-await
/// cannot abandon it half-issued.
async fn detached<T, F>(write: F) -> Result<T, PipelineError>
where
    T: Send + 'static,
    F: Future<Output = Result<T, StoreError>> + Send + 'static,
{
    tokio::spawn(write)
        .await
        .map_err(|e| StoreError::Infrastructure(format!("store task failed: {e}")))?
        .map_err(PipelineError::from)
}

/// Stores events and fans them out to subscribed handlers.
pub struct EventPublisher {
    store: Arc<dyn EventStore>,
    registry: Arc<HandlerRegistry>,
    trigger: Arc<dyn BackgroundTrigger>,
    clock: Arc<dyn Clock>,
    metrics: Arc<dyn MetricsSink>,
    max_manual_requeue_attempts: u32,
}

impl EventPublisher {
    /// Creates a publisher with counter metrics and the default requeue
    /// ceiling.
    #[must_use]
    pub fn new(
        store: Arc<dyn EventStore>,
        registry: Arc<HandlerRegistry>,
        trigger: Arc<dyn BackgroundTrigger>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            registry,
            trigger,
            clock,
            metrics: Arc::new(CounterMetrics),
            max_manual_requeue_attempts: RetryPolicy::DEFAULT_MAX_ATTEMPTS,
        }
    }

    /// Replaces the metrics sink.
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Sets how many attempts a failed delivery may have and still be
    /// re-enqueued.
    #[must_use]
    pub fn with_max_manual_requeue_attempts(mut self, attempts: u32) -> Self {
        self.max_manual_requeue_attempts = attempts;
        self
    }

    /// Stores a new event and fans it out.
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::Payload` if the event type or correlation id
    /// is too long to store, or `PipelineError::Store` if the store fails.
    /// Deliveries created before a store failure stay in place and are
    /// picked up by dispatch.
    pub async fn publish(&self, request: PublishRequest) -> Result<PublishReport, PipelineError> {
        ensure_fits("event_type", &request.event_type, MAX_KEY_CHARS)
            .and_then(|()| match &request.correlation_id {
                Some(id) => ensure_fits("correlation_id", id, MAX_KEY_CHARS),
                None => Ok(()),
            })
            .map_err(|message| PipelineError::Payload {
                kind: request.event_type.chars().take(MAX_KEY_CHARS).collect(),
                message,
            })?;
        let event = EventRecord::new(
            request.event_type,
            request.correlation_id,
            request.payload,
            self.clock.now(),
        );
        let store = Arc::clone(&self.store);
        let event = detached(async move { store.create_event(event).await }).await?;
        tracing::info!(
            event_id = %event.id,
            event_type = %event.event_type,
            "event published"
        );
        self.fan_out(&event).await
    }

    /// Re-runs the fan-out of a stored event: missing deliveries are
    /// created, failed ones below the ceiling re-armed.
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::NotFound` if the event does not exist, or
    /// `PipelineError::Store` if the store fails.
    pub async fn retrigger(&self, event_id: Uuid) -> Result<PublishReport, PipelineError> {
        let event = self
            .store
            .find_event(event_id)
            .await?
            .ok_or(PipelineError::NotFound(event_id))?;
        tracing::info!(event_id = %event.id, event_type = %event.event_type, "event re-triggered");
        self.fan_out(&event).await
    }

    async fn fan_out(&self, event: &EventRecord) -> Result<PublishReport, PipelineError> {
        let handlers = self.registry.handlers_for(&event.event_type);
        if handlers.is_empty() {
            tracing::debug!(event_type = %event.event_type, "no handlers subscribed");
        }

        let mut deliveries = Vec::with_capacity(handlers.len());
        for handler in handlers {
            let key = DeliveryKey {
                event_id: event.id,
                handler_name: handler.name().to_owned(),
            };
            let (delivery_id, outcome) = self.ensure_delivery(event, key.clone()).await?;
            deliveries.push(FanOutEntry {
                handler_name: key.handler_name,
                delivery_id,
                outcome,
            });
        }

        Ok(PublishReport {
            event_id: event.id,
            deliveries,
        })
    }

    async fn ensure_delivery(
        &self,
        event: &EventRecord,
        key: DeliveryKey,
    ) -> Result<(Uuid, FanOutOutcome), PipelineError> {
        if let Some(existing) = self.store.find_delivery(&key).await? {
            return self.resolve_existing(existing).await;
        }

        let delivery = DeliveryRecord::new(event, key.handler_name, self.clock.now());
        let store = Arc::clone(&self.store);
        match detached(async move { store.create_delivery(delivery).await }).await? {
            CreateOutcome::Created(delivery) => {
                self.trigger.enqueue(JobRequest::event_delivery(delivery.id));
                self.metrics
                    .enqueued(WorkItemFamily::EventDelivery, &delivery.event_type);
                tracing::debug!(
                    delivery_id = %delivery.id,
                    handler = %delivery.handler_name,
                    "delivery scheduled"
                );
                Ok((delivery.id, FanOutOutcome::Created))
            }
            CreateOutcome::Conflict(key) => {
                let winner = self.store.find_delivery(&key).await?.ok_or_else(|| {
                    StoreError::Infrastructure(format!("conflict on {key} but no live delivery"))
                })?;
                self.trigger.enqueue(JobRequest::event_delivery(winner.id));
                Ok((winner.id, FanOutOutcome::JoinedExisting))
            }
        }
    }

    async fn resolve_existing(
        &self,
        existing: DeliveryRecord,
    ) -> Result<(Uuid, FanOutOutcome), PipelineError> {
        if existing.state.status != WorkItemStatus::Failed {
            return Ok((existing.id, FanOutOutcome::AlreadyScheduled));
        }
        if existing.state.attempts >= self.max_manual_requeue_attempts {
            tracing::warn!(
                delivery_id = %existing.id,
                handler = %existing.handler_name,
                attempts = existing.state.attempts,
                "delivery exhausted; not re-enqueued"
            );
            return Ok((existing.id, FanOutOutcome::Exhausted));
        }

        let requeued = self
            .store
            .requeue_delivery(existing.id, self.clock.now(), self.max_manual_requeue_attempts)
            .await?;
        if !requeued {
            tracing::debug!(
                delivery_id = %existing.id,
                handler = %existing.handler_name,
                "delivery changed since lookup; not re-enqueued"
            );
            return Ok((existing.id, FanOutOutcome::AlreadyScheduled));
        }
        self.trigger.enqueue(JobRequest::event_delivery(existing.id));
        tracing::info!(
            delivery_id = %existing.id,
            handler = %existing.handler_name,
            "failed delivery re-enqueued"
        );
        Ok((existing.id, FanOutOutcome::Requeued))
    }
}
