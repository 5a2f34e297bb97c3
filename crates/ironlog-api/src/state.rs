//! Shared application state.

use std::sync::Arc;

use ironlog_core::repository::{EventStore, NotificationStore};
use ironlog_events::application::publisher::EventPublisher;
use ironlog_notifications::application::scheduler::NotificationScheduler;
use metrics_exporter_prometheus::PrometheusHandle;

use crate::pipeline::Pipeline;

/// Application state shared across all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// Notification rows, for reads.
    pub notifications: Arc<dyn NotificationStore>,
    /// Events and deliveries, for reads.
    pub events: Arc<dyn EventStore>,
    /// Notification producer.
    pub scheduler: Arc<NotificationScheduler>,
    /// Event producer.
    pub publisher: Arc<EventPublisher>,
    /// Renders the Prometheus exposition.
    pub metrics: PrometheusHandle,
    /// Attempt ceiling; rows at it are dead letters.
    pub max_attempts: u32,
}

impl AppState {
    /// Create new application state.
    #[must_use]
    pub fn new(
        notifications: Arc<dyn NotificationStore>,
        events: Arc<dyn EventStore>,
        pipeline: &Pipeline,
        metrics: PrometheusHandle,
        max_attempts: u32,
    ) -> Self {
        Self {
            notifications,
            events,
            scheduler: Arc::clone(&pipeline.scheduler),
            publisher: Arc::clone(&pipeline.publisher),
            metrics,
            max_attempts,
        }
    }
}
