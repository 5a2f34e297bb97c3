//! Work-item counters.
//!
//! Metrics are a pure side channel. The pipeline reports through
//! [`MetricsSink`]; [`CounterMetrics`] forwards to the `metrics` facade so
//! any installed recorder (Prometheus in the server) picks them up.

use metrics::counter;

/// Which specialization a counter belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkItemFamily {
    /// Single-recipient notifications.
    Notification,
    /// Per-handler fan-out deliveries.
    EventDelivery,
}

impl WorkItemFamily {
    /// Label value for this family.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Notification => "notification",
            Self::EventDelivery => "event_delivery",
        }
    }
}

/// Receiver of the four pipeline counters, tagged by family and kind.
pub trait MetricsSink: Send + Sync {
    /// A work item was recorded and signalled.
    fn enqueued(&self, family: WorkItemFamily, kind: &str);
    /// A side effect completed.
    fn sent(&self, family: WorkItemFamily, kind: &str);
    /// An attempt ended in `failed`.
    fn failed(&self, family: WorkItemFamily, kind: &str);
    /// An attempt began on an item that had been attempted before.
    fn retried(&self, family: WorkItemFamily, kind: &str);
}

/// [`MetricsSink`] backed by the `metrics` crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct CounterMetrics;

impl MetricsSink for CounterMetrics {
    fn enqueued(&self, family: WorkItemFamily, kind: &str) {
        counter!(
            "ironlog_work_items_enqueued_total",
            "family" => family.as_str(),
            "kind" => kind.to_owned()
        )
        .increment(1);
    }

    fn sent(&self, family: WorkItemFamily, kind: &str) {
        counter!(
            "ironlog_work_items_sent_total",
            "family" => family.as_str(),
            "kind" => kind.to_owned()
        )
        .increment(1);
    }

    fn failed(&self, family: WorkItemFamily, kind: &str) {
        counter!(
            "ironlog_work_items_failed_total",
            "family" => family.as_str(),
            "kind" => kind.to_owned()
        )
        .increment(1);
    }

    fn retried(&self, family: WorkItemFamily, kind: &str) {
        counter!(
            "ironlog_work_items_retried_total",
            "family" => family.as_str(),
            "kind" => kind.to_owned()
        )
        .increment(1);
    }
}
