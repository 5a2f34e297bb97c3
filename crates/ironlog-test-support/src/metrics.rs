//! Recording metrics: captures counter increments for assertions.

use std::sync::Mutex;

use ironlog_core::metrics::{MetricsSink, WorkItemFamily};

/// One recorded counter increment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetricEvent {
    /// `enqueued` for the kind.
    Enqueued(WorkItemFamily, String),
    /// `sent` for the kind.
    Sent(WorkItemFamily, String),
    /// `failed` for the kind.
    Failed(WorkItemFamily, String),
    /// `retried` for the kind.
    Retried(WorkItemFamily, String),
}

/// A metrics sink that records every increment.
#[derive(Debug, Default)]
pub struct RecordingMetrics {
    events: Mutex<Vec<MetricEvent>>,
}

impl RecordingMetrics {
    /// Create an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of all recorded increments, in order.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn events(&self) -> Vec<MetricEvent> {
        self.events.lock().unwrap().clone()
    }

    fn push(&self, event: MetricEvent) {
        self.events.lock().unwrap().push(event);
    }
}

impl MetricsSink for RecordingMetrics {
    fn enqueued(&self, family: WorkItemFamily, kind: &str) {
        self.push(MetricEvent::Enqueued(family, kind.to_owned()));
    }

    fn sent(&self, family: WorkItemFamily, kind: &str) {
        self.push(MetricEvent::Sent(family, kind.to_owned()));
    }

    fn failed(&self, family: WorkItemFamily, kind: &str) {
        self.push(MetricEvent::Failed(family, kind.to_owned()));
    }

    fn retried(&self, family: WorkItemFamily, kind: &str) {
        self.push(MetricEvent::Retried(family, kind.to_owned()));
    }
}
