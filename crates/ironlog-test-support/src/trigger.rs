//! Recording trigger: captures enqueue signals instead of running jobs.

use std::sync::Mutex;

use ironlog_core::job::{BackgroundTrigger, JobRequest};

/// A trigger that records every job it is asked to enqueue.
#[derive(Debug, Default)]
pub struct RecordingTrigger {
    jobs: Mutex<Vec<JobRequest>>,
}

impl RecordingTrigger {
    /// Create an empty recording trigger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of all enqueued jobs, in order.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn jobs(&self) -> Vec<JobRequest> {
        self.jobs.lock().unwrap().clone()
    }
}

impl BackgroundTrigger for RecordingTrigger {
    fn enqueue(&self, job: JobRequest) {
        self.jobs.lock().unwrap().push(job);
    }
}
