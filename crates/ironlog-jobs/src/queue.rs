//! Bounded job queue and the triggers that feed it.

use ironlog_core::job::{BackgroundTrigger, JobRequest};
use tokio::sync::mpsc::{self, error::TrySendError};

/// Creates a queue holding at most `capacity` pending jobs.
#[must_use]
pub fn job_queue(capacity: usize) -> (QueueTrigger, JobQueue) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (QueueTrigger { tx }, JobQueue { rx })
}

/// Producer side of the job queue. Cheap to clone.
#[derive(Debug, Clone)]
pub struct QueueTrigger {
    tx: mpsc::Sender<JobRequest>,
}

impl BackgroundTrigger for QueueTrigger {
    fn enqueue(&self, job: JobRequest) {
        match self.tx.try_send(job) {
            Ok(()) => {}
            Err(TrySendError::Full(job)) => {
                tracing::warn!(%job, "job queue full, dropping signal");
            }
            Err(TrySendError::Closed(job)) => {
                tracing::warn!(%job, "job runner stopped, dropping signal");
            }
        }
    }
}

/// Consumer side of the job queue, owned by the runner.
#[derive(Debug)]
pub struct JobQueue {
    rx: mpsc::Receiver<JobRequest>,
}

impl JobQueue {
    /// Waits for the next job. `None` once every trigger is dropped and the
    /// queue is drained.
    pub async fn recv(&mut self) -> Option<JobRequest> {
        self.rx.recv().await
    }
}

/// Trigger for deployments with background delivery disabled. Rows stay
/// pending until an operator or the sweep acts on them.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTrigger;

impl BackgroundTrigger for NoopTrigger {
    fn enqueue(&self, job: JobRequest) {
        tracing::debug!(%job, "background delivery disabled, signal ignored");
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;

    #[tokio::test]
    async fn test_trigger_feeds_queue_in_order() {
        // Arrange
        let (trigger, mut queue) = job_queue(4);
        let first = JobRequest::notification(Uuid::new_v4());
        let second = JobRequest::event_delivery(Uuid::new_v4());

        // Act
        trigger.enqueue(first.clone());
        trigger.enqueue(second.clone());
        drop(trigger);

        // Assert
        assert_eq!(queue.recv().await, Some(first));
        assert_eq!(queue.recv().await, Some(second));
        assert_eq!(queue.recv().await, None);
    }

    #[tokio::test]
    async fn test_full_queue_drops_signal_without_blocking() {
        // Arrange
        let (trigger, mut queue) = job_queue(1);
        let kept = JobRequest::notification(Uuid::new_v4());

        // Act
        trigger.enqueue(kept.clone());
        trigger.enqueue(JobRequest::notification(Uuid::new_v4()));
        drop(trigger);

        // Assert
        assert_eq!(queue.recv().await, Some(kept));
        assert_eq!(queue.recv().await, None);
    }

    #[test]
    fn test_enqueue_after_runner_stopped_is_harmless() {
        let (trigger, queue) = job_queue(1);
        drop(queue);

        trigger.enqueue(JobRequest::notification(Uuid::new_v4()));
        NoopTrigger.enqueue(JobRequest::notification(Uuid::new_v4()));
    }
}
