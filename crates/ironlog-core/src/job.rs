//! Background trigger and job handler seams.
//!
//! Producers signal "run this work item soon" through a
//! [`BackgroundTrigger`]; a job runner later invokes the matching
//! [`JobHandler`]. The signal is advisory: the store, not the trigger, is the
//! durability boundary.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::PipelineError;

/// Handler type of the single-recipient notification processor.
pub const NOTIFICATION_JOB: &str = "notification.send";

/// Handler type of the fan-out delivery dispatcher.
pub const EVENT_DELIVERY_JOB: &str = "event.delivery";

/// A request to process one work item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobRequest {
    /// Which registered handler processes the item.
    pub handler_type: String,
    /// The work item identifier.
    pub work_item_id: Uuid,
}

impl JobRequest {
    /// A job for the notification processor.
    #[must_use]
    pub fn notification(id: Uuid) -> Self {
        Self {
            handler_type: NOTIFICATION_JOB.to_owned(),
            work_item_id: id,
        }
    }

    /// A job for the fan-out delivery dispatcher.
    #[must_use]
    pub fn event_delivery(id: Uuid) -> Self {
        Self {
            handler_type: EVENT_DELIVERY_JOB.to_owned(),
            work_item_id: id,
        }
    }
}

impl fmt::Display for JobRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.handler_type, self.work_item_id)
    }
}

/// Fire-and-forget signal that a work item should be processed soon.
pub trait BackgroundTrigger: Send + Sync {
    /// Schedules asynchronous processing. Never blocks and never fails the
    /// caller; a dropped signal is recovered by the reconciliation sweep.
    fn enqueue(&self, job: JobRequest);
}

/// Something a job runner can invoke with a work-item identifier.
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// The `handler_type` this handler serves.
    fn handler_type(&self) -> &'static str;

    /// Processes one work item. Must tolerate repeated invocation for the
    /// same id.
    async fn run(&self, work_item_id: Uuid, cancel: &CancellationToken)
    -> Result<(), PipelineError>;

    /// Time left until the item's next automatic attempt, `Duration::ZERO`
    /// if it is already due, or `None` if none is scheduled. Consulted after
    /// a failed run so that a re-run never lands inside the item's backoff.
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::Store` if the item cannot be loaded.
    async fn retry_after(&self, work_item_id: Uuid) -> Result<Option<Duration>, PipelineError>;
}
