//! Ironlog Jobs: the in-process background trigger.
//!
//! [`queue::job_queue`] hands producers a [`queue::QueueTrigger`] and hands
//! the [`runner::JobRunner`] the receiving end. Signals are advisory: a full
//! queue drops them and the reconciliation sweep picks the rows up later.

pub mod queue;
pub mod runner;
