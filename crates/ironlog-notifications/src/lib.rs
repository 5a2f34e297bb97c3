//! Ironlog: single-recipient notification scheduling and delivery.
//!
//! Business code calls [`application::scheduler::NotificationScheduler`] to
//! record a notification intent; the
//! [`application::processor::NotificationProcessor`] later composes and
//! sends it, and the [`application::sweeper::NotificationSweeper`] picks up
//! anything whose trigger signal was lost.

pub mod application;
pub mod domain;
pub mod infrastructure;
