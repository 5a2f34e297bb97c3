//! Notification application services.

pub mod processor;
pub mod scheduler;
pub mod sweeper;
