//! Ironlog Core: shared delivery-pipeline abstractions.
//!
//! This crate defines the work-item model, the store and trigger seams, and
//! the retry/sanitization policies that both the notification and the
//! fan-out specializations depend on. It contains no infrastructure code.

pub mod clock;
pub mod error;
pub mod job;
pub mod metrics;
pub mod repository;
pub mod retry;
pub mod rng;
pub mod sanitize;
pub mod work_item;
