//! Ironlog: fan-out delivery of domain events.
//!
//! One published event becomes one delivery per subscribed handler. Each
//! delivery is claimed, attempted and retried on its own, so a failing
//! handler never causes a succeeding one to run twice.

pub mod application;
pub mod domain;
pub mod infrastructure;
