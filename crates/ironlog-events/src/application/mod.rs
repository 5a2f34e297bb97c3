//! Fan-out application services.

pub mod dispatcher;
pub mod publisher;
