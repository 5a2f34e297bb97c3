//! Built-in event handlers.

pub mod audit;
