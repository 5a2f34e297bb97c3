//! Event handlers and their registry.

pub mod handler;
pub mod registry;
