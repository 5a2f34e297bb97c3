//! Ironlog API: operator HTTP surface and process wiring.

pub mod config;
pub mod error;
pub mod pipeline;
pub mod registration;
pub mod routes;
pub mod state;
