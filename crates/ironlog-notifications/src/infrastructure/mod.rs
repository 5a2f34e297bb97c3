//! Concrete composers and senders.

pub mod senders;
pub mod smtp;
pub mod templates;
