//! Notification domain: policies, payloads, composed messages and the
//! collaborator seams the processor depends on.

pub mod catalog;
pub mod error;
pub mod flags;
pub mod message;
pub mod payload;
pub mod policy;
