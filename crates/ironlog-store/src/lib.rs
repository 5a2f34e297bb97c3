//! PostgreSQL-backed work-item store.
//!
//! Implements the `NotificationStore` and `EventStore` traits from
//! `ironlog-core`. Idempotent creation uses `INSERT .. ON CONFLICT DO NOTHING`
//! against partial unique indexes; claims are single conditional `UPDATE`s.

pub mod pg_event_store;
pub mod pg_notification_store;
mod rows;
pub mod schema;
