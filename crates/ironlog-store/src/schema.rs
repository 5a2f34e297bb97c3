//! Work-item database schema.

use sqlx::migrate::Migrator;

/// Embedded migrations creating the `notifications`, `events` and
/// `event_deliveries` tables.
pub static MIGRATOR: Migrator = sqlx::migrate!("../../migrations");

/// Columns selected for a notification row.
pub(crate) const NOTIFICATION_COLUMNS: &str = "id, kind, correlation_id, recipient, payload, \
     status, attempts, last_attempt_at, sent_at, last_error, next_attempt_at, is_deleted, \
     created_at, updated_at";

/// Columns selected for an event row.
pub(crate) const EVENT_COLUMNS: &str =
    "id, event_type, correlation_id, payload, occurred_at, created_at";

/// Columns selected for a delivery row.
pub(crate) const DELIVERY_COLUMNS: &str = "id, event_id, event_type, handler_name, status, \
     attempts, last_attempt_at, sent_at, last_error, next_attempt_at, is_deleted, created_at, \
     updated_at";

/// Predicate shared by ready-listing queries; `$1` is `now`.
pub(crate) const READY_PREDICATE: &str = "NOT is_deleted AND (status = 'pending' \
     OR (status = 'failed' AND next_attempt_at IS NOT NULL AND next_attempt_at <= $1))";
