//! Work-item model shared by the notification and fan-out specializations.
//!
//! A work item is a durable row representing one side effect that must
//! eventually happen. Its status and attempt bookkeeping live in
//! [`WorkItemState`], so every store and processor applies the same state
//! machine:
//!
//! ```text
//! Pending ──claim──▶ Processing ──succeed──▶ Sent
//!    ▲                   │
//!    │                   └──fail──▶ Failed ──requeue / backoff──▶ (claimable)
//! ```

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle status of a work item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkItemStatus {
    /// Recorded, waiting to be claimed.
    Pending,
    /// Claimed by a processor; an attempt is in flight.
    Processing,
    /// The side effect completed (delivered, for fan-out deliveries).
    Sent,
    /// The last attempt failed.
    Failed,
}

impl WorkItemStatus {
    /// Returns the persisted representation.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Sent => "sent",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for WorkItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkItemStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "sent" => Ok(Self::Sent),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown work item status: {other}")),
        }
    }
}

/// Status and attempt bookkeeping of a work item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItemState {
    /// Current lifecycle status.
    pub status: WorkItemStatus,
    /// Number of attempts that have begun.
    pub attempts: u32,
    /// When the latest attempt began.
    pub last_attempt_at: Option<DateTime<Utc>>,
    /// When the side effect completed.
    pub sent_at: Option<DateTime<Utc>>,
    /// Sanitized summary of the latest failure.
    pub last_error: Option<String>,
    /// Not-before time for the next attempt. `None` on a failed item means it
    /// is not retried until explicitly re-enqueued.
    pub next_attempt_at: Option<DateTime<Utc>>,
}

impl Default for WorkItemState {
    fn default() -> Self {
        Self::pending()
    }
}

impl WorkItemState {
    /// A freshly recorded item.
    #[must_use]
    pub fn pending() -> Self {
        Self {
            status: WorkItemStatus::Pending,
            attempts: 0,
            last_attempt_at: None,
            sent_at: None,
            last_error: None,
            next_attempt_at: None,
        }
    }

    /// Whether a sweep should pick this item up at `now`.
    #[must_use]
    pub fn is_ready(&self, now: DateTime<Utc>) -> bool {
        match self.status {
            WorkItemStatus::Pending => true,
            WorkItemStatus::Failed => self.next_attempt_at.is_some_and(|at| at <= now),
            WorkItemStatus::Processing | WorkItemStatus::Sent => false,
        }
    }

    /// Time from `now` until `next_attempt_at`, zero once it has passed.
    #[must_use]
    pub fn retry_after(&self, now: DateTime<Utc>) -> Option<std::time::Duration> {
        self.next_attempt_at.map(|at| (at - now).to_std().unwrap_or_default())
    }

    /// Whether a claim at `now` may succeed under the given attempt ceiling.
    #[must_use]
    pub fn is_claimable(&self, now: DateTime<Utc>, max_attempts: u32) -> bool {
        self.attempts < max_attempts && self.is_ready(now)
    }

    /// Whether the item failed and has no attempts left.
    #[must_use]
    pub fn is_exhausted(&self, max_attempts: u32) -> bool {
        self.status == WorkItemStatus::Failed && self.attempts >= max_attempts
    }

    /// Begins an attempt: `Processing`, one more attempt, stamped at `now`.
    pub fn claim(&mut self, now: DateTime<Utc>) {
        self.status = WorkItemStatus::Processing;
        self.attempts += 1;
        self.last_attempt_at = Some(now);
        self.next_attempt_at = None;
    }

    /// Records a completed side effect.
    pub fn succeed(&mut self, now: DateTime<Utc>) {
        self.status = WorkItemStatus::Sent;
        self.sent_at = Some(now);
        self.last_error = None;
        self.next_attempt_at = None;
    }

    /// Records a failed attempt. `retry_at` arms automatic retry.
    pub fn fail(&mut self, reason: String, retry_at: Option<DateTime<Utc>>) {
        self.status = WorkItemStatus::Failed;
        self.last_error = Some(reason);
        self.next_attempt_at = retry_at;
    }

    /// Marks a failed item with attempts left as explicitly re-enqueued,
    /// ready from `now`. Returns whether the item was re-armed.
    pub fn requeue(&mut self, now: DateTime<Utc>, max_attempts: u32) -> bool {
        let rearm = self.status == WorkItemStatus::Failed && self.attempts < max_attempts;
        if rearm {
            self.next_attempt_at = Some(now);
        }
        rearm
    }
}

/// Longest kind, event type or correlation id the store accepts.
pub const MAX_KEY_CHARS: usize = 255;

/// Longest recipient address the store accepts.
pub const MAX_RECIPIENT_CHARS: usize = 320;

/// Rejects a value longer than its column allows.
///
/// # Errors
///
/// Returns a message naming `field` when `value` exceeds `max` characters.
pub fn ensure_fits(field: &str, value: &str, max: usize) -> Result<(), String> {
    let len = value.chars().count();
    if len > max {
        return Err(format!("{field} has {len} characters, at most {max} allowed"));
    }
    Ok(())
}

/// Identity that makes notification creation idempotent.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CorrelationKey {
    /// Notification kind.
    pub kind: String,
    /// Business correlation identifier (e.g. the user id).
    pub correlation_id: String,
    /// Recipient address.
    pub recipient: String,
}

impl fmt::Display for CorrelationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.kind, self.correlation_id, self.recipient)
    }
}

/// Identity that makes delivery creation idempotent.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeliveryKey {
    /// Parent event.
    pub event_id: Uuid,
    /// Handler that must act on the event.
    pub handler_name: String,
}

impl fmt::Display for DeliveryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.event_id, self.handler_name)
    }
}

/// Result of an idempotent insert.
#[derive(Debug, Clone, PartialEq)]
pub enum CreateOutcome<T, K> {
    /// The row was inserted.
    Created(T),
    /// A live row with this key already exists; the caller must re-read it.
    Conflict(K),
}

/// A single-recipient notification work item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationRecord {
    /// Unique identifier.
    pub id: Uuid,
    /// Notification kind, e.g. `user.registration.welcome`.
    pub kind: String,
    /// Business correlation identifier.
    pub correlation_id: String,
    /// Recipient address.
    pub recipient: String,
    /// Versioned payload envelope.
    pub payload: serde_json::Value,
    /// Status and attempts.
    pub state: WorkItemState,
    /// Hides superseded rows from dispatch queries.
    pub is_deleted: bool,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last modification time.
    pub updated_at: DateTime<Utc>,
}

impl NotificationRecord {
    /// Builds a new pending record.
    #[must_use]
    pub fn new(key: CorrelationKey, payload: serde_json::Value, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::now_v7(),
            kind: key.kind,
            correlation_id: key.correlation_id,
            recipient: key.recipient,
            payload,
            state: WorkItemState::pending(),
            is_deleted: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Returns the correlation key of this record.
    #[must_use]
    pub fn correlation_key(&self) -> CorrelationKey {
        CorrelationKey {
            kind: self.kind.clone(),
            correlation_id: self.correlation_id.clone(),
            recipient: self.recipient.clone(),
        }
    }
}

/// A business event awaiting fan-out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    /// Unique identifier.
    pub id: Uuid,
    /// Event type, e.g. `training.completed`.
    pub event_type: String,
    /// Optional business correlation identifier.
    pub correlation_id: Option<String>,
    /// Event payload.
    pub payload: serde_json::Value,
    /// When the event happened.
    pub occurred_at: DateTime<Utc>,
    /// When it was recorded.
    pub created_at: DateTime<Utc>,
}

impl EventRecord {
    /// Builds a new event occurring at `now`.
    #[must_use]
    pub fn new(
        event_type: impl Into<String>,
        correlation_id: Option<String>,
        payload: serde_json::Value,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            event_type: event_type.into(),
            correlation_id,
            payload,
            occurred_at: now,
            created_at: now,
        }
    }
}

/// One handler's obligation to act on one event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryRecord {
    /// Unique identifier.
    pub id: Uuid,
    /// Parent event.
    pub event_id: Uuid,
    /// Event type, copied for metrics tagging.
    pub event_type: String,
    /// Target handler.
    pub handler_name: String,
    /// Status and attempts.
    pub state: WorkItemState,
    /// Hides superseded rows from dispatch queries.
    pub is_deleted: bool,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last modification time.
    pub updated_at: DateTime<Utc>,
}

impl DeliveryRecord {
    /// Builds a new pending delivery of `event` to `handler_name`.
    #[must_use]
    pub fn new(event: &EventRecord, handler_name: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::now_v7(),
            event_id: event.id,
            event_type: event.event_type.clone(),
            handler_name: handler_name.into(),
            state: WorkItemState::pending(),
            is_deleted: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Returns the idempotency key of this delivery.
    #[must_use]
    pub fn key(&self) -> DeliveryKey {
        DeliveryKey {
            event_id: self.event_id,
            handler_name: self.handler_name.clone(),
        }
    }
}
