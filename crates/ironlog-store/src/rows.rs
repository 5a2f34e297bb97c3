//! Row mappings between PostgreSQL and the work-item model.

use chrono::{DateTime, Utc};
use ironlog_core::error::StoreError;
use ironlog_core::work_item::{
    DeliveryRecord, EventRecord, NotificationRecord, WorkItemState, WorkItemStatus,
};
use uuid::Uuid;

pub(crate) fn infra(err: sqlx::Error) -> StoreError {
    StoreError::Infrastructure(err.to_string())
}

pub(crate) fn to_i32(value: u32) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}

pub(crate) fn to_i64(value: u32) -> i64 {
    i64::from(value)
}

#[allow(clippy::too_many_arguments)]
fn state_from_columns(
    id: Uuid,
    status: &str,
    attempts: i32,
    last_attempt_at: Option<DateTime<Utc>>,
    sent_at: Option<DateTime<Utc>>,
    last_error: Option<String>,
    next_attempt_at: Option<DateTime<Utc>>,
) -> Result<WorkItemState, StoreError> {
    let status: WorkItemStatus = status
        .parse()
        .map_err(|message| StoreError::CorruptRow { id, message })?;
    let attempts = u32::try_from(attempts).map_err(|_| StoreError::CorruptRow {
        id,
        message: format!("negative attempts: {attempts}"),
    })?;
    Ok(WorkItemState {
        status,
        attempts,
        last_attempt_at,
        sent_at,
        last_error,
        next_attempt_at,
    })
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct NotificationRow {
    id: Uuid,
    kind: String,
    correlation_id: String,
    recipient: String,
    payload: serde_json::Value,
    status: String,
    attempts: i32,
    last_attempt_at: Option<DateTime<Utc>>,
    sent_at: Option<DateTime<Utc>>,
    last_error: Option<String>,
    next_attempt_at: Option<DateTime<Utc>>,
    is_deleted: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<NotificationRow> for NotificationRecord {
    type Error = StoreError;

    fn try_from(row: NotificationRow) -> Result<Self, Self::Error> {
        let state = state_from_columns(
            row.id,
            &row.status,
            row.attempts,
            row.last_attempt_at,
            row.sent_at,
            row.last_error,
            row.next_attempt_at,
        )?;
        Ok(Self {
            id: row.id,
            kind: row.kind,
            correlation_id: row.correlation_id,
            recipient: row.recipient,
            payload: row.payload,
            state,
            is_deleted: row.is_deleted,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct EventRow {
    id: Uuid,
    event_type: String,
    correlation_id: Option<String>,
    payload: serde_json::Value,
    occurred_at: DateTime<Utc>,
    created_at: DateTime<Utc>,
}

impl From<EventRow> for EventRecord {
    fn from(row: EventRow) -> Self {
        Self {
            id: row.id,
            event_type: row.event_type,
            correlation_id: row.correlation_id,
            payload: row.payload,
            occurred_at: row.occurred_at,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct DeliveryRow {
    id: Uuid,
    event_id: Uuid,
    event_type: String,
    handler_name: String,
    status: String,
    attempts: i32,
    last_attempt_at: Option<DateTime<Utc>>,
    sent_at: Option<DateTime<Utc>>,
    last_error: Option<String>,
    next_attempt_at: Option<DateTime<Utc>>,
    is_deleted: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<DeliveryRow> for DeliveryRecord {
    type Error = StoreError;

    fn try_from(row: DeliveryRow) -> Result<Self, Self::Error> {
        let state = state_from_columns(
            row.id,
            &row.status,
            row.attempts,
            row.last_attempt_at,
            row.sent_at,
            row.last_error,
            row.next_attempt_at,
        )?;
        Ok(Self {
            id: row.id,
            event_id: row.event_id,
            event_type: row.event_type,
            handler_name: row.handler_name,
            state,
            is_deleted: row.is_deleted,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}
