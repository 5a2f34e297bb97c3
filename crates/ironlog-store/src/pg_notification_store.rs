//! `PostgreSQL` implementation of the `NotificationStore` trait.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use ironlog_core::error::StoreError;
use ironlog_core::repository::{CLAIM_EXPIRED_ERROR, NotificationStore};
use ironlog_core::work_item::{CorrelationKey, CreateOutcome, NotificationRecord};

use crate::rows::{NotificationRow, infra, to_i32, to_i64};
use crate::schema::{NOTIFICATION_COLUMNS, READY_PREDICATE};

/// PostgreSQL-backed notification store.
#[derive(Debug, Clone)]
pub struct PgNotificationStore {
    pool: PgPool,
}

impl PgNotificationStore {
    /// Creates a new `PgNotificationStore`.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn collect(rows: Vec<NotificationRow>) -> Result<Vec<NotificationRecord>, StoreError> {
    rows.into_iter().map(NotificationRecord::try_from).collect()
}

#[async_trait]
impl NotificationStore for PgNotificationStore {
    async fn create(
        &self,
        record: NotificationRecord,
    ) -> Result<CreateOutcome<NotificationRecord, CorrelationKey>, StoreError> {
        let inserted = sqlx::query(
            r"
            INSERT INTO notifications
                (id, kind, correlation_id, recipient, payload, status, attempts,
                 last_attempt_at, sent_at, last_error, next_attempt_at, is_deleted,
                 created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            ON CONFLICT (kind, correlation_id, recipient) WHERE NOT is_deleted DO NOTHING
            ",
        )
        .bind(record.id)
        .bind(&record.kind)
        .bind(&record.correlation_id)
        .bind(&record.recipient)
        .bind(&record.payload)
        .bind(record.state.status.as_str())
        .bind(to_i32(record.state.attempts))
        .bind(record.state.last_attempt_at)
        .bind(record.state.sent_at)
        .bind(&record.state.last_error)
        .bind(record.state.next_attempt_at)
        .bind(record.is_deleted)
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await
        .map_err(infra)?;

        if inserted.rows_affected() == 0 {
            let key = record.correlation_key();
            tracing::debug!(correlation_key = %key, "notification insert hit unique key");
            return Ok(CreateOutcome::Conflict(key));
        }
        Ok(CreateOutcome::Created(record))
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<NotificationRecord>, StoreError> {
        let sql = format!("SELECT {NOTIFICATION_COLUMNS} FROM notifications WHERE id = $1");
        sqlx::query_as::<_, NotificationRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(infra)?
            .map(NotificationRecord::try_from)
            .transpose()
    }

    async fn find_by_correlation(
        &self,
        key: &CorrelationKey,
    ) -> Result<Option<NotificationRecord>, StoreError> {
        let sql = format!(
            "SELECT {NOTIFICATION_COLUMNS} FROM notifications \
             WHERE kind = $1 AND correlation_id = $2 AND recipient = $3 AND NOT is_deleted"
        );
        sqlx::query_as::<_, NotificationRow>(&sql)
            .bind(&key.kind)
            .bind(&key.correlation_id)
            .bind(&key.recipient)
            .fetch_optional(&self.pool)
            .await
            .map_err(infra)?
            .map(NotificationRecord::try_from)
            .transpose()
    }

    async fn list_ready(
        &self,
        batch_size: u32,
        now: DateTime<Utc>,
    ) -> Result<Vec<NotificationRecord>, StoreError> {
        let sql = format!(
            "SELECT {NOTIFICATION_COLUMNS} FROM notifications WHERE {READY_PREDICATE} \
             ORDER BY created_at ASC LIMIT $2"
        );
        let rows = sqlx::query_as::<_, NotificationRow>(&sql)
            .bind(now)
            .bind(to_i64(batch_size))
            .fetch_all(&self.pool)
            .await
            .map_err(infra)?;
        collect(rows)
    }

    async fn try_claim(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
        max_attempts: u32,
    ) -> Result<bool, StoreError> {
        let sql = format!(
            "UPDATE notifications \
             SET status = 'processing', attempts = attempts + 1, last_attempt_at = $1, \
                 next_attempt_at = NULL, updated_at = $1 \
             WHERE id = $2 AND attempts < $3 AND {READY_PREDICATE}"
        );
        let claimed = sqlx::query(&sql)
            .bind(now)
            .bind(id)
            .bind(to_i32(max_attempts))
            .execute(&self.pool)
            .await
            .map_err(infra)?;
        Ok(claimed.rows_affected() == 1)
    }

    async fn save(&self, record: &NotificationRecord) -> Result<(), StoreError> {
        let saved = sqlx::query(
            r"
            UPDATE notifications
            SET status = $2, attempts = GREATEST(attempts, $3), last_attempt_at = $4,
                sent_at = $5, last_error = $6, next_attempt_at = $7, updated_at = $8
            WHERE id = $1 AND status <> 'sent'
            ",
        )
        .bind(record.id)
        .bind(record.state.status.as_str())
        .bind(to_i32(record.state.attempts))
        .bind(record.state.last_attempt_at)
        .bind(record.state.sent_at)
        .bind(&record.state.last_error)
        .bind(record.state.next_attempt_at)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await
        .map_err(infra)?;

        if saved.rows_affected() == 0 {
            tracing::warn!(notification_id = %record.id, "ignored write to missing or settled notification");
        }
        Ok(())
    }

    async fn requeue(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
        max_attempts: u32,
    ) -> Result<bool, StoreError> {
        let requeued = sqlx::query(
            r"
            UPDATE notifications
            SET next_attempt_at = $2, updated_at = $2
            WHERE id = $1 AND status = 'failed' AND attempts < $3 AND NOT is_deleted
            ",
        )
        .bind(id)
        .bind(now)
        .bind(to_i32(max_attempts))
        .execute(&self.pool)
        .await
        .map_err(infra)?;
        Ok(requeued.rows_affected() == 1)
    }

    async fn expire_claims(
        &self,
        stale_before: DateTime<Utc>,
        now: DateTime<Utc>,
        max_attempts: u32,
    ) -> Result<u64, StoreError> {
        let expired = sqlx::query(
            r"
            UPDATE notifications
            SET status = 'failed', last_error = $3, updated_at = $2,
                next_attempt_at = CASE WHEN attempts < $4 THEN $2 ELSE NULL END
            WHERE status = 'processing' AND NOT is_deleted
              AND (last_attempt_at IS NULL OR last_attempt_at < $1)
            ",
        )
        .bind(stale_before)
        .bind(now)
        .bind(CLAIM_EXPIRED_ERROR)
        .bind(to_i32(max_attempts))
        .execute(&self.pool)
        .await
        .map_err(infra)?;
        Ok(expired.rows_affected())
    }

    async fn list_exhausted(
        &self,
        max_attempts: u32,
        limit: u32,
    ) -> Result<Vec<NotificationRecord>, StoreError> {
        let sql = format!(
            "SELECT {NOTIFICATION_COLUMNS} FROM notifications \
             WHERE status = 'failed' AND attempts >= $1 AND NOT is_deleted \
             ORDER BY updated_at DESC LIMIT $2"
        );
        let rows = sqlx::query_as::<_, NotificationRow>(&sql)
            .bind(to_i32(max_attempts))
            .bind(to_i64(limit))
            .fetch_all(&self.pool)
            .await
            .map_err(infra)?;
        collect(rows)
    }
}
