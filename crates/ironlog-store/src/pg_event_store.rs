//! `PostgreSQL` implementation of the `EventStore` trait.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use ironlog_core::error::StoreError;
use ironlog_core::repository::{CLAIM_EXPIRED_ERROR, EventStore};
use ironlog_core::work_item::{CreateOutcome, DeliveryKey, DeliveryRecord, EventRecord};

use crate::rows::{DeliveryRow, EventRow, infra, to_i32, to_i64};
use crate::schema::{DELIVERY_COLUMNS, EVENT_COLUMNS, READY_PREDICATE};

/// PostgreSQL-backed event and delivery store.
#[derive(Debug, Clone)]
pub struct PgEventStore {
    pool: PgPool,
}

impl PgEventStore {
    /// Creates a new `PgEventStore`.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn collect(rows: Vec<DeliveryRow>) -> Result<Vec<DeliveryRecord>, StoreError> {
    rows.into_iter().map(DeliveryRecord::try_from).collect()
}

#[async_trait]
impl EventStore for PgEventStore {
    async fn create_event(&self, event: EventRecord) -> Result<EventRecord, StoreError> {
        sqlx::query(
            r"
            INSERT INTO events (id, event_type, correlation_id, payload, occurred_at, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ",
        )
        .bind(event.id)
        .bind(&event.event_type)
        .bind(&event.correlation_id)
        .bind(&event.payload)
        .bind(event.occurred_at)
        .bind(event.created_at)
        .execute(&self.pool)
        .await
        .map_err(infra)?;
        Ok(event)
    }

    async fn find_event(&self, id: Uuid) -> Result<Option<EventRecord>, StoreError> {
        let sql = format!("SELECT {EVENT_COLUMNS} FROM events WHERE id = $1");
        let row = sqlx::query_as::<_, EventRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(infra)?;
        Ok(row.map(EventRecord::from))
    }

    async fn create_delivery(
        &self,
        delivery: DeliveryRecord,
    ) -> Result<CreateOutcome<DeliveryRecord, DeliveryKey>, StoreError> {
        let inserted = sqlx::query(
            r"
            INSERT INTO event_deliveries
                (id, event_id, event_type, handler_name, status, attempts, last_attempt_at,
                 sent_at, last_error, next_attempt_at, is_deleted, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ON CONFLICT (event_id, handler_name) WHERE NOT is_deleted DO NOTHING
            ",
        )
        .bind(delivery.id)
        .bind(delivery.event_id)
        .bind(&delivery.event_type)
        .bind(&delivery.handler_name)
        .bind(delivery.state.status.as_str())
        .bind(to_i32(delivery.state.attempts))
        .bind(delivery.state.last_attempt_at)
        .bind(delivery.state.sent_at)
        .bind(&delivery.state.last_error)
        .bind(delivery.state.next_attempt_at)
        .bind(delivery.is_deleted)
        .bind(delivery.created_at)
        .bind(delivery.updated_at)
        .execute(&self.pool)
        .await
        .map_err(infra)?;

        if inserted.rows_affected() == 0 {
            let key = delivery.key();
            tracing::debug!(delivery_key = %key, "delivery insert hit unique key");
            return Ok(CreateOutcome::Conflict(key));
        }
        Ok(CreateOutcome::Created(delivery))
    }

    async fn find_delivery(
        &self,
        key: &DeliveryKey,
    ) -> Result<Option<DeliveryRecord>, StoreError> {
        let sql = format!(
            "SELECT {DELIVERY_COLUMNS} FROM event_deliveries \
             WHERE event_id = $1 AND handler_name = $2 AND NOT is_deleted"
        );
        sqlx::query_as::<_, DeliveryRow>(&sql)
            .bind(key.event_id)
            .bind(&key.handler_name)
            .fetch_optional(&self.pool)
            .await
            .map_err(infra)?
            .map(DeliveryRecord::try_from)
            .transpose()
    }

    async fn find_delivery_by_id(&self, id: Uuid) -> Result<Option<DeliveryRecord>, StoreError> {
        let sql = format!("SELECT {DELIVERY_COLUMNS} FROM event_deliveries WHERE id = $1");
        sqlx::query_as::<_, DeliveryRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(infra)?
            .map(DeliveryRecord::try_from)
            .transpose()
    }

    async fn list_deliveries(&self, event_id: Uuid) -> Result<Vec<DeliveryRecord>, StoreError> {
        let sql = format!(
            "SELECT {DELIVERY_COLUMNS} FROM event_deliveries \
             WHERE event_id = $1 AND NOT is_deleted ORDER BY created_at ASC"
        );
        let rows = sqlx::query_as::<_, DeliveryRow>(&sql)
            .bind(event_id)
            .fetch_all(&self.pool)
            .await
            .map_err(infra)?;
        collect(rows)
    }

    async fn list_ready(
        &self,
        batch_size: u32,
        now: DateTime<Utc>,
    ) -> Result<Vec<DeliveryRecord>, StoreError> {
        let sql = format!(
            "SELECT {DELIVERY_COLUMNS} FROM event_deliveries WHERE {READY_PREDICATE} \
             ORDER BY created_at ASC LIMIT $2"
        );
        let rows = sqlx::query_as::<_, DeliveryRow>(&sql)
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
            "UPDATE event_deliveries \
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

    async fn save_delivery(&self, delivery: &DeliveryRecord) -> Result<(), StoreError> {
        let saved = sqlx::query(
            r"
            UPDATE event_deliveries
            SET status = $2, attempts = GREATEST(attempts, $3), last_attempt_at = $4,
                sent_at = $5, last_error = $6, next_attempt_at = $7, updated_at = $8
            WHERE id = $1 AND status <> 'sent'
            ",
        )
        .bind(delivery.id)
        .bind(delivery.state.status.as_str())
        .bind(to_i32(delivery.state.attempts))
        .bind(delivery.state.last_attempt_at)
        .bind(delivery.state.sent_at)
        .bind(&delivery.state.last_error)
        .bind(delivery.state.next_attempt_at)
        .bind(delivery.updated_at)
        .execute(&self.pool)
        .await
        .map_err(infra)?;

        if saved.rows_affected() == 0 {
            tracing::warn!(delivery_id = %delivery.id, "ignored write to missing or settled delivery");
        }
        Ok(())
    }

    async fn requeue_delivery(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
        max_attempts: u32,
    ) -> Result<bool, StoreError> {
        let requeued = sqlx::query(
            r"
            UPDATE event_deliveries
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
            UPDATE event_deliveries
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
    ) -> Result<Vec<DeliveryRecord>, StoreError> {
        let sql = format!(
            "SELECT {DELIVERY_COLUMNS} FROM event_deliveries \
             WHERE status = 'failed' AND attempts >= $1 AND NOT is_deleted \
             ORDER BY updated_at DESC LIMIT $2"
        );
        let rows = sqlx::query_as::<_, DeliveryRow>(&sql)
            .bind(to_i32(max_attempts))
            .bind(to_i64(limit))
            .fetch_all(&self.pool)
            .await
            .map_err(infra)?;
        collect(rows)
    }
}
