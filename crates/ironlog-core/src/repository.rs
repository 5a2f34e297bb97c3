//! Work-item store abstractions.
//!
//! The store is the durability boundary of the pipeline: triggers are
//! advisory, and anything a trigger loses is rediscovered through
//! `list_ready`. Every mutation is a single-row conditional update.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::StoreError;
use crate::work_item::{
    CorrelationKey, CreateOutcome, DeliveryKey, DeliveryRecord, EventRecord, NotificationRecord,
};

/// Persistence for single-recipient notification records.
#[async_trait]
pub trait NotificationStore: Send + Sync {
    /// Inserts a record unless a live record with the same correlation key
    /// exists, in which case `Conflict` is returned and nothing is written.
    async fn create(
        &self,
        record: NotificationRecord,
    ) -> Result<CreateOutcome<NotificationRecord, CorrelationKey>, StoreError>;

    /// Loads a record by id.
    async fn find_by_id(&self, id: Uuid) -> Result<Option<NotificationRecord>, StoreError>;

    /// Loads the live record for a correlation key.
    async fn find_by_correlation(
        &self,
        key: &CorrelationKey,
    ) -> Result<Option<NotificationRecord>, StoreError>;

    /// Lists pending and retry-eligible failed records, oldest first.
    async fn list_ready(
        &self,
        batch_size: u32,
        now: DateTime<Utc>,
    ) -> Result<Vec<NotificationRecord>, StoreError>;

    /// Atomically moves a claimable record to `processing`, incrementing its
    /// attempts. Returns `false` if another worker got there first or the
    /// record is not claimable.
    async fn try_claim(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
        max_attempts: u32,
    ) -> Result<bool, StoreError>;

    /// Persists status, attempts, error and timestamps. Writes to a record
    /// that is already `sent` are ignored.
    async fn save(&self, record: &NotificationRecord) -> Result<(), StoreError>;

    /// Makes a `failed` record with attempts left ready from `now`. Returns
    /// `false`, writing nothing, if the record is in any other state, e.g.
    /// claimed by a worker since it was read.
    async fn requeue(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
        max_attempts: u32,
    ) -> Result<bool, StoreError>;

    /// Fails records stuck in `processing` since before `stale_before` and
    /// re-arms those with attempts left. Returns the number of rows touched.
    async fn expire_claims(
        &self,
        stale_before: DateTime<Utc>,
        now: DateTime<Utc>,
        max_attempts: u32,
    ) -> Result<u64, StoreError>;

    /// Lists failed records that have used up their attempts.
    async fn list_exhausted(
        &self,
        max_attempts: u32,
        limit: u32,
    ) -> Result<Vec<NotificationRecord>, StoreError>;
}

/// Persistence for fan-out events and their per-handler deliveries.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Inserts an event.
    async fn create_event(&self, event: EventRecord) -> Result<EventRecord, StoreError>;

    /// Loads an event by id.
    async fn find_event(&self, id: Uuid) -> Result<Option<EventRecord>, StoreError>;

    /// Inserts a delivery unless a live delivery with the same
    /// `(event_id, handler_name)` exists.
    async fn create_delivery(
        &self,
        delivery: DeliveryRecord,
    ) -> Result<CreateOutcome<DeliveryRecord, DeliveryKey>, StoreError>;

    /// Loads the live delivery for a key.
    async fn find_delivery(&self, key: &DeliveryKey)
    -> Result<Option<DeliveryRecord>, StoreError>;

    /// Loads a delivery by id.
    async fn find_delivery_by_id(&self, id: Uuid) -> Result<Option<DeliveryRecord>, StoreError>;

    /// Lists every live delivery of an event, oldest first.
    async fn list_deliveries(&self, event_id: Uuid) -> Result<Vec<DeliveryRecord>, StoreError>;

    /// Lists pending and retry-eligible failed deliveries, oldest first.
    async fn list_ready(
        &self,
        batch_size: u32,
        now: DateTime<Utc>,
    ) -> Result<Vec<DeliveryRecord>, StoreError>;

    /// Atomically claims a delivery. See [`NotificationStore::try_claim`].
    async fn try_claim(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
        max_attempts: u32,
    ) -> Result<bool, StoreError>;

    /// Persists a delivery's state. Writes to a `sent` delivery are ignored.
    async fn save_delivery(&self, delivery: &DeliveryRecord) -> Result<(), StoreError>;

    /// Re-arms a failed delivery. See [`NotificationStore::requeue`].
    async fn requeue_delivery(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
        max_attempts: u32,
    ) -> Result<bool, StoreError>;

    /// See [`NotificationStore::expire_claims`].
    async fn expire_claims(
        &self,
        stale_before: DateTime<Utc>,
        now: DateTime<Utc>,
        max_attempts: u32,
    ) -> Result<u64, StoreError>;

    /// Lists failed deliveries that have used up their attempts.
    async fn list_exhausted(
        &self,
        max_attempts: u32,
        limit: u32,
    ) -> Result<Vec<DeliveryRecord>, StoreError>;
}

/// Error summary written by `expire_claims`.
pub const CLAIM_EXPIRED_ERROR: &str = "ClaimExpired: processing did not complete before the claim timeout";
