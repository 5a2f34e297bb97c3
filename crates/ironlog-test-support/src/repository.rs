//! Test stores: in-memory `NotificationStore` / `EventStore` implementations.
//!
//! The in-memory stores honour the same contract as the PostgreSQL store:
//! unique correlation keys among live rows, atomic claims, and writes to
//! settled rows being ignored. Every operation takes one mutex, which stands
//! in for per-row atomicity.

use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ironlog_core::error::StoreError;
use ironlog_core::repository::{CLAIM_EXPIRED_ERROR, EventStore, NotificationStore};
use ironlog_core::work_item::{
    CorrelationKey, CreateOutcome, DeliveryKey, DeliveryRecord, EventRecord, NotificationRecord,
    WorkItemState, WorkItemStatus,
};
use uuid::Uuid;

fn cap(batch_size: u32) -> usize {
    usize::try_from(batch_size).unwrap_or(usize::MAX)
}

fn merge_state(stored: &mut WorkItemState, incoming: &WorkItemState) {
    let attempts = stored.attempts.max(incoming.attempts);
    *stored = incoming.clone();
    stored.attempts = attempts;
}

fn expire(state: &mut WorkItemState, stale_before: DateTime<Utc>, now: DateTime<Utc>, max: u32) -> bool {
    let stale = state.status == WorkItemStatus::Processing
        && state.last_attempt_at.is_none_or(|at| at < stale_before);
    if stale {
        let retry_at = (state.attempts < max).then_some(now);
        state.fail(CLAIM_EXPIRED_ERROR.to_owned(), retry_at);
    }
    stale
}

/// An in-memory notification store.
#[derive(Debug, Default)]
pub struct InMemoryNotificationStore {
    records: Mutex<Vec<NotificationRecord>>,
}

impl InMemoryNotificationStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a record directly, bypassing the uniqueness check. Used to
    /// seed scenarios.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn insert(&self, record: NotificationRecord) {
        self.records.lock().unwrap().push(record);
    }

    /// Returns a snapshot of all records, in creation order.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn records(&self) -> Vec<NotificationRecord> {
        self.records.lock().unwrap().clone()
    }

    /// Returns a snapshot of one record.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn get(&self, id: Uuid) -> Option<NotificationRecord> {
        self.records
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.id == id)
            .cloned()
    }
}

#[async_trait]
impl NotificationStore for InMemoryNotificationStore {
    async fn create(
        &self,
        record: NotificationRecord,
    ) -> Result<CreateOutcome<NotificationRecord, CorrelationKey>, StoreError> {
        let mut records = self.records.lock().unwrap();
        let key = record.correlation_key();
        if records
            .iter()
            .any(|r| !r.is_deleted && r.correlation_key() == key)
        {
            return Ok(CreateOutcome::Conflict(key));
        }
        records.push(record.clone());
        Ok(CreateOutcome::Created(record))
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<NotificationRecord>, StoreError> {
        Ok(self.get(id))
    }

    async fn find_by_correlation(
        &self,
        key: &CorrelationKey,
    ) -> Result<Option<NotificationRecord>, StoreError> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .iter()
            .find(|r| !r.is_deleted && r.correlation_key() == *key)
            .cloned())
    }

    async fn list_ready(
        &self,
        batch_size: u32,
        now: DateTime<Utc>,
    ) -> Result<Vec<NotificationRecord>, StoreError> {
        let mut ready: Vec<NotificationRecord> = self
            .records
            .lock()
            .unwrap()
            .iter()
            .filter(|r| !r.is_deleted && r.state.is_ready(now))
            .cloned()
            .collect();
        ready.sort_by_key(|r| r.created_at);
        ready.truncate(cap(batch_size));
        Ok(ready)
    }

    async fn try_claim(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
        max_attempts: u32,
    ) -> Result<bool, StoreError> {
        let mut records = self.records.lock().unwrap();
        match records
            .iter_mut()
            .find(|r| r.id == id && !r.is_deleted && r.state.is_claimable(now, max_attempts))
        {
            Some(record) => {
                record.state.claim(now);
                record.updated_at = now;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn save(&self, record: &NotificationRecord) -> Result<(), StoreError> {
        let mut records = self.records.lock().unwrap();
        if let Some(stored) = records
            .iter_mut()
            .find(|r| r.id == record.id && r.state.status != WorkItemStatus::Sent)
        {
            merge_state(&mut stored.state, &record.state);
            stored.updated_at = record.updated_at;
        }
        Ok(())
    }

    async fn requeue(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
        max_attempts: u32,
    ) -> Result<bool, StoreError> {
        let mut records = self.records.lock().unwrap();
        match records.iter_mut().find(|r| r.id == id && !r.is_deleted) {
            Some(record) => {
                if record.state.requeue(now, max_attempts) {
                    record.updated_at = now;
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
            None => Ok(false),
        }
    }

    async fn expire_claims(
        &self,
        stale_before: DateTime<Utc>,
        now: DateTime<Utc>,
        max_attempts: u32,
    ) -> Result<u64, StoreError> {
        let mut expired = 0;
        for record in self.records.lock().unwrap().iter_mut() {
            if !record.is_deleted && expire(&mut record.state, stale_before, now, max_attempts) {
                record.updated_at = now;
                expired += 1;
            }
        }
        Ok(expired)
    }

    async fn list_exhausted(
        &self,
        max_attempts: u32,
        limit: u32,
    ) -> Result<Vec<NotificationRecord>, StoreError> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .iter()
            .filter(|r| !r.is_deleted && r.state.is_exhausted(max_attempts))
            .take(cap(limit))
            .cloned()
            .collect())
    }
}

/// An in-memory event and delivery store.
#[derive(Debug, Default)]
pub struct InMemoryEventStore {
    events: Mutex<Vec<EventRecord>>,
    deliveries: Mutex<Vec<DeliveryRecord>>,
}

impl InMemoryEventStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a delivery directly, bypassing the uniqueness check.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn insert_delivery(&self, delivery: DeliveryRecord) {
        self.deliveries.lock().unwrap().push(delivery);
    }

    /// Returns a snapshot of all deliveries, in creation order.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn deliveries(&self) -> Vec<DeliveryRecord> {
        self.deliveries.lock().unwrap().clone()
    }

    /// Returns a snapshot of one delivery.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn delivery(&self, id: Uuid) -> Option<DeliveryRecord> {
        self.deliveries
            .lock()
            .unwrap()
            .iter()
            .find(|d| d.id == id)
            .cloned()
    }

    /// Returns a snapshot of all events.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn events(&self) -> Vec<EventRecord> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn create_event(&self, event: EventRecord) -> Result<EventRecord, StoreError> {
        self.events.lock().unwrap().push(event.clone());
        Ok(event)
    }

    async fn find_event(&self, id: Uuid) -> Result<Option<EventRecord>, StoreError> {
        Ok(self
            .events
            .lock()
            .unwrap()
            .iter()
            .find(|e| e.id == id)
            .cloned())
    }

    async fn create_delivery(
        &self,
        delivery: DeliveryRecord,
    ) -> Result<CreateOutcome<DeliveryRecord, DeliveryKey>, StoreError> {
        let mut deliveries = self.deliveries.lock().unwrap();
        let key = delivery.key();
        if deliveries.iter().any(|d| !d.is_deleted && d.key() == key) {
            return Ok(CreateOutcome::Conflict(key));
        }
        deliveries.push(delivery.clone());
        Ok(CreateOutcome::Created(delivery))
    }

    async fn find_delivery(
        &self,
        key: &DeliveryKey,
    ) -> Result<Option<DeliveryRecord>, StoreError> {
        Ok(self
            .deliveries
            .lock()
            .unwrap()
            .iter()
            .find(|d| !d.is_deleted && d.key() == *key)
            .cloned())
    }

    async fn find_delivery_by_id(&self, id: Uuid) -> Result<Option<DeliveryRecord>, StoreError> {
        Ok(self.delivery(id))
    }

    async fn list_deliveries(&self, event_id: Uuid) -> Result<Vec<DeliveryRecord>, StoreError> {
        Ok(self
            .deliveries
            .lock()
            .unwrap()
            .iter()
            .filter(|d| !d.is_deleted && d.event_id == event_id)
            .cloned()
            .collect())
    }

    async fn list_ready(
        &self,
        batch_size: u32,
        now: DateTime<Utc>,
    ) -> Result<Vec<DeliveryRecord>, StoreError> {
        let mut ready: Vec<DeliveryRecord> = self
            .deliveries
            .lock()
            .unwrap()
            .iter()
            .filter(|d| !d.is_deleted && d.state.is_ready(now))
            .cloned()
            .collect();
        ready.sort_by_key(|d| d.created_at);
        ready.truncate(cap(batch_size));
        Ok(ready)
    }

    async fn try_claim(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
        max_attempts: u32,
    ) -> Result<bool, StoreError> {
        let mut deliveries = self.deliveries.lock().unwrap();
        match deliveries
            .iter_mut()
            .find(|d| d.id == id && !d.is_deleted && d.state.is_claimable(now, max_attempts))
        {
            Some(delivery) => {
                delivery.state.claim(now);
                delivery.updated_at = now;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn save_delivery(&self, delivery: &DeliveryRecord) -> Result<(), StoreError> {
        let mut deliveries = self.deliveries.lock().unwrap();
        if let Some(stored) = deliveries
            .iter_mut()
            .find(|d| d.id == delivery.id && d.state.status != WorkItemStatus::Sent)
        {
            merge_state(&mut stored.state, &delivery.state);
            stored.updated_at = delivery.updated_at;
        }
        Ok(())
    }

    async fn requeue_delivery(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
        max_attempts: u32,
    ) -> Result<bool, StoreError> {
        let mut deliveries = self.deliveries.lock().unwrap();
        match deliveries.iter_mut().find(|d| d.id == id && !d.is_deleted) {
            Some(delivery) => {
                if delivery.state.requeue(now, max_attempts) {
                    delivery.updated_at = now;
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
            None => Ok(false),
        }
    }

    async fn expire_claims(
        &self,
        stale_before: DateTime<Utc>,
        now: DateTime<Utc>,
        max_attempts: u32,
    ) -> Result<u64, StoreError> {
        let mut expired = 0;
        for delivery in self.deliveries.lock().unwrap().iter_mut() {
            if !delivery.is_deleted && expire(&mut delivery.state, stale_before, now, max_attempts)
            {
                delivery.updated_at = now;
                expired += 1;
            }
        }
        Ok(expired)
    }

    async fn list_exhausted(
        &self,
        max_attempts: u32,
        limit: u32,
    ) -> Result<Vec<DeliveryRecord>, StoreError> {
        Ok(self
            .deliveries
            .lock()
            .unwrap()
            .iter()
            .filter(|d| !d.is_deleted && d.state.is_exhausted(max_attempts))
            .take(cap(limit))
            .cloned()
            .collect())
    }
}

/// A store that always returns an infrastructure error. Useful for testing
/// error-handling paths.
#[derive(Debug)]
pub struct FailingStore;

fn refused() -> StoreError {
    StoreError::Infrastructure("connection refused".into())
}

#[async_trait]
impl NotificationStore for FailingStore {
    async fn create(
        &self,
        _record: NotificationRecord,
    ) -> Result<CreateOutcome<NotificationRecord, CorrelationKey>, StoreError> {
        Err(refused())
    }

    async fn find_by_id(&self, _id: Uuid) -> Result<Option<NotificationRecord>, StoreError> {
        Err(refused())
    }

    async fn find_by_correlation(
        &self,
        _key: &CorrelationKey,
    ) -> Result<Option<NotificationRecord>, StoreError> {
        Err(refused())
    }

    async fn list_ready(
        &self,
        _batch_size: u32,
        _now: DateTime<Utc>,
    ) -> Result<Vec<NotificationRecord>, StoreError> {
        Err(refused())
    }

    async fn try_claim(
        &self,
        _id: Uuid,
        _now: DateTime<Utc>,
        _max_attempts: u32,
    ) -> Result<bool, StoreError> {
        Err(refused())
    }

    async fn save(&self, _record: &NotificationRecord) -> Result<(), StoreError> {
        Err(refused())
    }

    async fn requeue(
        &self,
        _id: Uuid,
        _now: DateTime<Utc>,
        _max_attempts: u32,
    ) -> Result<bool, StoreError> {
        Err(refused())
    }

    async fn expire_claims(
        &self,
        _stale_before: DateTime<Utc>,
        _now: DateTime<Utc>,
        _max_attempts: u32,
    ) -> Result<u64, StoreError> {
        Err(refused())
    }

    async fn list_exhausted(
        &self,
        _max_attempts: u32,
        _limit: u32,
    ) -> Result<Vec<NotificationRecord>, StoreError> {
        Err(refused())
    }
}

#[async_trait]
impl EventStore for FailingStore {
    async fn create_event(&self, _event: EventRecord) -> Result<EventRecord, StoreError> {
        Err(refused())
    }

    async fn find_event(&self, _id: Uuid) -> Result<Option<EventRecord>, StoreError> {
        Err(refused())
    }

    async fn create_delivery(
        &self,
        _delivery: DeliveryRecord,
    ) -> Result<CreateOutcome<DeliveryRecord, DeliveryKey>, StoreError> {
        Err(refused())
    }

    async fn find_delivery(
        &self,
        _key: &DeliveryKey,
    ) -> Result<Option<DeliveryRecord>, StoreError> {
        Err(refused())
    }

    async fn find_delivery_by_id(
        &self,
        _id: Uuid,
    ) -> Result<Option<DeliveryRecord>, StoreError> {
        Err(refused())
    }

    async fn list_deliveries(&self, _event_id: Uuid) -> Result<Vec<DeliveryRecord>, StoreError> {
        Err(refused())
    }

    async fn list_ready(
        &self,
        _batch_size: u32,
        _now: DateTime<Utc>,
    ) -> Result<Vec<DeliveryRecord>, StoreError> {
        Err(refused())
    }

    async fn try_claim(
        &self,
        _id: Uuid,
        _now: DateTime<Utc>,
        _max_attempts: u32,
    ) -> Result<bool, StoreError> {
        Err(refused())
    }

    async fn save_delivery(&self, _delivery: &DeliveryRecord) -> Result<(), StoreError> {
        Err(refused())
    }

    async fn requeue_delivery(
        &self,
        _id: Uuid,
        _now: DateTime<Utc>,
        _max_attempts: u32,
    ) -> Result<bool, StoreError> {
        Err(refused())
    }

    async fn expire_claims(
        &self,
        _stale_before: DateTime<Utc>,
        _now: DateTime<Utc>,
        _max_attempts: u32,
    ) -> Result<u64, StoreError> {
        Err(refused())
    }

    async fn list_exhausted(
        &self,
        _max_attempts: u32,
        _limit: u32,
    ) -> Result<Vec<DeliveryRecord>, StoreError> {
        Err(refused())
    }
}
