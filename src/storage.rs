use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use crate::error::StoreError;
use crate::types::{DeliveryRecord, DeliveryStatus, RecordFilter, RecordId};

/// Persistence for delivery records.
///
/// Every mutating call addresses a single record and must be atomic for it.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn insert(&self, record: &DeliveryRecord) -> Result<(), StoreError>;

    /// Move a record to `status`, enforcing the delivery state machine.
    async fn transition(
        &self,
        id: &RecordId,
        status: DeliveryStatus,
        last_error: Option<String>,
    ) -> Result<DeliveryRecord, StoreError>;

    /// Check the retry cap, bump `retry_count` and mark the record
    /// `retrying`, as one step. Returns the updated record.
    async fn begin_retry(&self, id: &RecordId, max_retries: u32) -> Result<DeliveryRecord, StoreError>;

    async fn get(&self, id: &RecordId) -> Result<Option<DeliveryRecord>, StoreError>;

    /// Matching records, newest `created_at` first.
    async fn list(
        &self,
        filter: &RecordFilter,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<DeliveryRecord>, StoreError>;
}

/// In-memory storage for lightweight deployments and tests.
#[derive(Default)]
pub struct InMemoryStore {
    // Insertion order; listings walk it backwards.
    records: RwLock<Vec<DeliveryRecord>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl RecordStore for InMemoryStore {
    async fn insert(&self, record: &DeliveryRecord) -> Result<(), StoreError> {
        self.records.write().await.push(record.clone());
        Ok(())
    }

    async fn transition(
        &self,
        id: &RecordId,
        status: DeliveryStatus,
        last_error: Option<String>,
    ) -> Result<DeliveryRecord, StoreError> {
        let mut guard = self.records.write().await;
        let record = guard
            .iter_mut()
            .find(|r| &r.id == id)
            .ok_or(StoreError::NotFound(*id))?;

        if !record.status.can_transition_to(status) {
            return Err(StoreError::InvalidTransition {
                id: *id,
                from: record.status,
                to: status,
            });
        }

        record.status = status;
        if last_error.is_some() {
            record.last_error = last_error;
        }
        record.updated_at = Utc::now();
        Ok(record.clone())
    }

    async fn begin_retry(&self, id: &RecordId, max_retries: u32) -> Result<DeliveryRecord, StoreError> {
        let mut guard = self.records.write().await;
        let record = guard
            .iter_mut()
            .find(|r| &r.id == id)
            .ok_or(StoreError::NotFound(*id))?;

        if record.retry_count >= max_retries {
            return Err(StoreError::RetryLimit {
                id: *id,
                retry_count: record.retry_count,
            });
        }
        if !record.status.is_retryable() {
            return Err(StoreError::InvalidTransition {
                id: *id,
                from: record.status,
                to: DeliveryStatus::Retrying,
            });
        }

        record.retry_count += 1;
        record.status = DeliveryStatus::Retrying;
        record.updated_at = Utc::now();
        Ok(record.clone())
    }

    async fn get(&self, id: &RecordId) -> Result<Option<DeliveryRecord>, StoreError> {
        let guard = self.records.read().await;
        Ok(guard.iter().find(|r| &r.id == id).cloned())
    }

    async fn list(
        &self,
        filter: &RecordFilter,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<DeliveryRecord>, StoreError> {
        let guard = self.records.read().await;
        let mut matching: Vec<&DeliveryRecord> =
            guard.iter().rev().filter(|r| filter.matches(r)).collect();
        // Stable sort keeps reverse insertion order for equal timestamps.
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        Ok(matching
            .into_iter()
            .skip(offset)
            .take(limit)
            .cloned()
            .collect())
    }
}
