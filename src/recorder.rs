use std::sync::Arc;

use chrono::Utc;

use crate::error::StoreError;
use crate::storage::RecordStore;
use crate::types::{DeliveryRecord, DeliveryStatus, NewDelivery, RecordFilter, RecordId, MAX_RETRIES};

/// Appends and transitions delivery records.
///
/// The recorder owns id and timestamp assignment; stores only persist.
#[derive(Clone)]
pub struct EventRecorder {
    store: Arc<dyn RecordStore>,
}

impl EventRecorder {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    /// Persist a new `pending` record.
    pub async fn record(&self, delivery: NewDelivery) -> Result<DeliveryRecord, StoreError> {
        let now = Utc::now();
        let record = DeliveryRecord {
            id: RecordId::new(),
            provider: delivery.provider,
            topic: delivery.topic,
            payload: delivery.payload,
            headers: delivery.headers,
            signature: delivery.signature,
            status: DeliveryStatus::Pending,
            retry_count: 0,
            last_error: None,
            retry_of: delivery.retry_of,
            created_at: now,
            updated_at: now,
        };

        self.store.insert(&record).await?;
        tracing::debug!(
            record_id = %record.id,
            provider = %record.provider,
            topic = %record.topic,
            retry_of = ?record.retry_of,
            "recorded webhook delivery"
        );
        Ok(record)
    }

    pub async fn transition(
        &self,
        id: &RecordId,
        status: DeliveryStatus,
        error: Option<String>,
    ) -> Result<DeliveryRecord, StoreError> {
        let error = if status == DeliveryStatus::Failed { error } else { None };
        self.store.transition(id, status, error).await
    }

    /// Bump `retry_count` and mark `retrying`, refusing at the cap.
    pub async fn begin_retry(&self, id: &RecordId) -> Result<DeliveryRecord, StoreError> {
        self.store.begin_retry(id, MAX_RETRIES).await
    }

    pub async fn get(&self, id: &RecordId) -> Result<DeliveryRecord, StoreError> {
        self.store.get(id).await?.ok_or(StoreError::NotFound(*id))
    }

    pub async fn list(
        &self,
        filter: &RecordFilter,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<DeliveryRecord>, StoreError> {
        self.store.list(filter, limit, offset).await
    }
}
