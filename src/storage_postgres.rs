use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio_postgres::{Client, Row};

use crate::error::StoreError;
use crate::storage::RecordStore;
use crate::types::{DeliveryRecord, DeliveryStatus, RecordFilter, RecordId};

const COLUMNS: &str = "id, provider, topic, payload, headers, signature, status, \
                       retry_count, last_error, retry_of, created_at, updated_at";

impl From<tokio_postgres::Error> for StoreError {
    fn from(err: tokio_postgres::Error) -> Self {
        StoreError::Unavailable(err.to_string())
    }
}

/// Postgres-backed record store.
///
/// Each mutation is a single conditional `UPDATE ... RETURNING`, so
/// concurrent transitions on one record cannot interleave.
pub struct PostgresStore {
    client: Client,
}

impl PostgresStore {
    pub async fn new(client: Client) -> Result<Self, StoreError> {
        client
            .batch_execute(
                "CREATE TABLE IF NOT EXISTS webhook_events (
                    id UUID PRIMARY KEY,
                    provider TEXT NOT NULL,
                    topic TEXT NOT NULL,
                    payload JSONB NOT NULL,
                    headers JSONB NOT NULL,
                    signature TEXT NOT NULL,
                    status TEXT NOT NULL,
                    retry_count INTEGER NOT NULL DEFAULT 0,
                    last_error TEXT,
                    retry_of UUID,
                    created_at TIMESTAMPTZ NOT NULL,
                    updated_at TIMESTAMPTZ NOT NULL
                );
                CREATE INDEX IF NOT EXISTS webhook_events_provider_status_idx
                    ON webhook_events (provider, status, created_at DESC);",
            )
            .await?;

        Ok(Self { client })
    }

    async fn fetch(&self, id: &RecordId) -> Result<DeliveryRecord, StoreError> {
        let row = self
            .client
            .query_opt(
                &format!("SELECT {COLUMNS} FROM webhook_events WHERE id = $1"),
                &[&id.0],
            )
            .await?;
        match row {
            Some(row) => record_from_row(&row),
            None => Err(StoreError::NotFound(*id)),
        }
    }
}

#[async_trait]
impl RecordStore for PostgresStore {
    async fn insert(&self, record: &DeliveryRecord) -> Result<(), StoreError> {
        let headers = serde_json::to_value(&record.headers)?;
        let retry_count = record.retry_count as i32;
        let retry_of = record.retry_of.map(|id| id.0);
        self.client
            .execute(
                &format!(
                    "INSERT INTO webhook_events ({COLUMNS})
                     VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)"
                ),
                &[
                    &record.id.0,
                    &record.provider,
                    &record.topic,
                    &record.payload,
                    &headers,
                    &record.signature,
                    &record.status.as_str(),
                    &retry_count,
                    &record.last_error,
                    &retry_of,
                    &record.created_at,
                    &record.updated_at,
                ],
            )
            .await?;
        Ok(())
    }

    async fn transition(
        &self,
        id: &RecordId,
        status: DeliveryStatus,
        last_error: Option<String>,
    ) -> Result<DeliveryRecord, StoreError> {
        let allowed_from: Vec<&str> = [
            DeliveryStatus::Pending,
            DeliveryStatus::Processed,
            DeliveryStatus::Failed,
            DeliveryStatus::Retrying,
        ]
        .iter()
        .filter(|from| from.can_transition_to(status))
        .map(|from| from.as_str())
        .collect();

        let row = self
            .client
            .query_opt(
                &format!(
                    "UPDATE webhook_events
                     SET status = $2, last_error = COALESCE($3, last_error), updated_at = now()
                     WHERE id = $1 AND status = ANY($4)
                     RETURNING {COLUMNS}"
                ),
                &[&id.0, &status.as_str(), &last_error, &allowed_from],
            )
            .await?;

        match row {
            Some(row) => record_from_row(&row),
            None => {
                let current = self.fetch(id).await?;
                Err(StoreError::InvalidTransition {
                    id: *id,
                    from: current.status,
                    to: status,
                })
            }
        }
    }

    async fn begin_retry(&self, id: &RecordId, max_retries: u32) -> Result<DeliveryRecord, StoreError> {
        let cap = max_retries as i32;
        let row = self
            .client
            .query_opt(
                &format!(
                    "UPDATE webhook_events
                     SET retry_count = retry_count + 1, status = 'retrying', updated_at = now()
                     WHERE id = $1 AND retry_count < $2 AND status = 'failed'
                     RETURNING {COLUMNS}"
                ),
                &[&id.0, &cap],
            )
            .await?;

        if let Some(row) = row {
            return record_from_row(&row);
        }

        let current = self.fetch(id).await?;
        if current.retry_count >= max_retries {
            Err(StoreError::RetryLimit {
                id: *id,
                retry_count: current.retry_count,
            })
        } else {
            Err(StoreError::InvalidTransition {
                id: *id,
                from: current.status,
                to: DeliveryStatus::Retrying,
            })
        }
    }

    async fn get(&self, id: &RecordId) -> Result<Option<DeliveryRecord>, StoreError> {
        let row = self
            .client
            .query_opt(
                &format!("SELECT {COLUMNS} FROM webhook_events WHERE id = $1"),
                &[&id.0],
            )
            .await?;
        row.as_ref().map(record_from_row).transpose()
    }

    async fn list(
        &self,
        filter: &RecordFilter,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<DeliveryRecord>, StoreError> {
        let status = filter.status.map(|s| s.as_str());
        let limit = limit as i64;
        let offset = offset as i64;
        let rows = self
            .client
            .query(
                &format!(
                    "SELECT {COLUMNS} FROM webhook_events
                     WHERE ($1::TEXT IS NULL OR provider = $1)
                       AND ($2::TEXT IS NULL OR status = $2)
                     ORDER BY created_at DESC
                     LIMIT $3 OFFSET $4"
                ),
                &[&filter.provider, &status, &limit, &offset],
            )
            .await?;

        rows.iter().map(record_from_row).collect()
    }
}

fn record_from_row(row: &Row) -> Result<DeliveryRecord, StoreError> {
    let headers: serde_json::Value = row.try_get("headers")?;
    let headers: BTreeMap<String, String> = serde_json::from_value(headers)?;
    let status: String = row.try_get("status")?;
    let status = DeliveryStatus::parse(&status)
        .ok_or_else(|| StoreError::Unavailable(format!("unknown status {status:?}")))?;
    let retry_count: i32 = row.try_get("retry_count")?;
    let retry_of: Option<uuid::Uuid> = row.try_get("retry_of")?;

    Ok(DeliveryRecord {
        id: RecordId(row.try_get("id")?),
        provider: row.try_get("provider")?,
        topic: row.try_get("topic")?,
        payload: row.try_get("payload")?,
        headers,
        signature: row.try_get("signature")?,
        status,
        retry_count: retry_count.max(0) as u32,
        last_error: row.try_get("last_error")?,
        retry_of: retry_of.map(RecordId),
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}
