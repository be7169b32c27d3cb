use crate::dispatcher::{DispatchRequest, Dispatcher};
use crate::error::{RetryError, StoreError};
use crate::types::{header, DeliveryRecord, Provider, RecordId, MAX_RETRIES};

#[cfg(feature = "metrics")]
fn metric_inc(name: &'static str) {
    metrics::increment_counter!(name);
}

#[cfg(not(feature = "metrics"))]
fn metric_inc(_name: &'static str) {}

/// Re-drives the dispatcher for a previously failed record.
///
/// Only `failed` records are retried. The record is bumped and left
/// `retrying`; the re-dispatch is a new record that starts at
/// `retry_count = 0` with `retry_of` pointing back at it. The retries already
/// spent along the `retry_of` chain count against [`MAX_RETRIES`].
#[derive(Clone)]
pub struct RetryCoordinator {
    dispatcher: Dispatcher,
}

impl RetryCoordinator {
    pub fn new(dispatcher: Dispatcher) -> Self {
        Self { dispatcher }
    }

    /// Returns whether the re-dispatch was processed.
    ///
    /// Errors only for unknown ids, exhausted or non-retryable records and
    /// storage faults; handler failures come back as `Ok(false)`.
    pub async fn retry(&self, id: &RecordId) -> Result<bool, RetryError> {
        let recorder = self.dispatcher.recorder();

        // Resolve the record before mutating it, so an unusable record is
        // left untouched.
        let current = recorder.get(id).await?;
        let request = rebuild_request(&current)?;

        if current.retry_count >= MAX_RETRIES {
            return Err(exhausted(id, current.retry_count));
        }
        if !current.status.is_retryable() {
            return Err(RetryError::NotRetryable {
                id: *id,
                status: current.status,
            });
        }

        let spent = self.retries_spent(&current).await?;
        if spent >= MAX_RETRIES {
            return Err(exhausted(id, spent));
        }

        let origin = recorder.begin_retry(id).await.map_err(|err| match RetryError::from(err) {
            RetryError::Exhausted { retry_count, .. } => exhausted(id, retry_count),
            other => other,
        })?;
        let request = request.retry_of(&origin);

        tracing::info!(
            record_id = %origin.id,
            retry_count = origin.retry_count,
            provider = %request.provider,
            topic = %request.topic,
            "retrying webhook delivery"
        );
        metric_inc("webhook.retry.started");

        let outcome = self.dispatcher.dispatch(request).await.map_err(RetryError::Storage)?;
        Ok(outcome.is_processed())
    }

    /// Retries already used by `record` and every record it descends from.
    async fn retries_spent(&self, record: &DeliveryRecord) -> Result<u32, RetryError> {
        let recorder = self.dispatcher.recorder();
        let mut spent = record.retry_count;
        let mut parent = record.retry_of;

        while let Some(parent_id) = parent {
            if spent >= MAX_RETRIES {
                break;
            }
            match recorder.get(&parent_id).await {
                Ok(ancestor) => {
                    spent += ancestor.retry_count.max(1);
                    parent = ancestor.retry_of;
                }
                // Retention may have removed older links.
                Err(StoreError::NotFound(_)) => break,
                Err(err) => return Err(RetryError::Storage(err)),
            }
        }
        Ok(spent)
    }
}

fn exhausted(id: &RecordId, retry_count: u32) -> RetryError {
    metric_inc("webhook.retry.exhausted");
    tracing::warn!(record_id = %id, retry_count, "retry limit reached");
    RetryError::Exhausted { id: *id, retry_count }
}

/// Reconstruct the original dispatch inputs from a stored record.
fn rebuild_request(record: &DeliveryRecord) -> Result<DispatchRequest, RetryError> {
    let (provider, topic) = Provider::from_record(&record.provider, &record.topic).ok_or_else(|| {
        RetryError::UnknownProvider {
            id: record.id,
            provider: record.provider.clone(),
        }
    })?;

    let source_id = provider
        .source_header()
        .and_then(|name| header(&record.headers, name))
        .map(str::to_string);

    Ok(DispatchRequest::new(provider, topic, record.payload.clone(), record.headers.clone())
        .with_source_id(source_id)
        .with_signature(record.signature.clone()))
}
