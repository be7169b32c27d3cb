use std::sync::Arc;

use crate::error::StoreError;
use crate::notifier::{CustomDelivery, OutcomeEvent, OutcomeNotifier};
use crate::recorder::EventRecorder;
use crate::router::{Delivery, HandlerRegistry};
use crate::types::{DeliveryRecord, DeliveryStatus, Headers, NewDelivery, Provider, RecordId};

#[cfg(feature = "metrics")]
fn metric_inc(name: &'static str) {
    metrics::increment_counter!(name);
}

#[cfg(not(feature = "metrics"))]
fn metric_inc(_name: &'static str) {}

/// Message recorded when a handler panics instead of returning an error.
pub const HANDLER_PANIC_MESSAGE: &str = "handler panicked";

/// Recorded in place of a handler error whose message is empty.
pub const HANDLER_FAILED_MESSAGE: &str = "handler failed";

/// A verified delivery ready to be recorded and routed.
#[derive(Debug, Clone)]
pub struct DispatchRequest {
    pub provider: Provider,
    /// Routing topic, without any provider prefix.
    pub topic: String,
    pub source_id: Option<String>,
    pub payload: serde_json::Value,
    pub headers: Headers,
    pub signature: String,
    retry_of: Option<RecordId>,
}

impl DispatchRequest {
    pub fn new(
        provider: Provider,
        topic: impl Into<String>,
        payload: serde_json::Value,
        headers: Headers,
    ) -> Self {
        Self {
            provider,
            topic: topic.into(),
            source_id: None,
            payload,
            headers,
            signature: String::new(),
            retry_of: None,
        }
    }

    pub fn with_source_id(mut self, source_id: Option<String>) -> Self {
        self.source_id = source_id;
        self
    }

    pub fn with_signature(mut self, signature: impl Into<String>) -> Self {
        self.signature = signature.into();
        self
    }

    /// Link the new record to the record it retries.
    pub fn retry_of(mut self, origin: &DeliveryRecord) -> Self {
        self.retry_of = Some(origin.id);
        self
    }
}

/// Final state of one dispatch attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchOutcome {
    pub record_id: RecordId,
    pub status: DeliveryStatus,
    pub error: Option<String>,
    /// Whether a registered handler ran. Unrouted topics are acknowledged
    /// without one.
    pub handled: bool,
}

impl DispatchOutcome {
    pub fn is_processed(&self) -> bool {
        self.status == DeliveryStatus::Processed
    }
}

/// Records a delivery, routes it to its handler and finalizes the record.
///
/// Handler failures never escape: they end up in the record's
/// `last_error` and in the outcome notification.
#[derive(Clone)]
pub struct Dispatcher {
    recorder: EventRecorder,
    registry: Arc<HandlerRegistry>,
    notifier: Arc<OutcomeNotifier>,
}

impl Dispatcher {
    pub fn new(
        recorder: EventRecorder,
        registry: Arc<HandlerRegistry>,
        notifier: Arc<OutcomeNotifier>,
    ) -> Self {
        Self {
            recorder,
            registry,
            notifier,
        }
    }

    pub fn recorder(&self) -> &EventRecorder {
        &self.recorder
    }

    /// Record, route, finalize, notify.
    ///
    /// Only a failure to write the initial record is returned as an error.
    pub async fn dispatch(&self, request: DispatchRequest) -> Result<DispatchOutcome, StoreError> {
        let stored_topic = request.provider.record_topic(&request.topic);

        let mut new_delivery = NewDelivery::new(
            request.provider.as_str(),
            stored_topic.clone(),
            request.payload.clone(),
            request.headers.clone(),
        )
        .with_signature(request.signature.clone());
        new_delivery.retry_of = request.retry_of;

        let record = self.recorder.record(new_delivery).await?;
        metric_inc("webhook.dispatch.recorded");

        let handler = self.registry.lookup(&request.provider, &request.topic);
        let handled = handler.is_some();

        let error = match handler {
            Some(handler) => {
                let delivery = Delivery {
                    record_id: record.id,
                    provider: request.provider.clone(),
                    source_id: request.source_id.clone(),
                    topic: request.topic.clone(),
                    payload: request.payload.clone(),
                    headers: request.headers.clone(),
                };
                // Run on its own task so a panicking handler is contained.
                let joined = tokio::spawn(async move { handler.handle(&delivery).await }).await;
                match joined {
                    Ok(Ok(())) => None,
                    Ok(Err(err)) => Some(failure_message(err.to_string())),
                    Err(join_err) if join_err.is_panic() => Some(HANDLER_PANIC_MESSAGE.to_string()),
                    Err(join_err) => Some(failure_message(join_err.to_string())),
                }
            }
            None => {
                tracing::debug!(
                    provider = %request.provider,
                    topic = %request.topic,
                    record_id = %record.id,
                    "no handler registered; acknowledging"
                );
                None
            }
        };

        let status = if error.is_some() {
            DeliveryStatus::Failed
        } else {
            DeliveryStatus::Processed
        };

        if let Err(err) = self.recorder.transition(&record.id, status, error.clone()).await {
            tracing::error!(
                record_id = %record.id,
                %status,
                error = %err,
                "failed to finalize webhook record"
            );
        }

        match &error {
            None => {
                metric_inc("webhook.dispatch.processed");
                tracing::info!(
                    provider = %request.provider,
                    topic = %request.topic,
                    record_id = %record.id,
                    handled,
                    "webhook processed"
                );
            }
            Some(message) => {
                metric_inc("webhook.dispatch.failed");
                tracing::warn!(
                    provider = %request.provider,
                    topic = %request.topic,
                    record_id = %record.id,
                    error = %message,
                    "webhook handler failed"
                );
            }
        }

        self.notifier.notify(&OutcomeEvent {
            provider: record.provider.clone(),
            topic: stored_topic,
            record_id: record.id,
            error: error.clone(),
        });

        if let Provider::Custom(name) = &request.provider {
            self.notifier.notify_custom(&CustomDelivery {
                name: name.clone(),
                event: request.topic.clone(),
                record_id: record.id,
                payload: request.payload,
                headers: request.headers,
            });
        }

        Ok(DispatchOutcome {
            record_id: record.id,
            status,
            error,
            handled,
        })
    }
}

/// `last_error` is never left empty for a failed record.
fn failure_message(message: String) -> String {
    if message.trim().is_empty() {
        HANDLER_FAILED_MESSAGE.to_string()
    } else {
        message
    }
}
