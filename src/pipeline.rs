use std::sync::Arc;

use crate::config::{IngestConfig, SecretResolver};
use crate::dispatcher::{DispatchOutcome, DispatchRequest, Dispatcher};
use crate::error::{IngestError, RejectReason, RetryError, StoreError};
use crate::notifier::OutcomeNotifier;
use crate::recorder::EventRecorder;
use crate::retry::RetryCoordinator;
use crate::router::HandlerRegistry;
use crate::storage::RecordStore;
use crate::types::{header, DeliveryRecord, Headers, Provider, RecordFilter, RecordId};
use crate::verifier::Verifier;

const SHOPIFY_TOPIC_HEADER: &str = "X-Shopify-Topic";
const WC_TOPIC_HEADER: &str = "X-WC-Webhook-Topic";
const WC_RESOURCE_HEADER: &str = "X-WC-Webhook-Resource";
const WC_EVENT_HEADER: &str = "X-WC-Webhook-Event";
const CUSTOM_TIMESTAMP_HEADER: &str = "X-Webhook-Timestamp";
const CUSTOM_EVENT_HEADER: &str = "X-Webhook-Event";

/// One inbound HTTP delivery, body untouched.
#[derive(Debug, Clone)]
pub struct InboundDelivery {
    pub provider: Provider,
    /// Exact bytes received; signatures are computed over these.
    pub raw_body: Vec<u8>,
    pub headers: Headers,
}

impl InboundDelivery {
    pub fn new(provider: Provider, raw_body: impl Into<Vec<u8>>) -> Self {
        Self {
            provider,
            raw_body: raw_body.into(),
            headers: Headers::new(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }
}

/// Verify → record → dispatch → notify, plus the administrative queries.
///
/// Each call to [`Pipeline::ingest`] is an independent unit of work; the
/// store is the only state shared between calls.
#[derive(Clone)]
pub struct Pipeline {
    verifier: Verifier,
    dispatcher: Dispatcher,
    retries: RetryCoordinator,
}

impl Pipeline {
    pub fn new(
        config: Arc<IngestConfig>,
        store: Arc<dyn RecordStore>,
        registry: HandlerRegistry,
        notifier: OutcomeNotifier,
    ) -> Self {
        let tolerance = config.tolerance.as_secs();
        Self::with_resolver(config, tolerance, store, registry, notifier)
    }

    /// Build with a secret resolver other than the config itself.
    pub fn with_resolver(
        secrets: Arc<dyn SecretResolver>,
        tolerance_secs: u64,
        store: Arc<dyn RecordStore>,
        registry: HandlerRegistry,
        notifier: OutcomeNotifier,
    ) -> Self {
        let recorder = EventRecorder::new(store);
        let dispatcher = Dispatcher::new(recorder, Arc::new(registry), Arc::new(notifier));
        Self {
            verifier: Verifier::new(secrets, tolerance_secs),
            retries: RetryCoordinator::new(dispatcher.clone()),
            dispatcher,
        }
    }

    pub fn verifier(&self) -> &Verifier {
        &self.verifier
    }

    /// Handle one inbound delivery to completion.
    ///
    /// Rejections and recording failures are returned; handler failures are
    /// reported through the outcome instead.
    pub async fn ingest(&self, delivery: InboundDelivery) -> Result<DispatchOutcome, IngestError> {
        let InboundDelivery {
            provider,
            raw_body,
            headers,
        } = delivery;

        let signature = header(&headers, provider.signature_header()).unwrap_or_default();
        let source_id = provider
            .source_header()
            .and_then(|name| header(&headers, name))
            .map(str::to_string);
        let timestamp = match provider {
            Provider::Custom(_) => header(&headers, CUSTOM_TIMESTAMP_HEADER),
            _ => None,
        };

        let payload = self
            .verifier
            .verify(&provider, source_id.as_deref(), &raw_body, signature, timestamp)
            .into_result()
            .map_err(IngestError::Rejected)?;

        let topic = resolve_topic(&provider, &headers, &payload).ok_or_else(|| {
            tracing::warn!(%provider, "verified webhook carries no topic");
            IngestError::Rejected(RejectReason::MissingTopic)
        })?;

        let signature = signature.to_string();
        let request = DispatchRequest::new(provider, topic, payload, headers)
            .with_source_id(source_id)
            .with_signature(signature);

        self.dispatcher
            .dispatch(request)
            .await
            .map_err(IngestError::Recording)
    }

    /// Dispatch an already verified delivery, skipping verification.
    pub async fn dispatch(&self, request: DispatchRequest) -> Result<DispatchOutcome, StoreError> {
        self.dispatcher.dispatch(request).await
    }

    pub async fn list_records(
        &self,
        filter: &RecordFilter,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<DeliveryRecord>, StoreError> {
        self.dispatcher.recorder().list(filter, limit, offset).await
    }

    pub async fn get_record(&self, id: &RecordId) -> Result<DeliveryRecord, StoreError> {
        self.dispatcher.recorder().get(id).await
    }

    pub async fn retry(&self, id: &RecordId) -> Result<bool, RetryError> {
        self.retries.retry(id).await
    }
}

/// Routing topic for a verified delivery.
fn resolve_topic(provider: &Provider, headers: &Headers, payload: &serde_json::Value) -> Option<String> {
    let topic = match provider {
        Provider::Shopify => header(headers, SHOPIFY_TOPIC_HEADER).map(str::to_string),
        Provider::WooCommerce => header(headers, WC_TOPIC_HEADER)
            .map(str::to_string)
            .or_else(|| {
                let resource = header(headers, WC_RESOURCE_HEADER)?;
                let event = header(headers, WC_EVENT_HEADER)?;
                Some(format!("{resource}.{event}"))
            }),
        Provider::Stripe => payload.get("type").and_then(|t| t.as_str()).map(str::to_string),
        Provider::Custom(_) => header(headers, CUSTOM_EVENT_HEADER)
            .map(str::to_string)
            .or_else(|| payload.get("event").and_then(|t| t.as_str()).map(str::to_string)),
    };
    topic.map(|t| t.trim().to_string()).filter(|t| !t.is_empty())
}
