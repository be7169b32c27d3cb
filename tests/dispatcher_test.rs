mod common;

use std::sync::Arc;

use async_trait::async_trait;
use common::*;
use webhook_ingest::{
    Delivery, DeliveryStatus, DispatchRequest, EventHandler, HandlerError, HandlerRegistry,
    Headers, Provider, HANDLER_FAILED_MESSAGE, HANDLER_PANIC_MESSAGE,
};

struct PanickingHandler;

#[async_trait]
impl EventHandler for PanickingHandler {
    async fn handle(&self, _delivery: &Delivery) -> Result<(), HandlerError> {
        panic!("handler bug");
    }
}

#[tokio::test]
async fn unrouted_topic_is_acknowledged_as_processed() {
    let h = harness(HandlerRegistry::new());

    let outcome = h
        .pipeline
        .dispatch(DispatchRequest::new(
            Provider::Custom("B".into()),
            "unknown/topic",
            serde_json::json!({"id": 1}),
            Headers::new(),
        ))
        .await
        .unwrap();

    assert!(outcome.is_processed());
    assert!(!outcome.handled);

    let record = h.pipeline.get_record(&outcome.record_id).await.unwrap();
    assert_eq!(record.status, DeliveryStatus::Processed);
    assert!(record.last_error.is_none());

    let outcomes = h.observer.outcomes();
    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0].record_id, outcome.record_id);
    assert!(outcomes[0].error.is_none());
}

#[tokio::test]
async fn routed_handler_runs_once_and_record_is_processed() {
    let handler = Arc::new(CountingHandler::default());
    let registry = HandlerRegistry::new().register(Provider::Shopify, "orders/create", handler.clone());
    let h = harness(registry);

    let outcome = h
        .pipeline
        .dispatch(DispatchRequest::new(
            Provider::Shopify,
            "orders/create",
            serde_json::json!({"id": 42}),
            Headers::new(),
        ))
        .await
        .unwrap();

    assert!(outcome.handled);
    assert!(outcome.is_processed());
    assert_eq!(handler.calls(), 1);

    // Same topic on another provider does not hit the handler.
    h.pipeline
        .dispatch(DispatchRequest::new(
            Provider::WooCommerce,
            "orders/create",
            serde_json::json!({}),
            Headers::new(),
        ))
        .await
        .unwrap();
    assert_eq!(handler.calls(), 1);
}

#[tokio::test]
async fn handler_failure_is_recorded_and_notified_once() {
    let registry = HandlerRegistry::new().register(
        Provider::Stripe,
        "charge.failed",
        Arc::new(FailingHandler("boom")),
    );
    let h = harness(registry);

    let outcome = h
        .pipeline
        .dispatch(DispatchRequest::new(
            Provider::Stripe,
            "charge.failed",
            serde_json::json!({"type": "charge.failed"}),
            Headers::new(),
        ))
        .await
        .expect("handler failures are absorbed");

    assert_eq!(outcome.status, DeliveryStatus::Failed);
    assert_eq!(outcome.error.as_deref(), Some("boom"));

    let record = h.pipeline.get_record(&outcome.record_id).await.unwrap();
    assert_eq!(record.status, DeliveryStatus::Failed);
    assert_eq!(record.last_error.as_deref(), Some("boom"));
    assert_eq!(h.store.len().await, 1);

    let outcomes = h.observer.outcomes();
    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0].error.as_deref(), Some("boom"));
    assert_eq!(outcomes[0].provider, "stripe");
    assert_eq!(outcomes[0].topic, "charge.failed");
}

#[tokio::test]
async fn handler_error_without_message_still_records_an_error() {
    let registry =
        HandlerRegistry::new().register(Provider::Shopify, "orders/paid", Arc::new(FailingHandler("")));
    let h = harness(registry);

    let outcome = h
        .pipeline
        .dispatch(DispatchRequest::new(
            Provider::Shopify,
            "orders/paid",
            serde_json::json!({}),
            Headers::new(),
        ))
        .await
        .unwrap();

    assert_eq!(outcome.status, DeliveryStatus::Failed);
    let record = h.pipeline.get_record(&outcome.record_id).await.unwrap();
    assert_eq!(record.last_error.as_deref(), Some(HANDLER_FAILED_MESSAGE));
    assert_eq!(h.observer.outcomes()[0].error.as_deref(), Some(HANDLER_FAILED_MESSAGE));
}

#[tokio::test]
async fn panicking_handler_is_contained() {
    let registry =
        HandlerRegistry::new().register(Provider::Shopify, "orders/paid", Arc::new(PanickingHandler));
    let h = harness(registry);

    let outcome = h
        .pipeline
        .dispatch(DispatchRequest::new(
            Provider::Shopify,
            "orders/paid",
            serde_json::json!({}),
            Headers::new(),
        ))
        .await
        .unwrap();

    assert_eq!(outcome.status, DeliveryStatus::Failed);
    assert_eq!(outcome.error.as_deref(), Some(HANDLER_PANIC_MESSAGE));
    assert_eq!(h.observer.outcomes().len(), 1);
}

#[tokio::test]
async fn custom_deliveries_reach_the_custom_channel() {
    let h = harness(HandlerRegistry::new());
    let mut headers = Headers::new();
    headers.insert("X-Webhook-Event".into(), "invoice.paid".into());

    let outcome = h
        .pipeline
        .dispatch(DispatchRequest::new(
            Provider::Custom("acme".into()),
            "invoice.paid",
            serde_json::json!({"amount": 10}),
            headers.clone(),
        ))
        .await
        .unwrap();

    let record = h.pipeline.get_record(&outcome.record_id).await.unwrap();
    assert_eq!(record.provider, "custom");
    assert_eq!(record.topic, "acme:invoice.paid");

    let custom = h.observer.custom_deliveries();
    assert_eq!(custom.len(), 1);
    assert_eq!(custom[0].name, "acme");
    assert_eq!(custom[0].event, "invoice.paid");
    assert_eq!(custom[0].payload, serde_json::json!({"amount": 10}));
    assert_eq!(custom[0].headers, headers);
}

#[tokio::test]
async fn non_custom_deliveries_skip_the_custom_channel() {
    let h = harness(HandlerRegistry::new());

    h.pipeline
        .dispatch(DispatchRequest::new(
            Provider::Stripe,
            "customer.created",
            serde_json::json!({}),
            Headers::new(),
        ))
        .await
        .unwrap();

    assert!(h.observer.custom_deliveries().is_empty());
    assert_eq!(h.observer.outcomes().len(), 1);
}

#[tokio::test]
async fn duplicate_deliveries_each_get_a_record() {
    let h = harness(HandlerRegistry::new());
    let request = DispatchRequest::new(
        Provider::Shopify,
        "orders/create",
        serde_json::json!({"id": 9}),
        Headers::new(),
    );

    let first = h.pipeline.dispatch(request.clone()).await.unwrap();
    let second = h.pipeline.dispatch(request).await.unwrap();

    assert_ne!(first.record_id, second.record_id);
    assert_eq!(h.store.len().await, 2);
}
