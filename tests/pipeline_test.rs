mod common;

use std::sync::Arc;
use std::time::Duration;

use common::*;
use webhook_ingest::{
    compute_body_signature, compute_signature, DeliveryStatus, DispatchRequest, HandlerRegistry,
    Headers, InboundDelivery, IngestError, MemoryPublisher, PublishHandler, Publisher, Provider,
    RecordFilter, RejectReason,
};

fn shopify_delivery(body: &[u8], topic: &str) -> InboundDelivery {
    InboundDelivery::new(Provider::Shopify, body.to_vec())
        .with_header("X-Shopify-Hmac-Sha256", compute_body_signature(SHOPIFY_SECRET.as_bytes(), body))
        .with_header("X-Shopify-Topic", topic)
        .with_header("X-Shopify-Shop-Domain", "demo.myshopify.com")
}

fn stripe_delivery(body: &[u8], t: i64) -> InboundDelivery {
    let t = t.to_string();
    let header = format!("t={t},v1={}", compute_signature(STRIPE_SECRET.as_bytes(), &t, body));
    InboundDelivery::new(Provider::Stripe, body.to_vec()).with_header("Stripe-Signature", header)
}

#[tokio::test]
async fn verified_delivery_is_recorded_verbatim() {
    let h = harness(HandlerRegistry::new());
    let body = br#"{"id":1,"total":"9.99"}"#;

    let outcome = h.pipeline.ingest(shopify_delivery(body, "orders/create")).await.unwrap();
    assert!(outcome.is_processed());

    let record = h.pipeline.get_record(&outcome.record_id).await.unwrap();
    assert_eq!(record.provider, "shopify");
    assert_eq!(record.topic, "orders/create");
    assert_eq!(record.payload, serde_json::json!({"id": 1, "total": "9.99"}));
    assert_eq!(record.headers.get("X-Shopify-Shop-Domain").map(String::as_str), Some("demo.myshopify.com"));
    assert_eq!(record.signature, compute_body_signature(SHOPIFY_SECRET.as_bytes(), body));
    assert_eq!(record.retry_count, 0);
    assert!(record.retry_of.is_none());
}

#[tokio::test]
async fn rejected_delivery_creates_no_record_and_no_notification() {
    let h = harness(HandlerRegistry::new());
    let delivery = shopify_delivery(br#"{"id":1}"#, "orders/create")
        .with_header("X-Shopify-Hmac-Sha256", "bm90IGEgc2lnbmF0dXJl");

    let err = h.pipeline.ingest(delivery).await.unwrap_err();
    assert!(matches!(err, IngestError::Rejected(RejectReason::InvalidSignature)));
    assert!(h.store.is_empty().await);
    assert!(h.observer.outcomes().is_empty());
}

#[tokio::test]
async fn stale_stripe_delivery_is_rejected() {
    let h = harness(HandlerRegistry::new());
    let body = br#"{"type":"charge.succeeded"}"#;

    let err = h.pipeline.ingest(stripe_delivery(body, now_secs() - 400)).await.unwrap_err();
    assert!(matches!(err, IngestError::Rejected(RejectReason::StaleTimestamp)));
    assert!(h.store.is_empty().await);
}

#[tokio::test]
async fn stripe_topic_is_taken_from_verified_payload() {
    let handler = Arc::new(CountingHandler::default());
    let registry = HandlerRegistry::new().register(Provider::Stripe, "charge.succeeded", handler.clone());
    let h = harness(registry);

    let body = br#"{"type":"charge.succeeded","data":{"object":{"id":"ch_1"}}}"#;
    let outcome = h.pipeline.ingest(stripe_delivery(body, now_secs())).await.unwrap();

    assert!(outcome.handled);
    assert_eq!(handler.calls(), 1);
}

#[tokio::test]
async fn custom_delivery_without_event_is_rejected() {
    let h = harness(HandlerRegistry::new());
    let body = br#"{"amount":1}"#;
    let t = now_secs().to_string();
    let delivery = InboundDelivery::new(Provider::Custom("acme".into()), body.to_vec())
        .with_header("X-Webhook-Signature", compute_signature(ACME_SECRET.as_bytes(), &t, body))
        .with_header("X-Webhook-Timestamp", t);

    let err = h.pipeline.ingest(delivery).await.unwrap_err();
    assert!(matches!(err, IngestError::Rejected(RejectReason::MissingTopic)));
}

#[tokio::test]
async fn custom_delivery_end_to_end() {
    let h = harness(HandlerRegistry::new());
    let body = br#"{"event":"ticket.closed","id":3}"#;
    let t = now_secs().to_string();
    let delivery = InboundDelivery::new(Provider::Custom("acme".into()), body.to_vec())
        .with_header("x-webhook-signature", compute_signature(ACME_SECRET.as_bytes(), &t, body))
        .with_header("x-webhook-timestamp", t);

    let outcome = h.pipeline.ingest(delivery).await.unwrap();
    let record = h.pipeline.get_record(&outcome.record_id).await.unwrap();
    assert_eq!(record.topic, "acme:ticket.closed");
    assert_eq!(h.observer.custom_deliveries().len(), 1);
}

#[tokio::test]
async fn list_filters_and_paginates_newest_first() {
    let registry = HandlerRegistry::new().register(
        Provider::Shopify,
        "orders/cancelled",
        Arc::new(FailingHandler("cancel failed")),
    );
    let h = harness(registry);

    let mut ids = Vec::new();
    for (provider, topic) in [
        (Provider::Shopify, "orders/create"),
        (Provider::Stripe, "charge.succeeded"),
        (Provider::Shopify, "orders/cancelled"),
        (Provider::Shopify, "orders/create"),
        (Provider::Stripe, "charge.refunded"),
    ] {
        let outcome = h
            .pipeline
            .dispatch(DispatchRequest::new(provider, topic, serde_json::json!({}), Headers::new()))
            .await
            .unwrap();
        ids.push(outcome.record_id);
        tokio::time::sleep(Duration::from_millis(2)).await;
    }

    let shopify = h
        .pipeline
        .list_records(&RecordFilter::default().provider("shopify"), 10, 0)
        .await
        .unwrap();
    assert_eq!(shopify.iter().map(|r| r.id).collect::<Vec<_>>(), vec![ids[3], ids[2], ids[0]]);
    assert!(shopify.iter().all(|r| r.provider == "shopify"));

    let shopify_failed = h
        .pipeline
        .list_records(
            &RecordFilter::default().provider("shopify").status(DeliveryStatus::Failed),
            10,
            0,
        )
        .await
        .unwrap();
    assert_eq!(shopify_failed.len(), 1);
    assert_eq!(shopify_failed[0].id, ids[2]);

    let all = h.pipeline.list_records(&RecordFilter::default(), 10, 0).await.unwrap();
    assert!(all.windows(2).all(|w| w[0].created_at >= w[1].created_at));

    let page = h.pipeline.list_records(&RecordFilter::default(), 2, 1).await.unwrap();
    assert_eq!(page.iter().map(|r| r.id).collect::<Vec<_>>(), vec![ids[3], ids[2]]);

    let past_end = h.pipeline.list_records(&RecordFilter::default(), 10, 10).await.unwrap();
    assert!(past_end.is_empty());
}

#[tokio::test]
async fn publish_handler_forwards_to_downstream_topic() {
    let publisher = Arc::new(MemoryPublisher::new());
    publisher.init().await.unwrap();

    let registry = HandlerRegistry::new().register(
        Provider::Shopify,
        "orders/create",
        Arc::new(PublishHandler::new(publisher.clone(), "commerce.orders", "id")),
    );
    let h = harness(registry);

    let outcome = h.pipeline.ingest(shopify_delivery(br#"{"id":77}"#, "orders/create")).await.unwrap();
    assert!(outcome.is_processed());

    let messages = publisher.messages().await;
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].topic, "commerce.orders");
    assert_eq!(messages[0].partition_key, "77");
    assert_eq!(messages[0].message["source"], "demo.myshopify.com");
    assert_eq!(messages[0].message["data"]["id"], 77);

    publisher.shutdown().await.unwrap();
}

#[tokio::test]
async fn publish_after_shutdown_fails_the_record() {
    let publisher = Arc::new(MemoryPublisher::new());

    let registry = HandlerRegistry::new().register(
        Provider::Shopify,
        "orders/create",
        Arc::new(PublishHandler::new(publisher.clone(), "commerce.orders", "id")),
    );
    let h = harness(registry);

    let outcome = h.pipeline.ingest(shopify_delivery(br#"{"id":78}"#, "orders/create")).await.unwrap();
    assert_eq!(outcome.status, DeliveryStatus::Failed);
    assert_eq!(outcome.error.as_deref(), Some("publisher not initialised"));
}

struct DownStore;

#[async_trait::async_trait]
impl webhook_ingest::RecordStore for DownStore {
    async fn insert(&self, _record: &webhook_ingest::DeliveryRecord) -> Result<(), webhook_ingest::StoreError> {
        Err(webhook_ingest::StoreError::Unavailable("connection refused".into()))
    }

    async fn transition(
        &self,
        id: &webhook_ingest::RecordId,
        _status: DeliveryStatus,
        _last_error: Option<String>,
    ) -> Result<webhook_ingest::DeliveryRecord, webhook_ingest::StoreError> {
        Err(webhook_ingest::StoreError::NotFound(*id))
    }

    async fn begin_retry(
        &self,
        id: &webhook_ingest::RecordId,
        _max_retries: u32,
    ) -> Result<webhook_ingest::DeliveryRecord, webhook_ingest::StoreError> {
        Err(webhook_ingest::StoreError::NotFound(*id))
    }

    async fn get(
        &self,
        _id: &webhook_ingest::RecordId,
    ) -> Result<Option<webhook_ingest::DeliveryRecord>, webhook_ingest::StoreError> {
        Ok(None)
    }

    async fn list(
        &self,
        _filter: &RecordFilter,
        _limit: usize,
        _offset: usize,
    ) -> Result<Vec<webhook_ingest::DeliveryRecord>, webhook_ingest::StoreError> {
        Ok(Vec::new())
    }
}

#[tokio::test]
async fn recording_failure_aborts_before_dispatch() {
    let handler = Arc::new(CountingHandler::default());
    let observer = Arc::new(webhook_ingest::CollectingObserver::new());
    let pipeline = webhook_ingest::Pipeline::new(
        Arc::new(config()),
        Arc::new(DownStore),
        HandlerRegistry::new().register(Provider::Shopify, "orders/create", handler.clone()),
        webhook_ingest::OutcomeNotifier::new().subscribe(observer.clone()),
    );

    let err = pipeline
        .ingest(shopify_delivery(br#"{"id":1}"#, "orders/create"))
        .await
        .unwrap_err();

    assert!(matches!(err, IngestError::Recording(_)));
    assert_eq!(handler.calls(), 0);
    assert!(observer.outcomes().is_empty());
}
