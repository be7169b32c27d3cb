#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use webhook_ingest::{
    CollectingObserver, Delivery, EventHandler, HandlerError, HandlerRegistry, InMemoryStore,
    IngestConfig, OutcomeNotifier, Pipeline,
};

pub const SHOPIFY_SECRET: &str = "s3cret";
pub const STRIPE_SECRET: &str = "whsec_test";
pub const ACME_SECRET: &str = "acme-secret";

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn config() -> IngestConfig {
    IngestConfig::default()
        .with_shopify_secret(SHOPIFY_SECRET)
        .with_woocommerce_secret("woo-secret")
        .with_stripe_secret(STRIPE_SECRET)
        .with_custom_secret("acme", ACME_SECRET)
}

pub fn now_secs() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Handler that always fails with a fixed message.
pub struct FailingHandler(pub &'static str);

#[async_trait]
impl EventHandler for FailingHandler {
    async fn handle(&self, _delivery: &Delivery) -> Result<(), HandlerError> {
        Err(self.0.into())
    }
}

/// Handler that counts invocations.
#[derive(Default)]
pub struct CountingHandler {
    pub calls: AtomicUsize,
}

impl CountingHandler {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EventHandler for CountingHandler {
    async fn handle(&self, _delivery: &Delivery) -> Result<(), HandlerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Handler that fails until it has been called `failures` times.
pub struct FlakyHandler {
    failures: usize,
    calls: AtomicUsize,
}

impl FlakyHandler {
    pub fn new(failures: usize) -> Self {
        Self {
            failures,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl EventHandler for FlakyHandler {
    async fn handle(&self, _delivery: &Delivery) -> Result<(), HandlerError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            Err(format!("attempt {} failed", call + 1).into())
        } else {
            Ok(())
        }
    }
}

pub struct Harness {
    pub pipeline: Pipeline,
    pub store: Arc<InMemoryStore>,
    pub observer: Arc<CollectingObserver>,
}

pub fn harness(registry: HandlerRegistry) -> Harness {
    init_tracing();
    let store = Arc::new(InMemoryStore::new());
    let observer = Arc::new(CollectingObserver::new());
    let notifier = OutcomeNotifier::new()
        .subscribe(observer.clone())
        .subscribe_custom(observer.clone());
    let pipeline = Pipeline::new(Arc::new(config()), store.clone(), registry, notifier);
    Harness {
        pipeline,
        store,
        observer,
    }
}
