use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::HandlerError;
use crate::types::{Headers, Provider, RecordId};

/// A recorded delivery as seen by a business handler.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub record_id: RecordId,
    pub provider: Provider,
    /// Tenant/source identifier (shop domain, store URL) when the provider
    /// sends one.
    pub source_id: Option<String>,
    /// Routing topic, without any provider prefix.
    pub topic: String,
    pub payload: serde_json::Value,
    pub headers: Headers,
}

/// Business logic for one `(provider, topic)` pair.
///
/// Handlers own their own latency bounds; the dispatcher awaits them
/// without a timeout.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, delivery: &Delivery) -> Result<(), HandlerError>;
}

/// Static routing table keyed by `(provider, topic)`.
///
/// Built before the pipeline starts and never mutated afterwards.
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    routes: HashMap<(Provider, String), Arc<dyn EventHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler, replacing any previous one for the same route.
    pub fn register(
        mut self,
        provider: Provider,
        topic: impl Into<String>,
        handler: Arc<dyn EventHandler>,
    ) -> Self {
        let topic = topic.into();
        if self.routes.insert((provider.clone(), topic.clone()), handler).is_some() {
            tracing::warn!(%provider, %topic, "replacing webhook handler");
        }
        self
    }

    pub fn lookup(&self, provider: &Provider, topic: &str) -> Option<Arc<dyn EventHandler>> {
        self.routes.get(&(provider.clone(), topic.to_string())).cloned()
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
