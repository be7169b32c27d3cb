//! Downstream event-bus capability used by business handlers.
//!
//! The pipeline itself never publishes; handlers that forward deliveries
//! hold an injected [`Publisher`] whose lifecycle is owned by whoever wires
//! the process together.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::HandlerError;
use crate::router::{Delivery, EventHandler};

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("publisher not initialised")]
    NotConnected,

    #[error("publish failed: {0}")]
    Backend(String),
}

#[async_trait]
pub trait Publisher: Send + Sync {
    async fn init(&self) -> Result<(), PublishError>;

    async fn publish(
        &self,
        topic: &str,
        message: &serde_json::Value,
        partition_key: &str,
    ) -> Result<(), PublishError>;

    async fn shutdown(&self) -> Result<(), PublishError>;
}

/// A message accepted by [`MemoryPublisher`].
#[derive(Debug, Clone, PartialEq)]
pub struct PublishedMessage {
    pub topic: String,
    pub message: serde_json::Value,
    pub partition_key: String,
}

/// In-process publisher for lightweight deployments and tests.
#[derive(Default)]
pub struct MemoryPublisher {
    state: Mutex<MemoryState>,
}

#[derive(Default)]
struct MemoryState {
    connected: bool,
    messages: Vec<PublishedMessage>,
}

impl MemoryPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn messages(&self) -> Vec<PublishedMessage> {
        self.state.lock().await.messages.clone()
    }
}

#[async_trait]
impl Publisher for MemoryPublisher {
    async fn init(&self) -> Result<(), PublishError> {
        self.state.lock().await.connected = true;
        Ok(())
    }

    async fn publish(
        &self,
        topic: &str,
        message: &serde_json::Value,
        partition_key: &str,
    ) -> Result<(), PublishError> {
        let mut state = self.state.lock().await;
        if !state.connected {
            return Err(PublishError::NotConnected);
        }
        state.messages.push(PublishedMessage {
            topic: topic.to_string(),
            message: message.clone(),
            partition_key: partition_key.to_string(),
        });
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), PublishError> {
        self.state.lock().await.connected = false;
        Ok(())
    }
}

/// Handler that forwards the delivery payload to a downstream topic.
///
/// The partition key is read from a top-level payload field, falling back
/// to the delivery's source id and then its record id.
pub struct PublishHandler {
    publisher: Arc<dyn Publisher>,
    topic: String,
    key_field: String,
}

impl PublishHandler {
    pub fn new(
        publisher: Arc<dyn Publisher>,
        topic: impl Into<String>,
        key_field: impl Into<String>,
    ) -> Self {
        Self {
            publisher,
            topic: topic.into(),
            key_field: key_field.into(),
        }
    }

    fn partition_key(&self, delivery: &Delivery) -> String {
        match delivery.payload.get(&self.key_field) {
            Some(serde_json::Value::String(s)) => s.clone(),
            Some(serde_json::Value::Number(n)) => n.to_string(),
            _ => delivery
                .source_id
                .clone()
                .unwrap_or_else(|| delivery.record_id.to_string()),
        }
    }
}

#[async_trait]
impl EventHandler for PublishHandler {
    async fn handle(&self, delivery: &Delivery) -> Result<(), HandlerError> {
        let key = self.partition_key(delivery);
        let message = serde_json::json!({
            "provider": delivery.provider.as_str(),
            "topic": delivery.topic,
            "source": delivery.source_id,
            "data": delivery.payload,
        });
        self.publisher.publish(&self.topic, &message, &key).await?;
        Ok(())
    }
}
