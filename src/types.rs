use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Maximum number of retries a delivery chain may consume.
pub const MAX_RETRIES: u32 = 3;

/// Header map as received from the provider.
///
/// Keys keep their original casing; use [`header`] for lookups.
pub type Headers = BTreeMap<String, String>;

/// Case-insensitive header lookup.
pub fn header<'a>(headers: &'a Headers, name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.as_str())
}

/// Origin system of a delivery.
///
/// The set of providers is closed: adding one means adding a variant and
/// handling it wherever providers are matched on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Provider {
    Shopify,
    WooCommerce,
    Stripe,
    /// Generic integration identified by name, e.g. `"acme"`.
    Custom(String),
}

impl Provider {
    /// Provider string persisted on records.
    pub fn as_str(&self) -> &str {
        match self {
            Provider::Shopify => "shopify",
            Provider::WooCommerce => "woocommerce",
            Provider::Stripe => "stripe",
            Provider::Custom(_) => "custom",
        }
    }

    /// Topic as persisted. Custom providers fold their name into the topic.
    pub fn record_topic(&self, topic: &str) -> String {
        match self {
            Provider::Custom(name) => format!("{name}:{topic}"),
            _ => topic.to_string(),
        }
    }

    /// Rebuild the provider and routing topic from a persisted record.
    pub fn from_record(provider: &str, topic: &str) -> Option<(Provider, String)> {
        match provider {
            "shopify" => Some((Provider::Shopify, topic.to_string())),
            "woocommerce" => Some((Provider::WooCommerce, topic.to_string())),
            "stripe" => Some((Provider::Stripe, topic.to_string())),
            "custom" => {
                let (name, event) = topic.split_once(':')?;
                Some((Provider::Custom(name.to_string()), event.to_string()))
            }
            _ => None,
        }
    }

    /// Header carrying the tenant/source identifier, if the provider has one.
    pub fn source_header(&self) -> Option<&'static str> {
        match self {
            Provider::Shopify => Some("X-Shopify-Shop-Domain"),
            Provider::WooCommerce => Some("X-WC-Webhook-Source"),
            Provider::Stripe | Provider::Custom(_) => None,
        }
    }

    /// Header carrying the signature token.
    pub fn signature_header(&self) -> &'static str {
        match self {
            Provider::Shopify => "X-Shopify-Hmac-Sha256",
            Provider::WooCommerce => "X-WC-Webhook-Signature",
            Provider::Stripe => "Stripe-Signature",
            Provider::Custom(_) => "X-Webhook-Signature",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Provider::Custom(name) => write!(f, "custom:{name}"),
            other => f.write_str(other.as_str()),
        }
    }
}

/// Unique identifier for a delivery record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordId(pub Uuid);

impl RecordId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RecordId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Lifecycle status of a delivery record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Pending,
    Processed,
    Failed,
    Retrying,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Pending => "pending",
            DeliveryStatus::Processed => "processed",
            DeliveryStatus::Failed => "failed",
            DeliveryStatus::Retrying => "retrying",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(DeliveryStatus::Pending),
            "processed" => Some(DeliveryStatus::Processed),
            "failed" => Some(DeliveryStatus::Failed),
            "retrying" => Some(DeliveryStatus::Retrying),
            _ => None,
        }
    }

    /// Whether a record in this status may move to `next`.
    pub fn can_transition_to(&self, next: DeliveryStatus) -> bool {
        use DeliveryStatus::*;
        matches!(
            (self, next),
            (Pending, Processed) | (Pending, Failed) | (Failed, Retrying)
        )
    }

    /// Statuses a retry may start from.
    pub fn is_retryable(&self) -> bool {
        self.can_transition_to(DeliveryStatus::Retrying)
    }
}

impl fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Durable audit entry for one dispatch attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryRecord {
    pub id: RecordId,
    pub provider: String,
    pub topic: String,
    pub payload: serde_json::Value,
    pub headers: Headers,
    pub signature: String,
    pub status: DeliveryStatus,
    pub retry_count: u32,
    pub last_error: Option<String>,
    /// Record this one was re-dispatched from, if it is a retry.
    pub retry_of: Option<RecordId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input to the recorder for a new `pending` record.
#[derive(Debug, Clone)]
pub struct NewDelivery {
    pub provider: String,
    pub topic: String,
    pub payload: serde_json::Value,
    pub headers: Headers,
    pub signature: String,
    pub retry_of: Option<RecordId>,
}

impl NewDelivery {
    pub fn new(
        provider: impl Into<String>,
        topic: impl Into<String>,
        payload: serde_json::Value,
        headers: Headers,
    ) -> Self {
        Self {
            provider: provider.into(),
            topic: topic.into(),
            payload,
            headers,
            signature: String::new(),
            retry_of: None,
        }
    }

    pub fn with_signature(mut self, signature: impl Into<String>) -> Self {
        self.signature = signature.into();
        self
    }
}

/// Filter for record listings. Set fields combine with AND.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordFilter {
    pub provider: Option<String>,
    pub status: Option<DeliveryStatus>,
}

impl RecordFilter {
    pub fn provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    pub fn status(mut self, status: DeliveryStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn matches(&self, record: &DeliveryRecord) -> bool {
        self.provider.as_deref().map_or(true, |p| p == record.provider)
            && self.status.map_or(true, |s| s == record.status)
    }
}
