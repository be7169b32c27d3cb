//! Per-provider signature verification.
//!
//! Three schemes are supported:
//! - body HMAC (Shopify, WooCommerce): base64 HMAC-SHA256 over the raw body
//! - timestamped header (Stripe): `t=<secs>,v1=<hex>` over `"<t>.<body>"`
//! - custom: same digest as the timestamped scheme, timestamp sent separately
//!
//! Every failure mode is reported as [`Verification::Rejected`].

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::config::SecretResolver;
use crate::error::RejectReason;
use crate::signing::{
    is_timestamp_fresh, parse_signature_header, parse_timestamp, verify_body_signature,
    verify_signature,
};
use crate::types::Provider;

#[cfg(feature = "metrics")]
fn metric_inc(name: &'static str) {
    metrics::increment_counter!(name);
}

#[cfg(not(feature = "metrics"))]
fn metric_inc(_name: &'static str) {}

/// Result of verifying an inbound delivery.
#[derive(Debug, Clone, PartialEq)]
pub enum Verification {
    /// Signature valid; carries the parsed body.
    Verified(serde_json::Value),
    Rejected(RejectReason),
}

impl Verification {
    pub fn is_verified(&self) -> bool {
        matches!(self, Verification::Verified(_))
    }

    pub fn into_result(self) -> Result<serde_json::Value, RejectReason> {
        match self {
            Verification::Verified(payload) => Ok(payload),
            Verification::Rejected(reason) => Err(reason),
        }
    }
}

impl From<Result<serde_json::Value, RejectReason>> for Verification {
    fn from(result: Result<serde_json::Value, RejectReason>) -> Self {
        match result {
            Ok(payload) => Verification::Verified(payload),
            Err(reason) => Verification::Rejected(reason),
        }
    }
}

/// Stateless signature checker.
#[derive(Clone)]
pub struct Verifier {
    secrets: Arc<dyn SecretResolver>,
    tolerance_secs: u64,
}

impl Verifier {
    pub fn new(secrets: Arc<dyn SecretResolver>, tolerance_secs: u64) -> Self {
        Self {
            secrets,
            tolerance_secs,
        }
    }

    /// Verify against the current wall clock.
    ///
    /// `timestamp` is only consulted by custom providers, whose timestamp
    /// travels outside the signature header.
    pub fn verify(
        &self,
        provider: &Provider,
        source_id: Option<&str>,
        raw_body: &[u8],
        signature_header: &str,
        timestamp: Option<&str>,
    ) -> Verification {
        self.verify_at(provider, source_id, raw_body, signature_header, timestamp, now_secs())
    }

    pub fn verify_at(
        &self,
        provider: &Provider,
        source_id: Option<&str>,
        raw_body: &[u8],
        signature_header: &str,
        timestamp: Option<&str>,
        now_secs: i64,
    ) -> Verification {
        let result = match provider {
            Provider::Shopify | Provider::WooCommerce => {
                self.verify_body(provider, source_id, raw_body, signature_header)
            }
            Provider::Stripe => self.verify_timestamped(provider, raw_body, signature_header, now_secs),
            Provider::Custom(_) => {
                self.verify_custom(provider, raw_body, signature_header, timestamp, now_secs)
            }
        };

        match &result {
            Ok(_) => metric_inc("webhook.verify.accepted"),
            Err(reason) => {
                metric_inc("webhook.verify.rejected");
                tracing::warn!(provider = %provider, source_id, %reason, "webhook verification failed");
            }
        }

        result.into()
    }

    fn secret(&self, provider: &Provider, source_id: Option<&str>) -> Result<String, RejectReason> {
        self.secrets
            .get_secret(provider, source_id)
            .filter(|s| !s.is_empty())
            .ok_or(RejectReason::MissingSecret)
    }

    fn verify_body(
        &self,
        provider: &Provider,
        source_id: Option<&str>,
        raw_body: &[u8],
        signature: &str,
    ) -> Result<serde_json::Value, RejectReason> {
        if signature.trim().is_empty() {
            return Err(RejectReason::MissingSignature);
        }
        let secret = self.secret(provider, source_id)?;
        if !verify_body_signature(secret.as_bytes(), raw_body, signature) {
            return Err(RejectReason::InvalidSignature);
        }
        parse_body(raw_body)
    }

    fn verify_timestamped(
        &self,
        provider: &Provider,
        raw_body: &[u8],
        header: &str,
        now_secs: i64,
    ) -> Result<serde_json::Value, RejectReason> {
        if header.trim().is_empty() {
            return Err(RejectReason::MissingSignature);
        }
        let parsed = parse_signature_header(header)?;

        // Replay window is checked before any digest work.
        if !is_timestamp_fresh(parsed.timestamp_secs, now_secs, self.tolerance_secs) {
            return Err(RejectReason::StaleTimestamp);
        }

        let secret = self.secret(provider, None)?;
        let matched = parsed
            .signatures
            .iter()
            .any(|sig| verify_signature(secret.as_bytes(), &parsed.timestamp, raw_body, sig));
        if !matched {
            return Err(RejectReason::InvalidSignature);
        }
        parse_body(raw_body)
    }

    fn verify_custom(
        &self,
        provider: &Provider,
        raw_body: &[u8],
        signature: &str,
        timestamp: Option<&str>,
        now_secs: i64,
    ) -> Result<serde_json::Value, RejectReason> {
        if signature.trim().is_empty() {
            return Err(RejectReason::MissingSignature);
        }
        let timestamp = timestamp
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(RejectReason::MissingTimestamp)?;
        let timestamp_secs = parse_timestamp(timestamp)?;

        if !is_timestamp_fresh(timestamp_secs, now_secs, self.tolerance_secs) {
            return Err(RejectReason::StaleTimestamp);
        }

        let secret = self.secret(provider, None)?;
        if !verify_signature(secret.as_bytes(), timestamp, raw_body, signature) {
            return Err(RejectReason::InvalidSignature);
        }
        parse_body(raw_body)
    }
}

fn parse_body(raw_body: &[u8]) -> Result<serde_json::Value, RejectReason> {
    serde_json::from_slice(raw_body).map_err(|_| RejectReason::MalformedBody)
}

pub(crate) fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}
