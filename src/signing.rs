//! HMAC-SHA256 primitives shared by the verification schemes.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::error::RejectReason;

type HmacSha256 = Hmac<Sha256>;

fn hmac_sha256(secret: &[u8], parts: &[&[u8]]) -> Option<Vec<u8>> {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(secret).ok()?;
    for part in parts {
        mac.update(part);
    }
    Some(mac.finalize().into_bytes().to_vec())
}

/// Base64 HMAC over the raw body (storefront scheme).
pub fn compute_body_signature(secret: &[u8], body: &[u8]) -> String {
    hmac_sha256(secret, &[body])
        .map(|digest| BASE64.encode(digest))
        .unwrap_or_default()
}

/// Hex HMAC over `"<timestamp>.<body>"` (timestamped schemes).
pub fn compute_signature(secret: &[u8], timestamp: &str, body: &[u8]) -> String {
    hmac_sha256(secret, &[timestamp.as_bytes(), b".".as_slice(), body])
        .map(hex::encode)
        .unwrap_or_default()
}

/// Verify a base64 body signature.
pub fn verify_body_signature(secret: &[u8], body: &[u8], signature_b64: &str) -> bool {
    let expected = compute_body_signature(secret, body);
    !expected.is_empty() && constant_time_eq(expected.as_bytes(), signature_b64.trim().as_bytes())
}

/// Verify a hex signature over `"<timestamp>.<body>"`.
pub fn verify_signature(secret: &[u8], timestamp: &str, body: &[u8], signature_hex: &str) -> bool {
    let expected = compute_signature(secret, timestamp, body);
    !expected.is_empty()
        && constant_time_eq(
            expected.as_bytes(),
            signature_hex.trim().to_ascii_lowercase().as_bytes(),
        )
}

/// Whether `timestamp_secs` is within `tolerance_secs` of `now_secs`, in
/// either direction.
pub fn is_timestamp_fresh(timestamp_secs: i64, now_secs: i64, tolerance_secs: u64) -> bool {
    let skew = now_secs.abs_diff(timestamp_secs);
    skew <= tolerance_secs
}

/// Length mismatch compares unequal rather than erroring.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.ct_eq(b).into()
}

/// Parsed `t=<secs>,v1=<hex>[,...]` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedSignature {
    pub timestamp: String,
    pub timestamp_secs: i64,
    /// All `v1` entries; providers may send several during secret rotation.
    pub signatures: Vec<String>,
}

/// Parse a timestamped signature header.
pub fn parse_signature_header(header: &str) -> Result<ParsedSignature, RejectReason> {
    let mut timestamp = None;
    let mut signatures = Vec::new();

    for part in header.split(',') {
        let Some((key, value)) = part.trim().split_once('=') else {
            continue;
        };
        match key.trim() {
            "t" => timestamp = Some(value.trim().to_string()),
            "v1" if !value.trim().is_empty() => signatures.push(value.trim().to_string()),
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or(RejectReason::MalformedHeader)?;
    if signatures.is_empty() {
        return Err(RejectReason::MalformedHeader);
    }
    let timestamp_secs = parse_timestamp(&timestamp)?;

    Ok(ParsedSignature {
        timestamp,
        timestamp_secs,
        signatures,
    })
}

pub fn parse_timestamp(value: &str) -> Result<i64, RejectReason> {
    value
        .trim()
        .parse::<i64>()
        .map_err(|_| RejectReason::InvalidTimestamp)
}
