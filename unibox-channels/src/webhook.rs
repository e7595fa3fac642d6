//! Webhook signature verification and payload normalization
//!
//! Signatures are HMAC-SHA256 over the raw request body with the
//! channel's shared secret, hex-encoded, optionally carrying a scheme
//! prefix (`sha256=` or `v0=`). Comparison is constant-time via the
//! `Mac::verify_slice` contract.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::base::{DeliveryError, Result};

type HmacSha256 = Hmac<Sha256>;

/// Normalized inbound message, produced from a verified webhook payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookMessage {
    /// Provider-side message id
    pub id: String,
    /// Sender identifier on the channel
    pub from: String,
    /// Message timestamp
    pub timestamp: DateTime<Utc>,
    /// Text content
    pub text: String,
    /// Attachment URLs
    pub attachments: Vec<String>,
}

/// Compute the hex HMAC-SHA256 signature for a payload
pub fn sign(secret: &str, payload: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}

/// Verify a hex HMAC-SHA256 signature against a raw payload
///
/// Rejects unconditionally on any mismatch: wrong digest, malformed hex,
/// or an empty shared secret. A payload that fails here is never parsed.
pub fn verify(secret: &str, signature: &str, payload: &[u8]) -> Result<()> {
    if secret.is_empty() {
        return Err(DeliveryError::NotConfigured(
            "webhook secret not set".to_string(),
        ));
    }

    let sig_hex = signature
        .trim()
        .trim_start_matches("sha256=")
        .trim_start_matches("v0=");
    let sig_bytes = hex::decode(sig_hex).map_err(|_| DeliveryError::InvalidSignature)?;

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| DeliveryError::InvalidSignature)?;
    mac.update(payload);
    mac.verify_slice(&sig_bytes)
        .map_err(|_| DeliveryError::InvalidSignature)
}
