//! Base trait for channel delivery adapters

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use unibox_core::ErrorKind;

use crate::webhook::WebhookMessage;

/// Delivery errors, classified before they leave the adapter
///
/// Raw transport failures (reqwest, timeouts) never escape; they are
/// mapped into this taxonomy so retry decisions stay out of the
/// transport layer.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Rate limited by channel (retry after {retry_after_s:?}s)")]
    RateLimited { retry_after_s: Option<u64> },

    #[error("Server error: status {status}")]
    Server { status: u16 },

    #[error("Client error: status {status}: {message}")]
    Client { status: u16, message: String },

    #[error("Invalid webhook signature")]
    InvalidSignature,

    #[error("Malformed payload: {0}")]
    Payload(String),

    #[error("Channel not configured: {0}")]
    NotConfigured(String),

    #[error("Delivery failed after {attempts} attempts: {last}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        last: Box<DeliveryError>,
    },
}

impl DeliveryError {
    /// Classify into the shared retry taxonomy
    ///
    /// `RetriesExhausted` stays transient: the send as a whole failed for
    /// a recoverable reason, the adapter just refuses to keep trying.
    pub fn kind(&self) -> ErrorKind {
        match self {
            DeliveryError::Network(_)
            | DeliveryError::RateLimited { .. }
            | DeliveryError::Server { .. }
            | DeliveryError::RetriesExhausted { .. } => ErrorKind::Transient,
            DeliveryError::Client { .. }
            | DeliveryError::InvalidSignature
            | DeliveryError::Payload(_)
            | DeliveryError::NotConfigured(_) => ErrorKind::Permanent,
        }
    }

    /// Map an HTTP status into the taxonomy
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        match status {
            429 => DeliveryError::RateLimited { retry_after_s: None },
            s if s >= 500 => DeliveryError::Server { status: s },
            s => DeliveryError::Client {
                status: s,
                message: message.into(),
            },
        }
    }
}

impl From<reqwest::Error> for DeliveryError {
    fn from(e: reqwest::Error) -> Self {
        if let Some(status) = e.status() {
            DeliveryError::from_status(status.as_u16(), e.to_string())
        } else {
            DeliveryError::Network(e.to_string())
        }
    }
}

impl From<DeliveryError> for unibox_core::Error {
    fn from(e: DeliveryError) -> Self {
        match e.kind() {
            ErrorKind::Transient => unibox_core::Error::Transient(e.to_string()),
            _ => unibox_core::Error::Permanent(e.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, DeliveryError>;

/// Receipt returned by a successful send
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryReceipt {
    /// Channel that carried the message
    pub channel: String,
    /// Recipient the channel acknowledged
    pub recipient: String,
    /// Provider-side message reference
    pub message_ref: String,
    /// Acknowledgement time
    pub delivered_at: DateTime<Utc>,
}

impl DeliveryReceipt {
    /// Create a new receipt
    pub fn new(
        channel: impl Into<String>,
        recipient: impl Into<String>,
        message_ref: impl Into<String>,
    ) -> Self {
        Self {
            channel: channel.into(),
            recipient: recipient.into(),
            message_ref: message_ref.into(),
            delivered_at: Utc::now(),
        }
    }
}

/// Trait for channel delivery adapters
///
/// One implementation per external channel. `verify_webhook` MUST be
/// called before `parse_webhook_payload`; an unverified payload is never
/// trusted.
#[async_trait]
pub trait ChannelAdapter: Send + Sync {
    /// Get the channel name
    fn name(&self) -> &str;

    /// Fetch recent messages for a conversation (pull-based reconciliation)
    async fn fetch_messages(
        &self,
        conversation_id: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<WebhookMessage>>;

    /// Send a single message; one attempt, no retries at this layer
    async fn send_message(
        &self,
        recipient: &str,
        content: &str,
        media: &[String],
    ) -> Result<DeliveryReceipt>;

    /// Verify a webhook signature against the raw payload
    fn verify_webhook(&self, signature: &str, payload: &[u8]) -> Result<()>;

    /// Normalize a verified channel payload into the common inbound shape
    fn parse_webhook_payload(&self, payload: &[u8]) -> Result<WebhookMessage>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert!(matches!(
            DeliveryError::from_status(429, ""),
            DeliveryError::RateLimited { .. }
        ));
        assert!(matches!(
            DeliveryError::from_status(503, ""),
            DeliveryError::Server { status: 503 }
        ));
        assert!(matches!(
            DeliveryError::from_status(400, "bad recipient"),
            DeliveryError::Client { status: 400, .. }
        ));
    }

    #[test]
    fn test_kind_mapping() {
        assert_eq!(
            DeliveryError::Network("reset".into()).kind(),
            ErrorKind::Transient
        );
        assert_eq!(
            DeliveryError::Client {
                status: 404,
                message: "unknown chat".into()
            }
            .kind(),
            ErrorKind::Permanent
        );
        assert_eq!(DeliveryError::InvalidSignature.kind(), ErrorKind::Permanent);
    }

    #[test]
    fn test_exhausted_names_last_error() {
        let err = DeliveryError::RetriesExhausted {
            attempts: 3,
            last: Box::new(DeliveryError::Server { status: 502 }),
        };
        assert!(err.to_string().contains("3 attempts"));
        assert!(err.to_string().contains("502"));
    }
}
