//! In-memory mock channel
//!
//! Used by tests and local runs: sends are recorded instead of leaving
//! the process, and failures can be scripted per attempt.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use uuid::Uuid;

use crate::base::{ChannelAdapter, DeliveryError, DeliveryReceipt, Result};
use crate::webhook::{self, WebhookMessage};

/// A message recorded by the mock channel
#[derive(Debug, Clone)]
pub struct SentRecord {
    pub recipient: String,
    pub content: String,
    pub media: Vec<String>,
}

/// Scriptable in-memory channel adapter
pub struct MockAdapter {
    name: String,
    webhook_secret: String,
    sent: Mutex<Vec<SentRecord>>,
    inbound: Mutex<Vec<WebhookMessage>>,
    scripted_failures: Mutex<VecDeque<DeliveryError>>,
    attempts: AtomicU32,
}

impl MockAdapter {
    /// Create a new mock adapter
    pub fn new(name: impl Into<String>, webhook_secret: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            webhook_secret: webhook_secret.into(),
            sent: Mutex::new(Vec::new()),
            inbound: Mutex::new(Vec::new()),
            scripted_failures: Mutex::new(VecDeque::new()),
            attempts: AtomicU32::new(0),
        }
    }

    /// Script a failure for the next send attempt
    pub fn fail_next(&self, err: DeliveryError) {
        self.scripted_failures.lock().unwrap().push_back(err);
    }

    /// Number of send attempts observed so far
    pub fn send_attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Messages successfully "delivered" so far
    pub fn sent_messages(&self) -> Vec<SentRecord> {
        self.sent.lock().unwrap().clone()
    }

    /// Seed an inbound message for `fetch_messages`
    pub fn push_inbound(&self, message: WebhookMessage) {
        self.inbound.lock().unwrap().push(message);
    }
}

#[async_trait]
impl ChannelAdapter for MockAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch_messages(
        &self,
        _conversation_id: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<WebhookMessage>> {
        let inbound = self.inbound.lock().unwrap();
        Ok(inbound
            .iter()
            .filter(|m| since.map_or(true, |s| m.timestamp > s))
            .cloned()
            .collect())
    }

    async fn send_message(
        &self,
        recipient: &str,
        content: &str,
        media: &[String],
    ) -> Result<DeliveryReceipt> {
        self.attempts.fetch_add(1, Ordering::SeqCst);

        if let Some(err) = self.scripted_failures.lock().unwrap().pop_front() {
            return Err(err);
        }

        self.sent.lock().unwrap().push(SentRecord {
            recipient: recipient.to_string(),
            content: content.to_string(),
            media: media.to_vec(),
        });

        Ok(DeliveryReceipt::new(
            self.name.clone(),
            recipient,
            Uuid::new_v4().to_string(),
        ))
    }

    fn verify_webhook(&self, signature: &str, payload: &[u8]) -> Result<()> {
        webhook::verify(&self.webhook_secret, signature, payload)
    }

    fn parse_webhook_payload(&self, payload: &[u8]) -> Result<WebhookMessage> {
        serde_json::from_slice(payload).map_err(|e| DeliveryError::Payload(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_records_sends() {
        let adapter = MockAdapter::new("mock", "s");
        adapter.send_message("u1", "hello", &[]).await.unwrap();

        let sent = adapter.sent_messages();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].content, "hello");
    }

    #[tokio::test]
    async fn test_scripted_failure_consumed_in_order() {
        let adapter = MockAdapter::new("mock", "s");
        adapter.fail_next(DeliveryError::Server { status: 500 });

        assert!(adapter.send_message("u1", "a", &[]).await.is_err());
        assert!(adapter.send_message("u1", "b", &[]).await.is_ok());
    }

    #[tokio::test]
    async fn test_fetch_messages_filters_by_since() {
        let adapter = MockAdapter::new("mock", "s");
        let mut old = WebhookMessage {
            id: "m1".to_string(),
            from: "u1".to_string(),
            timestamp: Utc::now() - chrono::Duration::hours(2),
            text: "old".to_string(),
            attachments: Vec::new(),
        };
        adapter.push_inbound(old.clone());
        old.id = "m2".to_string();
        old.text = "new".to_string();
        old.timestamp = Utc::now();
        adapter.push_inbound(old);

        let since = Utc::now() - chrono::Duration::hours(1);
        let recent = adapter.fetch_messages("c1", Some(since)).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].text, "new");

        let all = adapter.fetch_messages("c1", None).await.unwrap();
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn test_webhook_round_trip() {
        let adapter = MockAdapter::new("mock", "secret");
        let payload =
            br#"{"id":"m1","from":"u1","timestamp":"2024-05-01T00:00:00Z","text":"hi","attachments":[]}"#;
        let signature = webhook::sign("secret", payload);

        adapter.verify_webhook(&signature, payload).unwrap();
        let msg = adapter.parse_webhook_payload(payload).unwrap();
        assert_eq!(msg.from, "u1");
        assert_eq!(msg.text, "hi");
    }
}
