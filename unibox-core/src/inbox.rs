//! Message shapes shared by the inbox pipeline
//!
//! Inbound messages are what channel adapters produce after webhook
//! verification; outbound messages are what the delivery path consumes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Message received from an external channel
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    /// Channel identifier (e.g., "telegram", "slack")
    pub channel: String,
    /// Sender identifier on that channel
    pub sender_id: String,
    /// Conversation identifier
    pub conversation_id: String,
    /// Message text content
    pub content: String,
    /// Message timestamp
    pub timestamp: DateTime<Utc>,
    /// Attachment URLs (if any)
    pub attachments: Vec<String>,
    /// Channel-specific metadata
    pub metadata: HashMap<String, serde_json::Value>,
}

impl InboundMessage {
    /// Create a new inbound message
    pub fn new(
        channel: impl Into<String>,
        sender_id: impl Into<String>,
        conversation_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            channel: channel.into(),
            sender_id: sender_id.into(),
            conversation_id: conversation_id.into(),
            content: content.into(),
            timestamp: Utc::now(),
            attachments: Vec::new(),
            metadata: HashMap::new(),
        }
    }

    /// Get the unique inbox key for this message
    pub fn inbox_key(&self) -> String {
        format!("{}:{}", self.channel, self.conversation_id)
    }

    /// Add an attachment URL to the message
    pub fn with_attachment(mut self, url: impl Into<String>) -> Self {
        self.attachments.push(url.into());
        self
    }

    /// Add metadata to the message
    pub fn with_metadata(
        mut self,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Message to deliver to an external channel
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundMessage {
    /// Channel identifier
    pub channel: String,
    /// Recipient identifier on that channel
    pub recipient: String,
    /// Conversation identifier
    pub conversation_id: String,
    /// Message text content
    pub content: String,
    /// Attachment URLs to include
    pub media: Vec<String>,
    /// Channel-specific metadata
    pub metadata: HashMap<String, serde_json::Value>,
}

impl OutboundMessage {
    /// Create a new outbound message
    pub fn new(
        channel: impl Into<String>,
        recipient: impl Into<String>,
        conversation_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            channel: channel.into(),
            recipient: recipient.into(),
            conversation_id: conversation_id.into(),
            content: content.into(),
            media: Vec::new(),
            metadata: HashMap::new(),
        }
    }

    /// Add a media URL to the message
    pub fn with_media(mut self, url: impl Into<String>) -> Self {
        self.media.push(url.into());
        self
    }

    /// Add metadata to the message
    pub fn with_metadata(
        mut self,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inbox_key() {
        let msg = InboundMessage::new("telegram", "user1", "conv42", "hello");
        assert_eq!(msg.inbox_key(), "telegram:conv42");
    }

    #[test]
    fn test_builders() {
        let msg = OutboundMessage::new("slack", "U123", "C456", "hi")
            .with_media("https://example.com/a.png")
            .with_metadata("thread_ts", "171234.5678");

        assert_eq!(msg.media.len(), 1);
        assert!(msg.metadata.contains_key("thread_ts"));
    }
}
