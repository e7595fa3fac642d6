//! Real-time event fan-out
//!
//! State changes produced by the queue, the dispatcher and the outbox are
//! published as [`EventEnvelope`]s on a [`Topic`]; connected clients
//! subscribe per user and per conversation. Delivery is best-effort with
//! no replay buffer: a lagged or disconnected subscriber misses the gap
//! and reconciles with a pull-based refresh.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tracing::debug;

/// Default per-topic buffer before slow subscribers start lagging
const DEFAULT_TOPIC_CAPACITY: usize = 256;

/// Subscription topic
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Device-spanning notifications for one user
    User(String),
    /// Scoped events for one conversation
    Conversation(String),
}

impl Topic {
    /// Topic for a user's device-spanning channel
    pub fn user(id: impl Into<String>) -> Self {
        Topic::User(id.into())
    }

    /// Topic for a single conversation
    pub fn conversation(id: impl Into<String>) -> Self {
        Topic::Conversation(id.into())
    }
}

impl std::fmt::Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Topic::User(id) => write!(f, "user:{}", id),
            Topic::Conversation(id) => write!(f, "conversation:{}", id),
        }
    }
}

/// Event pushed to connected clients
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Event name (e.g., "job.completed", "schedule.sent")
    pub event: String,
    /// Event payload
    pub data: serde_json::Value,
    /// Emission time
    pub timestamp: DateTime<Utc>,
}

impl EventEnvelope {
    /// Create a new event envelope
    pub fn new(event: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            event: event.into(),
            data,
            timestamp: Utc::now(),
        }
    }
}

/// In-process event hub with per-topic broadcast channels
///
/// Topics are created lazily on first use. Publishing to a topic with no
/// subscribers is a no-op; there is deliberately no replay buffer.
#[derive(Clone)]
pub struct TopicHub {
    topics: Arc<RwLock<HashMap<Topic, broadcast::Sender<EventEnvelope>>>>,
    capacity: usize,
}

impl TopicHub {
    /// Create a new hub with the default per-topic capacity
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_TOPIC_CAPACITY)
    }

    /// Create a new hub with a custom per-topic capacity
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            topics: Arc::new(RwLock::new(HashMap::new())),
            capacity,
        }
    }

    /// Subscribe to a topic, creating it if needed
    pub async fn subscribe(&self, topic: Topic) -> broadcast::Receiver<EventEnvelope> {
        let mut topics = self.topics.write().await;
        topics
            .entry(topic)
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    /// Publish an event to a topic; returns the number of receivers reached
    pub async fn publish(&self, topic: &Topic, envelope: EventEnvelope) -> usize {
        let topics = self.topics.read().await;
        match topics.get(topic) {
            Some(sender) => sender.send(envelope).unwrap_or_else(|_| {
                debug!("No live subscribers on topic {}", topic);
                0
            }),
            None => 0,
        }
    }

    /// Publish the same event to several topics
    pub async fn publish_all(&self, topics: &[Topic], envelope: EventEnvelope) {
        for topic in topics {
            self.publish(topic, envelope.clone()).await;
        }
    }

    /// Drop topics that no longer have any subscriber
    pub async fn prune(&self) {
        let mut topics = self.topics.write().await;
        topics.retain(|_, sender| sender.receiver_count() > 0);
    }
}

impl Default for TopicHub {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_reaches_subscriber() {
        let hub = TopicHub::new();
        let mut rx = hub.subscribe(Topic::conversation("c1")).await;

        let reached = hub
            .publish(
                &Topic::conversation("c1"),
                EventEnvelope::new("message.delivered", serde_json::json!({"id": "m1"})),
            )
            .await;
        assert_eq!(reached, 1);

        let event = rx.recv().await.unwrap();
        assert_eq!(event.event, "message.delivered");
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_noop() {
        let hub = TopicHub::new();
        let reached = hub
            .publish(
                &Topic::user("u1"),
                EventEnvelope::new("noop", serde_json::Value::Null),
            )
            .await;
        assert_eq!(reached, 0);
    }

    #[tokio::test]
    async fn test_topics_are_isolated() {
        let hub = TopicHub::new();
        let mut user_rx = hub.subscribe(Topic::user("u1")).await;
        let _conv_rx = hub.subscribe(Topic::conversation("c1")).await;

        hub.publish(
            &Topic::conversation("c1"),
            EventEnvelope::new("typing", serde_json::Value::Null),
        )
        .await;

        assert!(user_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_prune_drops_dead_topics() {
        let hub = TopicHub::new();
        {
            let _rx = hub.subscribe(Topic::user("gone")).await;
        }
        hub.prune().await;

        let reached = hub
            .publish(
                &Topic::user("gone"),
                EventEnvelope::new("noop", serde_json::Value::Null),
            )
            .await;
        assert_eq!(reached, 0);
    }
}
