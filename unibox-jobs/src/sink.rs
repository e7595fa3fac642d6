//! Server-side reconciliation for the offline outbox
//!
//! The sink answers one question per submitted entry: accepted,
//! duplicate, or rejected. Duplicates are keyed by the client-generated
//! entry id, which makes wire delivery at-least-once but the effect
//! at-most-once.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Serialize;
use serde_json::json;
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

use unibox_channels::ChannelManager;
use unibox_core::events::{EventEnvelope, Topic, TopicHub};
use unibox_core::inbox::OutboundMessage;
use unibox_core::{Error, ErrorKind, Result};

use crate::outbox::OutboxEntry;

/// Per-entry verdict from the server
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum SubmitOutcome {
    /// Delivered; `message_ref` is the provider-side reference
    Accepted { message_ref: String },
    /// This client id was already processed; no second message created
    Duplicate,
    /// Permanently refused (validation, unknown channel, ...)
    Rejected { reason: String },
}

/// Where outbox entries are submitted during sync
#[async_trait]
pub trait OutboxSink: Send + Sync {
    /// Submit one entry; transient failures surface as `Err` so the
    /// client keeps the entry queued and retries with backoff
    async fn submit(&self, entry: &OutboxEntry) -> Result<SubmitOutcome>;
}

/// Production sink: dedup by client id, then the normal delivery path
pub struct ReconciliationSink {
    channels: Arc<ChannelManager>,
    hub: TopicHub,
    /// Client ids already processed, with processing time for pruning
    processed: RwLock<HashMap<Uuid, DateTime<Utc>>>,
}

impl ReconciliationSink {
    /// Create a new sink over the shared channel manager
    pub fn new(channels: Arc<ChannelManager>, hub: TopicHub) -> Self {
        Self {
            channels,
            hub,
            processed: RwLock::new(HashMap::new()),
        }
    }

    /// Drop processed ids older than the window
    pub async fn prune(&self, window: ChronoDuration) -> usize {
        let cutoff = Utc::now() - window;
        let mut processed = self.processed.write().await;
        let before = processed.len();
        processed.retain(|_, at| *at >= cutoff);
        before - processed.len()
    }

    /// Number of remembered client ids
    pub async fn processed_count(&self) -> usize {
        self.processed.read().await.len()
    }
}

#[async_trait]
impl OutboxSink for ReconciliationSink {
    async fn submit(&self, entry: &OutboxEntry) -> Result<SubmitOutcome> {
        {
            let processed = self.processed.read().await;
            if processed.contains_key(&entry.id) {
                debug!(entry_id = %entry.id, "duplicate outbox submission");
                return Ok(SubmitOutcome::Duplicate);
            }
        }

        let outbound = OutboundMessage::new(
            entry.channel.clone(),
            entry.conversation_id.clone(),
            entry.conversation_id.clone(),
            entry.content.clone(),
        );

        match self.channels.deliver(&outbound).await {
            Ok(receipt) => {
                // Record-before-report: a crash after delivery but before
                // the response re-runs the send, and dedup absorbs it
                self.processed.write().await.insert(entry.id, Utc::now());

                self.hub
                    .publish(
                        &Topic::conversation(entry.conversation_id.clone()),
                        EventEnvelope::new(
                            "message.delivered",
                            json!({
                                "client_id": entry.id,
                                "conversation_id": entry.conversation_id,
                                "message_ref": receipt.message_ref,
                            }),
                        ),
                    )
                    .await;

                info!(entry_id = %entry.id, message_ref = %receipt.message_ref, "outbox entry delivered");
                Ok(SubmitOutcome::Accepted {
                    message_ref: receipt.message_ref,
                })
            }
            Err(err) => match err.kind() {
                ErrorKind::Transient => Err(Error::Transient(err.to_string())),
                _ => Ok(SubmitOutcome::Rejected {
                    reason: err.to_string(),
                }),
            },
        }
    }
}
