//! Offline outbox
//!
//! Client-resident queue of user-authored messages written while the
//! network is away. Entries carry a client-generated id that stays
//! stable across retries; on reconnect they replay through the same
//! delivery path as online sends, and the server's duplicate detection
//! keeps the effect at-most-once.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use unibox_core::config::schema::OutboxConfig;
use unibox_core::retry::RetryPolicy;
use unibox_core::{Error, Result};

use crate::sink::{OutboxSink, SubmitOutcome};

/// Sync lifecycle of an outbox entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Pending,
    Syncing,
    Synced,
    /// A local cancel raced an in-flight sync; needs manual resolution
    Conflict,
    Failed,
}

/// Parameters for queueing a message locally
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewOutboxEntry {
    /// Client-generated id, stable across retries
    pub id: Uuid,
    pub conversation_id: String,
    pub content: String,
    pub channel: String,
}

/// A locally queued outbound message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxEntry {
    pub id: Uuid,
    pub conversation_id: String,
    pub content: String,
    pub channel: String,
    pub sync_status: SyncStatus,
    pub retry_count: u32,
    pub last_error: Option<String>,
    /// Earliest time the next sync attempt may run, while backing off
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub queued_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OutboxEntry {
    /// Create a new pending entry
    pub fn new(new: NewOutboxEntry) -> Self {
        let now = Utc::now();
        Self {
            id: new.id,
            conversation_id: new.conversation_id,
            content: new.content,
            channel: new.channel,
            sync_status: SyncStatus::Pending,
            retry_count: 0,
            last_error: None,
            next_attempt_at: None,
            queued_at: now,
            updated_at: now,
        }
    }
}

/// Storage accounting snapshot
#[derive(Debug, Clone, Serialize)]
pub struct OutboxUsage {
    pub entries: usize,
    pub bytes: usize,
    pub max_entries: usize,
    pub max_bytes: usize,
}

/// Outcome summary of one sync pass
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncReport {
    pub attempted: usize,
    pub synced: usize,
    pub duplicates: usize,
    pub retried: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct OutboxStore {
    entries: Vec<OutboxEntry>,
}

/// Client-side offline outbox
#[derive(Clone)]
pub struct OfflineOutbox {
    store_path: PathBuf,
    config: OutboxConfig,
    policy: RetryPolicy,
    sink: Arc<dyn OutboxSink>,
    store: Arc<RwLock<Option<OutboxStore>>>,
}

impl OfflineOutbox {
    /// Create a new outbox persisting to `store_path`
    pub fn new(store_path: PathBuf, config: OutboxConfig, sink: Arc<dyn OutboxSink>) -> Self {
        let policy = RetryPolicy {
            max_attempts: config.max_retries,
            ..RetryPolicy::default()
        };
        Self {
            store_path,
            config,
            policy,
            sink,
            store: Arc::new(RwLock::new(None)),
        }
    }

    async fn load_store(&self) -> OutboxStore {
        {
            let store_guard = self.store.read().await;
            if let Some(store) = store_guard.as_ref() {
                return store.clone();
            }
        }

        let store = if self.store_path.exists() {
            match tokio::fs::read_to_string(&self.store_path).await {
                Ok(content) => match serde_json::from_str::<OutboxStore>(&content) {
                    Ok(store) => {
                        debug!("Loaded {} outbox entries from disk", store.entries.len());
                        store
                    }
                    Err(e) => {
                        warn!("Failed to parse outbox store: {}", e);
                        OutboxStore::default()
                    }
                },
                Err(e) => {
                    warn!("Failed to read outbox store: {}", e);
                    OutboxStore::default()
                }
            }
        } else {
            OutboxStore::default()
        };

        {
            let mut store_guard = self.store.write().await;
            *store_guard = Some(store.clone());
        }

        store
    }

    async fn save_store(&self) {
        let store = {
            let store_guard = self.store.read().await;
            match store_guard.as_ref() {
                Some(s) => s.clone(),
                None => return,
            }
        };

        if let Some(parent) = self.store_path.parent() {
            let _ = tokio::fs::create_dir_all(parent).await;
        }

        match serde_json::to_string_pretty(&store) {
            Ok(content) => {
                if let Err(e) = tokio::fs::write(&self.store_path, content).await {
                    error!("Failed to save outbox store: {}", e);
                }
            }
            Err(e) => {
                error!("Failed to serialize outbox store: {}", e);
            }
        }
    }

    /// Queue a message locally; works with no connectivity at all
    ///
    /// Re-submitting an id that is already queued returns the existing
    /// entry unchanged.
    pub async fn enqueue_local(&self, new: NewOutboxEntry) -> Result<OutboxEntry> {
        self.load_store().await;

        let entry = {
            let mut store_guard = self.store.write().await;
            let store = store_guard
                .as_mut()
                .ok_or_else(|| Error::Internal("outbox store not loaded".to_string()))?;

            if let Some(existing) = store.entries.iter().find(|e| e.id == new.id) {
                return Ok(existing.clone());
            }

            if store.entries.len() >= self.config.max_entries {
                return Err(Error::Quota(format!(
                    "outbox holds {} entries (limit {})",
                    store.entries.len(),
                    self.config.max_entries
                )));
            }
            let used: usize = store.entries.iter().map(|e| e.content.len()).sum();
            if used + new.content.len() > self.config.max_bytes {
                return Err(Error::Quota(format!(
                    "outbox content would exceed {} bytes",
                    self.config.max_bytes
                )));
            }

            let entry = OutboxEntry::new(new);
            store.entries.push(entry.clone());
            entry
        };
        self.save_store().await;

        debug!(entry_id = %entry.id, "message queued offline");
        Ok(entry)
    }

    /// Replay queued entries through the delivery path, oldest first
    ///
    /// Entries already being synced are skipped, so at most one attempt
    /// per entry is in flight even when sync is triggered concurrently.
    pub async fn trigger_sync(&self) -> Result<SyncReport> {
        self.load_store().await;
        let now = Utc::now();

        // Claim the due pending entries by flipping them to Syncing
        let claimed: Vec<OutboxEntry> = {
            let mut store_guard = self.store.write().await;
            let store = store_guard
                .as_mut()
                .ok_or_else(|| Error::Internal("outbox store not loaded".to_string()))?;

            let mut due: Vec<&mut OutboxEntry> = store
                .entries
                .iter_mut()
                .filter(|e| {
                    e.sync_status == SyncStatus::Pending
                        && e.next_attempt_at.map_or(true, |t| t <= now)
                })
                .collect();
            due.sort_by_key(|e| e.queued_at);

            due.into_iter()
                .map(|e| {
                    e.sync_status = SyncStatus::Syncing;
                    e.updated_at = Utc::now();
                    e.clone()
                })
                .collect()
        };

        let mut report = SyncReport {
            attempted: claimed.len(),
            ..SyncReport::default()
        };

        for entry in claimed {
            let outcome = self.sink.submit(&entry).await;
            self.record_outcome(&entry.id, outcome, &mut report).await;
        }

        self.save_store().await;
        if report.attempted > 0 {
            info!(
                attempted = report.attempted,
                synced = report.synced,
                failed = report.failed,
                "outbox sync pass finished"
            );
        }
        Ok(report)
    }

    async fn record_outcome(
        &self,
        id: &Uuid,
        outcome: Result<SubmitOutcome>,
        report: &mut SyncReport,
    ) {
        let mut store_guard = self.store.write().await;
        let store = match store_guard.as_mut() {
            Some(s) => s,
            None => return,
        };
        let entry = match store.entries.iter_mut().find(|e| e.id == *id) {
            Some(e) => e,
            None => return,
        };
        // A local cancel may have flipped the entry mid-flight
        if entry.sync_status != SyncStatus::Syncing {
            return;
        }

        match outcome {
            Ok(SubmitOutcome::Accepted { .. }) => {
                entry.sync_status = SyncStatus::Synced;
                entry.last_error = None;
                report.synced += 1;
            }
            Ok(SubmitOutcome::Duplicate) => {
                // The server already has it; success, not a re-send
                entry.sync_status = SyncStatus::Synced;
                entry.last_error = None;
                report.duplicates += 1;
                report.synced += 1;
            }
            Ok(SubmitOutcome::Rejected { reason }) => {
                entry.sync_status = SyncStatus::Failed;
                entry.last_error = Some(reason);
                report.failed += 1;
            }
            Err(err) => {
                entry.retry_count += 1;
                entry.last_error = Some(err.to_string());
                if entry.retry_count >= self.config.max_retries {
                    entry.sync_status = SyncStatus::Failed;
                    report.failed += 1;
                } else {
                    entry.sync_status = SyncStatus::Pending;
                    entry.next_attempt_at = Some(
                        Utc::now()
                            + chrono::Duration::milliseconds(
                                self.policy.delay_for(entry.retry_count).as_millis() as i64,
                            ),
                    );
                    report.retried += 1;
                }
            }
        }
        entry.updated_at = Utc::now();
    }

    /// Re-arm a failed entry for another round of sync attempts
    pub async fn retry_failed(&self, id: Uuid) -> Result<OutboxEntry> {
        self.load_store().await;

        let entry = {
            let mut store_guard = self.store.write().await;
            let store = store_guard
                .as_mut()
                .ok_or_else(|| Error::Internal("outbox store not loaded".to_string()))?;
            let entry = store
                .entries
                .iter_mut()
                .find(|e| e.id == id)
                .ok_or_else(|| Error::NotFound(format!("outbox entry {}", id)))?;

            if entry.sync_status != SyncStatus::Failed {
                return Err(Error::Conflict(format!(
                    "outbox entry {} is {:?}, only failed entries can be retried",
                    id, entry.sync_status
                )));
            }

            entry.sync_status = SyncStatus::Pending;
            entry.retry_count = 0;
            entry.next_attempt_at = None;
            entry.updated_at = Utc::now();
            entry.clone()
        };
        self.save_store().await;
        Ok(entry)
    }

    /// Drop a queued entry before it syncs
    ///
    /// An entry whose sync attempt is in flight cannot be removed; it is
    /// marked as conflicted and the caller is told, never silently
    /// ignored.
    pub async fn cancel_local(&self, id: Uuid) -> Result<()> {
        self.load_store().await;

        let result = {
            let mut store_guard = self.store.write().await;
            let store = store_guard
                .as_mut()
                .ok_or_else(|| Error::Internal("outbox store not loaded".to_string()))?;
            let index = store
                .entries
                .iter()
                .position(|e| e.id == id)
                .ok_or_else(|| Error::NotFound(format!("outbox entry {}", id)))?;

            match store.entries[index].sync_status {
                SyncStatus::Pending | SyncStatus::Failed => {
                    store.entries.remove(index);
                    Ok(())
                }
                SyncStatus::Syncing => {
                    store.entries[index].sync_status = SyncStatus::Conflict;
                    store.entries[index].updated_at = Utc::now();
                    Err(Error::Conflict(format!(
                        "outbox entry {} has a sync attempt in flight",
                        id
                    )))
                }
                status => Err(Error::Conflict(format!(
                    "outbox entry {} is already {:?}",
                    id, status
                ))),
            }
        };
        self.save_store().await;
        result
    }

    /// Get an entry by client id
    pub async fn get(&self, id: Uuid) -> Result<OutboxEntry> {
        let store = self.load_store().await;
        store
            .entries
            .into_iter()
            .find(|e| e.id == id)
            .ok_or_else(|| Error::NotFound(format!("outbox entry {}", id)))
    }

    /// List all entries, oldest first
    pub async fn list(&self) -> Vec<OutboxEntry> {
        let mut entries = self.load_store().await.entries;
        entries.sort_by_key(|e| e.queued_at);
        entries
    }

    /// Current storage usage against the configured quota
    pub async fn usage(&self) -> OutboxUsage {
        let store = self.load_store().await;
        OutboxUsage {
            entries: store.entries.len(),
            bytes: store.entries.iter().map(|e| e.content.len()).sum(),
            max_entries: self.config.max_entries,
            max_bytes: self.config.max_bytes,
        }
    }

    /// Drop synced entries; everything else is retained
    pub async fn compact(&self) -> usize {
        self.load_store().await;

        let removed = {
            let mut store_guard = self.store.write().await;
            match store_guard.as_mut() {
                Some(store) => {
                    let before = store.entries.len();
                    store
                        .entries
                        .retain(|e| e.sync_status != SyncStatus::Synced);
                    before - store.entries.len()
                }
                None => 0,
            }
        };
        self.save_store().await;
        removed
    }
}
