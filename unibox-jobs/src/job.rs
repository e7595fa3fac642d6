//! Job model for the background analysis queue

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kind of analysis performed by a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Sentiment,
    Categorize,
    SuggestReply,
}

impl JobKind {
    /// Stable string form, used in dedup keys and event payloads
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Sentiment => "sentiment",
            JobKind::Categorize => "categorize",
            JobKind::SuggestReply => "suggest_reply",
        }
    }
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobKind {
    type Err = unibox_core::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sentiment" => Ok(JobKind::Sentiment),
            "categorize" => Ok(JobKind::Categorize),
            "suggest_reply" => Ok(JobKind::SuggestReply),
            other => Err(unibox_core::Error::Permanent(format!(
                "unknown job type: {}",
                other
            ))),
        }
    }
}

/// Job lifecycle states
///
/// `Waiting` with a `delayed_until` in the future is the backoff
/// sub-state; terminal states are `Completed` and `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Waiting,
    Active,
    Completed,
    Failed,
}

impl JobStatus {
    /// Whether the job can still make progress
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

/// Submission parameters for a new job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewJob {
    #[serde(rename = "type")]
    pub kind: JobKind,
    pub user_id: String,
    pub message_id: String,
    pub content: String,
    #[serde(default)]
    pub conversation_context: Option<String>,
}

/// Derive the dedup key for a submission
///
/// Deliberately excludes any timestamp: the key identifies the logical
/// unit of work, and two submissions for the same message must collapse.
pub fn dedup_key(kind: JobKind, message_id: &str) -> String {
    format!("{}:{}", kind.as_str(), message_id)
}

/// A unit of deferred background work, owned by the queue
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub kind: JobKind,
    pub dedup_key: String,
    pub user_id: String,
    pub message_id: String,
    pub content: String,
    pub conversation_context: Option<String>,
    pub status: JobStatus,
    /// Earliest time the next attempt may start, while backing off
    pub delayed_until: Option<DateTime<Utc>>,
    pub attempts: u32,
    pub max_attempts: u32,
    pub progress: u8,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Create a new waiting job from a submission
    pub fn new(new: NewJob, max_attempts: u32) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            dedup_key: dedup_key(new.kind, &new.message_id),
            kind: new.kind,
            user_id: new.user_id,
            message_id: new.message_id,
            content: new.content,
            conversation_context: new.conversation_context,
            status: JobStatus::Waiting,
            delayed_until: None,
            attempts: 0,
            max_attempts,
            progress: 0,
            result: None,
            error: None,
            created_at: now,
            updated_at: now,
            finished_at: None,
        }
    }
}
