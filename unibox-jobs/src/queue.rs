//! Durable job queue with bounded retries
//!
//! An explicitly constructed service with a start/stop lifecycle - there
//! is no process-wide singleton and no implicit first-use init. Callers
//! enqueue and immediately get a handle back; a pool of workers executes
//! jobs and the queue is the sole authority keeping one worker per
//! logical job. State is persisted to a JSON store so that after a crash
//! the status is re-derived from the queue's own records, never assumed
//! from a caller's in-memory view. Lifecycle transitions are emitted on
//! the topic hub.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use unibox_core::config::schema::QueueConfig;
use unibox_core::events::{EventEnvelope, Topic, TopicHub};
use unibox_core::retry::{RetryDecision, RetryPolicy};
use unibox_core::{Error, Result};

use crate::analysis::Analyzer;
use crate::job::{Job, JobStatus, NewJob};

/// Snapshot returned by status polling
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStatusView {
    pub status: JobStatus,
    pub progress: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct JobStore {
    jobs: Vec<Job>,
}

struct QueueInner {
    store_path: PathBuf,
    config: QueueConfig,
    policy: RetryPolicy,
    analyzer: Arc<dyn Analyzer>,
    hub: TopicHub,
    jobs: RwLock<HashMap<Uuid, Job>>,
    /// dedup key -> unfinished job id; terminal jobs drop out
    dedup: RwLock<HashMap<String, Uuid>>,
    ready_tx: mpsc::UnboundedSender<Uuid>,
    ready_rx: Mutex<mpsc::UnboundedReceiver<Uuid>>,
}

/// Background job queue for AI analysis work
pub struct JobQueue {
    inner: Arc<QueueInner>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    running: Arc<RwLock<bool>>,
}

impl JobQueue {
    /// Create a new queue; call [`JobQueue::start`] to begin processing
    pub fn new(
        store_path: PathBuf,
        config: QueueConfig,
        analyzer: Arc<dyn Analyzer>,
        hub: TopicHub,
    ) -> Self {
        let (ready_tx, ready_rx) = mpsc::unbounded_channel();
        let policy = RetryPolicy {
            max_attempts: config.max_attempts,
            base_delay: std::time::Duration::from_millis(config.base_delay_ms),
            ..RetryPolicy::default()
        };

        Self {
            inner: Arc::new(QueueInner {
                store_path,
                config,
                policy,
                analyzer,
                hub,
                jobs: RwLock::new(HashMap::new()),
                dedup: RwLock::new(HashMap::new()),
                ready_tx,
                ready_rx: Mutex::new(ready_rx),
            }),
            handles: Mutex::new(Vec::new()),
            running: Arc::new(RwLock::new(false)),
        }
    }

    /// Start the worker pool and the cleanup loop
    ///
    /// Recovers persisted jobs first: an attempt that was interrupted
    /// mid-flight comes back as waiting and runs again (at-least-once).
    pub async fn start(&self) {
        {
            let mut running = self.running.write().await;
            if *running {
                debug!("Job queue already running");
                return;
            }
            *running = true;
        }

        self.recover().await;

        let mut handles = self.handles.lock().await;
        for worker_id in 0..self.inner.config.workers {
            let inner = Arc::clone(&self.inner);
            handles.push(tokio::spawn(async move {
                worker_loop(inner, worker_id).await;
            }));
        }

        let inner = Arc::clone(&self.inner);
        handles.push(tokio::spawn(async move {
            cleanup_loop(inner).await;
        }));

        info!("Job queue started with {} workers", self.inner.config.workers);
    }

    /// Stop processing; queued jobs stay in the store until the next start
    pub async fn stop(&self) {
        *self.running.write().await = false;

        let mut handles = self.handles.lock().await;
        for handle in handles.drain(..) {
            handle.abort();
        }
        info!("Job queue stopped");
    }

    /// Check if the queue is running
    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }

    /// Load the persisted store and re-queue unfinished work
    async fn recover(&self) {
        let store = if self.inner.store_path.exists() {
            match tokio::fs::read_to_string(&self.inner.store_path).await {
                Ok(content) => match serde_json::from_str::<JobStore>(&content) {
                    Ok(store) => store,
                    Err(e) => {
                        warn!("Failed to parse job store: {}", e);
                        JobStore::default()
                    }
                },
                Err(e) => {
                    warn!("Failed to read job store: {}", e);
                    JobStore::default()
                }
            }
        } else {
            JobStore::default()
        };

        if store.jobs.is_empty() {
            return;
        }

        let mut recovered = 0;
        {
            let mut jobs = self.inner.jobs.write().await;
            let mut dedup = self.inner.dedup.write().await;
            for mut job in store.jobs {
                if jobs.contains_key(&job.id) {
                    continue;
                }
                if !job.status.is_terminal() {
                    // An interrupted attempt re-runs; backoff windows are
                    // not preserved across restarts
                    job.status = JobStatus::Waiting;
                    job.delayed_until = None;
                    dedup.insert(job.dedup_key.clone(), job.id);
                    let _ = self.inner.ready_tx.send(job.id);
                    recovered += 1;
                }
                jobs.insert(job.id, job);
            }
        }
        if recovered > 0 {
            info!(recovered, "recovered unfinished jobs from store");
        }
    }

    /// Submit a job; returns immediately, never blocks on processing
    ///
    /// Two submissions with the same `(type, message id)` collapse onto
    /// one unfinished job: the existing handle is returned and no second
    /// unit of work is created.
    pub async fn enqueue(&self, new: NewJob) -> Job {
        let job = Job::new(new, self.inner.config.max_attempts);

        let snapshot = {
            // Check-and-insert under the write locks so concurrent
            // submissions of the same key cannot both create a job
            let mut jobs = self.inner.jobs.write().await;
            let mut dedup = self.inner.dedup.write().await;

            if let Some(existing_id) = dedup.get(&job.dedup_key) {
                if let Some(existing) = jobs.get(existing_id) {
                    if !existing.status.is_terminal() {
                        debug!(
                            dedup_key = %job.dedup_key,
                            job_id = %existing.id,
                            "duplicate submission collapsed"
                        );
                        return existing.clone();
                    }
                }
            }

            let snapshot = job.clone();
            dedup.insert(job.dedup_key.clone(), job.id);
            jobs.insert(job.id, job);
            snapshot
        };
        save_store(&self.inner).await;

        // Receiver lives inside inner, so this can only fail after drop
        let _ = self.inner.ready_tx.send(snapshot.id);

        emit(&self.inner, &snapshot, "job.queued").await;
        snapshot
    }

    /// Look up a job's status, progress and outcome
    pub async fn status(&self, id: Uuid) -> Result<JobStatusView> {
        let jobs = self.inner.jobs.read().await;
        let job = jobs
            .get(&id)
            .ok_or_else(|| Error::NotFound(format!("job {}", id)))?;

        Ok(JobStatusView {
            status: job.status,
            progress: job.progress,
            result: job.result.clone(),
            error: job.error.clone(),
        })
    }

    /// Get a full job snapshot
    pub async fn get(&self, id: Uuid) -> Option<Job> {
        self.inner.jobs.read().await.get(&id).cloned()
    }

    /// Remove terminal jobs older than the retention window
    pub async fn cleanup(&self, retention: ChronoDuration) -> usize {
        let removed = cleanup_once(&self.inner, retention).await;
        if removed > 0 {
            save_store(&self.inner).await;
        }
        removed
    }
}

/// Worker loop: pull ready job ids and process them one at a time
async fn worker_loop(inner: Arc<QueueInner>, worker_id: usize) {
    debug!(worker_id, "queue worker started");
    loop {
        let id = {
            let mut rx = inner.ready_rx.lock().await;
            rx.recv().await
        };
        match id {
            Some(id) => process_job(&inner, id).await,
            None => break,
        }
    }
}

/// Single dispatch point: route a job to its analysis handler
async fn dispatch(analyzer: &dyn Analyzer, job: &Job) -> Result<serde_json::Value> {
    match job.kind {
        crate::job::JobKind::Sentiment => analyzer.sentiment(job).await,
        crate::job::JobKind::Categorize => analyzer.categorize(job).await,
        crate::job::JobKind::SuggestReply => analyzer.suggest_reply(job).await,
    }
}

async fn process_job(inner: &Arc<QueueInner>, id: Uuid) {
    // Waiting -> Active; anything else means the id is stale
    let snapshot = {
        let mut jobs = inner.jobs.write().await;
        let job = match jobs.get_mut(&id) {
            Some(job) => job,
            None => return,
        };
        if job.status != JobStatus::Waiting {
            return;
        }
        job.status = JobStatus::Active;
        job.attempts += 1;
        job.delayed_until = None;
        job.progress = 10;
        job.updated_at = Utc::now();
        job.clone()
    };
    save_store(inner).await;
    emit(inner, &snapshot, "job.started").await;

    let outcome = dispatch(inner.analyzer.as_ref(), &snapshot).await;

    match outcome {
        Ok(result) => {
            let finished = {
                let mut jobs = inner.jobs.write().await;
                let job = match jobs.get_mut(&id) {
                    Some(job) => job,
                    None => return,
                };
                job.status = JobStatus::Completed;
                job.progress = 100;
                job.result = Some(result);
                job.finished_at = Some(Utc::now());
                job.updated_at = Utc::now();
                job.clone()
            };
            release_dedup(inner, &finished).await;
            save_store(inner).await;
            emit(inner, &finished, "job.completed").await;
        }
        Err(err) => {
            match inner.policy.decide(err.kind(), snapshot.attempts) {
                RetryDecision::Retry { delay } => {
                    let delayed = {
                        let mut jobs = inner.jobs.write().await;
                        let job = match jobs.get_mut(&id) {
                            Some(job) => job,
                            None => return,
                        };
                        job.status = JobStatus::Waiting;
                        job.delayed_until =
                            Some(Utc::now() + ChronoDuration::milliseconds(delay.as_millis() as i64));
                        job.error = Some(err.to_string());
                        job.updated_at = Utc::now();
                        job.clone()
                    };
                    warn!(
                        job_id = %id,
                        attempt = delayed.attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "job attempt failed, backing off"
                    );
                    save_store(inner).await;
                    emit(inner, &delayed, "job.retrying").await;

                    let requeue = Arc::clone(inner);
                    tokio::spawn(async move {
                        tokio::time::sleep(delay).await;
                        let _ = requeue.ready_tx.send(id);
                    });
                }
                RetryDecision::GiveUp => {
                    let failed = {
                        let mut jobs = inner.jobs.write().await;
                        let job = match jobs.get_mut(&id) {
                            Some(job) => job,
                            None => return,
                        };
                        job.status = JobStatus::Failed;
                        job.error = Some(err.to_string());
                        job.finished_at = Some(Utc::now());
                        job.updated_at = Utc::now();
                        job.clone()
                    };
                    error!(job_id = %id, attempts = failed.attempts, error = %err, "job failed");
                    release_dedup(inner, &failed).await;
                    save_store(inner).await;
                    emit(inner, &failed, "job.failed").await;
                }
            }
        }
    }
}

/// Drop the dedup entry once a job goes terminal
async fn release_dedup(inner: &Arc<QueueInner>, job: &Job) {
    let mut dedup = inner.dedup.write().await;
    if dedup.get(&job.dedup_key) == Some(&job.id) {
        dedup.remove(&job.dedup_key);
    }
}

async fn save_store(inner: &Arc<QueueInner>) {
    let store = {
        let jobs = inner.jobs.read().await;
        JobStore {
            jobs: jobs.values().cloned().collect(),
        }
    };

    if let Some(parent) = inner.store_path.parent() {
        let _ = tokio::fs::create_dir_all(parent).await;
    }

    match serde_json::to_string_pretty(&store) {
        Ok(content) => {
            if let Err(e) = tokio::fs::write(&inner.store_path, content).await {
                error!("Failed to save job store: {}", e);
            }
        }
        Err(e) => {
            error!("Failed to serialize job store: {}", e);
        }
    }
}

async fn emit(inner: &Arc<QueueInner>, job: &Job, event: &str) {
    let envelope = EventEnvelope::new(
        event,
        json!({
            "job_id": job.id,
            "type": job.kind.as_str(),
            "status": job.status,
            "attempts": job.attempts,
            "message_id": job.message_id,
        }),
    );
    inner
        .hub
        .publish(&Topic::user(job.user_id.clone()), envelope)
        .await;
}

async fn cleanup_once(inner: &Arc<QueueInner>, retention: ChronoDuration) -> usize {
    let cutoff = Utc::now() - retention;
    let mut jobs = inner.jobs.write().await;
    let before = jobs.len();
    jobs.retain(|_, job| {
        !(job.status.is_terminal() && job.finished_at.map_or(false, |t| t < cutoff))
    });
    before - jobs.len()
}

async fn cleanup_loop(inner: Arc<QueueInner>) {
    let retention = ChronoDuration::hours(inner.config.retention_hours);
    let mut interval = tokio::time::interval(std::time::Duration::from_secs(3600));
    interval.tick().await; // first tick completes immediately
    loop {
        interval.tick().await;
        let removed = cleanup_once(&inner, retention).await;
        if removed > 0 {
            save_store(&inner).await;
            info!(removed, "cleaned up expired jobs");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::LexiconAnalyzer;
    use crate::job::JobKind;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tempfile::TempDir;

    fn test_config() -> QueueConfig {
        QueueConfig {
            workers: 2,
            max_attempts: 3,
            base_delay_ms: 1,
            retention_hours: 24,
        }
    }

    fn queue_in(dir: &TempDir, analyzer: Arc<dyn Analyzer>) -> JobQueue {
        JobQueue::new(
            dir.path().join("jobs.json"),
            test_config(),
            analyzer,
            TopicHub::new(),
        )
    }

    fn new_job(message_id: &str, content: &str) -> NewJob {
        NewJob {
            kind: JobKind::Sentiment,
            user_id: "u1".to_string(),
            message_id: message_id.to_string(),
            content: content.to_string(),
            conversation_context: None,
        }
    }

    async fn wait_terminal(queue: &JobQueue, id: Uuid) -> Job {
        for _ in 0..300 {
            if let Some(job) = queue.get(id).await {
                if job.status.is_terminal() {
                    return job;
                }
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        panic!("job {} did not reach a terminal state", id);
    }

    /// Counts executions; fails the first `fail_first` attempts transiently
    struct CountingAnalyzer {
        calls: AtomicU32,
        fail_first: u32,
    }

    impl CountingAnalyzer {
        fn new(fail_first: u32) -> Self {
            Self {
                calls: AtomicU32::new(0),
                fail_first,
            }
        }
    }

    #[async_trait]
    impl Analyzer for CountingAnalyzer {
        async fn sentiment(&self, job: &Job) -> Result<serde_json::Value> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call <= self.fail_first {
                return Err(Error::Transient("analysis backend unavailable".into()));
            }
            LexiconAnalyzer::new().sentiment(job).await
        }

        async fn categorize(&self, job: &Job) -> Result<serde_json::Value> {
            LexiconAnalyzer::new().categorize(job).await
        }

        async fn suggest_reply(&self, job: &Job) -> Result<serde_json::Value> {
            LexiconAnalyzer::new().suggest_reply(job).await
        }
    }

    #[tokio::test]
    async fn test_sentiment_job_completes() {
        let dir = TempDir::new().unwrap();
        let queue = queue_in(&dir, Arc::new(LexiconAnalyzer::new()));

        let job = queue.enqueue(new_job("m1", "I love this!")).await;
        // Submission acknowledges before processing finishes
        let view = queue.status(job.id).await.unwrap();
        assert!(matches!(view.status, JobStatus::Waiting | JobStatus::Active));

        queue.start().await;
        let done = wait_terminal(&queue, job.id).await;
        assert_eq!(done.status, JobStatus::Completed);
        assert_eq!(done.result.unwrap()["sentiment"], "positive");

        queue.stop().await;
    }

    #[tokio::test]
    async fn test_duplicate_submission_runs_once() {
        let dir = TempDir::new().unwrap();
        let analyzer = Arc::new(CountingAnalyzer::new(0));
        let queue = queue_in(&dir, analyzer.clone());

        let first = queue.enqueue(new_job("m1", "I love this!")).await;
        let second = queue.enqueue(new_job("m1", "I love this!")).await;
        assert_eq!(first.id, second.id);

        queue.start().await;
        wait_terminal(&queue, first.id).await;
        // Give any erroneous second execution a chance to run
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(analyzer.calls.load(Ordering::SeqCst), 1);

        queue.stop().await;
    }

    #[tokio::test]
    async fn test_transient_failures_retry_then_succeed() {
        let dir = TempDir::new().unwrap();
        let analyzer = Arc::new(CountingAnalyzer::new(1));
        let queue = queue_in(&dir, analyzer);
        queue.start().await;

        let job = queue.enqueue(new_job("m2", "great stuff")).await;
        let done = wait_terminal(&queue, job.id).await;

        assert_eq!(done.status, JobStatus::Completed);
        assert_eq!(done.attempts, 2);

        queue.stop().await;
    }

    #[tokio::test]
    async fn test_exhausted_retries_fail_with_error() {
        let dir = TempDir::new().unwrap();
        let analyzer = Arc::new(CountingAnalyzer::new(u32::MAX));
        let queue = queue_in(&dir, analyzer.clone());
        queue.start().await;

        let job = queue.enqueue(new_job("m3", "whatever")).await;
        let done = wait_terminal(&queue, job.id).await;

        assert_eq!(done.status, JobStatus::Failed);
        assert_eq!(done.attempts, 3);
        assert!(done.error.is_some());
        // No fourth attempt
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(analyzer.calls.load(Ordering::SeqCst), 3);

        queue.stop().await;
    }

    #[tokio::test]
    async fn test_status_unknown_id_is_not_found() {
        let dir = TempDir::new().unwrap();
        let queue = queue_in(&dir, Arc::new(LexiconAnalyzer::new()));
        let err = queue.status(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn test_cleanup_removes_old_terminal_jobs() {
        let dir = TempDir::new().unwrap();
        let queue = queue_in(&dir, Arc::new(LexiconAnalyzer::new()));
        queue.start().await;

        let job = queue.enqueue(new_job("m4", "thanks")).await;
        wait_terminal(&queue, job.id).await;
        queue.stop().await;

        // Age the job past the retention window
        {
            let mut jobs = queue.inner.jobs.write().await;
            let stored = jobs.get_mut(&job.id).unwrap();
            stored.finished_at = Some(Utc::now() - ChronoDuration::hours(48));
        }

        let removed = queue.cleanup(ChronoDuration::hours(24)).await;
        assert_eq!(removed, 1);
        assert!(queue.status(job.id).await.is_err());
    }

    #[tokio::test]
    async fn test_unfinished_jobs_recover_after_restart() {
        let dir = TempDir::new().unwrap();

        // Enqueue without ever starting workers, then drop the queue
        let job_id = {
            let queue = queue_in(&dir, Arc::new(LexiconAnalyzer::new()));
            queue.enqueue(new_job("m6", "I love this!")).await.id
        };

        // A fresh queue over the same store picks the job up and runs it
        let queue = queue_in(&dir, Arc::new(LexiconAnalyzer::new()));
        queue.start().await;

        let done = wait_terminal(&queue, job_id).await;
        assert_eq!(done.status, JobStatus::Completed);

        queue.stop().await;
    }

    #[tokio::test]
    async fn test_events_emitted_on_lifecycle() {
        let dir = TempDir::new().unwrap();
        let hub = TopicHub::new();
        let mut rx = hub.subscribe(Topic::user("u1")).await;

        let queue = JobQueue::new(
            dir.path().join("jobs.json"),
            test_config(),
            Arc::new(LexiconAnalyzer::new()),
            hub,
        );
        queue.start().await;

        let job = queue.enqueue(new_job("m5", "I love this!")).await;
        wait_terminal(&queue, job.id).await;

        let mut seen = Vec::new();
        while let Ok(event) = rx.try_recv() {
            seen.push(event.event);
        }
        assert!(seen.contains(&"job.queued".to_string()));
        assert!(seen.contains(&"job.completed".to_string()));

        queue.stop().await;
    }
}
