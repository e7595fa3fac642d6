//! Background processing for unibox
//!
//! Everything that runs off the request path lives here: the retrying
//! job queue for AI analysis, the scheduled-message dispatcher, and the
//! offline outbox with its server-side reconciliation sink. Submission
//! is synchronous, execution is asynchronous; completion is observed via
//! status polling or pushed events, never by blocking the caller.

pub mod analysis;
pub mod job;
pub mod outbox;
pub mod queue;
pub mod scheduler;
pub mod sink;

pub use analysis::{Analyzer, LexiconAnalyzer};
pub use job::{Job, JobKind, JobStatus, NewJob};
pub use outbox::{NewOutboxEntry, OfflineOutbox, OutboxEntry, SyncStatus};
pub use queue::{JobQueue, JobStatusView};
pub use scheduler::{
    NewScheduledMessage, ScheduleStatus, ScheduledMessage, ScheduledMessageDispatcher,
};
pub use sink::{OutboxSink, ReconciliationSink, SubmitOutcome};
