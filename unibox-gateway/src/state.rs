//! Shared application state

use std::sync::Arc;

use unibox_channels::ChannelManager;
use unibox_core::events::TopicHub;
use unibox_jobs::{JobQueue, ReconciliationSink, ScheduledMessageDispatcher};

use crate::auth::CredentialValidator;

/// State handed to every handler
#[derive(Clone)]
pub struct AppState {
    pub queue: Arc<JobQueue>,
    pub dispatcher: Arc<ScheduledMessageDispatcher>,
    pub sink: Arc<ReconciliationSink>,
    pub channels: Arc<ChannelManager>,
    pub hub: TopicHub,
    pub auth: Arc<dyn CredentialValidator>,
}
