//! Channel manager

use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

use unibox_core::config::schema::{Config, DeliveryConfig};
use unibox_core::inbox::OutboundMessage;
use unibox_core::retry::RetryPolicy;

use crate::base::{ChannelAdapter, DeliveryError, DeliveryReceipt, Result};
use crate::mock::MockAdapter;
use crate::retry::send_with_retry;
use crate::slack::SlackAdapter;
use crate::telegram::TelegramAdapter;

/// Build the shared delivery retry policy from config
pub fn policy_from(config: &DeliveryConfig) -> RetryPolicy {
    RetryPolicy {
        max_attempts: config.max_attempts,
        base_delay: std::time::Duration::from_millis(config.base_delay_ms),
        max_delay: std::time::Duration::from_millis(config.max_delay_ms),
    }
}

/// Channel manager that owns one adapter per configured channel
///
/// All sends go through the shared retrying wrapper, so every caller
/// (dispatcher, outbox reconciliation, direct sends) gets the same
/// backoff behavior.
pub struct ChannelManager {
    adapters: HashMap<String, Arc<dyn ChannelAdapter>>,
    policy: RetryPolicy,
}

impl ChannelManager {
    /// Create an empty manager with the given retry policy
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            adapters: HashMap::new(),
            policy,
        }
    }

    /// Initialize adapters based on configuration
    pub fn from_config(config: &Config) -> Self {
        let mut manager = Self::new(policy_from(&config.delivery));

        if config.channels.telegram.enabled {
            manager.register(Arc::new(TelegramAdapter::new(&config.channels.telegram)));
            info!("Telegram channel initialized");
        }
        if config.channels.slack.enabled {
            manager.register(Arc::new(SlackAdapter::new(&config.channels.slack)));
            info!("Slack channel initialized");
        }
        if config.channels.mock.enabled {
            manager.register(Arc::new(MockAdapter::new(
                "mock",
                config.channels.mock.webhook_secret.clone(),
            )));
            info!("Mock channel initialized");
        }

        manager
    }

    /// Register an adapter under its own name
    pub fn register(&mut self, adapter: Arc<dyn ChannelAdapter>) {
        self.adapters.insert(adapter.name().to_string(), adapter);
    }

    /// Get an adapter by channel name
    pub fn get(&self, name: &str) -> Option<Arc<dyn ChannelAdapter>> {
        self.adapters.get(name).cloned()
    }

    /// Get list of registered channels
    pub fn list_channels(&self) -> Vec<String> {
        self.adapters.keys().cloned().collect()
    }

    /// The retry policy applied to deliveries
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Deliver an outbound message with bounded retries
    pub async fn deliver(&self, message: &OutboundMessage) -> Result<DeliveryReceipt> {
        let adapter = self.adapters.get(&message.channel).ok_or_else(|| {
            DeliveryError::NotConfigured(format!("Channel {} not found", message.channel))
        })?;

        send_with_retry(
            adapter.as_ref(),
            &message.recipient,
            &message.content,
            &message.media,
            &self.policy,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_deliver_routes_by_channel_name() {
        let mut manager = ChannelManager::new(RetryPolicy::instant());
        let mock = Arc::new(MockAdapter::new("mock", "s"));
        manager.register(mock.clone());

        let message = OutboundMessage::new("mock", "u1", "c1", "hello");
        let receipt = manager.deliver(&message).await.unwrap();

        assert_eq!(receipt.channel, "mock");
        assert_eq!(mock.sent_messages().len(), 1);
    }

    #[tokio::test]
    async fn test_deliver_unknown_channel() {
        let manager = ChannelManager::new(RetryPolicy::instant());
        let message = OutboundMessage::new("nope", "u1", "c1", "hello");

        let err = manager.deliver(&message).await.unwrap_err();
        assert!(matches!(err, DeliveryError::NotConfigured(_)));
    }

    #[tokio::test]
    async fn test_deliver_retries_through_policy() {
        let mut manager = ChannelManager::new(RetryPolicy::instant());
        let mock = Arc::new(MockAdapter::new("mock", "s"));
        mock.fail_next(DeliveryError::Network("blip".into()));
        manager.register(mock.clone());

        let message = OutboundMessage::new("mock", "u1", "c1", "hello");
        manager.deliver(&message).await.unwrap();

        assert_eq!(mock.send_attempts(), 2);
    }

    #[test]
    fn test_from_config_registers_mock_by_default() {
        let manager = ChannelManager::from_config(&Config::default());
        assert!(manager.get("mock").is_some());
        assert!(manager.get("telegram").is_none());
    }
}
