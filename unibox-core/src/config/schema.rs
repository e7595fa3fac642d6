//! Configuration schema definitions

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Root configuration for unibox
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Channel configuration
    #[serde(default)]
    pub channels: ChannelsConfig,
    /// Delivery retry configuration
    #[serde(default)]
    pub delivery: DeliveryConfig,
    /// Background job queue configuration
    #[serde(default)]
    pub queue: QueueConfig,
    /// Scheduled-message dispatcher configuration
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    /// Offline outbox configuration
    #[serde(default)]
    pub outbox: OutboxConfig,
    /// Gateway (HTTP/WebSocket) configuration
    #[serde(default)]
    pub gateway: GatewayConfig,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Channel configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ChannelsConfig {
    #[serde(default)]
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub slack: SlackConfig,
    /// In-memory mock channel, for local runs and tests
    #[serde(default)]
    pub mock: MockConfig,
}

/// Telegram channel configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TelegramConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub bot_token: String,
    /// Shared secret for webhook signature verification
    #[serde(default)]
    pub webhook_secret: String,
    /// Override for the Bot API base URL (tests, self-hosted gateways)
    #[serde(default)]
    pub api_base: Option<String>,
    #[serde(default)]
    pub allow_from: Vec<String>,
}

/// Slack channel configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SlackConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub bot_token: String,
    /// Signing secret used for the `v0=` request signature
    #[serde(default)]
    pub signing_secret: String,
    #[serde(default)]
    pub api_base: Option<String>,
    #[serde(default)]
    pub allow_from: Vec<String>,
}

/// Mock channel configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MockConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub webhook_secret: String,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            webhook_secret: String::new(),
        }
    }
}

/// Delivery retry configuration, shared by all channel adapters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryConfig {
    /// Maximum send attempts per message (including the first try)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay before the second attempt, doubled on each retry
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Upper bound on the backoff delay
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

/// Background job queue configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Number of concurrent workers
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Maximum attempts per job (including the first try)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay before the first job retry, doubled on each retry
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Hours to retain completed/failed jobs before cleanup
    #[serde(default = "default_job_retention_hours")]
    pub retention_hours: i64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            retention_hours: default_job_retention_hours(),
        }
    }
}

/// Scheduled-message dispatcher configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Seconds between dispatcher ticks
    #[serde(default = "default_tick_interval_s")]
    pub tick_interval_s: u64,
    /// Maximum due messages dispatched per tick
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Send attempts before a scheduled message goes terminal Failed
    #[serde(default = "default_max_attempts")]
    pub max_retries: u32,
    /// Days to retain sent/failed/cancelled records before cleanup
    #[serde(default = "default_schedule_retention_days")]
    pub retention_days: i64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_s: default_tick_interval_s(),
            batch_size: default_batch_size(),
            max_retries: default_max_attempts(),
            retention_days: default_schedule_retention_days(),
        }
    }
}

/// Offline outbox configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxConfig {
    /// Maximum queued entries before enqueue fails with a quota error
    #[serde(default = "default_outbox_max_entries")]
    pub max_entries: usize,
    /// Approximate byte budget for queued content
    #[serde(default = "default_outbox_max_bytes")]
    pub max_bytes: usize,
    /// Sync attempts before an entry goes terminal Failed
    #[serde(default = "default_max_attempts")]
    pub max_retries: u32,
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self {
            max_entries: default_outbox_max_entries(),
            max_bytes: default_outbox_max_bytes(),
            max_retries: default_max_attempts(),
        }
    }
}

/// Gateway configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Bearer credentials accepted at the WebSocket handshake.
    /// Token issuance lives outside this service.
    #[serde(default)]
    pub access_tokens: Vec<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            access_tokens: Vec::new(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Log format (text, json)
    #[serde(default = "default_log_format")]
    pub format: String,
    /// Directory for log files
    #[serde(default = "default_log_dir")]
    pub dir: String,
    /// Module-specific overrides
    #[serde(default)]
    pub overrides: HashMap<String, String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            dir: default_log_dir(),
            overrides: HashMap::new(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_workers() -> usize {
    2
}

fn default_job_retention_hours() -> i64 {
    24
}

fn default_tick_interval_s() -> u64 {
    30
}

fn default_batch_size() -> usize {
    100
}

fn default_schedule_retention_days() -> i64 {
    30
}

fn default_outbox_max_entries() -> usize {
    500
}

fn default_outbox_max_bytes() -> usize {
    1024 * 1024
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8970
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

fn default_log_dir() -> String {
    "logs".to_string()
}
