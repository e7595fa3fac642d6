//! Configuration validation rules.

use super::schema::Config;

/// Validate configuration and return aggregated validation errors.
pub fn validate_config(config: &Config) -> crate::Result<()> {
    let mut errors = Vec::new();

    if config.queue.workers == 0 {
        errors.push("queue.workers must be > 0".to_string());
    }
    if config.queue.max_attempts == 0 {
        errors.push("queue.max_attempts must be > 0".to_string());
    }
    if config.scheduler.tick_interval_s == 0 {
        errors.push("scheduler.tick_interval_s must be > 0".to_string());
    }
    if config.scheduler.batch_size == 0 {
        errors.push("scheduler.batch_size must be > 0".to_string());
    }
    if config.outbox.max_entries == 0 {
        errors.push("outbox.max_entries must be > 0".to_string());
    }
    if config.delivery.max_attempts == 0 {
        errors.push("delivery.max_attempts must be > 0".to_string());
    }
    if config.delivery.base_delay_ms > config.delivery.max_delay_ms {
        errors.push("delivery.base_delay_ms must not exceed delivery.max_delay_ms".to_string());
    }

    if config.channels.telegram.enabled {
        if config.channels.telegram.bot_token.trim().is_empty() {
            errors.push("channels.telegram.bot_token is required when telegram is enabled".to_string());
        }
        if config.channels.telegram.webhook_secret.trim().is_empty() {
            errors.push(
                "channels.telegram.webhook_secret is required when telegram is enabled".to_string(),
            );
        }
    }
    if config.channels.slack.enabled {
        if config.channels.slack.bot_token.trim().is_empty() {
            errors.push("channels.slack.bot_token is required when slack is enabled".to_string());
        }
        if config.channels.slack.signing_secret.trim().is_empty() {
            errors.push(
                "channels.slack.signing_secret is required when slack is enabled".to_string(),
            );
        }
    }

    if config.gateway.port == 0 {
        errors.push("gateway.port must be > 0".to_string());
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(crate::Error::Config(errors.join("; ")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate_config(&Config::default()).is_ok());
    }

    #[test]
    fn test_enabled_channel_requires_secrets() {
        let mut config = Config::default();
        config.channels.telegram.enabled = true;

        let err = validate_config(&config).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("bot_token"));
        assert!(msg.contains("webhook_secret"));
    }

    #[test]
    fn test_zero_workers_rejected() {
        let mut config = Config::default();
        config.queue.workers = 0;
        assert!(validate_config(&config).is_err());
    }
}
