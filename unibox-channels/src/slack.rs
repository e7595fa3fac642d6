//! Slack channel adapter
//!
//! Web API calls over plain reqwest. Event payloads carry a `v0=` hex
//! HMAC-SHA256 of the raw body, checked with the signing secret before
//! anything is parsed.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

use unibox_core::config::schema::SlackConfig;

use crate::base::{ChannelAdapter, DeliveryError, DeliveryReceipt, Result};
use crate::webhook::{self, WebhookMessage};

const SLACK_API_BASE: &str = "https://slack.com/api";

/// Slack channel adapter
pub struct SlackAdapter {
    name: String,
    bot_token: String,
    signing_secret: String,
    api_base: String,
    allow_from: Vec<String>,
    http_client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct PostMessageResponse {
    ok: bool,
    ts: Option<String>,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct HistoryResponse {
    ok: bool,
    error: Option<String>,
    #[serde(default)]
    messages: Vec<HistoryMessage>,
}

#[derive(Debug, Deserialize)]
struct HistoryMessage {
    ts: String,
    #[serde(default)]
    user: Option<String>,
    #[serde(default)]
    text: String,
    #[serde(default)]
    files: Vec<SlackFile>,
}

#[derive(Debug, Deserialize)]
struct SlackFile {
    url_private: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EventCallback {
    event: Option<SlackEvent>,
}

#[derive(Debug, Deserialize)]
struct SlackEvent {
    #[serde(rename = "type")]
    kind: String,
    user: Option<String>,
    ts: Option<String>,
    #[serde(default)]
    text: String,
    #[serde(default)]
    files: Vec<SlackFile>,
}

/// Parse a Slack "1714521600.000200" timestamp
fn parse_ts(ts: &str) -> DateTime<Utc> {
    ts.split('.')
        .next()
        .and_then(|s| s.parse::<i64>().ok())
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
        .unwrap_or_else(Utc::now)
}

impl SlackAdapter {
    /// Create a new Slack adapter from config
    pub fn new(config: &SlackConfig) -> Self {
        Self {
            name: "slack".to_string(),
            bot_token: config.bot_token.clone(),
            signing_secret: config.signing_secret.clone(),
            api_base: config
                .api_base
                .clone()
                .unwrap_or_else(|| SLACK_API_BASE.to_string()),
            allow_from: config.allow_from.clone(),
            http_client: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .expect("Failed to build HTTP client"),
        }
    }

    /// Check if a sender is allowed (empty list = allow all)
    pub fn is_allowed(&self, sender_id: &str) -> bool {
        self.allow_from.is_empty() || self.allow_from.contains(&sender_id.to_string())
    }
}

#[async_trait]
impl ChannelAdapter for SlackAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch_messages(
        &self,
        conversation_id: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<WebhookMessage>> {
        let mut body = json!({ "channel": conversation_id });
        if let Some(s) = since {
            body["oldest"] = json!(s.timestamp().to_string());
        }

        let response = self
            .http_client
            .post(format!("{}/conversations.history", self.api_base))
            .bearer_auth(&self.bot_token)
            .json(&body)
            .send()
            .await?;

        let status = response.status().as_u16();
        if status != 200 {
            return Err(DeliveryError::from_status(status, "history failed"));
        }

        let body: HistoryResponse = response
            .json()
            .await
            .map_err(|e| DeliveryError::Payload(e.to_string()))?;

        if !body.ok {
            return Err(DeliveryError::Payload(
                body.error.unwrap_or_else(|| "history not ok".to_string()),
            ));
        }

        Ok(body
            .messages
            .into_iter()
            .map(|m| WebhookMessage {
                id: m.ts.clone(),
                from: m.user.unwrap_or_else(|| "unknown".to_string()),
                timestamp: parse_ts(&m.ts),
                text: m.text,
                attachments: m
                    .files
                    .into_iter()
                    .filter_map(|f| f.url_private)
                    .collect(),
            })
            .collect())
    }

    async fn send_message(
        &self,
        recipient: &str,
        content: &str,
        media: &[String],
    ) -> Result<DeliveryReceipt> {
        let mut body = json!({
            "channel": recipient,
            "text": content,
        });
        if !media.is_empty() {
            body["attachments"] = json!(media
                .iter()
                .map(|url| json!({ "image_url": url }))
                .collect::<Vec<_>>());
        }

        let response = self
            .http_client
            .post(format!("{}/chat.postMessage", self.api_base))
            .bearer_auth(&self.bot_token)
            .json(&body)
            .send()
            .await?;

        let status = response.status().as_u16();
        if status != 200 {
            let message = response.text().await.unwrap_or_default();
            return Err(DeliveryError::from_status(status, message));
        }

        let body: PostMessageResponse = response
            .json()
            .await
            .map_err(|e| DeliveryError::Payload(e.to_string()))?;

        if !body.ok {
            // Slack reports application errors with HTTP 200 + ok:false
            let error = body.error.unwrap_or_else(|| "unknown_error".to_string());
            return Err(match error.as_str() {
                "ratelimited" => DeliveryError::RateLimited { retry_after_s: None },
                _ => DeliveryError::Client {
                    status: 400,
                    message: error,
                },
            });
        }

        Ok(DeliveryReceipt::new(
            self.name.clone(),
            recipient,
            body.ts.unwrap_or_default(),
        ))
    }

    fn verify_webhook(&self, signature: &str, payload: &[u8]) -> Result<()> {
        webhook::verify(&self.signing_secret, signature, payload)
    }

    fn parse_webhook_payload(&self, payload: &[u8]) -> Result<WebhookMessage> {
        let callback: EventCallback =
            serde_json::from_slice(payload).map_err(|e| DeliveryError::Payload(e.to_string()))?;
        let event = callback
            .event
            .ok_or_else(|| DeliveryError::Payload("callback has no event".to_string()))?;

        if event.kind != "message" {
            return Err(DeliveryError::Payload(format!(
                "unsupported event type: {}",
                event.kind
            )));
        }

        let ts = event.ts.unwrap_or_default();
        Ok(WebhookMessage {
            id: ts.clone(),
            from: event.user.unwrap_or_else(|| "unknown".to_string()),
            timestamp: parse_ts(&ts),
            text: event.text,
            attachments: event
                .files
                .into_iter()
                .filter_map(|f| f.url_private)
                .collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn adapter_for(server: &MockServer) -> SlackAdapter {
        SlackAdapter::new(&SlackConfig {
            enabled: true,
            bot_token: "xoxb-test".to_string(),
            signing_secret: "signsecret".to_string(),
            api_base: Some(server.uri()),
            allow_from: Vec::new(),
        })
    }

    #[tokio::test]
    async fn test_send_message_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat.postMessage"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "ok": true,
                "ts": "1714521600.000200"
            })))
            .mount(&server)
            .await;

        let adapter = adapter_for(&server);
        let receipt = adapter.send_message("C123", "hello", &[]).await.unwrap();
        assert_eq!(receipt.message_ref, "1714521600.000200");
    }

    #[tokio::test]
    async fn test_ok_false_ratelimited_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "ok": false,
                "error": "ratelimited"
            })))
            .mount(&server)
            .await;

        let adapter = adapter_for(&server);
        let err = adapter.send_message("C123", "hello", &[]).await.unwrap_err();
        assert!(matches!(err, DeliveryError::RateLimited { .. }));
    }

    #[tokio::test]
    async fn test_ok_false_other_is_permanent() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "ok": false,
                "error": "channel_not_found"
            })))
            .mount(&server)
            .await;

        let adapter = adapter_for(&server);
        let err = adapter.send_message("C404", "hello", &[]).await.unwrap_err();
        assert!(matches!(err, DeliveryError::Client { .. }));
    }

    #[test]
    fn test_parse_event_callback() {
        let adapter = SlackAdapter::new(&SlackConfig {
            enabled: true,
            bot_token: "t".to_string(),
            signing_secret: "s".to_string(),
            api_base: None,
            allow_from: Vec::new(),
        });

        let payload = serde_json::json!({
            "type": "event_callback",
            "event": {
                "type": "message",
                "user": "U123",
                "ts": "1714521600.000200",
                "text": "hi from slack"
            }
        });
        let msg = adapter
            .parse_webhook_payload(payload.to_string().as_bytes())
            .unwrap();

        assert_eq!(msg.from, "U123");
        assert_eq!(msg.text, "hi from slack");
    }

    #[test]
    fn test_verify_webhook_v0_signature() {
        let adapter = SlackAdapter::new(&SlackConfig {
            enabled: true,
            bot_token: "t".to_string(),
            signing_secret: "signsecret".to_string(),
            api_base: None,
            allow_from: Vec::new(),
        });

        let payload = br#"{"event":{"type":"message","text":"x"}}"#;
        let signature = format!("v0={}", webhook::sign("signsecret", payload));
        assert!(adapter.verify_webhook(&signature, payload).is_ok());
        assert!(adapter.verify_webhook(&signature, b"other").is_err());
    }
}
