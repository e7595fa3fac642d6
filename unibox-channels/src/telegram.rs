//! Telegram channel adapter
//!
//! Talks to the Bot API with plain reqwest and hand-rolled payloads to
//! stay consistent with the other channels. Webhook updates are signed
//! by the gateway-facing proxy with a shared secret.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

use unibox_core::config::schema::TelegramConfig;

use crate::base::{ChannelAdapter, DeliveryError, DeliveryReceipt, Result};
use crate::webhook::{self, WebhookMessage};

const TELEGRAM_API_BASE: &str = "https://api.telegram.org";

/// Telegram channel adapter
pub struct TelegramAdapter {
    name: String,
    token: String,
    webhook_secret: String,
    api_base: String,
    allow_from: Vec<String>,
    http_client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    description: Option<String>,
    result: Option<T>,
}

#[derive(Debug, Deserialize)]
struct SentMessage {
    message_id: i64,
}

#[derive(Debug, Deserialize)]
struct Update {
    message: Option<IncomingMessage>,
}

#[derive(Debug, Deserialize)]
struct IncomingMessage {
    message_id: i64,
    date: i64,
    text: Option<String>,
    caption: Option<String>,
    from: Option<Sender>,
    chat: Chat,
    photo: Option<Vec<PhotoSize>>,
}

#[derive(Debug, Deserialize)]
struct Sender {
    id: i64,
    username: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Chat {
    id: i64,
}

#[derive(Debug, Deserialize)]
struct PhotoSize {
    file_id: String,
}

impl TelegramAdapter {
    /// Create a new Telegram adapter from config
    pub fn new(config: &TelegramConfig) -> Self {
        Self {
            name: "telegram".to_string(),
            token: config.bot_token.clone(),
            webhook_secret: config.webhook_secret.clone(),
            api_base: config
                .api_base
                .clone()
                .unwrap_or_else(|| TELEGRAM_API_BASE.to_string()),
            allow_from: config.allow_from.clone(),
            http_client: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .expect("Failed to build HTTP client"),
        }
    }

    /// Check if a sender is allowed (empty list = allow all)
    pub fn is_allowed(&self, sender_id: &str) -> bool {
        if self.allow_from.is_empty() {
            return true;
        }
        if self.allow_from.contains(&sender_id.to_string()) {
            return true;
        }
        // Handle compound IDs (e.g., "12345|username")
        if sender_id.contains('|') {
            for part in sender_id.split('|') {
                if !part.is_empty() && self.allow_from.contains(&part.to_string()) {
                    return true;
                }
            }
        }
        false
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_base, self.token, method)
    }

    fn normalize(message: IncomingMessage) -> WebhookMessage {
        let from = match &message.from {
            Some(Sender {
                id,
                username: Some(name),
            }) => format!("{}|{}", id, name),
            Some(Sender { id, username: None }) => id.to_string(),
            None => "unknown".to_string(),
        };

        let text = message
            .text
            .or(message.caption)
            .unwrap_or_else(|| "[empty message]".to_string());

        let attachments = message
            .photo
            .unwrap_or_default()
            .into_iter()
            .map(|p| p.file_id)
            .collect();

        WebhookMessage {
            id: message.message_id.to_string(),
            from,
            timestamp: DateTime::from_timestamp(message.date, 0).unwrap_or_else(Utc::now),
            text,
            attachments,
        }
    }
}

#[async_trait]
impl ChannelAdapter for TelegramAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch_messages(
        &self,
        conversation_id: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<WebhookMessage>> {
        let response = self
            .http_client
            .get(self.method_url("getUpdates"))
            .send()
            .await?;

        let status = response.status().as_u16();
        if status != 200 {
            return Err(DeliveryError::from_status(status, "getUpdates failed"));
        }

        let body: ApiResponse<Vec<Update>> = response
            .json()
            .await
            .map_err(|e| DeliveryError::Payload(e.to_string()))?;

        if !body.ok {
            return Err(DeliveryError::Payload(
                body.description.unwrap_or_else(|| "getUpdates not ok".to_string()),
            ));
        }

        let updates = body.result.unwrap_or_default();
        Ok(updates
            .into_iter()
            .filter_map(|u| u.message)
            .filter(|m| m.chat.id.to_string() == conversation_id)
            .map(Self::normalize)
            .filter(|m| since.map_or(true, |s| m.timestamp > s))
            .collect())
    }

    async fn send_message(
        &self,
        recipient: &str,
        content: &str,
        media: &[String],
    ) -> Result<DeliveryReceipt> {
        let mut body = json!({
            "chat_id": recipient,
            "text": content,
        });
        if !media.is_empty() {
            body["photo"] = json!(media[0]);
        }

        let response = self
            .http_client
            .post(self.method_url("sendMessage"))
            .json(&body)
            .send()
            .await?;

        let status = response.status().as_u16();
        if status != 200 {
            let message = response.text().await.unwrap_or_default();
            return Err(DeliveryError::from_status(status, message));
        }

        let body: ApiResponse<SentMessage> = response
            .json()
            .await
            .map_err(|e| DeliveryError::Payload(e.to_string()))?;

        if !body.ok {
            return Err(DeliveryError::Client {
                status: 400,
                message: body.description.unwrap_or_else(|| "send not ok".to_string()),
            });
        }

        let message_ref = body
            .result
            .map(|m| m.message_id.to_string())
            .unwrap_or_default();
        Ok(DeliveryReceipt::new(self.name.clone(), recipient, message_ref))
    }

    fn verify_webhook(&self, signature: &str, payload: &[u8]) -> Result<()> {
        webhook::verify(&self.webhook_secret, signature, payload)
    }

    fn parse_webhook_payload(&self, payload: &[u8]) -> Result<WebhookMessage> {
        let update: Update =
            serde_json::from_slice(payload).map_err(|e| DeliveryError::Payload(e.to_string()))?;
        let message = update
            .message
            .ok_or_else(|| DeliveryError::Payload("update has no message".to_string()))?;
        Ok(Self::normalize(message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn adapter_for(server: &MockServer) -> TelegramAdapter {
        TelegramAdapter::new(&TelegramConfig {
            enabled: true,
            bot_token: "TOKEN".to_string(),
            webhook_secret: "hooksecret".to_string(),
            api_base: Some(server.uri()),
            allow_from: Vec::new(),
        })
    }

    #[tokio::test]
    async fn test_send_message_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/botTOKEN/sendMessage"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "ok": true,
                "result": {"message_id": 99}
            })))
            .mount(&server)
            .await;

        let adapter = adapter_for(&server);
        let receipt = adapter.send_message("42", "hello", &[]).await.unwrap();
        assert_eq!(receipt.message_ref, "99");
        assert_eq!(receipt.channel, "telegram");
    }

    #[tokio::test]
    async fn test_send_message_server_error_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&server)
            .await;

        let adapter = adapter_for(&server);
        let err = adapter.send_message("42", "hello", &[]).await.unwrap_err();
        assert!(matches!(err, DeliveryError::Server { status: 502 }));
    }

    #[tokio::test]
    async fn test_send_message_rate_limited() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;

        let adapter = adapter_for(&server);
        let err = adapter.send_message("42", "hello", &[]).await.unwrap_err();
        assert!(matches!(err, DeliveryError::RateLimited { .. }));
    }

    #[test]
    fn test_parse_webhook_payload() {
        let server_less = TelegramAdapter::new(&TelegramConfig {
            enabled: true,
            bot_token: "TOKEN".to_string(),
            webhook_secret: "hooksecret".to_string(),
            api_base: None,
            allow_from: Vec::new(),
        });

        let payload = serde_json::json!({
            "update_id": 1,
            "message": {
                "message_id": 7,
                "date": 1714521600,
                "text": "hi there",
                "from": {"id": 12345, "username": "alice"},
                "chat": {"id": 42}
            }
        });
        let msg = server_less
            .parse_webhook_payload(payload.to_string().as_bytes())
            .unwrap();

        assert_eq!(msg.id, "7");
        assert_eq!(msg.from, "12345|alice");
        assert_eq!(msg.text, "hi there");
    }

    #[test]
    fn test_is_allowed_compound_id() {
        let adapter = TelegramAdapter::new(&TelegramConfig {
            enabled: true,
            bot_token: "t".to_string(),
            webhook_secret: "s".to_string(),
            api_base: None,
            allow_from: vec!["alice".to_string()],
        });

        assert!(adapter.is_allowed("99|alice"));
        assert!(!adapter.is_allowed("99|bob"));
    }
}
