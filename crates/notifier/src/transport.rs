//! Outbound transports.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use thiserror::Error;

use herald_common::config::AppConfig;
use herald_common::error::AppError;

/// Provider acknowledgement of an accepted message.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DeliveryReceipt {
    pub message_id: Option<String>,
}

/// Transport failures. `Clone` so one outcome can be shared by every caller
/// joined on the same idempotency key.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("Send timed out after {0}ms")]
    Timeout(u64),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Provider rejected message (HTTP {status}): {detail}")]
    Rejected { status: u16, detail: String },

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, recipient: &str, payload: &Value) -> Result<DeliveryReceipt, TransportError>;
}

/// WhatsApp Cloud API transport.
pub struct WhatsAppTransport {
    client: reqwest::Client,
    endpoint: String,
    token: String,
}

impl WhatsAppTransport {
    pub fn new(
        base_url: &str,
        phone_id: &str,
        token: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: format!("{}/{}/messages", base_url.trim_end_matches('/'), phone_id),
            token: token.into(),
        })
    }

    pub fn from_config(config: &AppConfig) -> Result<Self, AppError> {
        let phone_id = config
            .whatsapp_phone_id
            .as_deref()
            .ok_or_else(|| AppError::Config("WHATSAPP_PHONE_ID is required".to_string()))?;
        let token = config
            .whatsapp_token
            .clone()
            .ok_or_else(|| AppError::Config("WHATSAPP_TOKEN is required".to_string()))?;

        Self::new(
            &config.whatsapp_api_base_url,
            phone_id,
            token,
            Duration::from_millis(config.notify_send_timeout_ms),
        )
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl Transport for WhatsAppTransport {
    async fn send(&self, recipient: &str, payload: &Value) -> Result<DeliveryReceipt, TransportError> {
        let body = build_message(recipient, payload)?;

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;

        if !status.is_success() {
            return Err(TransportError::Rejected {
                status: status.as_u16(),
                detail: truncate(&text, 500),
            });
        }

        let parsed: Value = serde_json::from_str(&text).unwrap_or(Value::Null);
        Ok(DeliveryReceipt {
            message_id: message_id(&parsed),
        })
    }
}

/// Wrap a payload into a Cloud API message body addressed to `recipient`.
pub fn build_message(recipient: &str, payload: &Value) -> Result<Value, TransportError> {
    let Some(fields) = payload.as_object() else {
        return Err(TransportError::InvalidPayload(
            "payload must be a JSON object".to_string(),
        ));
    };

    let mut body = json!({
        "messaging_product": "whatsapp",
        "recipient_type": "individual",
        "to": recipient.trim_start_matches('+'),
    });
    if let Some(map) = body.as_object_mut() {
        for (key, value) in fields {
            map.entry(key.clone()).or_insert_with(|| value.clone());
        }
    }
    Ok(body)
}

fn message_id(response: &Value) -> Option<String> {
    response
        .get("messages")?
        .get(0)?
        .get("id")?
        .as_str()
        .map(str::to_string)
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(max_chars).collect();
    cut.push('…');
    cut
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_message_addresses_recipient() {
        let body = build_message(
            "+250788123456",
            &json!({"type": "text", "text": {"body": "hi"}}),
        )
        .unwrap();
        assert_eq!(body["messaging_product"], "whatsapp");
        assert_eq!(body["to"], "250788123456");
        assert_eq!(body["type"], "text");
        assert_eq!(body["text"]["body"], "hi");
    }

    #[test]
    fn test_build_message_keeps_envelope_fields() {
        let body = build_message("+1555", &json!({"to": "+999", "type": "text"})).unwrap();
        assert_eq!(body["to"], "1555");
    }

    #[test]
    fn test_build_message_rejects_non_object() {
        assert!(matches!(
            build_message("+1555", &json!(["x"])),
            Err(TransportError::InvalidPayload(_))
        ));
    }

    #[test]
    fn test_message_id_extraction() {
        let response = json!({"messages": [{"id": "wamid.ABC"}]});
        assert_eq!(message_id(&response), Some("wamid.ABC".to_string()));
        assert_eq!(message_id(&json!({"messages": []})), None);
        assert_eq!(message_id(&Value::Null), None);
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("abcdef", 3), "abc…");
    }

    #[test]
    fn test_from_config_requires_credentials() {
        let config = AppConfig::from_lookup(|key| match key {
            "DATABASE_URL" => Some("postgres://localhost/herald".to_string()),
            _ => None,
        })
        .unwrap();
        assert!(matches!(
            WhatsAppTransport::from_config(&config),
            Err(AppError::Config(_))
        ));

        let config = AppConfig::from_lookup(|key| match key {
            "DATABASE_URL" => Some("postgres://localhost/herald".to_string()),
            "WHATSAPP_PHONE_ID" => Some("12345".to_string()),
            "WHATSAPP_TOKEN" => Some("secret".to_string()),
            _ => None,
        })
        .unwrap();
        let transport = WhatsAppTransport::from_config(&config).unwrap();
        assert_eq!(
            transport.endpoint(),
            "https://graph.facebook.com/v20.0/12345/messages"
        );
    }
}
