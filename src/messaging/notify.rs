//! HTTP notification sink
//!
//! Posts `{chat_id, text}` to a relay (a Telegram bridge in the usual setup)
//! and reads back `{ok}`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use super::Notifier;
use crate::config::NotifyConfig;
use crate::error::{PipelineError, Result};

/// Chat used when none is configured
const DEFAULT_CHAT_ID: &str = "default";

#[derive(Debug, Serialize)]
struct SendMessageRequest<'a> {
    chat_id: &'a str,
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct SendMessageResponse {
    #[serde(default)]
    ok: bool,
    description: Option<String>,
}

/// Notification client with a bounded per-request timeout
#[derive(Debug, Clone)]
pub struct HttpNotifier {
    url: String,
    chat_id: String,
    http_client: reqwest::Client,
}

impl HttpNotifier {
    pub fn new(url: impl Into<String>, chat_id: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PipelineError::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            url: url.into(),
            chat_id: chat_id.into(),
            http_client,
        })
    }

    pub fn from_config(config: &NotifyConfig) -> Result<Self> {
        Self::new(
            config.url.clone(),
            config.chat_id.clone().unwrap_or_else(|| DEFAULT_CHAT_ID.to_string()),
            Duration::from_secs(config.timeout_secs),
        )
    }

    pub fn chat_id(&self) -> &str {
        &self.chat_id
    }
}

#[async_trait]
impl Notifier for HttpNotifier {
    async fn send(&self, text: &str) -> Result<bool> {
        let request = SendMessageRequest {
            chat_id: &self.chat_id,
            text,
        };

        debug!(chat_id = %self.chat_id, "sending notification");

        let response = self.http_client
            .post(&self.url)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(%status, body = %body, "notification sink rejected message");
            return Ok(false);
        }

        // Relays that answer with an empty 200 count as delivered
        let body = response.text().await?;
        if body.trim().is_empty() {
            return Ok(true);
        }
        match serde_json::from_str::<SendMessageResponse>(&body) {
            Ok(parsed) => {
                if !parsed.ok {
                    warn!(
                        description = parsed.description.as_deref().unwrap_or("unknown error"),
                        "notification sink reported failure"
                    );
                }
                Ok(parsed.ok)
            }
            Err(e) => Err(PipelineError::transient("parse notification response", e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_shape() {
        let body = serde_json::to_value(SendMessageRequest { chat_id: "42", text: "hi" }).unwrap();
        assert_eq!(body, serde_json::json!({"chat_id": "42", "text": "hi"}));
    }

    #[test]
    fn test_default_chat_id() {
        let notifier = HttpNotifier::from_config(&NotifyConfig::default()).unwrap();
        assert_eq!(notifier.chat_id(), "default");
    }

    #[tokio::test]
    async fn test_unreachable_sink_is_transient_error() {
        // Port 9 (discard) is closed on any sane test host
        let notifier = HttpNotifier::new("http://127.0.0.1:9/send", "1", Duration::from_millis(500)).unwrap();
        let err = notifier.send("hello").await.unwrap_err();
        assert!(err.is_transient());
    }
}
