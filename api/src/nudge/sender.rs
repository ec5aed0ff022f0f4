//! Notification transports. The engine treats delivery as an opaque
//! boundary; these are the two stock implementations.

use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use super::{NotificationSender, SendError};

/// Development transport: logs the nudge and reports success.
pub struct LogSender;

#[async_trait]
impl NotificationSender for LogSender {
    async fn send(&self, recipient_id: Uuid, message: &str) -> Result<(), SendError> {
        tracing::info!(recipient = %recipient_id, message, "nudge delivered (log sender)");
        Ok(())
    }
}

/// Posts nudges to an external webhook. Any transport error or non-2xx
/// response counts as a delivery failure and feeds the retry machinery.
pub struct WebhookSender {
    endpoint: String,
    client: reqwest::Client,
}

impl WebhookSender {
    pub fn new(endpoint: String) -> Self {
        WebhookSender {
            endpoint,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl NotificationSender for WebhookSender {
    async fn send(&self, recipient_id: Uuid, message: &str) -> Result<(), SendError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&serde_json::json!({
                "recipient_id": recipient_id,
                "message": message,
            }))
            .send()
            .await
            .map_err(|err| SendError(err.to_string()))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(SendError(format!(
                "webhook returned {}",
                response.status()
            )))
        }
    }
}

/// Pick the transport from the environment: a webhook when
/// MENTORA_SENDER_WEBHOOK is set, the log sender otherwise.
pub fn sender_from_env() -> Arc<dyn NotificationSender> {
    match std::env::var("MENTORA_SENDER_WEBHOOK") {
        Ok(url) if !url.trim().is_empty() => {
            tracing::info!(endpoint = %url, "using webhook notification sender");
            Arc::new(WebhookSender::new(url))
        }
        _ => {
            tracing::info!("MENTORA_SENDER_WEBHOOK not set; using log notification sender");
            Arc::new(LogSender)
        }
    }
}
