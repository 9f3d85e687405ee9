use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;

use crate::AppError;
use crate::config::NotificationsConfig;
use crate::notify::{NotificationDispatcher, StockAlert, format_alert_message};

const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);

/// Posts alerts to a chat webhook (Discord-compatible payload shape).
pub struct WebhookDispatcher {
    client: Client,
    webhook_url: String,
    username: String,
}

impl WebhookDispatcher {
    /// Returns None when no webhook URL is configured, so the caller can
    /// fall back to the log dispatcher.
    pub fn from_config(config: &NotificationsConfig) -> crate::Result<Option<Self>> {
        let Some(webhook_url) = config.webhook_url.clone() else {
            return Ok(None);
        };

        let client = Client::builder()
            .timeout(WEBHOOK_TIMEOUT)
            .build()
            .map_err(|e| AppError::Internal(format!("failed to build webhook client: {e}")))?;

        Ok(Some(Self {
            client,
            webhook_url,
            username: config.webhook_username.clone(),
        }))
    }
}

#[async_trait]
impl NotificationDispatcher for WebhookDispatcher {
    async fn dispatch(&self, alert: &StockAlert) {
        let payload = json!({
            "username": self.username,
            "content": format_alert_message(alert),
        });

        // Fire-and-forget: failures are logged, never retried here.
        match self.client.post(&self.webhook_url).json(&payload).send().await {
            Ok(response) if response.status().is_success() => {
                tracing::debug!(item = %alert.label, "webhook alert delivered");
            }
            Ok(response) => {
                tracing::warn!(
                    item = %alert.label,
                    status = %response.status(),
                    "webhook rejected alert"
                );
            }
            Err(e) => {
                tracing::warn!(item = %alert.label, error = %e, "webhook delivery failed");
            }
        }
    }
}
