use async_trait::async_trait;
use serde_json::json;
use std::time::Duration;
use thiserror::Error;
use tracing::info;

/// Notification delivery errors
#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Relay rejected notification: {0}")]
    Rejected(String),
}

/// Outbound customer/staff messaging port. Delivery is best-effort:
/// callers log failures and never propagate them.
#[async_trait]
pub trait NotificationPort: Send + Sync {
    async fn send(&self, user_id: &str, content: &str) -> Result<(), NotificationError>;
}

/// Delivers notifications through the chat bot's relay endpoint.
#[derive(Clone)]
pub struct HttpNotifier {
    client: reqwest::Client,
    relay_url: String,
}

impl HttpNotifier {
    pub fn new(relay_url: String) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_default(),
            relay_url,
        }
    }
}

#[async_trait]
impl NotificationPort for HttpNotifier {
    async fn send(&self, user_id: &str, content: &str) -> Result<(), NotificationError> {
        let response = self
            .client
            .post(&self.relay_url)
            .json(&json!({ "user_id": user_id, "content": content }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(NotificationError::Rejected(format!(
                "relay returned {}",
                response.status()
            )));
        }

        info!(user_id = %user_id, "notification delivered");
        Ok(())
    }
}

/// Log-only delivery, used when no relay endpoint is configured.
#[derive(Clone, Default)]
pub struct LogNotifier;

#[async_trait]
impl NotificationPort for LogNotifier {
    async fn send(&self, user_id: &str, content: &str) -> Result<(), NotificationError> {
        info!(user_id = %user_id, content = %content, "notification (log only)");
        Ok(())
    }
}
