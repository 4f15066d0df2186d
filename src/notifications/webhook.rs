//! Chat webhook delivery (Discord-compatible JSON posts).

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use super::models::WebhookMessage;

#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Webhook returned HTTP {0}")]
    HttpStatus(u16),
}

/// Something that can post a message to the operations channel.
#[async_trait]
pub trait ChatWebhook: Send + Sync {
    async fn post(&self, message: &WebhookMessage) -> Result<(), WebhookError>;
}

pub struct DiscordWebhook {
    client: reqwest::Client,
    url: String,
}

impl DiscordWebhook {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, WebhookError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl ChatWebhook for DiscordWebhook {
    async fn post(&self, message: &WebhookMessage) -> Result<(), WebhookError> {
        let response = self.client.post(&self.url).json(message).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(WebhookError::HttpStatus(status.as_u16()));
        }
        debug!("Webhook accepted message ({})", status.as_u16());
        Ok(())
    }
}
