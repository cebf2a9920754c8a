//! Discord sender: webhook-based posting.
//!
//! Follows `producers::weather::WeatherService`'s `reqwest::Client` +
//! `tokio::time::timeout` shape, generalized from a GET-and-parse call to a
//! POST-and-classify one.

use super::{parse_retry_after, Sender};
use crate::core::retry::SendError;
use async_trait::async_trait;
use log::{debug, warn};
use serde::Serialize;
use std::time::Duration;
use tokio::time::timeout;

#[derive(Debug, Clone)]
pub struct DiscordConfig {
    pub webhook_base_url: String,
    pub timeout_seconds: u64,
}

#[derive(Serialize)]
struct WebhookPayload<'a> {
    content: &'a str,
}

pub struct DiscordSender {
    config: DiscordConfig,
    client: reqwest::Client,
}

impl DiscordSender {
    pub fn new(config: DiscordConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    fn webhook_url(&self, channel: &str) -> String {
        format!("{}/{}", self.config.webhook_base_url.trim_end_matches('/'), channel)
    }
}

#[async_trait]
impl Sender for DiscordSender {
    async fn send(&self, channel: &str, payload: &str) -> Result<(), SendError> {
        let url = self.webhook_url(channel);
        debug!("posting to discord webhook for channel {}", channel);

        let request = self.client.post(&url).json(&WebhookPayload { content: payload });
        let timeout_duration = Duration::from_secs(self.config.timeout_seconds);

        let response = timeout(timeout_duration, request.send())
            .await
            .map_err(|_| SendError::network())?
            .map_err(|_| SendError::network())?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        if status.as_u16() == 429 {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| parse_retry_after(v, chrono::Utc::now()));
            return Err(SendError::rate_limited(retry_after, 429));
        }

        if status.is_server_error() {
            warn!("discord webhook returned {} for channel {}", status, channel);
            return Err(SendError::server_error(status.as_u16()));
        }

        Err(SendError::client_error(status.as_u16()))
    }
}
