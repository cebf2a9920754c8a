//! Misskey sender: `notes/create` via the instance API.
//!
//! Shares the Discord adapter's shape, swapping the wire format for
//! Misskey's JSON `{i, text}` note-creation body.

use super::{parse_retry_after, Sender};
use crate::core::retry::SendError;
use async_trait::async_trait;
use log::{debug, warn};
use serde::Serialize;
use std::time::Duration;
use tokio::time::timeout;

#[derive(Debug, Clone)]
pub struct MisskeyConfig {
    pub instance_base_url: String,
    pub api_token: String,
    pub timeout_seconds: u64,
}

#[derive(Serialize)]
struct CreateNoteRequest<'a> {
    i: &'a str,
    text: &'a str,
    #[serde(rename = "visibility")]
    visibility: &'a str,
    #[serde(rename = "channelId", skip_serializing_if = "Option::is_none")]
    channel_id: Option<&'a str>,
}

pub struct MisskeySender {
    config: MisskeyConfig,
    client: reqwest::Client,
}

impl MisskeySender {
    pub fn new(config: MisskeyConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl Sender for MisskeySender {
    async fn send(&self, channel: &str, payload: &str) -> Result<(), SendError> {
        let url = format!(
            "{}/api/notes/create",
            self.config.instance_base_url.trim_end_matches('/')
        );
        debug!("posting to misskey channel {}", channel);

        let body = CreateNoteRequest {
            i: &self.config.api_token,
            text: payload,
            visibility: "public",
            channel_id: if channel == "global" { None } else { Some(channel) },
        };

        let timeout_duration = Duration::from_secs(self.config.timeout_seconds);
        let response = timeout(timeout_duration, self.client.post(&url).json(&body).send())
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
            warn!("misskey returned {} for channel {}", status, channel);
            return Err(SendError::server_error(status.as_u16()));
        }

        Err(SendError::client_error(status.as_u16()))
    }
}
