//! News headline job factory: fetches a small JSON feed and posts the top
//! headline. Same reqwest+timeout shape as [`crate::producers::weather`],
//! grounded in the same `WeatherService::fetch_from_api` pattern.

use crate::core::scheduler::JobFactory;
use crate::core::types::{Platform, SendRequest};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use log::warn;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::timeout;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewsSection {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub feed_url: String,
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u32,
}

fn default_timeout() -> u32 {
    10
}

impl Default for NewsSection {
    fn default() -> Self {
        Self {
            enabled: false,
            feed_url: String::new(),
            timeout_seconds: default_timeout(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct NewsItem {
    title: String,
}

pub struct NewsJobFactory {
    config: NewsSection,
    client: reqwest::Client,
    platform: Platform,
    channel: String,
    job_name: String,
}

impl NewsJobFactory {
    pub fn new(config: NewsSection, platform: Platform, channel: impl Into<String>, job_name: impl Into<String>) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
            platform,
            channel: channel.into(),
            job_name: job_name.into(),
        }
    }

    async fn fetch_headline(&self) -> Result<Option<String>> {
        if !self.config.enabled || self.config.feed_url.is_empty() {
            return Ok(None);
        }

        let timeout_duration = Duration::from_secs(self.config.timeout_seconds as u64);
        let response = timeout(timeout_duration, self.client.get(&self.config.feed_url).send())
            .await
            .map_err(|_| anyhow!("news feed request timed out after {}s", self.config.timeout_seconds))?
            .map_err(|e| anyhow!("news feed request failed: {e}"))?;

        if !response.status().is_success() {
            return Err(anyhow!("news feed returned status: {}", response.status()));
        }

        let items: Vec<NewsItem> = response
            .json()
            .await
            .map_err(|e| anyhow!("failed to parse news feed: {e}"))?;

        Ok(items.into_iter().next().map(|item| format!("News: {}", item.title)))
    }
}

#[async_trait]
impl JobFactory for NewsJobFactory {
    async fn produce(&self) -> Result<Vec<SendRequest>> {
        match self.fetch_headline().await {
            Ok(Some(text)) => Ok(vec![SendRequest::new(self.platform, self.channel.clone(), self.job_name.clone(), text)]),
            Ok(None) => Ok(Vec::new()),
            Err(e) => {
                warn!("news producer failed: {e}");
                Err(e)
            }
        }
    }
}
