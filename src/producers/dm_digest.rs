//! DM digest job factory: rolls up pending direct-message notifications into
//! one summary payload, or produces nothing when the inbox is empty.
//!
//! The core only cares that a producer "returns either a payload or
//! nothing" (spec.md §1); where the pending items actually come from is an
//! adapter concern, so this module takes a small [`DmSource`] trait rather
//! than owning any platform-specific polling itself.

use crate::core::scheduler::JobFactory;
use crate::core::types::{Platform, SendRequest};
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Mutex;

/// Supplies the pending DM notifications a digest should summarize.
/// Implemented by whatever platform adapter is actually tracking DMs;
/// `InMemoryDmSource` below is the default, test-friendly implementation.
pub trait DmSource: Send + Sync {
    fn drain_pending(&self) -> Vec<String>;
}

pub struct InMemoryDmSource {
    pending: Mutex<Vec<String>>,
}

impl InMemoryDmSource {
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(Vec::new()),
        }
    }

    pub fn push(&self, item: impl Into<String>) {
        self.pending.lock().unwrap().push(item.into());
    }
}

impl Default for InMemoryDmSource {
    fn default() -> Self {
        Self::new()
    }
}

impl DmSource for InMemoryDmSource {
    fn drain_pending(&self) -> Vec<String> {
        std::mem::take(&mut self.pending.lock().unwrap())
    }
}

pub struct DmDigestJobFactory {
    source: std::sync::Arc<dyn DmSource>,
    platform: Platform,
    channel: String,
    job_name: String,
}

impl DmDigestJobFactory {
    pub fn new(
        source: std::sync::Arc<dyn DmSource>,
        platform: Platform,
        channel: impl Into<String>,
        job_name: impl Into<String>,
    ) -> Self {
        Self {
            source,
            platform,
            channel: channel.into(),
            job_name: job_name.into(),
        }
    }

    fn render(items: &[String]) -> String {
        let mut out = format!("DM digest ({} pending):\n", items.len());
        for item in items {
            out.push_str("- ");
            out.push_str(item);
            out.push('\n');
        }
        out.trim_end().to_string()
    }
}

#[async_trait]
impl JobFactory for DmDigestJobFactory {
    async fn produce(&self) -> Result<Vec<SendRequest>> {
        let items = self.source.drain_pending();
        if items.is_empty() {
            return Ok(Vec::new());
        }
        let text = Self::render(&items);
        Ok(vec![SendRequest::new(self.platform, self.channel.clone(), self.job_name.clone(), text)])
    }
}
