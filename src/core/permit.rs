//! Permit Gate (C5): sliding-window channel quota decisions.
//!
//! Grounded in `tmush::trigger::rate_limit::TriggerRateLimiter`'s
//! per-key `RwLock<HashMap<..>>` window tracking, generalized from a fixed
//! per-minute object limit to a configurable `(window_seconds, max_events)`
//! pair per channel.

use crate::core::types::{PermitDecision, PermitReason};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::RwLock;

/// Per-channel quota configuration, mirrors `quotas.<channel>` in config.
#[derive(Debug, Clone, Copy)]
pub struct QuotaConfig {
    pub window_seconds: i64,
    pub max_events: usize,
}

/// Sliding-window ring of send timestamps for one channel (spec.md §3
/// `QuotaState`). Invariant: after any `admit`/`observe_success` call, every
/// timestamp in the ring satisfies `now - t < window_seconds`.
#[derive(Default)]
struct QuotaState {
    ring: Vec<DateTime<Utc>>,
}

impl QuotaState {
    fn evict_expired(&mut self, now: DateTime<Utc>, window_seconds: i64) {
        let window = chrono::Duration::seconds(window_seconds);
        self.ring.retain(|t| now.signed_duration_since(*t) < window);
    }
}

pub struct PermitGate {
    configs: HashMap<String, QuotaConfig>,
    state: RwLock<HashMap<String, QuotaState>>,
}

impl PermitGate {
    pub fn new(configs: HashMap<String, QuotaConfig>) -> Self {
        Self {
            configs,
            state: RwLock::new(HashMap::new()),
        }
    }

    /// Read-only admission check; does not consume quota. Callers must
    /// invoke [`Self::observe_success`] separately after a successful send.
    pub fn admit(&self, channel: &str, now: DateTime<Utc>) -> PermitDecision {
        let cfg = match self.configs.get(channel) {
            Some(cfg) => *cfg,
            None => return PermitDecision::denied(PermitReason::ChannelUnknown, false),
        };

        let mut state = self.state.write().unwrap();
        let entry = state.entry(channel.to_string()).or_default();
        entry.evict_expired(now, cfg.window_seconds);

        if entry.ring.len() < cfg.max_events {
            PermitDecision::granted()
        } else {
            PermitDecision::denied(PermitReason::QuotaExceeded, true)
        }
    }

    /// Record quota consumption for a successful dispatch. Denied or failed
    /// attempts must never call this.
    pub fn observe_success(&self, channel: &str, now: DateTime<Utc>) {
        let cfg = match self.configs.get(channel) {
            Some(cfg) => *cfg,
            None => return,
        };
        let mut state = self.state.write().unwrap();
        let entry = state.entry(channel.to_string()).or_default();
        entry.evict_expired(now, cfg.window_seconds);
        entry.ring.push(now);
    }

    /// Current ring length for a channel, for tests and status reporting.
    pub fn ring_len(&self, channel: &str) -> usize {
        self.state
            .read()
            .unwrap()
            .get(channel)
            .map(|s| s.ring.len())
            .unwrap_or(0)
    }
}
