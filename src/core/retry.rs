//! Retry Policy (C7): classifies sender errors and governs backoff.
//!
//! No direct teacher precedent for an HTTP retry layer; the shape here
//! generalizes the single `dm_resend_backoff_seconds` knob the teacher's
//! meshtastic config carried into a full classifier with jittered
//! exponential backoff, following the same "plain struct + small pure
//! functions" style as the rest of `core`.

use rand::Rng;
use std::time::Duration;

/// Error class a sender can report, per spec.md §6 sender contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendErrorKind {
    RateLimited,
    ServerError,
    ClientError,
    Network,
}

/// Classified error returned by a [`crate::adapters::Sender`].
#[derive(Debug, Clone)]
pub struct SendError {
    pub kind: SendErrorKind,
    pub retry_after: Option<Duration>,
    pub status_code: Option<u16>,
}

impl SendError {
    pub fn rate_limited(retry_after: Option<Duration>, status_code: u16) -> Self {
        Self {
            kind: SendErrorKind::RateLimited,
            retry_after,
            status_code: Some(status_code),
        }
    }

    pub fn server_error(status_code: u16) -> Self {
        Self {
            kind: SendErrorKind::ServerError,
            retry_after: None,
            status_code: Some(status_code),
        }
    }

    pub fn client_error(status_code: u16) -> Self {
        Self {
            kind: SendErrorKind::ClientError,
            retry_after: None,
            status_code: Some(status_code),
        }
    }

    pub fn network() -> Self {
        Self {
            kind: SendErrorKind::Network,
            retry_after: None,
            status_code: None,
        }
    }
}

/// What the policy decided to do after observing a [`SendError`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Wait this long, then try again.
    RetryAfter(Duration),
    /// Do not try again; the failure is terminal.
    GiveUp,
}

#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff_ms: 500,
        }
    }
}

pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn max_attempts(&self) -> u32 {
        self.config.max_attempts
    }

    /// Decide what to do after attempt number `attempt` (1-indexed) failed
    /// with `error`. Returns `GiveUp` once `attempt >= max_attempts` or the
    /// error class is non-retryable (4xx other than 429).
    pub fn decide(&self, attempt: u32, error: &SendError) -> RetryDecision {
        if attempt >= self.config.max_attempts {
            return RetryDecision::GiveUp;
        }

        match error.kind {
            SendErrorKind::ClientError => RetryDecision::GiveUp,
            SendErrorKind::RateLimited => {
                let wait = error
                    .retry_after
                    .unwrap_or_else(|| self.backoff_for(attempt));
                RetryDecision::RetryAfter(wait)
            }
            SendErrorKind::ServerError | SendErrorKind::Network => {
                RetryDecision::RetryAfter(self.backoff_for(attempt))
            }
        }
    }

    /// Exponential backoff `base * 2^attempt` with ±20% jitter.
    fn backoff_for(&self, attempt: u32) -> Duration {
        let base = self.config.base_backoff_ms as f64 * 2f64.powi(attempt as i32);
        let jitter_fraction = rand::thread_rng().gen_range(-0.2..=0.2);
        let millis = (base * (1.0 + jitter_fraction)).max(0.0);
        Duration::from_millis(millis as u64)
    }
}
