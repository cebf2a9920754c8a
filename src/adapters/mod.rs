//! Platform senders: the core's only outbound I/O boundary.
//!
//! The core never talks HTTP directly — it calls [`Sender::send`] and lets
//! [`crate::core::retry::RetryPolicy`] interpret the classified error.
//! Concrete transports live in feature-gated submodules, each following
//! `producers::weather::WeatherService`'s `reqwest::Client` +
//! `tokio::time::timeout` pattern.

#[cfg(feature = "discord")]
pub mod discord;
#[cfg(feature = "misskey")]
pub mod misskey;

use crate::core::retry::SendError;
use async_trait::async_trait;

/// A platform transport. Implementations own their own HTTP client and
/// authentication; the core only ever sees success or a classified error.
#[async_trait]
pub trait Sender: Send + Sync {
    async fn send(&self, channel: &str, payload: &str) -> Result<(), SendError>;
}

/// Parse an HTTP `Retry-After` header value, which is either an integer
/// count of seconds or an HTTP-date (RFC 2822).
///
/// Open question resolved in `SPEC_FULL.md`: no new dependency for this —
/// `chrono`'s existing RFC 2822 parser covers the date form.
pub fn parse_retry_after(value: &str, now: chrono::DateTime<chrono::Utc>) -> Option<std::time::Duration> {
    if let Ok(seconds) = value.trim().parse::<u64>() {
        return Some(std::time::Duration::from_secs(seconds));
    }
    if let Ok(date) = chrono::DateTime::parse_from_rfc2822(value.trim()) {
        let delta = date.with_timezone(&chrono::Utc).signed_duration_since(now);
        if delta.num_milliseconds() > 0 {
            return Some(std::time::Duration::from_millis(delta.num_milliseconds() as u64));
        }
        return Some(std::time::Duration::ZERO);
    }
    None
}
