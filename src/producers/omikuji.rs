//! Magic 8-Ball mini-feature used by public channel command &lt;prefix&gt;8BALL (default prefix `^`).
//!
//! Behavior:
//! - Stateless: no persistence; just returns a random classic response
//! - Delivery: public broadcast only (best-effort), same reliability posture as `<prefix>SLOT`
//! - Rate limit: handled by PublicState.allow_8ball (light per-node cooldown like `<prefix>SLOT`)

use crate::core::scheduler::JobFactory;
use crate::core::types::{Platform, SendRequest};
use anyhow::Result;
use async_trait::async_trait;
use rand::Rng;

/// Classic 20 Magic 8-Ball responses.
const RESPONSES: [&str; 20] = [
    // Positive
    "âœ… It is certain.",
    "âœ… It is decidedly so.",
    "âœ… Without a doubt.",
    "âœ… Yes â€” definitely.",
    "âœ… You may rely on it.",
    "ðŸ‘ As I see it, yes.",
    "ðŸ‘ Most likely.",
    "ðŸ‘ Outlook good.",
    "ðŸ‘ Yes.",
    "ðŸ‘ Signs point to yes.",
    // Neutral
    "ðŸ”® Reply hazy, try again.",
    "â³ Ask again later.",
    "ðŸ¤« Better not tell you now.",
    "ðŸ”® Cannot predict now.",
    "ðŸ§˜ Concentrate and ask again.",
    // Negative
    "âŒ Don't count on it.",
    "âŒ My reply is no.",
    "ðŸš« My sources say no.",
    "ðŸ‘Ž Outlook not so good.",
    "ðŸ‘Ž Very doubtful.",
];

/// Pick a random Magic 8-Ball response.
pub fn ask() -> &'static str {
    let mut rng = rand::thread_rng();
    let idx = rng.gen_range(0..RESPONSES.len());
    RESPONSES[idx]
}

/// [`JobFactory`] wrapper that fires one random response to `(platform,
/// channel)` on every call.
pub struct OmikujiJobFactory {
    platform: Platform,
    channel: String,
    job_name: String,
}

impl OmikujiJobFactory {
    pub fn new(platform: Platform, channel: impl Into<String>, job_name: impl Into<String>) -> Self {
        Self {
            platform,
            channel: channel.into(),
            job_name: job_name.into(),
        }
    }
}

#[async_trait]
impl JobFactory for OmikujiJobFactory {
    async fn produce(&self) -> Result<Vec<SendRequest>> {
        Ok(vec![SendRequest::new(
            self.platform,
            self.channel.clone(),
            self.job_name.clone(),
            ask(),
        )])
    }
}
