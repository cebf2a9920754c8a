//! Shared data model for the send-control pipeline.
//!
//! These types are passed between the Scheduler, CoalesceQueue, gates, and
//! the Orchestrator. They carry no behavior beyond small accessors; gate
//! logic lives in the sibling modules.

use std::time::Instant;
use uuid::Uuid;

/// A platform a [`SendRequest`] is bound for.
///
/// New platforms are added here and in [`crate::adapters`]; the core never
/// branches on platform identity beyond using it as part of a routing key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Platform {
    Discord,
    Misskey,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Discord => "discord",
            Platform::Misskey => "misskey",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "discord" => Some(Platform::Discord),
            "misskey" => Some(Platform::Misskey),
            _ => None,
        }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Routing key a [`SendRequest`] and its [`Batch`] are keyed by.
///
/// Batches never cross keys: two requests merge only when platform, channel,
/// and job all match.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BatchKey {
    pub platform: Platform,
    pub channel: String,
    pub job: String,
}

impl BatchKey {
    pub fn new(platform: Platform, channel: impl Into<String>, job: impl Into<String>) -> Self {
        Self {
            platform,
            channel: channel.into(),
            job: job.into(),
        }
    }
}

/// Relative priority of a batch or envelope. Higher-priority batches are
/// drained first; a batch never silently mixes priorities (see
/// [`crate::core::coalesce::CoalesceQueue::push`]).
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum Priority {
    Low,
    Normal,
    High,
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Normal
    }
}

/// An immutable unit of work entering the pipeline from a job factory.
///
/// Owned by the pipeline end to end: created by the Scheduler, merged into a
/// [`Batch`] by the CoalesceQueue, then consumed by the Orchestrator.
#[derive(Debug, Clone)]
pub struct SendRequest {
    pub platform: Platform,
    pub channel: String,
    pub job: String,
    pub payload: String,
    pub correlation_id: Uuid,
    pub enqueued_at: Instant,
    pub priority: Priority,
}

impl SendRequest {
    pub fn new(
        platform: Platform,
        channel: impl Into<String>,
        job: impl Into<String>,
        payload: impl Into<String>,
    ) -> Self {
        Self {
            platform,
            channel: channel.into(),
            job: job.into(),
            payload: payload.into(),
            correlation_id: Uuid::new_v4(),
            enqueued_at: Instant::now(),
            priority: Priority::default(),
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn key(&self) -> BatchKey {
        BatchKey::new(self.platform, self.channel.clone(), self.job.clone())
    }
}

/// A time-windowed accumulation of [`SendRequest`] payloads bound for one
/// `(platform, channel, job)` key.
///
/// Lifetime: opened on the first `push` for a key; closed when the window
/// elapses, the threshold count is reached, or a priority mismatch forces a
/// cut (see [`crate::core::coalesce::CoalesceQueue`]).
#[derive(Debug)]
pub struct Batch {
    pub key: BatchKey,
    pub payloads: Vec<SendRequest>,
    pub opened_at: Instant,
    pub priority: Priority,
}

impl Batch {
    pub fn open(first: SendRequest) -> Self {
        Self {
            key: first.key(),
            priority: first.priority,
            opened_at: Instant::now(),
            payloads: vec![first],
        }
    }

    pub fn len(&self) -> usize {
        self.payloads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payloads.is_empty()
    }
}

/// Outcome of a [`crate::core::permit::PermitGate::admit`] call.
///
/// `suggested_job_suffix` is appended to the job tag in audit logs on
/// denial (e.g. `weather` becomes `weather-denied`) so operators can
/// distinguish granted from denied flows at a glance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermitDecision {
    pub granted: bool,
    pub reason: PermitReason,
    pub suggested_job_suffix: Option<&'static str>,
    pub retryable: bool,
}

impl PermitDecision {
    pub fn granted() -> Self {
        Self {
            granted: true,
            reason: PermitReason::QuotaAvailable,
            suggested_job_suffix: None,
            retryable: false,
        }
    }

    pub fn denied(reason: PermitReason, retryable: bool) -> Self {
        Self {
            granted: false,
            suggested_job_suffix: if reason == PermitReason::QuotaExceeded {
                Some("-denied")
            } else {
                None
            },
            reason,
            retryable,
        }
    }
}

/// Reason codes for permit decisions, per spec §4.3.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermitReason {
    QuotaAvailable,
    QuotaExceeded,
    ChannelUnknown,
    ConfigurationMissing,
}

impl PermitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            PermitReason::QuotaAvailable => "quota_available",
            PermitReason::QuotaExceeded => "quota_exceeded",
            PermitReason::ChannelUnknown => "channel_unknown",
            PermitReason::ConfigurationMissing => "configuration_missing",
        }
    }
}

/// A single named wall-clock job fired by the Scheduler.
///
/// `schedules` collapses multiple `HH:MM` fire times for the same job name
/// into one record, matching `jobs.<name>.schedule`/`schedules` in config.
#[derive(Debug, Clone)]
pub struct ScheduledJob {
    pub name: String,
    pub schedules: Vec<(u32, u32)>, // (hour, minute) in the configured timezone
    pub destination_override: Option<String>,
}
