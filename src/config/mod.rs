//! # Configuration Management Module
//!
//! Centralized configuration for the send-control core: scheduler slots,
//! per-channel quotas, per-job cooldowns, dedupe/retry tuning, and the
//! provider/sender wiring that turns config strings into running
//! components.
//!
//! ## Configuration Structure
//!
//! - [`SchedulerSection`] - wall-clock timezone and jitter bounds
//! - [`CooldownSection`] - per-job cooldown windows
//! - quotas - per-channel sliding-window limits
//! - [`DedupeSection`] - near-duplicate detector tuning
//! - [`RetrySection`] - retry attempt/backoff bounds
//! - [`JobSection`] - per-job fire schedule and destination override
//! - `providers` - `module:attr` producer references
//! - [`LoggingConfig`] - human + structured log sinks
//!
//! ## Usage
//!
//! ```rust,no_run
//! use relaybot::config::Config;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.toml").await?;
//!     println!("timezone: {}", config.scheduler.timezone);
//!     Config::create_default("config.toml").await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Validation and Security
//!
//! - **Input Validation**: [`Config::validate`] rejects inverted jitter
//!   bounds, zero-length quota windows, and unknown `providers.*` strings.
//! - **Type Safety**: Strong typing prevents configuration errors.
//! - **Atomic reload**: see [`reload`] — a reload never applies a
//!   partially-invalid snapshot.

pub mod reload;

use crate::core::scheduler::{SchedulerConfig as CoreSchedulerConfig, SchedulerTimezone};
use crate::core::types::ScheduledJob;
use crate::producers::news::NewsSection;
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::fs;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SchedulerSection {
    #[serde(default = "default_timezone")]
    pub timezone: String,
    #[serde(default = "default_true")]
    pub jitter_enabled: bool,
    #[serde(default = "default_jitter_min_ms")]
    pub jitter_min_ms: u64,
    #[serde(default = "default_jitter_max_ms")]
    pub jitter_max_ms: u64,
}

fn default_timezone() -> String {
    "UTC".to_string()
}
fn default_true() -> bool {
    true
}
fn default_jitter_min_ms() -> u64 {
    100
}
fn default_jitter_max_ms() -> u64 {
    500
}

impl Default for SchedulerSection {
    fn default() -> Self {
        Self {
            timezone: default_timezone(),
            jitter_enabled: true,
            jitter_min_ms: default_jitter_min_ms(),
            jitter_max_ms: default_jitter_max_ms(),
        }
    }
}

impl SchedulerSection {
    pub fn to_core_config(&self) -> Result<CoreSchedulerConfig> {
        let tz = SchedulerTimezone::parse(&self.timezone)
            .with_context(|| format!("invalid scheduler.timezone: {}", self.timezone))?;
        Ok(CoreSchedulerConfig {
            timezone: tz.0,
            jitter_enabled: self.jitter_enabled,
            jitter_min_ms: self.jitter_min_ms,
            jitter_max_ms: self.jitter_max_ms,
            tick: std::time::Duration::from_secs(30),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CooldownJobSection {
    pub base_window_seconds: i64,
    #[serde(default = "default_max_factor")]
    pub max_factor: f64,
    #[serde(default = "default_growth")]
    pub growth: f64,
}

fn default_max_factor() -> f64 {
    4.0
}
fn default_growth() -> f64 {
    1.5
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct CooldownSection {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub jobs: HashMap<String, CooldownJobSection>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct QuotaSection {
    pub window_seconds: i64,
    pub max_events: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DedupeSection {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_dedupe_capacity")]
    pub capacity: usize,
    #[serde(default = "default_dedupe_ttl")]
    pub ttl_seconds: i64,
}

fn default_dedupe_capacity() -> usize {
    500
}
fn default_dedupe_ttl() -> i64 {
    3600
}

impl Default for DedupeSection {
    fn default() -> Self {
        Self {
            enabled: true,
            capacity: default_dedupe_capacity(),
            ttl_seconds: default_dedupe_ttl(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetrySection {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_backoff_ms")]
    pub base_backoff_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}
fn default_base_backoff_ms() -> u64 {
    500
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_backoff_ms: default_base_backoff_ms(),
        }
    }
}

/// Accepts either a single `HH:MM` string or an array/tuple of them; both
/// collapse into `schedules` on a [`JobSection`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum ScheduleSpec {
    Single(String),
    Many(Vec<String>),
}

impl ScheduleSpec {
    fn into_vec(self) -> Vec<String> {
        match self {
            ScheduleSpec::Single(s) => vec![s],
            ScheduleSpec::Many(v) => v,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobSection {
    #[serde(alias = "schedules")]
    pub schedule: ScheduleSpec,
    pub platform: String,
    pub channel: String,
    #[serde(default)]
    pub destination_override: Option<String>,
}

/// Advisory-only sections: recognized and preserved, never interpreted by
/// the core (spec.md §6).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct MetricsExportSection {
    #[serde(default)]
    pub backend: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct LimitsSection {
    #[serde(flatten)]
    pub passthrough: HashMap<String, toml::Value>,
}

/// Provider-specific config for `producers::weather`. Kept a sibling of the
/// send-control sections above rather than folded into `jobs.*`, since it's
/// content concern, not scheduling/throttling concern.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WeatherSection {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_weather_location")]
    pub default_location: String,
    #[serde(default = "default_location_type")]
    pub location_type: String,
    #[serde(default)]
    pub country_code: Option<String>,
    #[serde(default = "default_cache_ttl_minutes")]
    pub cache_ttl_minutes: u32,
    #[serde(default = "default_adapter_timeout")]
    pub timeout_seconds: u32,
}

fn default_weather_location() -> String {
    "Seattle".to_string()
}
fn default_location_type() -> String {
    "city".to_string()
}
fn default_cache_ttl_minutes() -> u32 {
    30
}

impl Default for WeatherSection {
    fn default() -> Self {
        Self {
            enabled: false,
            api_key: String::new(),
            default_location: default_weather_location(),
            location_type: default_location_type(),
            country_code: None,
            cache_ttl_minutes: default_cache_ttl_minutes(),
            timeout_seconds: default_adapter_timeout() as u32,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<String>,
    /// ndjson sink for structured audit events (C9's `StructuredLogSink`).
    #[serde(default)]
    pub structured_file: Option<String>,
}

#[cfg(feature = "discord")]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct DiscordSection {
    pub webhook_base_url: String,
    #[serde(default = "default_adapter_timeout")]
    pub timeout_seconds: u64,
}

#[cfg(feature = "misskey")]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct MisskeySection {
    pub instance_base_url: String,
    pub api_token: String,
    #[serde(default = "default_adapter_timeout")]
    pub timeout_seconds: u64,
}

fn default_adapter_timeout() -> u64 {
    10
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub scheduler: SchedulerSection,
    #[serde(default)]
    pub cooldown: CooldownSection,
    #[serde(default)]
    pub quotas: HashMap<String, QuotaSection>,
    #[serde(default)]
    pub dedupe: DedupeSection,
    #[serde(default)]
    pub retry: RetrySection,
    #[serde(default)]
    pub metrics_export: MetricsExportSection,
    #[serde(default)]
    pub limits: LimitsSection,
    #[serde(default)]
    pub jobs: HashMap<String, JobSection>,
    #[serde(default)]
    pub providers: HashMap<String, String>,
    #[serde(default)]
    pub weather: WeatherSection,
    #[serde(default)]
    pub news: NewsSection,
    pub logging: LoggingConfig,
    #[cfg(feature = "discord")]
    #[serde(default)]
    pub discord: DiscordSection,
    #[cfg(feature = "misskey")]
    #[serde(default)]
    pub misskey: MisskeySection,
}

impl Config {
    /// Load configuration from a file.
    pub async fn load(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| anyhow!("Failed to read config file {}: {}", path, e))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| anyhow!("Failed to parse config file {}: {}", path, e))?;

        config.validate()?;
        Ok(config)
    }

    /// Create a default configuration file.
    pub async fn create_default(path: &str) -> Result<()> {
        let config = Config::default();
        let content = toml::to_string_pretty(&config)
            .map_err(|e| anyhow!("Failed to serialize default config: {}", e))?;

        fs::write(path, content)
            .await
            .map_err(|e| anyhow!("Failed to write config file {}: {}", path, e))?;

        Ok(())
    }

    /// Reject configurations the core cannot run with. Called on load and
    /// before a reload swap is published (spec.md §7: "reload never applies
    /// a partially-invalid snapshot").
    pub fn validate(&self) -> Result<()> {
        if self.scheduler.jitter_min_ms > self.scheduler.jitter_max_ms {
            return Err(anyhow!(
                "scheduler.jitter_min_ms ({}) must not exceed jitter_max_ms ({})",
                self.scheduler.jitter_min_ms,
                self.scheduler.jitter_max_ms
            ));
        }
        SchedulerTimezone::parse(&self.scheduler.timezone)
            .with_context(|| format!("invalid scheduler.timezone: {}", self.scheduler.timezone))?;

        for (channel, quota) in &self.quotas {
            if quota.window_seconds <= 0 {
                return Err(anyhow!("quotas.{channel}.window_seconds must be positive"));
            }
            if quota.max_events == 0 {
                return Err(anyhow!("quotas.{channel}.max_events must be positive"));
            }
        }

        if self.retry.max_attempts == 0 {
            return Err(anyhow!("retry.max_attempts must be at least 1"));
        }

        for (job, section) in &self.jobs {
            for slot in section.schedule.clone().into_vec() {
                parse_hh_mm(&slot)
                    .with_context(|| format!("jobs.{job}.schedule entry '{slot}' is not HH:MM"))?;
            }
        }

        for (job, reference) in &self.providers {
            if !reference.contains(':') && !reference.contains('.') {
                return Err(anyhow!(
                    "providers.{job} = '{reference}' must be of the form 'module:attr' or 'module.attr'"
                ));
            }
        }

        Ok(())
    }

    /// Collapse `jobs.*` into [`ScheduledJob`] records the Scheduler can
    /// register job factories against.
    pub fn scheduled_jobs(&self) -> Result<Vec<ScheduledJob>> {
        let mut jobs = Vec::new();
        for (name, section) in &self.jobs {
            let mut schedules = Vec::new();
            for slot in section.schedule.clone().into_vec() {
                schedules.push(parse_hh_mm(&slot)?);
            }
            jobs.push(ScheduledJob {
                name: name.clone(),
                schedules,
                destination_override: section.destination_override.clone(),
            });
        }
        Ok(jobs)
    }
}

fn parse_hh_mm(value: &str) -> Result<(u32, u32)> {
    let mut parts = value.splitn(2, ':');
    let hour: u32 = parts
        .next()
        .ok_or_else(|| anyhow!("empty schedule entry"))?
        .parse()
        .with_context(|| format!("invalid hour in '{value}'"))?;
    let minute: u32 = parts
        .next()
        .ok_or_else(|| anyhow!("missing ':MM' in '{value}'"))?
        .parse()
        .with_context(|| format!("invalid minute in '{value}'"))?;
    if hour > 23 || minute > 59 {
        return Err(anyhow!("'{value}' is out of range for HH:MM"));
    }
    Ok((hour, minute))
}

impl Default for Config {
    fn default() -> Self {
        let mut quotas = HashMap::new();
        quotas.insert(
            "general".to_string(),
            QuotaSection {
                window_seconds: 3600,
                max_events: 20,
            },
        );

        let mut jobs = HashMap::new();
        jobs.insert(
            "weather".to_string(),
            JobSection {
                schedule: ScheduleSpec::Single("08:00".to_string()),
                platform: "discord".to_string(),
                channel: "general".to_string(),
                destination_override: None,
            },
        );
        jobs.insert(
            "weekly_report".to_string(),
            JobSection {
                schedule: ScheduleSpec::Single("00:00".to_string()),
                platform: "discord".to_string(),
                channel: "ops".to_string(),
                destination_override: None,
            },
        );

        let mut providers = HashMap::new();
        providers.insert("weather".to_string(), "producers.weather:produce".to_string());
        providers.insert(
            "weekly_report".to_string(),
            "producers.weekly_report:produce".to_string(),
        );

        Config {
            scheduler: SchedulerSection::default(),
            cooldown: CooldownSection::default(),
            quotas,
            dedupe: DedupeSection::default(),
            retry: RetrySection::default(),
            metrics_export: MetricsExportSection::default(),
            limits: LimitsSection::default(),
            jobs,
            providers,
            weather: WeatherSection::default(),
            news: NewsSection::default(),
            logging: LoggingConfig {
                level: "info".to_string(),
                file: Some("relaybot.log".to_string()),
                structured_file: Some("relaybot-events.ndjson".to_string()),
            },
            #[cfg(feature = "discord")]
            discord: DiscordSection::default(),
            #[cfg(feature = "misskey")]
            misskey: MisskeySection::default(),
        }
    }
}
