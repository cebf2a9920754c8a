//! Metrics Aggregator (C8): counters, latency histograms, weekly rollup.
//!
//! Extends the counters + `Mutex<HashMap<..>>` pattern this module used for
//! per-game counters into a general per-job/per-status aggregator with
//! latency histograms and a rolling 7-day event ring, per spec.md §3/§4.8.
//! Held as an `Arc<Aggregator>` shared between the Orchestrator and the
//! weekly-report producer rather than process-global statics, so tests can
//! construct an isolated instance instead of sharing mutable global state.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::HashMap;
use std::sync::Mutex;

/// Fixed latency histogram bucket boundaries, in seconds.
const LATENCY_BUCKETS_SECONDS: &[f64] = &[0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0];

/// Outcome recorded for one terminal [`crate::core::types::SendRequest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Outcome {
    Success,
    CooldownSkip,
    DuplicateSkip,
    PermitDenied,
    RetryExhausted,
    FactoryError,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::CooldownSkip => "cooldown_skip",
            Outcome::DuplicateSkip => "duplicate_skip",
            Outcome::PermitDenied => "permit_denied",
            Outcome::RetryExhausted => "retry_exhausted",
            Outcome::FactoryError => "factory_error",
        }
    }
}

#[derive(Debug, Clone, Default)]
struct JobCounters {
    sent: u64,
    denied: u64,
    failed: u64,
    latencies: Vec<f64>,
}

#[derive(Debug, Clone)]
struct RingEvent {
    at: DateTime<Utc>,
    job: String,
    outcome: Outcome,
    permit_reason: Option<String>,
}

/// Thread-safe counters, histograms, and a 7-day rolling event ring.
pub struct Aggregator {
    counters: Mutex<HashMap<String, JobCounters>>,
    ring: Mutex<Vec<RingEvent>>,
    ring_retention: ChronoDuration,
}

impl Default for Aggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl Aggregator {
    pub fn new() -> Self {
        Self {
            counters: Mutex::new(HashMap::new()),
            ring: Mutex::new(Vec::new()),
            ring_retention: ChronoDuration::days(7),
        }
    }

    /// Record one terminal outcome for a job. `latency_seconds` is only
    /// meaningful for [`Outcome::Success`]; other outcomes pass `None`.
    pub fn record(
        &self,
        job: &str,
        outcome: Outcome,
        latency_seconds: Option<f64>,
        permit_reason: Option<&str>,
        now: DateTime<Utc>,
    ) {
        {
            let mut counters = self.counters.lock().unwrap();
            let entry = counters.entry(job.to_string()).or_default();
            match outcome {
                Outcome::Success => {
                    entry.sent += 1;
                    if let Some(latency) = latency_seconds {
                        entry.latencies.push(latency);
                    }
                }
                Outcome::PermitDenied => entry.denied += 1,
                Outcome::RetryExhausted => entry.failed += 1,
                Outcome::CooldownSkip | Outcome::DuplicateSkip | Outcome::FactoryError => {}
            }
        }

        let mut ring = self.ring.lock().unwrap();
        ring.push(RingEvent {
            at: now,
            job: job.to_string(),
            outcome,
            permit_reason: permit_reason.map(str::to_string),
        });
        let retention = self.ring_retention;
        ring.retain(|event| now.signed_duration_since(event.at) < retention);
    }

    /// Produce the 7-day rollup described in spec.md §4.8. `weekly_report_job`
    /// is excluded from every job's success-rate computation so the report
    /// job never references its own output.
    pub fn weekly_snapshot(&self, now: DateTime<Utc>, weekly_report_job: &str) -> WeeklySnapshot {
        let window_start = now - self.ring_retention;
        let ring = self.ring.lock().unwrap();

        let mut per_job: HashMap<String, JobRollup> = HashMap::new();
        let mut permit_denial_reasons: HashMap<String, u64> = HashMap::new();

        for event in ring.iter() {
            if event.job == weekly_report_job {
                continue;
            }
            if event.at < window_start || event.at > now {
                continue;
            }
            let rollup = per_job.entry(event.job.clone()).or_default();
            match event.outcome {
                Outcome::Success => rollup.sent += 1,
                Outcome::PermitDenied => {
                    rollup.denied += 1;
                    if let Some(reason) = &event.permit_reason {
                        *permit_denial_reasons.entry(reason.clone()).or_insert(0) += 1;
                    }
                }
                Outcome::RetryExhausted => rollup.failed += 1,
                Outcome::CooldownSkip | Outcome::DuplicateSkip | Outcome::FactoryError => {}
            }
        }
        drop(ring);

        let counters = self.counters.lock().unwrap();
        for (job, rollup) in per_job.iter_mut() {
            let total = rollup.sent + rollup.denied + rollup.failed;
            rollup.success_rate = if total > 0 {
                rollup.sent as f64 / total as f64
            } else {
                0.0
            };
            if let Some(entry) = counters.get(job) {
                rollup.latency_p50 = percentile(&entry.latencies, 0.50);
                rollup.latency_p95 = percentile(&entry.latencies, 0.95);
            }
        }

        WeeklySnapshot {
            window_start,
            window_end: now,
            per_job,
            permit_denial_reasons,
        }
    }

    /// Bucket a latency sample for exposition; not yet wired to a real
    /// exporter (`metrics.export` is advisory-only per spec.md §6).
    pub fn latency_bucket_boundaries() -> &'static [f64] {
        LATENCY_BUCKETS_SECONDS
    }
}

fn percentile(samples: &[f64], p: f64) -> Option<f64> {
    if samples.is_empty() {
        return None;
    }
    let mut sorted = samples.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let idx = ((sorted.len() as f64 - 1.0) * p).round() as usize;
    sorted.get(idx).copied()
}

#[derive(Debug, Clone, Default)]
pub struct JobRollup {
    pub sent: u64,
    pub denied: u64,
    pub failed: u64,
    pub success_rate: f64,
    pub latency_p50: Option<f64>,
    pub latency_p95: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct WeeklySnapshot {
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub per_job: HashMap<String, JobRollup>,
    pub permit_denial_reasons: HashMap<String, u64>,
}
