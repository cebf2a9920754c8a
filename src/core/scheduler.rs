//! Scheduler (C10): fires `ScheduledJob`s at configured wall-clock slots
//! with jitter, and drains ready batches from the CoalesceQueue.
//!
//! Grounded in two teacher files: `BackupScheduler::should_backup_now`'s UTC
//! boundary comparison (generalized from fixed hour/minute boundaries to
//! arbitrary `HH:MM` slots) for the fire loop, and `bbs::dispatch::start_scheduler`'s
//! `tokio::select!` tick structure for the dispatch-ready-batches half.

use crate::core::clock::Clock;
use crate::core::coalesce::CoalesceQueue;
use crate::core::orchestrator::Orchestrator;
use crate::core::types::{ScheduledJob, SendRequest};
use crate::logutil::StructuredLogSink;
use crate::metrics::{Aggregator, Outcome};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{FixedOffset, Timelike, Utc};
use log::{error, warn};
use rand::Rng;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

/// A content producer. The core treats this as an external collaborator:
/// it either returns zero or more requests, or an error that is logged and
/// swallowed without poisoning future fires (spec.md §4.1).
#[async_trait]
pub trait JobFactory: Send + Sync {
    async fn produce(&self) -> Result<Vec<SendRequest>>;
}

/// `scheduler.timezone` resolved into a fixed UTC offset. Full IANA
/// tz-database support is out of scope (see `SPEC_FULL.md` §9); only `"UTC"`
/// or a `+HH:MM`/`-HH:MM` offset string is accepted.
#[derive(Debug, Clone, Copy)]
pub struct SchedulerTimezone(pub FixedOffset);

impl SchedulerTimezone {
    pub fn parse(value: &str) -> Result<Self> {
        if value.eq_ignore_ascii_case("UTC") {
            return Ok(Self(FixedOffset::east_opt(0).unwrap()));
        }
        let negative = value.starts_with('-');
        let trimmed = value.trim_start_matches(['+', '-']);
        let mut parts = trimmed.splitn(2, ':');
        let hours: i32 = parts
            .next()
            .ok_or_else(|| anyhow::anyhow!("invalid timezone offset: {value}"))?
            .parse()?;
        let minutes: i32 = parts.next().unwrap_or("0").parse()?;
        let total_seconds = (hours * 3600 + minutes * 60) * if negative { -1 } else { 1 };
        FixedOffset::east_opt(total_seconds)
            .map(Self)
            .ok_or_else(|| anyhow::anyhow!("offset out of range: {value}"))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SchedulerConfig {
    pub timezone: FixedOffset,
    pub jitter_enabled: bool,
    pub jitter_min_ms: u64,
    pub jitter_max_ms: u64,
    /// How often the fire loop checks for a matching slot and the dispatch
    /// loop polls the queue for ready batches.
    pub tick: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            timezone: FixedOffset::east_opt(0).unwrap(),
            jitter_enabled: true,
            jitter_min_ms: 100,
            jitter_max_ms: 500,
            tick: Duration::from_secs(30),
        }
    }
}

struct Entry {
    job: ScheduledJob,
    factory: Arc<dyn JobFactory>,
}

pub struct Scheduler {
    config: SchedulerConfig,
    entries: Vec<Entry>,
    queue: Arc<CoalesceQueue>,
    orchestrator: Arc<Orchestrator>,
    metrics: Arc<Aggregator>,
    clock: Arc<dyn Clock>,
    audit_log: Arc<StructuredLogSink>,
}

impl Scheduler {
    pub fn new(
        config: SchedulerConfig,
        queue: Arc<CoalesceQueue>,
        orchestrator: Arc<Orchestrator>,
        metrics: Arc<Aggregator>,
        clock: Arc<dyn Clock>,
        audit_log: Arc<StructuredLogSink>,
    ) -> Self {
        Self {
            config,
            entries: Vec::new(),
            queue,
            orchestrator,
            metrics,
            clock,
            audit_log,
        }
    }

    pub fn register(&mut self, job: ScheduledJob, factory: Arc<dyn JobFactory>) {
        self.entries.push(Entry { job, factory });
    }

    /// Offset drawn uniformly from `[jitter_min_ms, jitter_max_ms]`, or zero
    /// when jitter is disabled. Both boundary values are admissible outcomes
    /// (spec.md §4.1).
    fn draw_jitter(&self) -> Duration {
        if !self.config.jitter_enabled {
            return Duration::ZERO;
        }
        if self.config.jitter_min_ms >= self.config.jitter_max_ms {
            return Duration::from_millis(self.config.jitter_min_ms);
        }
        let ms = rand::thread_rng().gen_range(self.config.jitter_min_ms..=self.config.jitter_max_ms);
        Duration::from_millis(ms)
    }

    fn current_slot(&self, now_utc: chrono::DateTime<Utc>) -> (u32, u32) {
        let local = now_utc.with_timezone(&self.config.timezone);
        (local.hour(), local.minute())
    }

    /// Spawns the fire loop and the dispatch-ready-batches loop, each
    /// listening on the shared shutdown broadcast.
    pub fn spawn(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        let fire_self = self.clone();
        let mut fire_shutdown = shutdown.resubscribe();
        tokio::spawn(async move {
            fire_self.run_fire_loop(&mut fire_shutdown).await;
        });

        let dispatch_self = self.clone();
        tokio::spawn(async move {
            dispatch_self.run_dispatch_loop(&mut shutdown).await;
        });
    }

    async fn run_fire_loop(&self, shutdown: &mut broadcast::Receiver<()>) {
        let mut last_fired_minute: Option<i64> = None;
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    break;
                }
                _ = tokio::time::sleep(self.config.tick) => {}
            }

            let now_utc = self.clock.now();
            let boundary_minute = now_utc.timestamp() / 60;
            if last_fired_minute == Some(boundary_minute) {
                continue;
            }
            let slot = self.current_slot(now_utc);

            for entry in &self.entries {
                if !entry.job.schedules.contains(&slot) {
                    continue;
                }
                self.fire(entry).await;
            }
            last_fired_minute = Some(boundary_minute);
        }
    }

    async fn fire(&self, entry: &Entry) {
        let requests = match entry.factory.produce().await {
            Ok(reqs) => reqs,
            Err(e) => {
                error!(
                    "factory_error for job {}: {}",
                    entry.job.name,
                    crate::logutil::escape_log(&e.to_string())
                );
                self.metrics.record(
                    &entry.job.name,
                    Outcome::FactoryError,
                    None,
                    None,
                    self.clock.now(),
                );
                let line = json!({
                    "event": "factory_error",
                    "job": entry.job.name,
                    "status": "factory_error",
                    "error": crate::logutil::escape_log(&e.to_string()),
                });
                self.audit_log.write_line(&line.to_string());
                return;
            }
        };

        if requests.is_empty() {
            return;
        }

        let jitter = self.draw_jitter();
        let queue = self.queue.clone();
        let job_name = entry.job.name.clone();
        tokio::spawn(async move {
            if !jitter.is_zero() {
                tokio::time::sleep(jitter).await;
            }
            for req in requests {
                queue.push(req);
            }
            log::debug!("job {} dispatched to coalesce queue after {:?} jitter", job_name, jitter);
        });
    }

    async fn run_dispatch_loop(&self, shutdown: &mut broadcast::Receiver<()>) {
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    break;
                }
                _ = tokio::time::sleep(self.config.tick.min(Duration::from_secs(5))) => {}
            }
            self.orchestrator.drain_ready(&self.queue).await;
        }
        warn!("scheduler dispatch loop terminated");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_utc_timezone() {
        let tz = SchedulerTimezone::parse("UTC").unwrap();
        assert_eq!(tz.0.utc_minus_local(), 0);
    }

    #[test]
    fn parses_positive_offset() {
        let tz = SchedulerTimezone::parse("+09:00").unwrap();
        assert_eq!(tz.0.local_minus_utc(), 9 * 3600);
    }

    #[test]
    fn parses_negative_offset() {
        let tz = SchedulerTimezone::parse("-05:00").unwrap();
        assert_eq!(tz.0.local_minus_utc(), -5 * 3600);
    }

    #[test]
    fn jitter_respects_disabled_flag() {
        let config = SchedulerConfig {
            jitter_enabled: false,
            ..SchedulerConfig::default()
        };
        let scheduler = build_test_scheduler(config);
        assert_eq!(scheduler.draw_jitter(), Duration::ZERO);
    }

    #[test]
    fn jitter_enabled_stays_in_bounds() {
        let config = SchedulerConfig {
            jitter_enabled: true,
            jitter_min_ms: 100,
            jitter_max_ms: 500,
            ..SchedulerConfig::default()
        };
        let scheduler = build_test_scheduler(config);
        for _ in 0..1000 {
            let d = scheduler.draw_jitter();
            assert!(d.as_millis() >= 100 && d.as_millis() <= 500);
        }
    }

    fn build_test_scheduler(config: SchedulerConfig) -> Scheduler {
        use crate::core::cooldown::CooldownGate;
        use crate::core::dedupe::DedupeDetector;
        use crate::core::permit::PermitGate;
        use crate::core::retry::{RetryConfig, RetryPolicy};
        use crate::logutil::StructuredLogSink;
        use std::collections::HashMap;

        struct NullSender;
        #[async_trait::async_trait]
        impl crate::adapters::Sender for NullSender {
            async fn send(&self, _channel: &str, _payload: &str) -> Result<(), crate::core::retry::SendError> {
                Ok(())
            }
        }

        let senders: HashMap<String, Arc<dyn crate::adapters::Sender>> =
            HashMap::from([("discord".to_string(), Arc::new(NullSender) as Arc<dyn crate::adapters::Sender>)]);
        let orchestrator = Arc::new(Orchestrator::new(
            CooldownGate::new(true, HashMap::new()),
            DedupeDetector::new(true, 100, 60),
            PermitGate::new(HashMap::new()),
            RetryPolicy::new(RetryConfig::default()),
            Arc::new(Aggregator::new()),
            Arc::new(crate::core::clock::SystemClock),
            senders,
            Arc::new(StructuredLogSink::disabled()),
        ));

        Scheduler::new(
            config,
            Arc::new(CoalesceQueue::new(crate::core::coalesce::CoalesceConfig::default())),
            orchestrator,
            Arc::new(Aggregator::new()),
            Arc::new(crate::core::clock::SystemClock),
            Arc::new(StructuredLogSink::disabled()),
        )
    }

    struct FlakyFactory {
        calls: std::sync::atomic::AtomicUsize,
    }

    #[async_trait]
    impl JobFactory for FlakyFactory {
        async fn produce(&self) -> Result<Vec<SendRequest>> {
            let n = self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            if n == 0 {
                anyhow::bail!("boom");
            }
            Ok(vec![SendRequest::new(
                crate::core::types::Platform::Discord,
                "general",
                "flaky",
                "recovered",
            )])
        }
    }

    #[tokio::test]
    async fn factory_error_does_not_poison_later_fires() {
        use crate::core::cooldown::CooldownGate;
        use crate::core::dedupe::DedupeDetector;
        use crate::core::permit::PermitGate;
        use crate::core::retry::{RetryConfig, RetryPolicy};
        use std::collections::HashMap;

        struct NullSender;
        #[async_trait]
        impl crate::adapters::Sender for NullSender {
            async fn send(&self, _channel: &str, _payload: &str) -> Result<(), crate::core::retry::SendError> {
                Ok(())
            }
        }

        let tmp = tempfile::NamedTempFile::new().unwrap();
        let audit_log = Arc::new(StructuredLogSink::open(tmp.path().to_str()).unwrap());

        let senders: HashMap<String, Arc<dyn crate::adapters::Sender>> =
            HashMap::from([("discord".to_string(), Arc::new(NullSender) as Arc<dyn crate::adapters::Sender>)]);
        let orchestrator = Arc::new(Orchestrator::new(
            CooldownGate::new(true, HashMap::new()),
            DedupeDetector::new(true, 100, 60),
            PermitGate::new(HashMap::new()),
            RetryPolicy::new(RetryConfig::default()),
            Arc::new(Aggregator::new()),
            Arc::new(crate::core::clock::SystemClock),
            senders,
            audit_log.clone(),
        ));
        let scheduler = Scheduler::new(
            SchedulerConfig::default(),
            Arc::new(CoalesceQueue::new(crate::core::coalesce::CoalesceConfig::default())),
            orchestrator,
            Arc::new(Aggregator::new()),
            Arc::new(crate::core::clock::SystemClock),
            audit_log,
        );

        let entry = Entry {
            job: ScheduledJob {
                name: "flaky".to_string(),
                schedules: vec![],
                destination_override: None,
            },
            factory: Arc::new(FlakyFactory {
                calls: std::sync::atomic::AtomicUsize::new(0),
            }),
        };

        scheduler.fire(&entry).await;
        scheduler.fire(&entry).await;

        let contents = std::fs::read_to_string(tmp.path()).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 1, "only the first fire should log factory_error");
        let parsed: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(parsed["event"], "factory_error");
        assert_eq!(parsed["job"], "flaky");
    }
}
