//! End-to-end scenarios across config, producer registry, the coalesce
//! queue, and the orchestrator — the parts unit tests exercise in
//! isolation, wired up the way `main::start_pipeline` wires them.

use async_trait::async_trait;
use relaybot::adapters::Sender;
use relaybot::config::Config;
use relaybot::core::clock::{Clock, FakeClock};
use relaybot::core::coalesce::{CoalesceConfig, CoalesceQueue};
use relaybot::core::cooldown::{CooldownConfig, CooldownGate};
use relaybot::core::dedupe::DedupeDetector;
use relaybot::core::orchestrator::Orchestrator;
use relaybot::core::permit::{PermitGate, QuotaConfig};
use relaybot::core::retry::{RetryConfig, RetryPolicy, SendError};
use relaybot::core::scheduler::JobFactory;
use relaybot::core::types::{Platform, SendRequest};
use relaybot::logutil::StructuredLogSink;
use relaybot::metrics::Aggregator;
use relaybot::producers::registry;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

/// A [`Sender`] whose canned responses are consumed in order; once
/// exhausted it always succeeds.
struct ScriptedSender {
    responses: StdMutex<Vec<Result<(), SendError>>>,
    calls: AtomicUsize,
}

impl ScriptedSender {
    fn new(responses: Vec<Result<(), SendError>>) -> Self {
        Self {
            responses: StdMutex::new(responses),
            calls: AtomicUsize::new(0),
        }
    }

    fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Sender for ScriptedSender {
    async fn send(&self, _channel: &str, _payload: &str) -> Result<(), SendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut responses = self.responses.lock().unwrap();
        if responses.is_empty() {
            Ok(())
        } else {
            responses.remove(0)
        }
    }
}

fn build_orchestrator(
    senders: HashMap<String, Arc<dyn Sender>>,
    clock: Arc<dyn Clock>,
    metrics: Arc<Aggregator>,
    quotas: HashMap<String, QuotaConfig>,
    cooldowns: HashMap<String, CooldownConfig>,
) -> Orchestrator {
    build_orchestrator_with_audit(
        senders,
        clock,
        metrics,
        quotas,
        cooldowns,
        Arc::new(StructuredLogSink::disabled()),
    )
}

fn build_orchestrator_with_audit(
    senders: HashMap<String, Arc<dyn Sender>>,
    clock: Arc<dyn Clock>,
    metrics: Arc<Aggregator>,
    quotas: HashMap<String, QuotaConfig>,
    cooldowns: HashMap<String, CooldownConfig>,
    audit_log: Arc<StructuredLogSink>,
) -> Orchestrator {
    Orchestrator::new(
        CooldownGate::new(true, cooldowns),
        DedupeDetector::new(true, 100, 60),
        PermitGate::new(quotas),
        RetryPolicy::new(RetryConfig {
            max_attempts: 3,
            base_backoff_ms: 1,
        }),
        metrics,
        clock,
        senders,
        audit_log,
    )
}

/// The default config's `providers` map resolves against its own `jobs`
/// map with no startup error, and produces a factory per provider.
#[tokio::test]
async fn registry_resolves_default_config_into_working_factories() {
    let config = Config::default();
    let metrics = Arc::new(Aggregator::new());
    let clock: Arc<dyn relaybot::core::clock::Clock> = Arc::new(relaybot::core::clock::SystemClock);
    let dm_source = registry::default_dm_source();

    let factories = registry::build(&config, metrics, clock, dm_source).unwrap();
    assert_eq!(factories.len(), 2); // weather + weekly_report

    // weather is disabled by default, so it produces nothing this fire.
    let weather_reqs = factories["weather"].produce().await.unwrap();
    assert!(weather_reqs.is_empty());

    // weekly_report always produces exactly one report, even with no
    // pipeline activity yet.
    let report_reqs = factories["weekly_report"].produce().await.unwrap();
    assert_eq!(report_reqs.len(), 1);
}

/// A batch containing a near-duplicate payload only reaches the sender
/// once; the duplicate is skipped without consuming quota, and metrics
/// reflect both outcomes.
#[tokio::test]
async fn near_duplicate_batch_reaches_sender_once() {
    let clock = Arc::new(FakeClock::new(chrono::Utc::now()));
    let metrics = Arc::new(Aggregator::new());
    let sender = Arc::new(ScriptedSender::new(vec![]));
    let quotas = HashMap::from([(
        "general".to_string(),
        QuotaConfig {
            window_seconds: 3600,
            max_events: 10,
        },
    )]);
    let orchestrator = build_orchestrator(
        HashMap::from([("discord".to_string(), sender.clone() as Arc<dyn Sender>)]),
        clock.clone(),
        metrics.clone(),
        quotas,
        HashMap::new(),
    );

    let queue = CoalesceQueue::new(CoalesceConfig {
        window: std::time::Duration::from_secs(1),
        threshold: 10,
    });
    queue.push(SendRequest::new(Platform::Discord, "general", "fortune", "today is a good day"));
    queue.push(SendRequest::new(Platform::Discord, "general", "fortune", "TODAY  IS A GOOD DAY"));

    for batch in queue.pop_ready(std::time::Instant::now() + std::time::Duration::from_secs(2)) {
        orchestrator.process(batch).await;
    }

    assert_eq!(sender.call_count(), 1);
}

/// A channel quota exhausted by the first two sends denies the third;
/// the denied attempt never reaches the sender and never consumes quota.
#[tokio::test]
async fn permit_denial_path_blocks_sender_without_consuming_quota() {
    let clock = Arc::new(FakeClock::new(chrono::Utc::now()));
    let metrics = Arc::new(Aggregator::new());
    let sender = Arc::new(ScriptedSender::new(vec![]));
    let quotas = HashMap::from([(
        "general".to_string(),
        QuotaConfig {
            window_seconds: 3600,
            max_events: 2,
        },
    )]);
    let orchestrator = build_orchestrator(
        HashMap::from([("discord".to_string(), sender.clone() as Arc<dyn Sender>)]),
        clock.clone(),
        metrics.clone(),
        quotas,
        HashMap::new(),
    );

    for i in 0..3 {
        let req = SendRequest::new(Platform::Discord, "general", "omikuji", format!("roll {i}"));
        orchestrator.process(relaybot::core::types::Batch::open(req)).await;
    }

    assert_eq!(sender.call_count(), 2);
    let snapshot = metrics.weekly_snapshot(clock.now(), "weekly_report");
    let omikuji = snapshot.per_job.get("omikuji").unwrap();
    assert_eq!(omikuji.sent, 2);
    assert_eq!(omikuji.denied, 1);
}

/// A 429 response is retried per `Retry-After`, then succeeds; the final
/// outcome recorded is success, not retry-exhausted.
#[tokio::test]
async fn rate_limited_send_retries_then_succeeds() {
    let clock = Arc::new(FakeClock::new(chrono::Utc::now()));
    let metrics = Arc::new(Aggregator::new());
    let sender = Arc::new(ScriptedSender::new(vec![Err(SendError::rate_limited(
        Some(std::time::Duration::from_millis(1)),
        429,
    ))]));
    let quotas = HashMap::from([(
        "general".to_string(),
        QuotaConfig {
            window_seconds: 3600,
            max_events: 10,
        },
    )]);
    let orchestrator = build_orchestrator(
        HashMap::from([("discord".to_string(), sender.clone() as Arc<dyn Sender>)]),
        clock.clone(),
        metrics.clone(),
        quotas,
        HashMap::new(),
    );

    let req = SendRequest::new(Platform::Discord, "general", "news", "headline");
    orchestrator.process(relaybot::core::types::Batch::open(req)).await;

    assert_eq!(sender.call_count(), 2);
    let snapshot = metrics.weekly_snapshot(clock.now(), "weekly_report");
    assert_eq!(snapshot.per_job.get("news").unwrap().sent, 1);
}

/// A sender that always returns a 5xx exhausts the retry budget (bounded
/// by `retry.max_attempts`) and is recorded as a failure, never a success.
#[tokio::test]
async fn persistent_server_errors_exhaust_retry_budget() {
    let clock = Arc::new(FakeClock::new(chrono::Utc::now()));
    let metrics = Arc::new(Aggregator::new());
    let sender = Arc::new(ScriptedSender::new(vec![
        Err(SendError::server_error(503)),
        Err(SendError::server_error(503)),
        Err(SendError::server_error(503)),
    ]));
    let quotas = HashMap::from([(
        "general".to_string(),
        QuotaConfig {
            window_seconds: 3600,
            max_events: 10,
        },
    )]);
    let tmp = tempfile::NamedTempFile::new().unwrap();
    let audit_log = Arc::new(StructuredLogSink::open(tmp.path().to_str()).unwrap());
    let orchestrator = build_orchestrator_with_audit(
        HashMap::from([("discord".to_string(), sender.clone() as Arc<dyn Sender>)]),
        clock.clone(),
        metrics.clone(),
        quotas,
        HashMap::new(),
        audit_log,
    );

    let req = SendRequest::new(Platform::Discord, "general", "weather", "storm warning");
    orchestrator.process(relaybot::core::types::Batch::open(req)).await;

    assert_eq!(sender.call_count(), 3); // bounded by default max_attempts
    let snapshot = metrics.weekly_snapshot(clock.now(), "weekly_report");
    let weather = snapshot.per_job.get("weather").unwrap();
    assert_eq!(weather.sent, 0);
    assert_eq!(weather.failed, 1);

    let contents = std::fs::read_to_string(tmp.path()).unwrap();
    let events: Vec<serde_json::Value> = contents
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    let failure = events
        .iter()
        .find(|e| e["event"] == "send_failure")
        .expect("send_failure event must be emitted on terminal failure");
    assert_eq!(failure["status"], "failure");
    assert_eq!(failure["retryable"], false);
    assert!(failure["kind"].is_string());
    assert!(
        events.iter().any(|e| e["event"] == "send_retry_exhausted"),
        "send_retry_exhausted must still be emitted for the exhausted-retries case"
    );
}

/// A request for a platform with no registered sender is a non-retryable
/// configuration failure; it never blocks or panics the batch.
#[tokio::test]
async fn missing_sender_for_platform_fails_without_panicking() {
    let clock = Arc::new(FakeClock::new(chrono::Utc::now()));
    let metrics = Arc::new(Aggregator::new());
    let quotas = HashMap::from([(
        "general".to_string(),
        QuotaConfig {
            window_seconds: 3600,
            max_events: 10,
        },
    )]);
    // no "misskey" sender registered
    let discord_sender = Arc::new(ScriptedSender::new(vec![]));
    let orchestrator = build_orchestrator(
        HashMap::from([("discord".to_string(), discord_sender as Arc<dyn Sender>)]),
        clock.clone(),
        metrics.clone(),
        quotas,
        HashMap::new(),
    );

    let req = SendRequest::new(Platform::Misskey, "general", "fortune", "your luck today");
    orchestrator.process(relaybot::core::types::Batch::open(req)).await;

    let snapshot = metrics.weekly_snapshot(clock.now(), "weekly_report");
    assert_eq!(snapshot.per_job.get("fortune").unwrap().failed, 1);
}

/// Cooldown blocks a second send for the same job within the window, then
/// permits it again once the window has elapsed — observed through the
/// orchestrator rather than `CooldownGate` directly.
#[tokio::test]
async fn cooldown_resume_through_orchestrator() {
    let clock = Arc::new(FakeClock::new(chrono::Utc::now()));
    let metrics = Arc::new(Aggregator::new());
    let sender = Arc::new(ScriptedSender::new(vec![]));
    let quotas = HashMap::from([(
        "general".to_string(),
        QuotaConfig {
            window_seconds: 3600,
            max_events: 10,
        },
    )]);
    let cooldowns = HashMap::from([(
        "weather".to_string(),
        CooldownConfig {
            base_window_seconds: 10,
            max_factor: 4.0,
            growth: 2.0,
        },
    )]);
    let orchestrator = build_orchestrator(
        HashMap::from([("discord".to_string(), sender.clone() as Arc<dyn Sender>)]),
        clock.clone(),
        metrics.clone(),
        quotas,
        cooldowns,
    );

    let req1 = SendRequest::new(Platform::Discord, "general", "weather", "sunny");
    orchestrator.process(relaybot::core::types::Batch::open(req1)).await;
    assert_eq!(sender.call_count(), 1);

    clock.advance(chrono::Duration::seconds(5));
    let req2 = SendRequest::new(Platform::Discord, "general", "weather", "still sunny");
    orchestrator.process(relaybot::core::types::Batch::open(req2)).await;
    assert_eq!(sender.call_count(), 1); // cooldown skip, sender untouched

    clock.advance(chrono::Duration::seconds(11));
    let req3 = SendRequest::new(Platform::Discord, "general", "weather", "now rainy");
    orchestrator.process(relaybot::core::types::Batch::open(req3)).await;
    assert_eq!(sender.call_count(), 2);
}

/// The weekly report reflects pipeline activity that already ran through
/// the orchestrator, and never references its own job in the rollup.
#[tokio::test]
async fn weekly_report_reflects_prior_pipeline_activity() {
    let clock = Arc::new(FakeClock::new(chrono::Utc::now()));
    let metrics = Arc::new(Aggregator::new());
    let sender = Arc::new(ScriptedSender::new(vec![]));
    let quotas = HashMap::from([(
        "general".to_string(),
        QuotaConfig {
            window_seconds: 3600,
            max_events: 10,
        },
    )]);
    let orchestrator = build_orchestrator(
        HashMap::from([("discord".to_string(), sender as Arc<dyn Sender>)]),
        clock.clone(),
        metrics.clone(),
        quotas,
        HashMap::new(),
    );

    for i in 0..3 {
        let req = SendRequest::new(Platform::Discord, "general", "fortune", format!("fortune {i}"));
        orchestrator.process(relaybot::core::types::Batch::open(req)).await;
    }

    let factory = relaybot::producers::weekly_report::WeeklyReportJobFactory::new(
        metrics.clone(),
        clock.clone() as Arc<dyn relaybot::core::clock::Clock>,
        Platform::Discord,
        "ops",
        "weekly_report",
    );
    let reqs = factory.produce().await.unwrap();
    assert_eq!(reqs.len(), 1);
    assert!(reqs[0].payload.contains("fortune"));
    assert!(!reqs[0].payload.contains("weekly_report:"));

    // the report job itself never appears in its own rollup
    let snapshot = metrics.weekly_snapshot(clock.now(), "weekly_report");
    assert!(snapshot.per_job.get("weekly_report").is_none());
}

/// Reloading an unchanged config is silent; reloading a changed one emits
/// exactly one `settings_reload` event restricted to the changed section.
#[test]
fn settings_reload_is_idempotent_across_repeated_applies() {
    use relaybot::config::reload;

    let previous = Config::default();
    let mut current = previous.clone();
    current.dedupe.capacity = 999;

    let sink = StructuredLogSink::disabled();
    assert!(reload::apply(&previous, &current, &sink));
    // re-applying the same target config a second time is a no-op
    assert!(!reload::apply(&current, &current, &sink));
    // and the untouched sections never show up in the diff
    let changed = reload::diff(&previous, &current);
    let obj = changed.as_object().unwrap();
    assert!(obj.contains_key("dedupe"));
    assert!(!obj.contains_key("scheduler"));
}
