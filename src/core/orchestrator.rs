//! Orchestrator Processor (C9): ties the gates together, dispatches to
//! platform adapters, records structured audit logs, and notifies Metrics.
//!
//! New module — no single teacher file ties this many collaborators
//! together, but the call-sequence-owns-the-locks shape and the
//! log-then-continue error handling follow `bbs::dispatch`'s dispatch loop
//! and `init_logging`'s "never let a log failure interrupt the caller"
//! posture.

use crate::adapters::Sender;
use crate::core::clock::Clock;
use crate::core::coalesce::CoalesceQueue;
use crate::core::cooldown::CooldownGate;
use crate::core::dedupe::DedupeDetector;
use crate::core::permit::PermitGate;
use crate::core::retry::{RetryDecision, RetryPolicy};
use crate::core::types::{Batch, PermitDecision, PermitReason};
use crate::logutil::{escape_log, StructuredLogSink};
use crate::metrics::{Aggregator, Outcome};
use log::{info, warn};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;

pub struct Orchestrator {
    cooldown: CooldownGate,
    dedupe: DedupeDetector,
    permit: PermitGate,
    retry: RetryPolicy,
    metrics: Arc<Aggregator>,
    clock: Arc<dyn Clock>,
    /// One [`Sender`] per platform, keyed by [`crate::core::types::Platform::as_str`].
    /// A request whose platform has no registered sender is treated as a
    /// non-retryable configuration error.
    senders: HashMap<String, Arc<dyn Sender>>,
    audit_log: Arc<StructuredLogSink>,
}

impl Orchestrator {
    pub fn new(
        cooldown: CooldownGate,
        dedupe: DedupeDetector,
        permit: PermitGate,
        retry: RetryPolicy,
        metrics: Arc<Aggregator>,
        clock: Arc<dyn Clock>,
        senders: HashMap<String, Arc<dyn Sender>>,
        audit_log: Arc<StructuredLogSink>,
    ) -> Self {
        Self {
            cooldown,
            dedupe,
            permit,
            retry,
            metrics,
            clock,
            senders,
            audit_log,
        }
    }

    fn audit(&self, event: &str, job: &str, platform: &str, channel: &str, correlation_id: &str, status: &str, extra: serde_json::Value) {
        let mut line = json!({
            "event": event,
            "job": job,
            "platform": platform,
            "channel": channel,
            "correlation_id": correlation_id,
            "status": status,
        });
        if let (Some(obj), Some(extra_obj)) = (line.as_object_mut(), extra.as_object()) {
            for (k, v) in extra_obj {
                obj.insert(k.clone(), v.clone());
            }
        }
        self.audit_log.write_line(&line.to_string());
    }

    /// Process one closed batch: walks its payloads in insertion order,
    /// applying Cooldown → Dedupe → Permit → Sender (with Retry) to each,
    /// never halting the batch on an individual failure.
    pub async fn process(&self, batch: Batch) {
        for req in batch.payloads {
            let now = self.clock.now();
            let correlation_id = req.correlation_id.to_string();
            let platform = req.platform.as_str();

            if !self.cooldown.check(&req.job, now) {
                self.metrics
                    .record(&req.job, Outcome::CooldownSkip, None, None, now);
                self.audit(
                    "send_cooldown_skip",
                    &req.job,
                    platform,
                    &req.channel,
                    &correlation_id,
                    "cooldown_skip",
                    json!({}),
                );
                continue;
            }

            if !self.dedupe.check_and_insert(&req.payload, now) {
                self.metrics
                    .record(&req.job, Outcome::DuplicateSkip, None, None, now);
                self.audit(
                    "send_duplicate_skip",
                    &req.job,
                    platform,
                    &req.channel,
                    &correlation_id,
                    "duplicate",
                    json!({"retryable": false}),
                );
                continue;
            }

            let decision = self.permit.admit(&req.channel, now);
            if !decision.granted {
                self.metrics.record(
                    &req.job,
                    Outcome::PermitDenied,
                    None,
                    Some(decision.reason.as_str()),
                    now,
                );
                let denied_job = format!(
                    "{}{}",
                    req.job,
                    decision.suggested_job_suffix.unwrap_or("")
                );
                let extra = json!({
                    "reason": decision.reason.as_str(),
                    "retryable": decision.retryable,
                });
                // Emitted twice for parity (see spec.md's open question on
                // `permit_denied` vs `<job>_permit_denied`) until consumers
                // are confirmed migrated onto one name.
                self.audit(
                    "permit_denied",
                    &req.job,
                    platform,
                    &req.channel,
                    &correlation_id,
                    "permit_denied",
                    extra.clone(),
                );
                self.audit(
                    &format!("{}_permit_denied", denied_job),
                    &denied_job,
                    platform,
                    &req.channel,
                    &correlation_id,
                    "permit_denied",
                    extra,
                );
                continue;
            }

            let Some(sender) = self.senders.get(platform) else {
                warn!(
                    "no sender registered for platform {platform}, dropping send for job={}",
                    escape_log(&req.job)
                );
                let decision = PermitDecision::denied(PermitReason::ConfigurationMissing, false);
                self.metrics.record(
                    &req.job,
                    Outcome::RetryExhausted,
                    None,
                    Some(decision.reason.as_str()),
                    now,
                );
                self.audit(
                    "send_failure",
                    &req.job,
                    platform,
                    &req.channel,
                    &correlation_id,
                    "failure",
                    json!({"kind": decision.reason.as_str(), "retryable": decision.retryable}),
                );
                continue;
            };

            let dispatch_started = self.clock.now();
            let mut attempt = 0u32;
            loop {
                attempt += 1;
                match sender.send(&req.channel, &req.payload).await {
                    Ok(()) => {
                        let completed = self.clock.now();
                        let latency_seconds = (completed - dispatch_started)
                            .num_milliseconds()
                            .max(0) as f64
                            / 1000.0;
                        self.permit.observe_success(&req.channel, completed);
                        self.cooldown.record_success(&req.job, completed);
                        self.metrics.record(
                            &req.job,
                            Outcome::Success,
                            Some(latency_seconds),
                            None,
                            completed,
                        );
                        self.audit(
                            "send_success",
                            &req.job,
                            platform,
                            &req.channel,
                            &correlation_id,
                            "success",
                            json!({"send.duration": latency_seconds}),
                        );
                        break;
                    }
                    Err(err) => match self.retry.decide(attempt, &err) {
                        RetryDecision::RetryAfter(wait) => {
                            warn!(
                                "retrying send for job={} channel={} attempt={} after {:?}",
                                escape_log(&req.job),
                                escape_log(&req.channel),
                                attempt,
                                wait
                            );
                            tokio::time::sleep(wait).await;
                            continue;
                        }
                        RetryDecision::GiveUp => {
                            let now = self.clock.now();
                            self.metrics.record(
                                &req.job,
                                Outcome::RetryExhausted,
                                None,
                                None,
                                now,
                            );
                            let kind = format!("{:?}", err.kind);
                            self.audit(
                                "send_failure",
                                &req.job,
                                platform,
                                &req.channel,
                                &correlation_id,
                                "failure",
                                json!({"kind": kind, "retryable": false}),
                            );
                            self.audit(
                                "send_retry_exhausted",
                                &req.job,
                                platform,
                                &req.channel,
                                &correlation_id,
                                "failure",
                                json!({"kind": format!("{:?}", err.kind), "retryable": false, "attempts": attempt}),
                            );
                            info!(
                                "send exhausted retries for job={} channel={}",
                                escape_log(&req.job),
                                escape_log(&req.channel)
                            );
                            break;
                        }
                    },
                }
            }
        }
    }

    /// Drain every ready batch from the queue and process each in turn.
    /// Called by the Scheduler's dispatch loop.
    pub async fn drain_ready(&self, queue: &CoalesceQueue) {
        for batch in queue.pop_ready(std::time::Instant::now()) {
            self.process(batch).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::clock::FakeClock;
    use crate::core::cooldown::CooldownConfig;
    use crate::core::permit::QuotaConfig;
    use crate::core::retry::{RetryConfig, SendError};
    use crate::core::types::{Platform, SendRequest};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;

    struct FakeSender {
        responses: StdMutex<Vec<Result<(), SendError>>>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Sender for FakeSender {
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
        sender: Arc<FakeSender>,
        clock: Arc<FakeClock>,
        cooldown_enabled: bool,
    ) -> Orchestrator {
        let mut quotas = HashMap::new();
        quotas.insert(
            "general".to_string(),
            QuotaConfig {
                window_seconds: 60,
                max_events: 100,
            },
        );
        Orchestrator::new(
            CooldownGate::new(cooldown_enabled, HashMap::from([(
                "weather".to_string(),
                CooldownConfig {
                    base_window_seconds: 1,
                    max_factor: 2.0,
                    growth: 1.5,
                },
            )])),
            DedupeDetector::new(true, 100, 60),
            PermitGate::new(quotas),
            RetryPolicy::new(RetryConfig::default()),
            Arc::new(Aggregator::new()),
            clock,
            HashMap::from([("discord".to_string(), sender as Arc<dyn Sender>)]),
            Arc::new(StructuredLogSink::disabled()),
        )
    }

    #[tokio::test]
    async fn successful_send_records_metrics_and_advances_cooldown() {
        let clock = Arc::new(FakeClock::new(chrono::Utc::now()));
        let sender = Arc::new(FakeSender {
            responses: StdMutex::new(vec![]),
            calls: AtomicUsize::new(0),
        });
        let orchestrator = build_orchestrator(sender.clone(), clock.clone(), true);

        let req = SendRequest::new(Platform::Discord, "general", "weather", "hello world");
        let batch = crate::core::types::Batch::open(req);
        orchestrator.process(batch).await;

        assert_eq!(sender.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retry_on_429_then_success() {
        let clock = Arc::new(FakeClock::new(chrono::Utc::now()));
        let sender = Arc::new(FakeSender {
            responses: StdMutex::new(vec![Err(SendError::rate_limited(
                Some(std::time::Duration::from_millis(5)),
                429,
            ))]),
            calls: AtomicUsize::new(0),
        });
        let orchestrator = build_orchestrator(sender.clone(), clock.clone(), true);

        let req = SendRequest::new(Platform::Discord, "general", "weather", "hi");
        let batch = crate::core::types::Batch::open(req);
        orchestrator.process(batch).await;

        assert_eq!(sender.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn duplicate_payload_is_skipped_without_consuming_quota() {
        let clock = Arc::new(FakeClock::new(chrono::Utc::now()));
        let sender = Arc::new(FakeSender {
            responses: StdMutex::new(vec![]),
            calls: AtomicUsize::new(0),
        });
        let orchestrator = build_orchestrator(sender.clone(), clock.clone(), false);

        let req1 = SendRequest::new(Platform::Discord, "general", "weather", "hello");
        let req2 = SendRequest::new(Platform::Discord, "general", "weather", "hello");
        let mut batch = crate::core::types::Batch::open(req1);
        batch.payloads.push(req2);
        orchestrator.process(batch).await;

        // only the first payload reached the sender
        assert_eq!(sender.calls.load(Ordering::SeqCst), 1);
    }
}
