//! Weekly report job factory: renders [`Aggregator::weekly_snapshot`] as a
//! plain-text operational report. The core hands this producer the same
//! snapshot object any dashboard could consume; rendering it to text is
//! this module's only job (spec.md §6: "the core supplies the snapshot
//! object").

use crate::core::clock::Clock;
use crate::core::scheduler::JobFactory;
use crate::core::types::{Platform, SendRequest};
use crate::metrics::{Aggregator, WeeklySnapshot};
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

pub struct WeeklyReportJobFactory {
    metrics: Arc<Aggregator>,
    clock: Arc<dyn Clock>,
    platform: Platform,
    channel: String,
    job_name: String,
}

impl WeeklyReportJobFactory {
    pub fn new(
        metrics: Arc<Aggregator>,
        clock: Arc<dyn Clock>,
        platform: Platform,
        channel: impl Into<String>,
        job_name: impl Into<String>,
    ) -> Self {
        Self {
            metrics,
            clock,
            platform,
            channel: channel.into(),
            job_name: job_name.into(),
        }
    }
}

/// Render a [`WeeklySnapshot`] as a fixed-width plain-text report.
pub fn render(snapshot: &WeeklySnapshot) -> String {
    let mut out = format!(
        "Weekly report {} -> {}\n",
        snapshot.window_start.format("%Y-%m-%d"),
        snapshot.window_end.format("%Y-%m-%d")
    );

    let mut jobs: Vec<_> = snapshot.per_job.keys().collect();
    jobs.sort();
    for job in jobs {
        let rollup = &snapshot.per_job[job];
        out.push_str(&format!(
            "- {job}: sent={} denied={} failed={} success_rate={:.1}%",
            rollup.sent,
            rollup.denied,
            rollup.failed,
            rollup.success_rate * 100.0
        ));
        if let Some(p50) = rollup.latency_p50 {
            out.push_str(&format!(" p50={p50:.2}s"));
        }
        if let Some(p95) = rollup.latency_p95 {
            out.push_str(&format!(" p95={p95:.2}s"));
        }
        out.push('\n');
    }

    if !snapshot.permit_denial_reasons.is_empty() {
        out.push_str("permit denials:\n");
        let mut reasons: Vec<_> = snapshot.permit_denial_reasons.iter().collect();
        reasons.sort_by_key(|(reason, _)| reason.to_string());
        for (reason, count) in reasons {
            out.push_str(&format!("- {reason}: {count}\n"));
        }
    }

    out.trim_end().to_string()
}

#[async_trait]
impl JobFactory for WeeklyReportJobFactory {
    async fn produce(&self) -> Result<Vec<SendRequest>> {
        let now = self.clock.now();
        let snapshot = self.metrics.weekly_snapshot(now, &self.job_name);
        let text = render(&snapshot);
        Ok(vec![SendRequest::new(self.platform, self.channel.clone(), self.job_name.clone(), text)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::Outcome;
    use chrono::Utc;

    #[test]
    fn render_includes_job_rollups_and_denial_reasons() {
        let aggregator = Aggregator::new();
        let now = Utc::now();
        aggregator.record("weather", Outcome::Success, Some(0.5), None, now);
        aggregator.record("weather", Outcome::PermitDenied, None, Some("quota_exceeded"), now);

        let snapshot = aggregator.weekly_snapshot(now, "weekly_report");
        let text = render(&snapshot);
        assert!(text.contains("weather"));
        assert!(text.contains("quota_exceeded"));
    }

    #[tokio::test]
    async fn factory_produces_one_report_request() {
        let aggregator = Arc::new(Aggregator::new());
        let clock = Arc::new(crate::core::clock::SystemClock);
        let factory = WeeklyReportJobFactory::new(
            aggregator,
            clock,
            Platform::Discord,
            "ops",
            "weekly_report",
        );
        let reqs = factory.produce().await.unwrap();
        assert_eq!(reqs.len(), 1);
        assert!(reqs[0].payload.starts_with("Weekly report"));
    }
}
