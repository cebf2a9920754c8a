//! Resolves `providers.*` config strings into live [`JobFactory`]
//! instances.
//!
//! There is no reflection in Rust, so a `module:attr` string is not
//! literally dereferenced — it is matched against the fixed set of
//! producers this crate ships, the same way the teacher wired its game
//! modules up by name in `bbs::game_registry` rather than loading them
//! dynamically. An unrecognized reference is a fatal startup error
//! (spec.md §9: "unknown references fail startup").

use crate::config::Config;
use crate::core::clock::Clock;
use crate::core::scheduler::JobFactory;
use crate::core::types::Platform;
use crate::metrics::Aggregator;
use crate::producers::dm_digest::{DmDigestJobFactory, DmSource, InMemoryDmSource};
use crate::producers::fortune::FortuneJobFactory;
use crate::producers::news::NewsJobFactory;
use crate::producers::omikuji::OmikujiJobFactory;
use crate::producers::weather::WeatherJobFactory;
use crate::producers::weekly_report::WeeklyReportJobFactory;
use anyhow::{anyhow, Result};
use std::collections::HashMap;
use std::sync::Arc;

/// Builds one [`JobFactory`] per `providers.*` entry, keyed by job name.
pub fn build(
    config: &Config,
    metrics: Arc<Aggregator>,
    clock: Arc<dyn Clock>,
    dm_source: Arc<dyn DmSource>,
) -> Result<HashMap<String, Arc<dyn JobFactory>>> {
    let mut factories: HashMap<String, Arc<dyn JobFactory>> = HashMap::new();

    for (job_name, reference) in &config.providers {
        let job_section = config
            .jobs
            .get(job_name)
            .ok_or_else(|| anyhow!("providers.{job_name} has no matching jobs.{job_name} entry"))?;
        let platform = Platform::parse(&job_section.platform)
            .ok_or_else(|| anyhow!("jobs.{job_name}.platform '{}' is not a known platform", job_section.platform))?;
        let channel = job_section.destination_override.clone().unwrap_or_else(|| job_section.channel.clone());

        let factory: Arc<dyn JobFactory> = match reference.as_str() {
            "producers.weather:produce" => Arc::new(WeatherJobFactory::new(config.weather.clone(), platform, channel, job_name.clone())),
            "producers.news:produce" => Arc::new(NewsJobFactory::new(config.news.clone(), platform, channel, job_name.clone())),
            "producers.fortune:produce" => Arc::new(FortuneJobFactory::new(platform, channel, job_name.clone())),
            "producers.omikuji:produce" => Arc::new(OmikujiJobFactory::new(platform, channel, job_name.clone())),
            "producers.dm_digest:produce" => Arc::new(DmDigestJobFactory::new(dm_source.clone(), platform, channel, job_name.clone())),
            "producers.weekly_report:produce" => Arc::new(WeeklyReportJobFactory::new(metrics.clone(), clock.clone(), platform, channel, job_name.clone())),
            other => return Err(anyhow!("providers.{job_name} references unknown producer '{other}'")),
        };

        factories.insert(job_name.clone(), factory);
    }

    Ok(factories)
}

/// Convenience constructor for the default in-memory DM source; callers
/// that have a real DM-tracking adapter substitute their own [`DmSource`].
pub fn default_dm_source() -> Arc<dyn DmSource> {
    Arc::new(InMemoryDmSource::new())
}
