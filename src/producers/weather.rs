//! Weather job factory: fetches current conditions from OpenWeatherMap and
//! turns them into one [`SendRequest`] per fire.
//!
//! Kept the teacher's `WeatherService` caching/timeout/retry shape almost
//! verbatim; only the config type and the public entry point changed, since
//! it now produces a [`SendRequest`] instead of returning a bot-command
//! reply string directly.

use crate::config::WeatherSection;
use crate::core::scheduler::JobFactory;
use crate::core::types::{Platform, SendRequest};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use log::{debug, warn};
use serde::Deserialize;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tokio::time::timeout;

#[derive(Debug, Deserialize)]
pub struct WeatherResponse {
    pub name: String,
    pub sys: WeatherSys,
    pub main: WeatherMain,
    pub weather: Vec<WeatherCondition>,
}

#[derive(Debug, Deserialize)]
pub struct WeatherSys {
    pub country: String,
}

#[derive(Debug, Deserialize)]
pub struct WeatherMain {
    pub temp: f64,
}

#[derive(Debug, Deserialize)]
pub struct WeatherCondition {
    pub description: String,
}

#[derive(Debug, Clone)]
struct WeatherCacheEntry {
    fetched_at: Instant,
    data: String,
}

struct WeatherService {
    config: WeatherSection,
    cache: Option<WeatherCacheEntry>,
    client: reqwest::Client,
}

impl WeatherService {
    fn new(config: WeatherSection) -> Self {
        Self {
            config,
            cache: None,
            client: reqwest::Client::new(),
        }
    }

    async fn fetch_current_weather(&mut self) -> Option<String> {
        if !self.config.enabled {
            debug!("weather producer is disabled");
            return None;
        }
        if self.config.api_key.is_empty() {
            warn!("weather producer missing api_key, skipping this fire");
            return None;
        }

        if let Some(ref cache) = self.cache {
            let age = cache.fetched_at.elapsed();
            let ttl = Duration::from_secs(self.config.cache_ttl_minutes as u64 * 60);
            if age < ttl {
                debug!("returning cached weather (age: {:.1}min)", age.as_secs_f64() / 60.0);
                return Some(cache.data.clone());
            }
        }

        match self.fetch_from_api().await {
            Ok(response) => {
                let formatted = self.format_weather_response(&response);
                self.cache = Some(WeatherCacheEntry {
                    fetched_at: Instant::now(),
                    data: formatted.clone(),
                });
                Some(formatted)
            }
            Err(e) => {
                warn!("failed to fetch weather: {e}");
                self.cache.as_ref().map(|c| format!("{} (cached)", c.data))
            }
        }
    }

    async fn fetch_from_api(&self) -> Result<WeatherResponse> {
        let url = self.build_api_url()?;
        let request = self.client.get(&url);
        let timeout_duration = Duration::from_secs(self.config.timeout_seconds as u64);

        let response = timeout(timeout_duration, request.send())
            .await
            .map_err(|_| anyhow!("request timeout after {}s", self.config.timeout_seconds))?
            .map_err(|e| anyhow!("http request failed: {e}"))?;

        if !response.status().is_success() {
            return Err(anyhow!("api returned status: {}", response.status()));
        }

        response
            .json()
            .await
            .map_err(|e| anyhow!("failed to parse json response: {e}"))
    }

    fn build_api_url(&self) -> Result<String> {
        let base_url = "https://api.openweathermap.org/data/2.5/weather";
        let api_key = &self.config.api_key;
        let location = &self.config.default_location;

        let query = if let Some(country) = &self.config.country_code {
            format!("{location},{country}")
        } else {
            location.clone()
        };

        match self.config.location_type.as_str() {
            "city" => Ok(format!(
                "{base_url}?q={}&appid={api_key}&units=imperial",
                urlencoding::encode(&query)
            )),
            "zipcode" => Ok(format!(
                "{base_url}?zip={}&appid={api_key}&units=imperial",
                urlencoding::encode(&query)
            )),
            "city_id" => Ok(format!("{base_url}?id={location}&appid={api_key}&units=imperial")),
            other => Err(anyhow!("invalid location_type: {other}")),
        }
    }

    fn format_weather_response(&self, response: &WeatherResponse) -> String {
        let location = format!("{}, {}", response.name, response.sys.country);
        let temp = format!("{:.0}°F", response.main.temp);
        let condition = &response.weather[0].description;
        let formatted_condition = condition
            .split_whitespace()
            .map(|word| {
                let mut chars = word.chars();
                match chars.next() {
                    None => String::new(),
                    Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                }
            })
            .collect::<Vec<_>>()
            .join(" ");
        format!("Weather: {location}: {formatted_condition} {temp}")
    }
}

/// [`JobFactory`] wrapper that fires `job_name` to `(platform, channel)` on
/// every call to `produce`. Wraps the service in a `Mutex` since `JobFactory`
/// requires `Sync` but the cache needs `&mut self` to refresh.
pub struct WeatherJobFactory {
    service: Mutex<WeatherService>,
    platform: Platform,
    channel: String,
    job_name: String,
}

impl WeatherJobFactory {
    pub fn new(config: WeatherSection, platform: Platform, channel: impl Into<String>, job_name: impl Into<String>) -> Self {
        Self {
            service: Mutex::new(WeatherService::new(config)),
            platform,
            channel: channel.into(),
            job_name: job_name.into(),
        }
    }
}

#[async_trait]
impl JobFactory for WeatherJobFactory {
    async fn produce(&self) -> Result<Vec<SendRequest>> {
        let report = {
            let mut service = self.service.lock().unwrap();
            service.fetch_current_weather().await
        };
        Ok(match report {
            Some(text) => vec![SendRequest::new(self.platform, self.channel.clone(), self.job_name.clone(), text)],
            None => Vec::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_api_url_rejects_unknown_location_type() {
        let config = WeatherSection {
            location_type: "planet".to_string(),
            ..WeatherSection::default()
        };
        let service = WeatherService::new(config);
        assert!(service.build_api_url().is_err());
    }

    #[test]
    fn build_api_url_formats_city_query() {
        let config = WeatherSection {
            enabled: true,
            api_key: "key".to_string(),
            default_location: "Seattle".to_string(),
            location_type: "city".to_string(),
            country_code: Some("US".to_string()),
            ..WeatherSection::default()
        };
        let service = WeatherService::new(config);
        let url = service.build_api_url().unwrap();
        assert!(url.contains("Seattle%2CUS"));
    }

    #[tokio::test]
    async fn disabled_service_produces_nothing() {
        let factory = WeatherJobFactory::new(
            WeatherSection::default(),
            Platform::Discord,
            "general",
            "weather",
        );
        let reqs = factory.produce().await.unwrap();
        assert!(reqs.is_empty());
    }
}
