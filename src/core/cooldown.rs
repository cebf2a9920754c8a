//! Cooldown Gate (C3): per-job minimum interval between successful sends.
//!
//! Grounded in `TriggerRateLimiter`'s per-key `RwLock<HashMap<..>>` entry
//! pattern, generalized from a fixed player-cooldown constant to a
//! per-job adaptive window.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::RwLock;

/// Per-job cooldown bookkeeping (spec.md §3 `CooldownState`).
#[derive(Debug, Clone)]
struct CooldownState {
    last_success_at: DateTime<Utc>,
    adaptive_factor: f64,
}

/// Static configuration for one job's cooldown, mirrors
/// `cooldown.jobs.<name>` in config.
#[derive(Debug, Clone, Copy)]
pub struct CooldownConfig {
    pub base_window_seconds: i64,
    pub max_factor: f64,
    pub growth: f64,
}

impl Default for CooldownConfig {
    fn default() -> Self {
        Self {
            base_window_seconds: 300,
            max_factor: 4.0,
            growth: 1.5,
        }
    }
}

/// Gate instance. One per process; holds state for every configured job.
pub struct CooldownGate {
    enabled: bool,
    configs: HashMap<String, CooldownConfig>,
    default_config: CooldownConfig,
    state: RwLock<HashMap<String, CooldownState>>,
}

impl CooldownGate {
    pub fn new(enabled: bool, configs: HashMap<String, CooldownConfig>) -> Self {
        Self {
            enabled,
            configs,
            default_config: CooldownConfig::default(),
            state: RwLock::new(HashMap::new()),
        }
    }

    fn config_for(&self, job: &str) -> CooldownConfig {
        self.configs.get(job).copied().unwrap_or(self.default_config)
    }

    /// `true` if the job may send now; `false` means a cooldown skip.
    ///
    /// Pass-through when the gate is disabled entirely.
    pub fn check(&self, job: &str, now: DateTime<Utc>) -> bool {
        if !self.enabled {
            return true;
        }
        let state = self.state.read().unwrap();
        match state.get(job) {
            None => true,
            Some(entry) => {
                let cfg = self.config_for(job);
                let window =
                    chrono::Duration::milliseconds(
                        (cfg.base_window_seconds as f64 * 1000.0 * entry.adaptive_factor) as i64,
                    );
                now.signed_duration_since(entry.last_success_at) >= window
            }
        }
    }

    /// Record a successful send, updating the adaptive factor.
    ///
    /// If the interval since the previous success was shorter than the base
    /// window, the factor grows (repeated rapid emits stretch the cooldown);
    /// otherwise it decays toward 1.0 at a rate of one `growth`-inverse step
    /// per elapsed base window.
    pub fn record_success(&self, job: &str, now: DateTime<Utc>) {
        if !self.enabled {
            return;
        }
        let cfg = self.config_for(job);
        let mut state = self.state.write().unwrap();
        let entry = state.entry(job.to_string()).or_insert(CooldownState {
            last_success_at: now,
            adaptive_factor: 1.0,
        });

        let elapsed = now.signed_duration_since(entry.last_success_at);
        let base_window = chrono::Duration::seconds(cfg.base_window_seconds);

        if elapsed < base_window {
            entry.adaptive_factor = (entry.adaptive_factor * cfg.growth).min(cfg.max_factor);
        } else {
            let steps = (elapsed.num_seconds() / cfg.base_window_seconds.max(1)) as f64;
            entry.adaptive_factor = (entry.adaptive_factor - steps).max(1.0);
        }

        entry.last_success_at = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gate() -> CooldownGate {
        let mut configs = HashMap::new();
        configs.insert(
            "weather".to_string(),
            CooldownConfig {
                base_window_seconds: 10,
                max_factor: 4.0,
                growth: 2.0,
            },
        );
        CooldownGate::new(true, configs)
    }

    #[test]
    fn first_send_is_always_permitted() {
        let g = gate();
        assert!(g.check("weather", Utc::now()));
    }

    #[test]
    fn cooldown_resume_scenario() {
        let g = gate();
        let t0 = Utc::now();
        assert!(g.check("weather", t0));
        g.record_success("weather", t0);

        let t5 = t0 + chrono::Duration::seconds(5);
        assert!(!g.check("weather", t5));

        let t11 = t0 + chrono::Duration::seconds(11);
        assert!(g.check("weather", t11));
    }

    #[test]
    fn disabled_gate_always_permits() {
        let g = CooldownGate::new(false, HashMap::new());
        let t0 = Utc::now();
        g.record_success("weather", t0);
        assert!(g.check("weather", t0));
    }

    #[test]
    fn adaptive_factor_grows_on_rapid_repeats() {
        let g = gate();
        let t0 = Utc::now();
        g.record_success("weather", t0);
        // second success arrives inside the base window: factor should grow
        let t3 = t0 + chrono::Duration::seconds(3);
        g.record_success("weather", t3);
        // window is now base*factor = 10*2 = 20s, so t3+15s should still deny
        assert!(!g.check("weather", t3 + chrono::Duration::seconds(15)));
    }
}
