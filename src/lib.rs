//! # relaybot - send-control core for an autonomous posting bot
//!
//! relaybot sits between thin content producers (weather, news, fortunes,
//! DM digests, weekly operational reports) and chat-platform adapters
//! (Discord, Misskey), and owns everything about *when* and *whether* a
//! message actually goes out: wall-clock scheduling with jitter, batching,
//! per-channel rate limiting, per-job cooldowns, near-duplicate
//! suppression, and retry with backoff.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use relaybot::config::Config;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.toml").await?;
//!     println!("scheduler timezone: {}", config.scheduler.timezone);
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! - [`core`] - Scheduler, CoalesceQueue, gates, and the Orchestrator that
//!   ties them together; platform- and content-agnostic.
//! - [`adapters`] - the `Sender` trait and the Discord/Misskey transports.
//! - [`producers`] - job factories that turn a fire into zero or more
//!   `SendRequest`s.
//! - [`config`] - configuration loading, validation, and hot reload.
//! - [`metrics`] - per-job counters, latency percentiles, and the weekly
//!   rollup snapshot.
//! - [`logutil`] - structured (ndjson) audit logging and log-string
//!   escaping helpers.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐   produce()   ┌────────────────┐   push()   ┌──────────────┐
//! │ Scheduler │ ────────────► │ content producer│ ─────────► │ CoalesceQueue│
//! └───────────┘                └────────────────┘            └──────────────┘
//!                                                                    │ pop_ready()
//!                                                                    ▼
//!                              ┌──────────────────────────────────────────┐
//!                              │ Orchestrator: cooldown → dedupe → permit  │
//!                              │   → sender.send() (with retry) → metrics  │
//!                              └──────────────────────────────────────────┘
//! ```

pub mod adapters;
pub mod config;
pub mod core;
pub mod logutil;
pub mod metrics;
pub mod producers;
