//! The send-control core: Scheduler → CoalesceQueue → gates → Orchestrator.
//!
//! Everything here is platform- and content-agnostic; `adapters` and
//! `producers` are the only modules that know about Discord, Misskey, or
//! what a weather report looks like.

pub mod clock;
pub mod coalesce;
pub mod cooldown;
pub mod dedupe;
pub mod orchestrator;
pub mod permit;
pub mod retry;
pub mod scheduler;
pub mod types;
