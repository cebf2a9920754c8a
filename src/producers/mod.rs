//! Content producers: thin [`crate::core::scheduler::JobFactory`]
//! implementations for weather, news, fortune, omikuji, DM digests, and the
//! weekly operational report.
//!
//! The core never imports these directly; `registry::build` is the one
//! place that turns a `providers.*` config string into a live factory,
//! mirroring the feature-gated module registration the teacher used for
//! its game modules.

pub mod dm_digest;
pub mod fortune;
pub mod news;
pub mod omikuji;
pub mod registry;
pub mod weather;
pub mod weekly_report;
