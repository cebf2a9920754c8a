//! Near-duplicate Detector (C4): filters content-similar recent posts.
//!
//! Hand-rolled bounded map rather than the `lru` crate — matches the
//! teacher's preference for hand-rolled bounded state
//! (`tmush::trigger::rate_limit::TriggerRateLimiter`) over pulling in a
//! cache crate for a single-use structure.

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::RwLock;

/// Fingerprint a payload: lowercase, collapse whitespace, hash.
fn fingerprint(payload: &str) -> String {
    let normalized: String = payload
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    format!("{:x}", hasher.finalize())
}

struct Entry {
    inserted_at: DateTime<Utc>,
}

/// Bounded LRU-by-insertion dedupe table.
pub struct DedupeDetector {
    enabled: bool,
    capacity: usize,
    ttl: chrono::Duration,
    entries: RwLock<HashMap<String, Entry>>,
    /// Insertion order, oldest first; used for eviction when over capacity.
    order: RwLock<Vec<String>>,
}

impl DedupeDetector {
    pub fn new(enabled: bool, capacity: usize, ttl_seconds: i64) -> Self {
        Self {
            enabled,
            capacity: capacity.max(1),
            ttl: chrono::Duration::seconds(ttl_seconds),
            entries: RwLock::new(HashMap::new()),
            order: RwLock::new(Vec::new()),
        }
    }

    /// `true` if the payload may be sent (fresh or TTL-expired); `false` if
    /// it's a live duplicate. Always inserts/refreshes on the permitted path.
    pub fn check_and_insert(&self, payload: &str, now: DateTime<Utc>) -> bool {
        if !self.enabled {
            return true;
        }
        let fp = fingerprint(payload);

        {
            let entries = self.entries.read().unwrap();
            if let Some(entry) = entries.get(&fp) {
                if now.signed_duration_since(entry.inserted_at) < self.ttl {
                    return false;
                }
            }
        }

        let mut entries = self.entries.write().unwrap();
        let mut order = self.order.write().unwrap();
        if !entries.contains_key(&fp) {
            order.push(fp.clone());
        }
        entries.insert(fp, Entry { inserted_at: now });

        while entries.len() > self.capacity {
            if order.is_empty() {
                break;
            }
            let oldest = order.remove(0);
            entries.remove(&oldest);
        }

        true
    }
}
