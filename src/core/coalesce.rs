//! Coalesce Queue (C6): time-window batching per (platform, channel, job).
//!
//! Grounded in the old `bbs::dispatch::start_scheduler` queue-with-
//! overflow-drop design, generalized from one global `Vec` queue to
//! one open [`Batch`] per routing key, with the scheduler polling
//! [`CoalesceQueue::pop_ready`] instead of draining a single shared list.

use crate::core::types::{Batch, BatchKey, SendRequest};
use std::cmp::Reverse;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

pub struct CoalesceConfig {
    pub window: Duration,
    pub threshold: usize,
}

impl Default for CoalesceConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(5),
            threshold: 10,
        }
    }
}

/// Per-key open-batch state, guarded by a single mutex (teacher precedent:
/// the dispatcher's single `Vec<MessageEnvelope>` under one task's
/// ownership — here behind a short-held lock so multiple producer tasks can
/// push concurrently).
pub struct CoalesceQueue {
    config: CoalesceConfig,
    open: Mutex<HashMap<BatchKey, Batch>>,
    ready: Mutex<Vec<Batch>>,
    /// monotonically increasing counter used to break ties for stable
    /// ordering of ready batches inserted in the same instant.
    insertion_seq: Mutex<u64>,
}

impl CoalesceQueue {
    pub fn new(config: CoalesceConfig) -> Self {
        Self {
            config,
            open: Mutex::new(HashMap::new()),
            ready: Mutex::new(Vec::new()),
            insertion_seq: Mutex::new(0),
        }
    }

    /// Push one request into its key's open batch, opening a new one if
    /// needed. Closes the batch to the ready list immediately when the
    /// threshold count is reached or the incoming priority differs from the
    /// batch already open for this key.
    pub fn push(&self, req: SendRequest) {
        let key = req.key();
        let mut open = self.open.lock().unwrap();

        let should_cut = open
            .get(&key)
            .map(|batch| batch.priority != req.priority)
            .unwrap_or(false);

        if should_cut {
            if let Some(batch) = open.remove(&key) {
                self.close_to_ready(batch);
            }
        }

        match open.remove(&key) {
            Some(mut batch) => {
                batch.payloads.push(req);
                if batch.len() >= self.config.threshold {
                    self.close_to_ready(batch);
                } else {
                    open.insert(key, batch);
                }
            }
            None => {
                let batch = Batch::open(req);
                if batch.len() >= self.config.threshold {
                    self.close_to_ready(batch);
                } else {
                    open.insert(key, batch);
                }
            }
        }
    }

    fn close_to_ready(&self, batch: Batch) {
        if batch.is_empty() {
            return;
        }
        self.ready.lock().unwrap().push(batch);
    }

    /// Close any batch whose window has elapsed, and return all ready
    /// batches (both previously closed and newly closed here) sorted by
    /// `(priority desc, opened_at asc)`. The sort is stable: ties preserve
    /// original ready-list insertion order.
    pub fn pop_ready(&self, now: Instant) -> Vec<Batch> {
        {
            let mut open = self.open.lock().unwrap();
            let expired_keys: Vec<BatchKey> = open
                .iter()
                .filter(|(_, batch)| now.duration_since(batch.opened_at) >= self.config.window)
                .map(|(k, _)| k.clone())
                .collect();
            for key in expired_keys {
                if let Some(batch) = open.remove(&key) {
                    self.close_to_ready(batch);
                }
            }
        }

        let mut ready = self.ready.lock().unwrap();
        let mut drained: Vec<Batch> = ready.drain(..).collect();
        drained.sort_by_key(|b| (Reverse(b.priority), b.opened_at));
        drained
    }

    /// Number of currently open (not yet ready) batches; for status/tests.
    pub fn open_len(&self) -> usize {
        self.open.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{Platform, Priority};

    fn req(job: &str, priority: Priority) -> SendRequest {
        SendRequest::new(Platform::Discord, "general", job, "payload").with_priority(priority)
    }

    #[test]
    fn single_payload_batch_is_permitted() {
        let q = CoalesceQueue::new(CoalesceConfig {
            window: Duration::from_millis(10),
            threshold: 10,
        });
        q.push(req("weather", Priority::Normal));
        std::thread::sleep(Duration::from_millis(20));
        let ready = q.pop_ready(Instant::now());
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].len(), 1);
    }

    #[test]
    fn threshold_closes_batch_immediately() {
        let q = CoalesceQueue::new(CoalesceConfig {
            window: Duration::from_secs(60),
            threshold: 2,
        });
        q.push(req("weather", Priority::Normal));
        q.push(req("weather", Priority::Normal));
        // threshold reached without waiting for the window
        let ready = q.pop_ready(Instant::now());
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].len(), 2);
    }

    #[test]
    fn different_channels_never_merge() {
        let q = CoalesceQueue::new(CoalesceConfig {
            window: Duration::from_millis(5),
            threshold: 10,
        });
        q.push(SendRequest::new(Platform::Discord, "alpha", "weather", "a"));
        q.push(SendRequest::new(Platform::Discord, "beta", "weather", "b"));
        std::thread::sleep(Duration::from_millis(10));
        let ready = q.pop_ready(Instant::now());
        assert_eq!(ready.len(), 2);
        assert!(ready.iter().all(|b| b.len() == 1));
    }

    #[test]
    fn priority_mismatch_forces_a_cut() {
        let q = CoalesceQueue::new(CoalesceConfig {
            window: Duration::from_secs(60),
            threshold: 10,
        });
        q.push(req("weather", Priority::Normal));
        q.push(req("weather", Priority::High));
        assert_eq!(q.open_len(), 1);
        let ready = q.pop_ready(Instant::now());
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].priority, Priority::Normal);
        assert_eq!(ready[0].len(), 1);
    }

    #[test]
    fn ready_batches_sort_by_priority_desc_then_opened_at() {
        let q = CoalesceQueue::new(CoalesceConfig {
            window: Duration::from_millis(5),
            threshold: 10,
        });
        q.push(req("low_job", Priority::Low));
        q.push(req("high_job", Priority::High));
        std::thread::sleep(Duration::from_millis(10));
        let ready = q.pop_ready(Instant::now());
        assert_eq!(ready.len(), 2);
        assert_eq!(ready[0].key.job, "high_job");
        assert_eq!(ready[1].key.job, "low_job");
    }
}
