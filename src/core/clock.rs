//! Injectable time source (C2).
//!
//! Every gate takes a `&dyn Clock` rather than calling `Utc::now()`/
//! `Instant::now()` directly, so cooldown/permit/jitter tests can advance
//! time deterministically instead of sleeping wall-clock time.

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicI64, Ordering};

/// Monotonic + wall-clock source.
pub trait Clock: Send + Sync {
    /// Wall-clock time, used for window arithmetic and log timestamps.
    fn now(&self) -> DateTime<Utc>;
}

/// The real clock, backed by the system's UTC time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock a test can advance by hand.
///
/// Stores an offset in milliseconds from its creation instant rather than a
/// raw timestamp, so `advance` never has to reconstruct a `DateTime`.
pub struct FakeClock {
    base: DateTime<Utc>,
    offset_ms: AtomicI64,
}

impl FakeClock {
    pub fn new(base: DateTime<Utc>) -> Self {
        Self {
            base,
            offset_ms: AtomicI64::new(0),
        }
    }

    pub fn advance(&self, duration: chrono::Duration) {
        self.offset_ms
            .fetch_add(duration.num_milliseconds(), Ordering::SeqCst);
    }
}

impl Clock for FakeClock {
    fn now(&self) -> DateTime<Utc> {
        self.base + chrono::Duration::milliseconds(self.offset_ms.load(Ordering::SeqCst))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fake_clock_advances_by_offset() {
        let base = Utc::now();
        let clock = FakeClock::new(base);
        assert_eq!(clock.now(), base);
        clock.advance(chrono::Duration::seconds(5));
        assert_eq!(clock.now(), base + chrono::Duration::seconds(5));
    }

    #[test]
    fn system_clock_moves_forward() {
        let clock = SystemClock;
        let t1 = clock.now();
        std::thread::sleep(std::time::Duration::from_millis(5));
        let t2 = clock.now();
        assert!(t2 >= t1);
    }
}
