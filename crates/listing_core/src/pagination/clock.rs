//! Injectable wall clock.
//!
//! Watermark expiry and degraded time buckets read time through `Clock` so
//! tests can step time deterministically.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub trait Clock: Send + Sync {
    /// Current time in Unix epoch milliseconds.
    fn now_millis(&self) -> i64;
}

/// Process wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX))
            .unwrap_or(0)
    }
}

/// Manually driven clock for tests and replay tooling.
#[derive(Debug, Default)]
pub struct ManualClock {
    now_ms: AtomicI64,
}

impl ManualClock {
    pub fn new(start_ms: i64) -> Self {
        Self {
            now_ms: AtomicI64::new(start_ms),
        }
    }

    pub fn set(&self, now_ms: i64) {
        self.now_ms.store(now_ms, Ordering::SeqCst);
    }

    pub fn advance(&self, by: Duration) {
        let delta = i64::try_from(by.as_millis()).unwrap_or(i64::MAX);
        self.now_ms.fetch_add(delta, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> i64 {
        self.now_ms.load(Ordering::SeqCst)
    }
}

/// Start of the minute containing `now_ms`, used for degraded tokens.
pub fn minute_bucket(now_ms: i64) -> i64 {
    now_ms.div_euclid(60_000)
}

#[cfg(test)]
mod tests {
    use super::{minute_bucket, Clock, ManualClock};
    use std::time::Duration;

    #[test]
    fn manual_clock_advances_and_buckets() {
        let clock = ManualClock::new(59_999);
        assert_eq!(minute_bucket(clock.now_millis()), 0);
        clock.advance(Duration::from_millis(1));
        assert_eq!(minute_bucket(clock.now_millis()), 1);
    }
}
