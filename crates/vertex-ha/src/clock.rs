//! Wall-clock abstraction.
//!
//! The reaper judges staleness by comparing registry timestamps with "now";
//! injecting the clock keeps that judgement testable.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Monotonic-enough millisecond source.
pub trait Clock: Send + Sync + fmt::Debug {
    /// Milliseconds since the Unix epoch. Never returns 0.
    fn now_millis(&self) -> u64;
}

/// The real system clock.
#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64
    }
}

/// A hand-advanced clock for tests.
#[derive(Debug)]
pub struct ManualClock {
    millis: AtomicU64,
}

impl ManualClock {
    /// Creates a clock at the given starting time (must be non-zero; zero
    /// is the registry's "executing" sentinel).
    pub fn new(start_millis: u64) -> Self {
        Self {
            millis: AtomicU64::new(start_millis.max(1)),
        }
    }

    /// Advances the clock.
    pub fn advance(&self, by: Duration) {
        self.millis
            .fetch_add(by.as_millis() as u64, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> u64 {
        self.millis.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_clock_nonzero() {
        assert!(SystemClock.now_millis() > 0);
    }

    #[test]
    fn test_manual_clock() {
        let clock = ManualClock::new(1_000);
        assert_eq!(clock.now_millis(), 1_000);

        clock.advance(Duration::from_secs(5));
        assert_eq!(clock.now_millis(), 6_000);
    }

    #[test]
    fn test_manual_clock_never_zero() {
        assert_eq!(ManualClock::new(0).now_millis(), 1);
    }
}
