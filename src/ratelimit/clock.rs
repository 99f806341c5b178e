//! Time sources for the rate limiter.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use super::LimiterFault;

/// Source of wall-clock time in whole epoch seconds.
///
/// Fixed windows are aligned to wall-clock boundaries, so the limiter needs
/// epoch time rather than a monotonic instant.
pub trait Clock: Send + Sync {
    /// Current time in seconds since the Unix epoch.
    fn now_secs(&self) -> Result<u64, LimiterFault>;
}

/// The system wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_secs(&self) -> Result<u64, LimiterFault> {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .map_err(|e| LimiterFault::Clock(e.to_string()))
    }
}

/// A clock that only moves when told to. Useful for deterministic windows.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    pub fn new(now: u64) -> Self {
        Self {
            now: AtomicU64::new(now),
        }
    }

    pub fn set(&self, now: u64) {
        self.now.store(now, Ordering::SeqCst);
    }

    pub fn advance(&self, secs: u64) {
        self.now.fetch_add(secs, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_secs(&self) -> Result<u64, LimiterFault> {
        Ok(self.now.load(Ordering::SeqCst))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_clock_is_after_2020() {
        let now = SystemClock.now_secs().unwrap();
        assert!(now > 1_577_836_800);
    }

    #[test]
    fn test_manual_clock_moves_only_when_told() {
        let clock = ManualClock::new(100);
        assert_eq!(clock.now_secs().unwrap(), 100);

        clock.advance(20);
        assert_eq!(clock.now_secs().unwrap(), 120);

        clock.set(7);
        assert_eq!(clock.now_secs().unwrap(), 7);
    }
}
