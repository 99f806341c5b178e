//! Fixed-window hit counters.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use tracing::{debug, trace};

use super::rules::RateLimitRule;

/// Default number of buckets the store may hold before it sweeps elapsed ones.
pub const DEFAULT_EVICTION_THRESHOLD: usize = 10_000;

/// Named time windows accepted in rate limit tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimeWindow {
    /// Per-second rate limiting
    Second,
    /// Per-minute rate limiting
    Minute,
    /// Per-hour rate limiting
    Hour,
}

impl TimeWindow {
    /// Get the duration of this time window.
    pub fn duration(&self) -> Duration {
        match self {
            TimeWindow::Second => Duration::from_secs(1),
            TimeWindow::Minute => Duration::from_secs(60),
            TimeWindow::Hour => Duration::from_secs(3600),
        }
    }
}

/// Key identifying one counter bucket.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CounterKey {
    /// Client identity the bucket belongs to.
    pub client: String,
    /// Rate limit scope.
    pub scope: String,
    /// Window length in seconds.
    pub window_seconds: u64,
    /// Window start (epoch seconds, floored to the window boundary).
    pub window_start: u64,
}

impl CounterKey {
    pub fn new(client: &str, scope: &str, rule: &RateLimitRule, now: u64) -> Self {
        Self {
            client: client.to_string(),
            scope: scope.to_string(),
            window_seconds: rule.window_seconds(),
            window_start: rule.window_start(now),
        }
    }

    /// Whether the bucket's window has fully elapsed at `now`.
    pub fn is_elapsed(&self, now: u64) -> bool {
        self.window_start + self.window_seconds <= now
    }
}

impl fmt::Display for CounterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}|{}|{}|{}",
            self.client, self.scope, self.window_seconds, self.window_start
        )
    }
}

/// Result of a single hit against one rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HitOutcome {
    /// Whether the hit was admitted and counted.
    pub admitted: bool,
    /// Seconds until the window resets; zero when admitted, at least one otherwise.
    pub retry_after_secs: u64,
}

impl HitOutcome {
    fn admitted() -> Self {
        Self {
            admitted: true,
            retry_after_secs: 0,
        }
    }

    fn denied(retry_after_secs: u64) -> Self {
        Self {
            admitted: false,
            retry_after_secs: retry_after_secs.max(1),
        }
    }
}

/// Process-local fixed-window counters for every client, scope and window.
///
/// A single mutex covers the whole check-then-increment sequence so two
/// concurrent callers can never both observe "under limit" for the same
/// bucket and both commit. The lock is never held across an await point.
pub struct WindowCounterStore {
    counts: Mutex<HashMap<CounterKey, u64>>,
    eviction_threshold: usize,
}

impl WindowCounterStore {
    /// Create a store with the default eviction threshold.
    pub fn new() -> Self {
        Self::with_eviction_threshold(DEFAULT_EVICTION_THRESHOLD)
    }

    /// Create a store that sweeps elapsed buckets once it holds more than
    /// `eviction_threshold` entries.
    pub fn with_eviction_threshold(eviction_threshold: usize) -> Self {
        Self {
            counts: Mutex::new(HashMap::new()),
            eviction_threshold,
        }
    }

    /// Record a hit for `client` in `scope` under `rule` at time `now`.
    ///
    /// A denied hit leaves the bucket untouched.
    pub fn hit(&self, client: &str, scope: &str, rule: &RateLimitRule, now: u64) -> HitOutcome {
        let key = CounterKey::new(client, scope, rule, now);
        let mut counts = self.counts.lock();

        let count = counts.get(&key).copied().unwrap_or(0);
        if count >= rule.limit() {
            let window_end = key.window_start + key.window_seconds;
            trace!(key = %key, count, limit = rule.limit(), "Window exhausted");
            return HitOutcome::denied(window_end.saturating_sub(now));
        }

        counts.insert(key, count + 1);

        if counts.len() > self.eviction_threshold {
            let before = counts.len();
            counts.retain(|key, _| !key.is_elapsed(now));
            debug!(
                removed = before - counts.len(),
                remaining = counts.len(),
                "Swept elapsed rate limit buckets"
            );
        }

        HitOutcome::admitted()
    }

    /// Current count of the bucket `now` falls into, without recording a hit.
    pub fn count(&self, client: &str, scope: &str, rule: &RateLimitRule, now: u64) -> u64 {
        let key = CounterKey::new(client, scope, rule, now);
        self.counts.lock().get(&key).copied().unwrap_or(0)
    }

    /// Number of buckets currently held.
    pub fn len(&self) -> usize {
        self.counts.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop all buckets.
    ///
    /// This is primarily useful for testing.
    pub fn clear(&self) {
        self.counts.lock().clear();
    }
}

impl Default for WindowCounterStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::{Arc, Barrier};
    use std::thread;

    fn rule(limit: u64, window_seconds: u64) -> RateLimitRule {
        RateLimitRule::new(limit, window_seconds).unwrap()
    }

    #[test]
    fn test_time_window_duration() {
        assert_eq!(TimeWindow::Second.duration(), Duration::from_secs(1));
        assert_eq!(TimeWindow::Minute.duration(), Duration::from_secs(60));
        assert_eq!(TimeWindow::Hour.duration(), Duration::from_secs(3600));
    }

    #[test]
    fn test_hit_within_limit() {
        let store = WindowCounterStore::new();
        let r = rule(3, 60);

        for _ in 0..3 {
            assert_eq!(store.hit("client", "scope", &r, 1_000), HitOutcome::admitted());
        }
        assert_eq!(store.count("client", "scope", &r, 1_000), 3);
    }

    #[test]
    fn test_denied_hit_does_not_increment() {
        let store = WindowCounterStore::new();
        let r = rule(1, 60);

        assert!(store.hit("client", "scope", &r, 1_000).admitted);
        let outcome = store.hit("client", "scope", &r, 1_000);
        assert!(!outcome.admitted);
        assert_eq!(store.count("client", "scope", &r, 1_000), 1);
    }

    #[test]
    fn test_retry_after_counts_down_to_window_end() {
        let store = WindowCounterStore::new();
        let r = rule(1, 60);

        // Window [960, 1020)
        store.hit("client", "scope", &r, 1_000);
        assert_eq!(store.hit("client", "scope", &r, 1_000).retry_after_secs, 20);
        assert_eq!(store.hit("client", "scope", &r, 1_019).retry_after_secs, 1);
    }

    #[test]
    fn test_retry_after_is_at_least_one() {
        let store = WindowCounterStore::new();
        let r = rule(1, 1);

        store.hit("client", "scope", &r, 50);
        let outcome = store.hit("client", "scope", &r, 50);
        assert!(!outcome.admitted);
        assert_eq!(outcome.retry_after_secs, 1);
    }

    #[test]
    fn test_new_window_resets_count() {
        let store = WindowCounterStore::new();
        let r = rule(1, 60);

        assert!(store.hit("client", "scope", &r, 1_019).admitted);
        assert!(!store.hit("client", "scope", &r, 1_019).admitted);
        assert!(store.hit("client", "scope", &r, 1_020).admitted);
    }

    #[test]
    fn test_buckets_are_partitioned() {
        let store = WindowCounterStore::new();
        let r = rule(1, 60);

        assert!(store.hit("a", "scope", &r, 0).admitted);
        assert!(store.hit("b", "scope", &r, 0).admitted);
        assert!(store.hit("a", "other", &r, 0).admitted);
        assert!(store.hit("a", "scope", &rule(1, 3600), 0).admitted);
        assert_eq!(store.len(), 4);
    }

    #[test]
    fn test_sweep_removes_only_elapsed_buckets() {
        let store = WindowCounterStore::with_eviction_threshold(3);
        let minute = rule(10, 60);
        let hour = rule(10, 3600);

        // Window [0, 60) for the minute rule and [0, 3600) for the hour rule.
        store.hit("stale-1", "scope", &minute, 10);
        store.hit("stale-2", "scope", &minute, 10);
        store.hit("live", "scope", &hour, 10);
        store.hit("live", "scope", &hour, 10);
        assert_eq!(store.len(), 3);

        // Crossing the threshold at t=70 sweeps the elapsed minute buckets.
        store.hit("fresh", "scope", &minute, 70);

        assert_eq!(store.len(), 2);
        assert_eq!(store.count("live", "scope", &hour, 70), 2);
        assert_eq!(store.count("fresh", "scope", &minute, 70), 1);
        assert_eq!(store.count("stale-1", "scope", &minute, 10), 0);
    }

    #[test]
    fn test_no_sweep_below_threshold() {
        let store = WindowCounterStore::with_eviction_threshold(100);
        let r = rule(10, 1);

        store.hit("a", "scope", &r, 0);
        store.hit("b", "scope", &r, 5);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_concurrent_hits_never_exceed_limit() {
        const LIMIT: u64 = 25;
        const THREADS: usize = 16;
        const HITS_PER_THREAD: usize = 10;

        let store = Arc::new(WindowCounterStore::new());
        let barrier = Arc::new(Barrier::new(THREADS));
        let admitted = Arc::new(AtomicU64::new(0));
        let denied = Arc::new(AtomicU64::new(0));
        let r = rule(LIMIT, 3600);

        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                let store = Arc::clone(&store);
                let barrier = Arc::clone(&barrier);
                let admitted = Arc::clone(&admitted);
                let denied = Arc::clone(&denied);
                thread::spawn(move || {
                    barrier.wait();
                    for _ in 0..HITS_PER_THREAD {
                        let outcome = store.hit("client", "scope", &r, 7_200);
                        if outcome.admitted {
                            admitted.fetch_add(1, Ordering::SeqCst);
                        } else {
                            assert!(outcome.retry_after_secs >= 1);
                            denied.fetch_add(1, Ordering::SeqCst);
                        }
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        let total = (THREADS * HITS_PER_THREAD) as u64;
        assert_eq!(admitted.load(Ordering::SeqCst), LIMIT);
        assert_eq!(store.count("client", "scope", &r, 7_200), LIMIT);
        assert_eq!(denied.load(Ordering::SeqCst), total - LIMIT);
    }

    #[test]
    fn test_clear() {
        let store = WindowCounterStore::new();
        store.hit("a", "scope", &rule(1, 1), 0);
        assert!(!store.is_empty());
        store.clear();
        assert!(store.is_empty());
    }
}
