//! Per-key admission guard for outbound provider calls.
//!
//! Each key (provider name) owns a bucket of `rate` tokens. The bucket is
//! refilled by a HARD RESET: once `interval` has fully elapsed since the
//! last refill, tokens snap back to `rate`. Partial intervals grant nothing.
//!
//! This is a coarse "at most N calls per window per key" guard, not a
//! leaky bucket.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use log::{debug, warn};

#[derive(Debug)]
struct KeyState {
    remaining: u32,
    last_refill: Instant,
}

/// Thread-safe token bucket keyed by provider name.
///
/// All check-then-decrement work happens under one mutex, so the
/// limiter can be shared between the scheduler and on-demand callers.
pub struct RateLimiter {
    rate: u32,
    interval: Duration,
    state: Mutex<HashMap<String, KeyState>>,
}

impl RateLimiter {
    pub fn new(rate: u32, interval: Duration) -> Self {
        Self {
            rate,
            interval,
            state: Mutex::new(HashMap::new()),
        }
    }

    /// Returns whether the caller for `key` is admitted.
    ///
    /// Unseen keys start with a full bucket. A denial leaves the
    /// bucket untouched.
    pub fn acquire(&self, key: &str) -> bool {
        self.acquire_at(key, Instant::now())
    }

    fn acquire_at(&self, key: &str, now: Instant) -> bool {
        let mut state = self.lock_state();

        let entry = state.entry(key.to_string()).or_insert_with(|| KeyState {
            remaining: self.rate,
            last_refill: now,
        });

        // Refill happens before admission is evaluated
        if now.saturating_duration_since(entry.last_refill) >= self.interval {
            entry.remaining = self.rate;
            entry.last_refill = now;
        }

        if entry.remaining == 0 {
            debug!("rate limit denied key={}", key);
            return false;
        }

        entry.remaining -= 1;
        true
    }

    /// Tokens left for `key` right now, without consuming one.
    pub fn remaining(&self, key: &str) -> u32 {
        let state = self.lock_state();
        match state.get(key) {
            None => self.rate,
            Some(s) if s.last_refill.elapsed() >= self.interval => self.rate,
            Some(s) => s.remaining,
        }
    }

    /// Recovering from poison only risks a slightly wrong count.
    fn lock_state(&self) -> MutexGuard<'_, HashMap<String, KeyState>> {
        self.state.lock().unwrap_or_else(|poisoned| {
            warn!("rate limiter mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn denies_after_rate_is_spent() {
        let limiter = RateLimiter::new(2, Duration::from_secs_f64(1.0));
        assert!(limiter.acquire("adam4eve"));
        assert!(limiter.acquire("adam4eve"));
        assert!(!limiter.acquire("adam4eve"));
    }

    #[test]
    fn refills_after_interval() {
        let limiter = RateLimiter::new(1, Duration::from_secs_f64(0.1));
        assert!(limiter.acquire("esi"));
        assert!(!limiter.acquire("esi"));

        thread::sleep(Duration::from_secs_f64(0.11));
        assert!(limiter.acquire("esi"));
    }

    #[test]
    fn keys_are_independent() {
        let limiter = RateLimiter::new(1, Duration::from_secs(60));
        assert!(limiter.acquire("a"));
        assert!(!limiter.acquire("a"));
        assert!(limiter.acquire("b"));
        assert_eq!(limiter.remaining("c"), 1);
    }

    #[test]
    fn partial_interval_grants_no_tokens() {
        let limiter = RateLimiter::new(3, Duration::from_secs(10));
        let start = Instant::now();

        for _ in 0..3 {
            assert!(limiter.acquire_at("k", start));
        }
        assert!(!limiter.acquire_at("k", start));

        // 9.9s is 99% of the interval: a leaky bucket would have
        // refilled almost everything, a hard reset refills nothing.
        let almost = start + Duration::from_millis(9_900);
        assert!(!limiter.acquire_at("k", almost));

        let full = start + Duration::from_secs(10);
        assert!(limiter.acquire_at("k", full));
        assert!(limiter.acquire_at("k", full));
        assert!(limiter.acquire_at("k", full));
        assert!(!limiter.acquire_at("k", full));
    }

    #[test]
    fn refill_is_anchored_to_reset_time() {
        let limiter = RateLimiter::new(1, Duration::from_secs(10));
        let start = Instant::now();

        assert!(limiter.acquire_at("k", start));
        let reset = start + Duration::from_secs(15);
        assert!(limiter.acquire_at("k", reset));

        // Next window starts at `reset`, not at `start + 20s`
        assert!(!limiter.acquire_at("k", start + Duration::from_secs(20)));
        assert!(limiter.acquire_at("k", reset + Duration::from_secs(10)));
    }

    #[test]
    fn concurrent_callers_never_exceed_rate() {
        let limiter = Arc::new(RateLimiter::new(50, Duration::from_secs(60)));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let limiter = limiter.clone();
                thread::spawn(move || (0..20).filter(|_| limiter.acquire("shared")).count())
            })
            .collect();

        let admitted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(admitted, 50);
    }
}
