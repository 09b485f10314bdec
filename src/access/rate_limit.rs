//! Connection-attempt rate limiting, one flavour each for direct and
//! relayed connection attempts.
//!
//! Grounded on `Core/Access/PeerAccessControl.cpp`'s attempt counters: a
//! fixed window per address that resets once `interval` has elapsed, with
//! an over-limit attempt immediately deteriorating that address's
//! reputation.

use std::collections::HashMap;
use std::net::IpAddr;
use std::time::{Duration, Instant};

use super::reputation::{ReputationTracker, UpdateKind};

struct Window {
    count: u32,
    window_start: Instant,
}

/// A single flavour (direct or relay) of connection-attempt rate limiter.
#[derive(Default)]
pub struct RateLimiter {
    windows: HashMap<IpAddr, Window>,
}

impl RateLimiter {
    /// Create an empty rate limiter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an attempt from `addr`. If the attempt pushes the window's
    /// count past `max_per_interval`, deteriorate the address's reputation
    /// moderately and return whether it remains acceptable afterward.
    /// Returns `true` (acceptable) whenever the limit was not exceeded.
    pub fn add_attempt(
        &mut self,
        addr: IpAddr,
        now: Instant,
        interval: Duration,
        max_per_interval: u32,
        reputation: &mut ReputationTracker,
        reputation_interval: Duration,
    ) -> bool {
        let window = self.windows.entry(addr).or_insert_with(|| Window { count: 0, window_start: now });
        if now.saturating_duration_since(window.window_start) >= interval {
            window.count = 0;
            window.window_start = now;
        }
        window.count += 1;

        if window.count > max_per_interval {
            let score = reputation.update_reputation(addr, now, reputation_interval, UpdateKind::DeteriorateModerate);
            tracing::warn!(%addr, count = window.count, score, "connection attempt rate exceeded");
            score > crate::core::constants::reputation::UNACCEPTABLE_THRESHOLD
        } else {
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attempts_within_limit_stay_acceptable() {
        let mut limiter = RateLimiter::new();
        let mut reputation = ReputationTracker::new();
        let addr = "5.5.5.5".parse().unwrap();
        let now = Instant::now();
        for _ in 0..5 {
            assert!(limiter.add_attempt(addr, now, Duration::from_secs(60), 10, &mut reputation, Duration::from_secs(60)));
        }
    }

    #[test]
    fn exceeding_limit_deteriorates_reputation() {
        let mut limiter = RateLimiter::new();
        let mut reputation = ReputationTracker::new();
        let addr = "6.6.6.6".parse().unwrap();
        let now = Instant::now();
        for _ in 0..2 {
            limiter.add_attempt(addr, now, Duration::from_secs(60), 2, &mut reputation, Duration::from_secs(3600));
        }
        let exceeded = limiter.add_attempt(addr, now, Duration::from_secs(60), 2, &mut reputation, Duration::from_secs(3600));
        assert!(!exceeded);
    }

    #[test]
    fn window_resets_after_interval_elapses() {
        let mut limiter = RateLimiter::new();
        let mut reputation = ReputationTracker::new();
        let addr = "7.7.7.7".parse().unwrap();
        let start = Instant::now();
        for _ in 0..5 {
            limiter.add_attempt(addr, start, Duration::from_secs(10), 5, &mut reputation, Duration::from_secs(60));
        }
        let later = start + Duration::from_secs(11);
        assert!(limiter.add_attempt(addr, later, Duration::from_secs(10), 5, &mut reputation, Duration::from_secs(60)));
    }
}
