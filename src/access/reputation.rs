//! Per-address reputation tracking.
//!
//! Grounded on `Core/Access/PeerAccessControl.cpp`'s reputation update
//! table; quanta are fixed protocol constants (see
//! [`crate::core::constants::reputation`]), not configuration.

use std::collections::HashMap;
use std::net::IpAddr;
use std::time::{Duration, Instant};

use crate::core::constants::reputation as rep;

/// A named reputation event, each mapping to a fixed score delta.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateKind {
    /// No change; applies the auto-improve step only.
    None,
    /// A minor positive event.
    ImproveMinimal,
    /// A minor infraction.
    DeteriorateMinimal,
    /// A moderate infraction, e.g. a tripped rate limiter.
    DeteriorateModerate,
    /// A severe infraction.
    DeteriorateSevere,
}

impl UpdateKind {
    fn delta(self) -> i16 {
        match self {
            UpdateKind::None => 0,
            UpdateKind::ImproveMinimal => rep::IMPROVE_MINIMAL,
            UpdateKind::DeteriorateMinimal => rep::DETERIORATE_MINIMAL,
            UpdateKind::DeteriorateModerate => rep::DETERIORATE_MODERATE,
            UpdateKind::DeteriorateSevere => rep::DETERIORATE_SEVERE,
        }
    }
}

/// One address's reputation state.
#[derive(Debug, Clone)]
struct AccessDetails {
    score: i16,
    last_improve: Instant,
    direct_attempts: u64,
    relay_attempts: u64,
}

impl AccessDetails {
    fn new(now: Instant) -> Self {
        Self { score: rep::MAX_SCORE, last_improve: now, direct_attempts: 0, relay_attempts: 0 }
    }

    fn auto_improve(&mut self, now: Instant, interval: Duration) {
        if interval.is_zero() {
            return;
        }
        let elapsed = now.saturating_duration_since(self.last_improve);
        let intervals = (elapsed.as_secs_f64() / interval.as_secs_f64()).floor() as i64;
        if intervals > 0 {
            let gain = rep::IMPROVE_MINIMAL as i64 * intervals;
            self.score = self.score.saturating_add(gain.min(i16::MAX as i64) as i16).min(rep::MAX_SCORE);
            self.last_improve = now;
        }
    }
}

/// Tracks [`AccessDetails`] per address, behind a single map guarded by the
/// caller's reader-writer lock (see [`super::manager::AccessManager`]).
#[derive(Debug, Default)]
pub struct ReputationTracker {
    details: HashMap<IpAddr, AccessDetails>,
}

impl ReputationTracker {
    /// Create an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&mut self, addr: IpAddr, now: Instant) -> &mut AccessDetails {
        self.details.entry(addr).or_insert_with(|| AccessDetails::new(now))
    }

    /// Apply the auto-improve step for `addr` given `interval`, returning
    /// the resulting score.
    pub fn improve_reputation(&mut self, addr: IpAddr, now: Instant, interval: Duration) -> i16 {
        let details = self.entry(addr, now);
        details.auto_improve(now, interval);
        details.score
    }

    /// Apply `kind`'s delta, then auto-improve, returning the new score.
    pub fn update_reputation(
        &mut self,
        addr: IpAddr,
        now: Instant,
        interval: Duration,
        kind: UpdateKind,
    ) -> i16 {
        let details = self.entry(addr, now);
        details.score = details.score.saturating_add(kind.delta()).min(rep::MAX_SCORE);
        details.auto_improve(now, interval);
        details.score
    }

    /// Whether `addr`'s reputation, after auto-improving, is acceptable
    /// (strictly greater than the unacceptable threshold).
    pub fn has_acceptable_reputation(&mut self, addr: IpAddr, now: Instant, interval: Duration) -> bool {
        let details = self.entry(addr, now);
        details.auto_improve(now, interval);
        details.score > rep::UNACCEPTABLE_THRESHOLD
    }

    /// Record a direct connection attempt and return the updated count.
    pub fn record_direct_attempt(&mut self, addr: IpAddr, now: Instant) -> u64 {
        let details = self.entry(addr, now);
        details.direct_attempts += 1;
        details.direct_attempts
    }

    /// Record a relay connection attempt and return the updated count.
    pub fn record_relay_attempt(&mut self, addr: IpAddr, now: Instant) -> u64 {
        let details = self.entry(addr, now);
        details.relay_attempts += 1;
        details.relay_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_address_starts_at_max_score() {
        let mut tracker = ReputationTracker::new();
        let now = Instant::now();
        assert!(tracker.has_acceptable_reputation("1.1.1.1".parse().unwrap(), now, Duration::from_secs(60)));
    }

    #[test]
    fn severe_deterioration_goes_deeply_negative_and_is_not_clamped_below() {
        let mut tracker = ReputationTracker::new();
        let addr = "2.2.2.2".parse().unwrap();
        let now = Instant::now();
        let score = tracker.update_reputation(addr, now, Duration::from_secs(3600), UpdateKind::DeteriorateSevere);
        assert_eq!(score, rep::MAX_SCORE.saturating_add(rep::DETERIORATE_SEVERE));
        assert!(!tracker.has_acceptable_reputation(addr, now, Duration::from_secs(3600)));
    }

    #[test]
    fn score_never_exceeds_max() {
        let mut tracker = ReputationTracker::new();
        let addr = "3.3.3.3".parse().unwrap();
        let now = Instant::now();
        let score = tracker.update_reputation(addr, now, Duration::from_secs(60), UpdateKind::ImproveMinimal);
        assert_eq!(score, rep::MAX_SCORE);
    }

    #[test]
    fn auto_improve_after_long_elapsed_recovers_score() {
        let mut tracker = ReputationTracker::new();
        let addr = "4.4.4.4".parse().unwrap();
        let start = Instant::now();
        tracker.update_reputation(addr, start, Duration::from_secs(60), UpdateKind::DeteriorateModerate);
        let later = start + Duration::from_secs(600);
        let score = tracker.improve_reputation(addr, later, Duration::from_secs(60));
        assert_eq!(score, rep::MAX_SCORE);
    }
}
