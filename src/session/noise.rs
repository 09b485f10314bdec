//! Cover-traffic ("noise") generation.
//!
//! Grounded on `Core/Peer/PeerNoise.cpp`: a session tracks how long it has
//! been idle and, once [`NoiseParameters::interval`] has elapsed with no
//! real traffic sent, emits up to `max_messages_per_interval` messages of
//! uniformly random size in `[min_message_size, max_message_size]`, filled
//! with CSPRNG bytes so they are indistinguishable from encrypted
//! application data on the wire.

use std::time::{Duration, Instant};

use crate::config::NoiseParameters;
use crate::crypto;

/// Tracks one session's noise-emission budget and idle timer.
#[derive(Debug, Clone)]
pub struct NoiseGenerator {
    params: NoiseParameters,
    last_real_traffic_at: Instant,
    emitted_this_interval: u32,
}

impl NoiseGenerator {
    /// Start a generator bound to `params`, with the idle timer starting now.
    pub fn new(params: NoiseParameters) -> Self {
        Self { params, last_real_traffic_at: Instant::now(), emitted_this_interval: 0 }
    }

    /// Record that real application or handshake traffic was just sent or
    /// received, resetting the idle timer and the per-interval budget.
    pub fn record_real_traffic(&mut self) {
        self.last_real_traffic_at = Instant::now();
        self.emitted_this_interval = 0;
    }

    /// Whether a noise message may be emitted right now: noise must be
    /// enabled, the session must have been idle for at least `interval`,
    /// and this interval's emission budget must not be exhausted.
    pub fn should_emit(&self) -> bool {
        self.params.enabled
            && self.emitted_this_interval < self.params.max_messages_per_interval
            && self.last_real_traffic_at.elapsed() >= self.params.interval
    }

    /// Produce one noise payload of uniformly random size within the
    /// configured bounds, filled with CSPRNG bytes, and record the emission
    /// against this interval's budget.
    pub fn generate(&mut self) -> Vec<u8> {
        let span = self.params.max_message_size.saturating_sub(self.params.min_message_size);
        let size = if span == 0 {
            self.params.min_message_size
        } else {
            self.params.min_message_size + (crypto::csprng_u64() as usize % (span + 1))
        };
        self.emitted_this_interval += 1;
        crypto::csprng_bytes(size)
    }

    /// Reset the per-interval budget without disturbing the idle timer;
    /// called once `interval` has elapsed again.
    pub fn start_new_interval(&mut self) {
        self.emitted_this_interval = 0;
    }

    /// How long until this generator's idle threshold is reached, for a
    /// caller scheduling a wakeup timer.
    pub fn time_until_idle_threshold(&self) -> Duration {
        self.params.interval.saturating_sub(self.last_real_traffic_at.elapsed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(enabled: bool) -> NoiseParameters {
        NoiseParameters {
            enabled,
            interval: Duration::from_millis(0),
            max_messages_per_interval: 2,
            min_message_size: 64,
            max_message_size: 128,
        }
    }

    #[test]
    fn disabled_noise_never_emits() {
        let generator = NoiseGenerator::new(params(false));
        assert!(!generator.should_emit());
    }

    #[test]
    fn emits_within_size_bounds_and_respects_budget() {
        let mut generator = NoiseGenerator::new(params(true));
        assert!(generator.should_emit());

        let first = generator.generate();
        assert!(first.len() >= 64 && first.len() <= 128);
        let second = generator.generate();
        assert!(second.len() >= 64 && second.len() <= 128);

        assert!(!generator.should_emit());
    }

    #[test]
    fn real_traffic_resets_idle_timer_and_budget() {
        let mut generator = NoiseGenerator::new(params(true));
        generator.generate();
        generator.generate();
        assert!(!generator.should_emit());

        generator.record_real_traffic();
        assert!(generator.should_emit());
    }
}
