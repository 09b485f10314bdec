//! Key-update scheduling and the overlap window that lets a session keep
//! decrypting under its previous key while a new one cuts over.
//!
//! Grounded on `Core/Peer/PeerKeyUpdate.cpp`: a key update is due once
//! either `require_after_num_processed_bytes` has been exceeded or a
//! randomized point between `min_interval` and `max_interval` has elapsed,
//! whichever comes first. Once the new key material is derived, both old
//! and new keys stay usable (the outer frame's HMAC check is what decides
//! which one a given incoming frame actually used, see
//! [`crate::message::transport::ReadOutcome::RetryAlternateKey`]) until a
//! `KeyUpdateReady` message confirms the peer has also cut over, at which
//! point the old key is dropped.

use std::time::{Duration, Instant};

use crate::crypto::keys::SymmetricKeyData;
use crate::crypto::{self};

/// Configuration driving when a key update is due.
#[derive(Debug, Clone, Copy)]
pub struct KeyUpdateSettings {
    /// Shortest randomized interval between updates.
    pub min_interval: Duration,
    /// Longest randomized interval between updates.
    pub max_interval: Duration,
    /// Force an update once this many bytes have been processed under the
    /// current key, regardless of elapsed time.
    pub require_after_num_processed_bytes: u64,
}

/// Tracks when the next key update is due for one session.
#[derive(Debug, Clone)]
pub struct KeyUpdateSchedule {
    settings: KeyUpdateSettings,
    last_update_at: Instant,
    next_interval: Duration,
}

fn randomized_interval(settings: KeyUpdateSettings) -> Duration {
    let min = settings.min_interval.as_millis() as u64;
    let max = settings.max_interval.as_millis() as u64;
    if max <= min {
        return settings.min_interval;
    }
    let span = max - min;
    let offset = crypto::csprng_u64() % span;
    Duration::from_millis(min + offset)
}

impl KeyUpdateSchedule {
    /// Start a fresh schedule, picking a randomized first interval.
    pub fn new(settings: KeyUpdateSettings) -> Self {
        Self { settings, last_update_at: Instant::now(), next_interval: randomized_interval(settings) }
    }

    /// Whether a key update is due, given how many bytes the current key
    /// has processed.
    pub fn is_due(&self, bytes_processed: u64) -> bool {
        bytes_processed >= self.settings.require_after_num_processed_bytes
            || self.last_update_at.elapsed() >= self.next_interval
    }

    /// Reset the schedule after a key update completes, picking a fresh
    /// randomized interval for the next one.
    pub fn reset(&mut self) {
        self.last_update_at = Instant::now();
        self.next_interval = randomized_interval(self.settings);
    }
}

/// One direction's key material during a key-update overlap window: the
/// previous key (still accepted for incoming frames sent before the peer
/// cut over) and the new key (used for everything sent from now on).
pub struct KeyOverlap {
    /// The key in use before this update; `None` once the overlap window closes.
    pub previous: Option<SymmetricKeyData>,
    /// The newly derived key, used for all outgoing traffic immediately.
    pub current: SymmetricKeyData,
}

impl KeyOverlap {
    /// Start tracking a single key with no overlap in effect yet.
    pub fn new(initial: SymmetricKeyData) -> Self {
        Self { previous: None, current: initial }
    }

    /// Begin an overlap window: `new_key` becomes current, and the
    /// previously current key is retained as a retry candidate.
    pub fn begin_update(&mut self, new_key: SymmetricKeyData) {
        let old_current = std::mem::replace(&mut self.current, new_key);
        self.previous = Some(old_current);
    }

    /// Close the overlap window once the peer has confirmed cutover via
    /// `KeyUpdateReady`, dropping the previous key (and zeroizing it, since
    /// `SymmetricKeyData` is `ZeroizeOnDrop`).
    pub fn confirm_cutover(&mut self) {
        self.previous = None;
    }

    /// Whether an overlap window is currently open.
    pub fn is_overlapping(&self) -> bool {
        self.previous.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{Hash, Symmetric, SymmetricKeyType};

    fn settings() -> KeyUpdateSettings {
        KeyUpdateSettings {
            min_interval: Duration::from_secs(300),
            max_interval: Duration::from_secs(600),
            require_after_num_processed_bytes: 10 * 1024 * 1024,
        }
    }

    fn sample_key() -> SymmetricKeyData {
        SymmetricKeyData::new(SymmetricKeyType::Derived, Hash::Blake2s256, Symmetric::ChaCha20Poly1305, None)
    }

    #[test]
    fn due_once_byte_threshold_exceeded() {
        let schedule = KeyUpdateSchedule::new(settings());
        assert!(!schedule.is_due(0));
        assert!(schedule.is_due(10 * 1024 * 1024 + 1));
    }

    #[test]
    fn not_due_immediately_on_time_alone() {
        let schedule = KeyUpdateSchedule::new(settings());
        assert!(!schedule.is_due(0));
    }

    #[test]
    fn overlap_window_tracks_previous_key_until_confirmed() {
        let mut overlap = KeyOverlap::new(sample_key());
        assert!(!overlap.is_overlapping());

        overlap.begin_update(sample_key());
        assert!(overlap.is_overlapping());

        overlap.confirm_cutover();
        assert!(!overlap.is_overlapping());
    }

    #[test]
    fn reset_picks_a_fresh_interval_within_bounds() {
        let mut schedule = KeyUpdateSchedule::new(settings());
        schedule.reset();
        assert!(schedule.next_interval >= settings().min_interval);
        assert!(schedule.next_interval <= settings().max_interval);
    }
}
