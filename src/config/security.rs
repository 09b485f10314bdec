//! Security levels and the `SecurityParameters` they expand to.
//!
//! Grounded on `QuantumGateLib/Core/Local.h`'s `SecurityLevel` enum: five
//! fixed presets plus a `Custom` level backed by a caller-supplied,
//! validated parameter set. Level 1 disables noise and random-prefix
//! padding; level 5 maximizes both, trading bandwidth for traffic-analysis
//! resistance.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::constants::timing as timing_const;
use crate::core::error::{ArgumentError, Result};

use super::duration_millis;

/// Key-update trigger bounds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct KeyUpdateParameters {
    /// Earliest a randomized key update may fire after the previous one.
    #[serde(with = "duration_millis")]
    pub min_interval: Duration,
    /// Latest a key update may be deferred to.
    #[serde(with = "duration_millis")]
    pub max_interval: Duration,
    /// Force a key update once this many bytes have been processed under
    /// the current symmetric key, regardless of elapsed time.
    pub require_after_num_processed_bytes: u64,
}

/// Per-message size and padding bounds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MessageParameters {
    /// Minimum CSPRNG padding prefix length prepended ahead of a frame.
    pub min_random_data_prefix_size: u16,
    /// Maximum CSPRNG padding prefix length.
    pub max_random_data_prefix_size: u16,
    /// Minimum internal random padding appended inside the plaintext.
    pub min_internal_random_data_size: u16,
    /// Maximum internal random padding.
    pub max_internal_random_data_size: u16,
    /// How far a received message's embedded timestamp may drift from
    /// local wall-clock time before it is treated with suspicion.
    #[serde(with = "duration_millis")]
    pub age_tolerance: Duration,
}

/// Cover-traffic ("noise") budget.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct NoiseParameters {
    /// Whether noise messages are emitted at all (level 1 disables this).
    pub enabled: bool,
    /// How long a session may sit idle before noise messages are considered.
    #[serde(with = "duration_millis")]
    pub interval: Duration,
    /// Upper bound on noise messages emitted per interval.
    pub max_messages_per_interval: u32,
    /// Smallest noise payload size, uniformly sampled up to the max.
    pub min_message_size: usize,
    /// Largest noise payload size.
    pub max_message_size: usize,
}

/// The full set of timing and size knobs that drive a peer session's
/// handshake pacing, rekeying schedule, and cover traffic.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SecurityParameters {
    /// Upper bound on total handshake duration before `TimedOut`.
    #[serde(with = "duration_millis")]
    pub max_handshake_duration: Duration,
    /// Jitter budget randomizing response timing during the handshake.
    #[serde(with = "duration_millis")]
    pub max_handshake_delay: Duration,
    /// Key-update trigger bounds.
    pub key_update: KeyUpdateParameters,
    /// Message padding bounds.
    pub message: MessageParameters,
    /// Cover-traffic budget.
    pub noise: NoiseParameters,
}

impl SecurityParameters {
    /// Validate every rule from the external-interface spec for a custom
    /// parameter set. Returns the first violation found as a descriptive
    /// [`ArgumentError::OutOfRange`].
    pub fn validate(&self) -> Result<()> {
        if self.max_handshake_delay > self.max_handshake_duration {
            return Err(ArgumentError::OutOfRange(
                "max_handshake_delay must not exceed max_handshake_duration".into(),
            )
            .into());
        }
        if self.key_update.min_interval > self.key_update.max_interval {
            return Err(ArgumentError::OutOfRange(
                "key_update.min_interval must not exceed key_update.max_interval".into(),
            )
            .into());
        }
        if self.key_update.require_after_num_processed_bytes
            < timing_const::MIN_REQUIRE_AFTER_NUM_PROCESSED_BYTES
        {
            return Err(ArgumentError::OutOfRange(format!(
                "key_update.require_after_num_processed_bytes must be at least {} bytes",
                timing_const::MIN_REQUIRE_AFTER_NUM_PROCESSED_BYTES
            ))
            .into());
        }
        if self.message.min_random_data_prefix_size > self.message.max_random_data_prefix_size {
            return Err(ArgumentError::OutOfRange(
                "message.min_random_data_prefix_size must not exceed the max".into(),
            )
            .into());
        }
        if self.message.min_internal_random_data_size > self.message.max_internal_random_data_size
        {
            return Err(ArgumentError::OutOfRange(
                "message.min_internal_random_data_size must not exceed the max".into(),
            )
            .into());
        }
        if self.message.max_random_data_prefix_size > 65_535
            || self.message.max_internal_random_data_size > 65_535
        {
            return Err(ArgumentError::OutOfRange(
                "random-prefix and internal-padding sizes must be at most 65535".into(),
            )
            .into());
        }
        if self.noise.min_message_size > self.noise.max_message_size {
            return Err(ArgumentError::OutOfRange(
                "noise.min_message_size must not exceed noise.max_message_size".into(),
            )
            .into());
        }
        if self.noise.max_message_size > crate::core::constants::transport::MAX_MESSAGE_DATA_SIZE
        {
            return Err(ArgumentError::OutOfRange(
                "noise.max_message_size must not exceed max_plaintext".into(),
            )
            .into());
        }
        Ok(())
    }
}

/// The five fixed presets plus the caller-validated custom level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SecurityLevel {
    /// No noise, no random-prefix padding; fastest handshake pacing.
    One,
    /// Light padding, conservative noise budget.
    Two,
    /// The balanced default.
    Three,
    /// Heavier padding and noise at the cost of throughput.
    Four,
    /// Maximum padding and noise; prioritizes traffic-analysis resistance.
    Five,
    /// A caller-supplied, independently validated parameter set.
    Custom(SecurityParametersPayload),
}

/// Wrapper so `Custom`'s payload can derive `PartialEq`/`Eq` while
/// `SecurityParameters` itself only needs to compare by reference identity
/// in practice; kept as a thin newtype to avoid deriving those traits on
/// the full struct (which contains no meaningful equality beyond its
/// fields already compared field-by-field via `PartialEq` once derived).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SecurityParametersPayload(pub SecurityParameters);

impl PartialEq for SecurityParametersPayload {
    fn eq(&self, _other: &Self) -> bool {
        // Parameter sets are compared by level, not by value; two `Custom`
        // levels are never considered equal to each other or to a preset.
        false
    }
}
impl Eq for SecurityParametersPayload {}

impl SecurityLevel {
    /// Expand this level into its concrete parameter set, validating a
    /// `Custom` level's payload.
    pub fn parameters(&self) -> Result<SecurityParameters> {
        Ok(match self {
            SecurityLevel::One => LEVEL_ONE,
            SecurityLevel::Two => LEVEL_TWO,
            SecurityLevel::Three => LEVEL_THREE,
            SecurityLevel::Four => LEVEL_FOUR,
            SecurityLevel::Five => LEVEL_FIVE,
            SecurityLevel::Custom(payload) => {
                payload.0.validate()?;
                payload.0
            }
        })
    }
}

const LEVEL_ONE: SecurityParameters = SecurityParameters {
    max_handshake_duration: Duration::from_secs(30),
    max_handshake_delay: Duration::from_millis(0),
    key_update: KeyUpdateParameters {
        min_interval: Duration::from_secs(3600),
        max_interval: Duration::from_secs(7200),
        require_after_num_processed_bytes: 1024 * 1024 * 1024,
    },
    message: MessageParameters {
        min_random_data_prefix_size: 0,
        max_random_data_prefix_size: 0,
        min_internal_random_data_size: 0,
        max_internal_random_data_size: 0,
        age_tolerance: Duration::from_secs(60),
    },
    noise: NoiseParameters {
        enabled: false,
        interval: Duration::from_secs(60),
        max_messages_per_interval: 0,
        min_message_size: 0,
        max_message_size: 0,
    },
};

const LEVEL_TWO: SecurityParameters = SecurityParameters {
    max_handshake_duration: Duration::from_secs(30),
    max_handshake_delay: Duration::from_millis(100),
    key_update: KeyUpdateParameters {
        min_interval: Duration::from_secs(1800),
        max_interval: Duration::from_secs(3600),
        require_after_num_processed_bytes: 512 * 1024 * 1024,
    },
    message: MessageParameters {
        min_random_data_prefix_size: 0,
        max_random_data_prefix_size: 64,
        min_internal_random_data_size: 0,
        max_internal_random_data_size: 16,
        age_tolerance: Duration::from_secs(60),
    },
    noise: NoiseParameters {
        enabled: true,
        interval: Duration::from_secs(120),
        max_messages_per_interval: 1,
        min_message_size: 64,
        max_message_size: 256,
    },
};

const LEVEL_THREE: SecurityParameters = SecurityParameters {
    max_handshake_duration: Duration::from_secs(30),
    max_handshake_delay: Duration::from_millis(250),
    key_update: KeyUpdateParameters {
        min_interval: Duration::from_secs(900),
        max_interval: Duration::from_secs(1800),
        require_after_num_processed_bytes: 256 * 1024 * 1024,
    },
    message: MessageParameters {
        min_random_data_prefix_size: 0,
        max_random_data_prefix_size: 256,
        min_internal_random_data_size: 0,
        max_internal_random_data_size: 64,
        age_tolerance: Duration::from_secs(45),
    },
    noise: NoiseParameters {
        enabled: true,
        interval: Duration::from_secs(60),
        max_messages_per_interval: 2,
        min_message_size: 64,
        max_message_size: 1024,
    },
};

const LEVEL_FOUR: SecurityParameters = SecurityParameters {
    max_handshake_duration: Duration::from_secs(20),
    max_handshake_delay: Duration::from_millis(500),
    key_update: KeyUpdateParameters {
        min_interval: Duration::from_secs(300),
        max_interval: Duration::from_secs(900),
        require_after_num_processed_bytes: 128 * 1024 * 1024,
    },
    message: MessageParameters {
        min_random_data_prefix_size: 32,
        max_random_data_prefix_size: 1024,
        min_internal_random_data_size: 16,
        max_internal_random_data_size: 256,
        age_tolerance: Duration::from_secs(30),
    },
    noise: NoiseParameters {
        enabled: true,
        interval: Duration::from_secs(30),
        max_messages_per_interval: 4,
        min_message_size: 64,
        max_message_size: 4096,
    },
};

const LEVEL_FIVE: SecurityParameters = SecurityParameters {
    max_handshake_duration: Duration::from_secs(15),
    max_handshake_delay: Duration::from_millis(1000),
    key_update: KeyUpdateParameters {
        min_interval: Duration::from_secs(60),
        max_interval: Duration::from_secs(300),
        require_after_num_processed_bytes: timing_const::MIN_REQUIRE_AFTER_NUM_PROCESSED_BYTES,
    },
    message: MessageParameters {
        min_random_data_prefix_size: 64,
        max_random_data_prefix_size: 4096,
        min_internal_random_data_size: 64,
        max_internal_random_data_size: 1024,
        age_tolerance: Duration::from_secs(15),
    },
    noise: NoiseParameters {
        enabled: true,
        interval: Duration::from_secs(10),
        max_messages_per_interval: 8,
        min_message_size: 64,
        max_message_size: 16384,
    },
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preset_levels_all_validate() {
        for level in [
            SecurityLevel::One,
            SecurityLevel::Two,
            SecurityLevel::Three,
            SecurityLevel::Four,
            SecurityLevel::Five,
        ] {
            level.parameters().unwrap().validate().unwrap();
        }
    }

    #[test]
    fn level_one_disables_noise_and_padding() {
        let params = SecurityLevel::One.parameters().unwrap();
        assert!(!params.noise.enabled);
        assert_eq!(params.message.max_random_data_prefix_size, 0);
    }

    #[test]
    fn level_five_maximizes_noise_and_padding() {
        let one = SecurityLevel::One.parameters().unwrap();
        let five = SecurityLevel::Five.parameters().unwrap();
        assert!(five.noise.max_messages_per_interval > one.noise.max_messages_per_interval);
        assert!(five.message.max_random_data_prefix_size > one.message.max_random_data_prefix_size);
    }

    #[test]
    fn custom_rejects_handshake_delay_exceeding_duration() {
        let mut params = LEVEL_THREE;
        params.max_handshake_delay = params.max_handshake_duration + Duration::from_secs(1);
        assert!(params.validate().is_err());
    }

    #[test]
    fn custom_rejects_too_small_rekey_threshold() {
        let mut params = LEVEL_THREE;
        params.key_update.require_after_num_processed_bytes = 1024;
        assert!(params.validate().is_err());
    }

    #[test]
    fn custom_rejects_inverted_noise_bounds() {
        let mut params = LEVEL_THREE;
        params.noise.min_message_size = params.noise.max_message_size + 1;
        assert!(params.validate().is_err());
    }

    #[test]
    fn custom_level_validates_through_parameters() {
        let mut params = LEVEL_THREE;
        params.key_update.min_interval = params.key_update.max_interval + Duration::from_secs(1);
        let level = SecurityLevel::Custom(SecurityParametersPayload(params));
        assert!(level.parameters().is_err());
    }
}
