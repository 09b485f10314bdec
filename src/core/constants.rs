//! Protocol-wide constants.

use std::time::Duration;

/// MessageTransport outer-frame size limits.
pub mod transport {
    /// Maximum size of a complete MessageTransport frame on the wire.
    pub const MAX_MESSAGE_SIZE: usize = 1_048_576; // 2^20
    /// Maximum size of the plaintext carried inside a frame.
    pub const MAX_MESSAGE_DATA_SIZE: usize = 1_048_021;
    /// Maximum plaintext plus the reserved internal random-padding budget.
    pub const MAX_MESSAGE_AND_RANDOM_DATA_SIZE: usize = 1_048_085;
    /// Upper bound on the data-size obfuscation bit offset.
    pub const MAX_MESSAGE_DATA_SIZE_OFFSET: u8 = 12;
    /// Default obfuscation offset when none is negotiated yet.
    pub const DEFAULT_MESSAGE_DATA_SIZE_OFFSET: u8 = 9;
    /// Size of the BLAKE2s-256 keyed HMAC tag in the outer header.
    pub const HMAC_SIZE: usize = 32;
    /// Size of the obfuscated size-and-random-bits field.
    pub const SIZE_FIELD_SIZE: usize = 4;
    /// Size of the nonce seed field.
    pub const NONCE_SEED_SIZE: usize = 4;
    /// Size of the fixed-size outer header preceding ciphertext.
    pub const OHEADER_SIZE: usize = SIZE_FIELD_SIZE + NONCE_SEED_SIZE + HMAC_SIZE;
    /// Mask covering the low 20 bits used for the data-size field.
    pub const SIZE_MASK: u32 = 0xF_FFFF;
    /// Size of the inner header carried inside the plaintext.
    pub const IHEADER_SIZE: usize = 1 + 8 + 2 + 2;
}

/// Inner Message frame constants.
pub mod message {
    /// Number of bits reserved for the inner message data size.
    pub const SIZE_BITS: u32 = 21;
    /// Mask covering the low 21 bits of `type_and_size`.
    pub const SIZE_MASK: u32 = (1 << SIZE_BITS) - 1;
    /// Minimum payload length a message must reach before compression is attempted.
    pub const COMPRESSION_THRESHOLD: usize = 128;
    /// Size of an ExtenderUUID field when present.
    pub const EXTENDER_UUID_SIZE: usize = 16;
}

/// Access-manager reputation constants (fixed, not configurable).
pub mod reputation {
    /// Ceiling a reputation score can never exceed.
    pub const MAX_SCORE: i16 = 100;
    /// Score at or below which a reputation is "unacceptable".
    pub const UNACCEPTABLE_THRESHOLD: i16 = 0;
    /// Quantum added by a scheduled auto-improve tick or `ImproveMinimal`.
    pub const IMPROVE_MINIMAL: i16 = 20;
    /// Quantum subtracted for a minor infraction.
    pub const DETERIORATE_MINIMAL: i16 = -20;
    /// Quantum subtracted for a moderate infraction (e.g. rate-limit trip).
    pub const DETERIORATE_MODERATE: i16 = -50;
    /// Quantum subtracted for a severe infraction.
    pub const DETERIORATE_SEVERE: i16 = -200;
}

/// Relay data-rate limiter constants.
pub mod relay {
    /// Outstanding-message window size per link direction.
    pub const WINDOW_SIZE: usize = 2;
    /// Floor for the estimated MTU, in bytes.
    pub const MIN_MTU_SIZE: usize = 1 << 16; // 65536
    /// Smoothing factor for the EWMA MTU update (weight kept on the old value).
    pub const MTU_EWMA_WEIGHT: f64 = 0.95;
    /// Maximum number of extenders registered at once.
    pub const MAX_EXTENDERS: usize = 4_096;
}

/// Default timing constants (overridable via `SecurityParameters`).
pub mod timing {
    use super::Duration;

    /// Default upper bound on a single handshake's duration.
    pub const DEFAULT_MAX_HANDSHAKE_DURATION: Duration = Duration::from_secs(30);
    /// Default connect timeout.
    pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(60);
    /// Default relay-connect timeout.
    pub const DEFAULT_RELAY_CONNECT_TIMEOUT: Duration = Duration::from_secs(60);
    /// Default grace period a closed relay link survives before eviction.
    pub const DEFAULT_RELAY_GRACE_PERIOD: Duration = Duration::from_secs(60);
    /// Minimum required `require_after_num_processed_bytes` for custom security parameters.
    pub const MIN_REQUIRE_AFTER_NUM_PROCESSED_BYTES: u64 = 10 * 1024 * 1024;
}

/// Protocol version carried in MetaExchange.
pub const PROTOCOL_VERSION_MAJOR: u16 = 1;
/// Protocol version minor component.
pub const PROTOCOL_VERSION_MINOR: u16 = 0;
