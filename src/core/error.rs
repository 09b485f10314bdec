//! Layered error taxonomy for QuantumGate.
//!
//! Mirrors the error categories used throughout the core: argument,
//! policy, protocol, transport, timeout, and resource errors compose into
//! a single top-level [`QuantumGateError`].

use thiserror::Error;

/// Invalid-argument conditions: malformed addresses, masks, algorithms,
/// UUID/key mismatches, and out-of-range timing parameters.
#[derive(Debug, Error, Clone)]
pub enum ArgumentError {
    /// A textual address or CIDR range failed to parse.
    #[error("invalid address or mask: {0}")]
    InvalidAddress(String),

    /// A requested algorithm identifier is not in the supported vocabulary.
    #[error("unrecognized algorithm: {0}")]
    UnrecognizedAlgorithm(String),

    /// A supplied public key does not verify against the claimed UUID.
    #[error("UUID does not verify against supplied public key")]
    UuidKeyMismatch,

    /// A timing or size parameter fell outside its allowed range.
    #[error("parameter out of range: {0}")]
    OutOfRange(String),
}

/// Access-control denials: never retried internally, surfaced immediately.
#[derive(Debug, Error, Clone)]
pub enum PolicyError {
    /// The address is blocked by an IP filter.
    #[error("address blocked by filter")]
    AddressBlocked,

    /// The address's reputation score is not acceptable.
    #[error("reputation not acceptable")]
    ReputationUnacceptable,

    /// A configured per-subnet connection limit has been reached.
    #[error("subnet connection limit reached")]
    SubnetLimitReached,

    /// The peer is not present in the allow list under `require_authentication`.
    #[error("peer not in allow list")]
    PeerNotAllowed,

    /// An existing session was reused when the caller forbade reuse.
    #[error("connection reuse forbidden by caller")]
    ReuseForbidden,
}

/// Wire-level and session-level protocol violations.
#[derive(Debug, Error, Clone)]
pub enum ProtocolError {
    /// The declared frame size exceeds the maximum message size.
    #[error("frame too large: {declared} > {max}")]
    FrameTooLarge {
        /// Declared size in bytes.
        declared: usize,
        /// Maximum permitted size in bytes.
        max: usize,
    },

    /// HMAC verification failed against the current key; the session should
    /// retry against any alternate candidate key before giving up.
    #[error("HMAC mismatch, alternate key retry available")]
    HmacMismatch,

    /// AEAD decryption failed (tag invalid or ciphertext corrupted) against
    /// every candidate key.
    #[error("AEAD decryption failed")]
    DecryptionFailed,

    /// The inner message's declared size does not match its actual payload.
    #[error("inner size mismatch: declared {declared}, actual {actual}")]
    InnerSizeMismatch {
        /// Declared size.
        declared: usize,
        /// Actual size.
        actual: usize,
    },

    /// An unrecognized inner message type was encountered.
    #[error("unknown message type: {0}")]
    UnknownMessageType(u16),

    /// Decompressing a payload would exceed the maximum plaintext size.
    #[error("decompressed output exceeds cap")]
    DecompressionBomb,

    /// A handshake message arrived while the session was in the wrong phase.
    #[error("handshake message received in wrong phase")]
    WrongHandshakePhase,

    /// A message counter value has already been consumed (replay).
    #[error("counter replay detected")]
    CounterReplay,

    /// No asymmetric, symmetric, hash, or compression algorithm is common
    /// to both sides' supported sets.
    #[error("no common algorithm in negotiation")]
    NoCommonAlgorithm,
}

/// Timeout categories, each distinct so callers can tell which operation expired.
#[derive(Debug, Error, Clone, Copy)]
pub enum TimeoutError {
    /// The handshake did not complete within `max_handshake_duration`.
    #[error("handshake timed out")]
    Handshake,
    /// A direct connect attempt did not complete within `connect_timeout`.
    #[error("connect timed out")]
    Connect,
    /// A relay connect attempt did not complete within `relay.connect_timeout`.
    #[error("relay connect timed out")]
    RelayConnect,
    /// A key-update cycle did not complete in time.
    #[error("key update timed out")]
    KeyUpdate,
}

/// Resource exhaustion conditions.
#[derive(Debug, Error, Clone, Copy)]
pub enum ResourceError {
    /// An internal allocator could not satisfy a request.
    #[error("allocator exhausted")]
    AllocatorExhausted,
    /// The process-wide extender limit (4096) has been reached.
    #[error("too many extenders registered")]
    TooManyExtenders,
    /// A configured maximum peer count has been reached.
    #[error("too many peers")]
    TooManyPeers,
}

/// Top-level QuantumGate error, composing every category above.
#[derive(Debug, Error)]
pub enum QuantumGateError {
    /// Invalid argument supplied by the caller.
    #[error("argument error: {0}")]
    Argument(#[from] ArgumentError),

    /// Access-control policy denial.
    #[error("policy error: {0}")]
    Policy(#[from] PolicyError),

    /// Wire-protocol or session-state violation.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Underlying transport I/O failure.
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// An operation exceeded its configured time budget.
    #[error("timeout: {0}")]
    Timeout(#[from] TimeoutError),

    /// A resource limit was exceeded.
    #[error("resource error: {0}")]
    Resource(#[from] ResourceError),

    /// Startup or security parameter validation failed.
    #[error("configuration error: {0}")]
    Config(String),
}

/// Convenience result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, QuantumGateError>;

impl ProtocolError {
    /// Whether this protocol error should be retried against an alternate
    /// key during a key-update overlap window rather than failing the
    /// session outright.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ProtocolError::HmacMismatch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hmac_mismatch_is_retryable() {
        assert!(ProtocolError::HmacMismatch.is_retryable());
        assert!(!ProtocolError::DecryptionFailed.is_retryable());
    }

    #[test]
    fn error_conversion_chains() {
        let err: QuantumGateError = PolicyError::AddressBlocked.into();
        assert!(matches!(err, QuantumGateError::Policy(PolicyError::AddressBlocked)));
    }
}
