//! `StartupParameters`: the one-time configuration a `Local` instance is
//! constructed with.
//!
//! Grounded on `QuantumGateLib/Core/Local.h`'s `StartupParameters`
//! aggregate and `Local::ValidateInitParameters`.

use std::collections::HashSet;
use std::net::IpAddr;

use serde::{Deserialize, Serialize};

use crate::core::error::{ArgumentError, Result};
use crate::core::id::PeerUUID;
use crate::crypto::{Asymmetric, Compression, Hash, Signature, Symmetric};

/// A raw asymmetric key pair, PEM-encoded for NIST curves or raw octets
/// for modern curves, supplied when `require_authentication` is set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyPair {
    /// Private key material.
    pub private: Vec<u8>,
    /// Public key material.
    pub public: Vec<u8>,
}

/// The non-empty algorithm sets a `Local` instance advertises during
/// `MetaExchange`. Each set must be a non-empty subset of §4.1's
/// vocabulary; emptiness is rejected at validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupportedAlgorithms {
    /// Supported hash algorithms, ascending.
    pub hash: HashSet<Hash>,
    /// Supported primary-slot asymmetric algorithms.
    pub primary_asymmetric: HashSet<Asymmetric>,
    /// Supported secondary-slot asymmetric algorithms.
    pub secondary_asymmetric: HashSet<Asymmetric>,
    /// Supported symmetric AEAD algorithms.
    pub symmetric: HashSet<Symmetric>,
    /// Supported compression algorithms. May be empty if compression is
    /// never desired, unlike the other sets.
    pub compression: HashSet<Compression>,
    /// Supported signature algorithms, used only when authentication is
    /// required.
    pub signature: HashSet<Signature>,
}

impl SupportedAlgorithms {
    fn validate(&self) -> Result<()> {
        if self.hash.is_empty() {
            return Err(ArgumentError::OutOfRange("supported_algorithms.hash must not be empty".into()).into());
        }
        if self.primary_asymmetric.is_empty() {
            return Err(ArgumentError::OutOfRange(
                "supported_algorithms.primary_asymmetric must not be empty".into(),
            )
            .into());
        }
        if self.secondary_asymmetric.is_empty() {
            return Err(ArgumentError::OutOfRange(
                "supported_algorithms.secondary_asymmetric must not be empty".into(),
            )
            .into());
        }
        if self.symmetric.is_empty() {
            return Err(ArgumentError::OutOfRange(
                "supported_algorithms.symmetric must not be empty".into(),
            )
            .into());
        }
        Ok(())
    }
}

/// Listener configuration: which TCP ports to bind, and whether to
/// attempt NAT traversal (accepted and plumbed through but, per the
/// Non-goals, not itself a hole-punching implementation).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListenersConfig {
    /// TCP ports to listen on.
    pub tcp_ports: HashSet<u16>,
    /// Whether the listener is active at all.
    pub enable: bool,
    /// Whether to attempt NAT traversal. Inert beyond being stored and
    /// reported; no hole-punching algorithm is implemented.
    pub enable_nat_traversal: bool,
}

impl Default for ListenersConfig {
    fn default() -> Self {
        Self { tcp_ports: HashSet::new(), enable: false, enable_nat_traversal: false }
    }
}

/// Relay participation configuration.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RelaysConfig {
    /// Whether this instance will create or forward relay circuits.
    pub enable: bool,
    /// IPv4 prefix bits excluded from next-hop selection (same-subnet
    /// loop prevention).
    pub ipv4_excluded_prefix_bits: u8,
    /// IPv6 prefix bits excluded from next-hop selection.
    pub ipv6_excluded_prefix_bits: u8,
}

impl Default for RelaysConfig {
    fn default() -> Self {
        Self { enable: true, ipv4_excluded_prefix_bits: 24, ipv6_excluded_prefix_bits: 64 }
    }
}

/// The complete startup configuration for a `Local` instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartupParameters {
    /// This instance's self-verifying peer identifier.
    pub uuid: PeerUUID,
    /// The asymmetric key pair bound to `uuid`, required when
    /// `require_authentication` is set.
    pub keys: Option<KeyPair>,
    /// An opaque buffer mixed into session key derivation on both ends
    /// when present, in addition to the handshake-derived shared secret.
    pub global_shared_secret: Option<Vec<u8>>,
    /// Whether peers must complete the signature-based Authentication
    /// handshake phase.
    pub require_authentication: bool,
    /// The algorithm sets advertised during `MetaExchange`.
    pub supported_algorithms: SupportedAlgorithms,
    /// Listener configuration.
    pub listeners: ListenersConfig,
    /// How many asymmetric key pairs to pre-generate per algorithm, to
    /// smooth handshake latency for busy listeners.
    pub num_pre_generated_keys_per_algorithm: u32,
    /// Relay participation configuration.
    pub relays: RelaysConfig,
    /// Whether the extender multiplexer is active at all.
    pub enable_extenders: bool,
}

impl StartupParameters {
    /// Validate every rule from the external-interface spec. Returns the
    /// first violation found.
    pub fn validate(&self) -> Result<()> {
        self.supported_algorithms.validate()?;
        if self.require_authentication && self.keys.is_none() {
            return Err(ArgumentError::OutOfRange(
                "keys is required when require_authentication is set".into(),
            )
            .into());
        }
        if self.relays.ipv4_excluded_prefix_bits > 32 {
            return Err(ArgumentError::OutOfRange(
                "relays.ipv4_excluded_prefix_bits must be at most 32".into(),
            )
            .into());
        }
        if self.relays.ipv6_excluded_prefix_bits > 128 {
            return Err(ArgumentError::OutOfRange(
                "relays.ipv6_excluded_prefix_bits must be at most 128".into(),
            )
            .into());
        }
        Ok(())
    }

    /// The prefix-bit width used to exclude a next-hop candidate sharing a
    /// subnet with an address of this family; see [`RelaysConfig`].
    pub fn excluded_prefix_bits(&self, addr: IpAddr) -> u8 {
        match addr {
            IpAddr::V4(_) => self.relays.ipv4_excluded_prefix_bits,
            IpAddr::V6(_) => self.relays.ipv6_excluded_prefix_bits,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::id::SigningAlgorithmFamily;

    fn sample_algorithms() -> SupportedAlgorithms {
        SupportedAlgorithms {
            hash: [Hash::Blake2s256].into_iter().collect(),
            primary_asymmetric: [Asymmetric::EcdhX25519].into_iter().collect(),
            secondary_asymmetric: [Asymmetric::KemNtruPrime].into_iter().collect(),
            symmetric: [Symmetric::ChaCha20Poly1305].into_iter().collect(),
            compression: HashSet::new(),
            signature: [Signature::Ed25519].into_iter().collect(),
        }
    }

    fn sample_params() -> StartupParameters {
        StartupParameters {
            uuid: PeerUUID::from_public_key(SigningAlgorithmFamily::Ed25519, b"a sample public key for testing."),
            keys: None,
            global_shared_secret: None,
            require_authentication: false,
            supported_algorithms: sample_algorithms(),
            listeners: ListenersConfig::default(),
            num_pre_generated_keys_per_algorithm: 4,
            relays: RelaysConfig::default(),
            enable_extenders: true,
        }
    }

    #[test]
    fn valid_parameters_pass() {
        assert!(sample_params().validate().is_ok());
    }

    #[test]
    fn empty_algorithm_set_is_rejected() {
        let mut params = sample_params();
        params.supported_algorithms.hash.clear();
        assert!(params.validate().is_err());
    }

    #[test]
    fn require_authentication_without_keys_is_rejected() {
        let mut params = sample_params();
        params.require_authentication = true;
        assert!(params.validate().is_err());
    }

    #[test]
    fn oversized_excluded_prefix_bits_is_rejected() {
        let mut params = sample_params();
        params.relays.ipv4_excluded_prefix_bits = 33;
        assert!(params.validate().is_err());
    }
}
