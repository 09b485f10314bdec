//! Peer and extender identifiers.
//!
//! `PeerUUID` and `ExtenderUUID` share the same 128-bit shape: two
//! reserved bits marking which kind of UUID this is, one reserved bit
//! recording the signing-algorithm family the UUID was bound to at
//! creation, and the remaining bits derived from the owner's public key so
//! the UUID is self-verifying. `PeerLUID` is an unrelated, process-local
//! monotonic handle with no cryptographic meaning.

use std::sync::atomic::{AtomicU64, Ordering};

use blake2::{Blake2s256, Digest};
use uuid::Uuid;

/// Which kind of entity a UUID identifies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UuidKind {
    /// A peer endpoint.
    Peer,
    /// A registered extender module.
    Extender,
}

impl UuidKind {
    fn bits(self) -> u8 {
        match self {
            UuidKind::Peer => 0b01,
            UuidKind::Extender => 0b10,
        }
    }

    fn from_bits(bits: u8) -> Option<Self> {
        match bits {
            0b01 => Some(UuidKind::Peer),
            0b10 => Some(UuidKind::Extender),
            _ => None,
        }
    }
}

/// The signing-algorithm family a UUID was bound to at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SigningAlgorithmFamily {
    /// Ed25519.
    Ed25519,
    /// Ed448.
    Ed448,
}

impl SigningAlgorithmFamily {
    fn bit(self) -> u8 {
        match self {
            SigningAlgorithmFamily::Ed25519 => 0,
            SigningAlgorithmFamily::Ed448 => 1,
        }
    }

    fn from_bit(bit: u8) -> Self {
        if bit == 0 { SigningAlgorithmFamily::Ed25519 } else { SigningAlgorithmFamily::Ed448 }
    }
}

/// Reserved-tag byte layout: top 2 bits are the kind, next bit is the
/// signing-algorithm family, remaining 5 bits come from the public-key
/// digest along with every other byte.
fn tagged_bytes(kind: UuidKind, algo: SigningAlgorithmFamily, public_key: &[u8]) -> [u8; 16] {
    let mut hasher = Blake2s256::new();
    hasher.update([kind.bits(), algo.bit()]);
    hasher.update(public_key);
    let digest = hasher.finalize();

    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest[..16]);
    bytes[0] = (kind.bits() << 6) | (algo.bit() << 5) | (bytes[0] & 0x1F);
    bytes
}

fn verify_tagged(uuid: &Uuid, kind: UuidKind, public_key: &[u8]) -> bool {
    let tag = uuid.as_bytes()[0];
    let found_kind = match UuidKind::from_bits((tag >> 6) & 0b11) {
        Some(k) => k,
        None => return false,
    };
    if found_kind != kind {
        return false;
    }
    let algo = SigningAlgorithmFamily::from_bit((tag >> 5) & 0b1);
    let expected = tagged_bytes(kind, algo, public_key);
    expected == *uuid.as_bytes()
}

/// A 128-bit, self-verifying identifier for a peer endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerUUID(Uuid);

impl PeerUUID {
    /// Derive a peer UUID bound to `public_key` under the given signing
    /// algorithm family.
    pub fn from_public_key(algo: SigningAlgorithmFamily, public_key: &[u8]) -> Self {
        Self(Uuid::from_bytes(tagged_bytes(UuidKind::Peer, algo, public_key)))
    }

    /// Parse a UUID from its textual form without verifying it against a key.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// The underlying UUID value.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }

    /// Verify this UUID was derived from `public_key`.
    ///
    /// Returns `false` if the type bits mark this as an extender UUID or
    /// the digest does not match.
    pub fn verify(&self, public_key: &[u8]) -> bool {
        verify_tagged(&self.0, UuidKind::Peer, public_key)
    }
}

impl std::fmt::Display for PeerUUID {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

#[cfg(feature = "config")]
impl serde::Serialize for PeerUUID {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.to_string())
    }
}

#[cfg(feature = "config")]
impl<'de> serde::Deserialize<'de> for PeerUUID {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        let uuid = Uuid::parse_str(&text).map_err(serde::de::Error::custom)?;
        Ok(Self(uuid))
    }
}

/// A 128-bit, self-verifying identifier for a registered extender.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExtenderUUID(Uuid);

impl ExtenderUUID {
    /// Derive an extender UUID bound to `public_key`.
    pub fn from_public_key(algo: SigningAlgorithmFamily, public_key: &[u8]) -> Self {
        Self(Uuid::from_bytes(tagged_bytes(UuidKind::Extender, algo, public_key)))
    }

    /// Parse a UUID from its textual form without verifying it against a key.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// The underlying UUID value.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }

    /// Verify this UUID was derived from `public_key`.
    pub fn verify(&self, public_key: &[u8]) -> bool {
        verify_tagged(&self.0, UuidKind::Extender, public_key)
    }

    /// Reserved UUID for non-extender control messages, i.e. messages
    /// whose `type_and_size` does not carry an `extender_uuid` field.
    pub fn control() -> Self {
        // 00000000-0000-0900-0600-000000000000
        Self(Uuid::from_bytes([
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x09, 0x00, 0x06, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x00, 0x00,
        ]))
    }
}

impl Default for ExtenderUUID {
    fn default() -> Self {
        Self::control()
    }
}

impl std::fmt::Display for ExtenderUUID {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Process-local monotonic peer handle. Never reused within a process
/// lifetime, even after the peer it named has disconnected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerLUID(u64);

impl PeerLUID {
    /// The raw handle value.
    pub fn value(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for PeerLUID {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Allocates monotonically increasing [`PeerLUID`]s for a single process.
#[derive(Debug, Default)]
pub struct PeerLuidAllocator {
    next: AtomicU64,
}

impl PeerLuidAllocator {
    /// Create a fresh allocator starting at 1 (0 is never issued).
    pub fn new() -> Self {
        Self { next: AtomicU64::new(1) }
    }

    /// Allocate the next handle. Never returns the same value twice for a
    /// given allocator instance.
    pub fn allocate(&self) -> PeerLUID {
        PeerLUID(self.next.fetch_add(1, Ordering::Relaxed))
    }
}
