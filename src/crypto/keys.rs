//! Key material containers.
//!
//! Grounded on `QuantumGateLib/Crypto/KeyData.h`: asymmetric key data is a
//! per-handshake-step scratch struct holding both local and peer key
//! material plus the derived shared secret; symmetric key data is the
//! output of HKDF expansion, one instance per direction.

use zeroize::{Zeroize, ZeroizeOnDrop};

use super::algorithms::{Asymmetric, Compression, Hash, Symmetric};

/// Which side of a handshake generated a given `AsymmetricKeyData`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AsymmetricKeyOwner {
    /// The connection initiator.
    Alice,
    /// The connection responder.
    Bob,
}

/// What kind of operation an asymmetric algorithm performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyExchangeType {
    /// Both sides derive a shared secret from their own private key and
    /// the peer's public key.
    DiffieHellman,
    /// One side encapsulates to the other's public key; the other
    /// decapsulates using its private key.
    KeyEncapsulation,
    /// The algorithm signs and verifies rather than exchanging secrets.
    DigitalSigning,
}

/// Scratch state for one asymmetric key-exchange step.
///
/// Private key material is held in `Vec<u8>` fields that are zeroized on
/// drop; nothing here implements `Clone` to avoid accidental copies of
/// secret material outliving their owner.
#[derive(ZeroizeOnDrop)]
pub struct AsymmetricKeyData {
    #[zeroize(skip)]
    algorithm: Asymmetric,
    #[zeroize(skip)]
    exchange_type: KeyExchangeType,
    #[zeroize(skip)]
    owner: AsymmetricKeyOwner,

    /// Local private key bytes, in the native encoding for `algorithm`.
    pub local_private_key: Vec<u8>,
    /// Local public key bytes.
    pub local_public_key: Vec<u8>,
    /// Peer's public key bytes, once known.
    pub peer_public_key: Vec<u8>,
    /// The derived shared secret, once computed.
    pub shared_secret: Vec<u8>,
    /// KEM-only: the ciphertext produced by encapsulation, sent to the peer
    /// so it can decapsulate.
    pub encrypted_shared_secret: Vec<u8>,
}

impl AsymmetricKeyData {
    /// Create empty key data for `algorithm`, owned by `owner`.
    pub fn new(algorithm: Asymmetric, owner: AsymmetricKeyOwner) -> Self {
        let exchange_type = if algorithm.is_diffie_hellman() {
            KeyExchangeType::DiffieHellman
        } else {
            KeyExchangeType::KeyEncapsulation
        };
        Self {
            algorithm,
            exchange_type,
            owner,
            local_private_key: Vec::new(),
            local_public_key: Vec::new(),
            peer_public_key: Vec::new(),
            shared_secret: Vec::new(),
            encrypted_shared_secret: Vec::new(),
        }
    }

    /// Create key data for a signing key pair.
    pub fn new_signing(algorithm: Asymmetric, owner: AsymmetricKeyOwner) -> Self {
        let mut data = Self::new(algorithm, owner);
        data.exchange_type = KeyExchangeType::DigitalSigning;
        data
    }

    /// The bound algorithm.
    pub fn algorithm(&self) -> Asymmetric {
        self.algorithm
    }

    /// The exchange type this key data performs.
    pub fn key_exchange_type(&self) -> KeyExchangeType {
        self.exchange_type
    }

    /// Which side owns this key data.
    pub fn owner(&self) -> AsymmetricKeyOwner {
        self.owner
    }

    /// Release all key material, zeroing it in place.
    pub fn release_keys(&mut self) {
        self.local_private_key.zeroize();
        self.local_public_key.zeroize();
        self.peer_public_key.zeroize();
        self.shared_secret.zeroize();
        self.encrypted_shared_secret.zeroize();
        self.local_private_key.clear();
        self.local_public_key.clear();
        self.peer_public_key.clear();
        self.shared_secret.clear();
        self.encrypted_shared_secret.clear();
    }
}

/// How a `SymmetricKeyData` instance came to exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymmetricKeyType {
    /// Generated directly from a CSPRNG (used for global shared secrets).
    AutoGen,
    /// Derived from a shared secret via HKDF.
    Derived,
}

/// One direction's symmetric key material: an encryption key, an
/// authentication key, and the algorithms bound to them.
#[derive(ZeroizeOnDrop)]
pub struct SymmetricKeyData {
    #[zeroize(skip)]
    kind: SymmetricKeyType,
    #[zeroize(skip)]
    hash_algorithm: Hash,
    #[zeroize(skip)]
    symmetric_algorithm: Symmetric,
    #[zeroize(skip)]
    compression_algorithm: Option<Compression>,

    /// 32-byte AEAD encryption key.
    pub key: Vec<u8>,
    /// 64-byte HMAC authentication key.
    pub auth_key: Vec<u8>,
    #[zeroize(skip)]
    num_bytes_processed: u64,
}

impl SymmetricKeyData {
    /// Create empty symmetric key data bound to the given algorithms.
    pub fn new(
        kind: SymmetricKeyType,
        hash_algorithm: Hash,
        symmetric_algorithm: Symmetric,
        compression_algorithm: Option<Compression>,
    ) -> Self {
        Self {
            kind,
            hash_algorithm,
            symmetric_algorithm,
            compression_algorithm,
            key: Vec::new(),
            auth_key: Vec::new(),
            num_bytes_processed: 0,
        }
    }

    /// How this key material was produced.
    pub fn kind(&self) -> SymmetricKeyType {
        self.kind
    }

    /// The hash algorithm used for this direction's HMAC/HKDF.
    pub fn hash_algorithm(&self) -> Hash {
        self.hash_algorithm
    }

    /// The AEAD algorithm bound to this key.
    pub fn symmetric_algorithm(&self) -> Symmetric {
        self.symmetric_algorithm
    }

    /// The compression algorithm negotiated alongside this key, if any.
    pub fn compression_algorithm(&self) -> Option<Compression> {
        self.compression_algorithm
    }

    /// Bytes encrypted or decrypted under this key so far.
    pub fn num_bytes_processed(&self) -> u64 {
        self.num_bytes_processed
    }

    /// Record that `n` additional bytes were processed under this key.
    /// The peer session uses this to trigger a key update once
    /// `require_after_num_processed_bytes` is exceeded.
    pub fn add_bytes_processed(&mut self, n: u64) {
        self.num_bytes_processed = self.num_bytes_processed.saturating_add(n);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn release_keys_clears_buffers() {
        let mut data = AsymmetricKeyData::new(Asymmetric::EcdhX25519, AsymmetricKeyOwner::Alice);
        data.local_private_key = vec![1, 2, 3];
        data.release_keys();
        assert!(data.local_private_key.is_empty());
    }

    #[test]
    fn symmetric_key_tracks_bytes_processed() {
        let mut key = SymmetricKeyData::new(
            SymmetricKeyType::Derived,
            Hash::Blake2s256,
            Symmetric::ChaCha20Poly1305,
            None,
        );
        key.add_bytes_processed(1024);
        key.add_bytes_processed(2048);
        assert_eq!(key.num_bytes_processed(), 3072);
    }

    #[test]
    fn kem_algorithm_gets_key_encapsulation_exchange_type() {
        let data = AsymmetricKeyData::new(Asymmetric::KemNtruPrime, AsymmetricKeyOwner::Bob);
        assert_eq!(data.key_exchange_type(), KeyExchangeType::KeyEncapsulation);
    }
}
