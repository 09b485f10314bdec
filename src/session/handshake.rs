//! Handshake phase payloads and the state machine that drives them.
//!
//! Grounded on `Core/Peer/PeerHandshake.cpp`'s phase sequence: MetaExchange
//! negotiates protocol version, algorithms, and transport obfuscation
//! settings; PrimaryKeyExchange and SecondaryKeyExchange each run one
//! asymmetric algorithm to contribute key material; Authentication is
//! skipped unless either side requires it; SessionInit exchanges the
//! locally registered extender UUIDs. Every phase payload is hashed into a
//! running transcript so Authentication signs the whole handshake, not
//! just its own message.

use crate::core::constants::PROTOCOL_VERSION_MAJOR;
use crate::core::constants::PROTOCOL_VERSION_MINOR;
use crate::core::error::{ArgumentError, ProtocolError, Result};
use crate::core::id::{ExtenderUUID, PeerUUID};
use crate::crypto::algorithms::{choose_algorithm, sort_algorithms};
use crate::crypto::keys::{AsymmetricKeyData, AsymmetricKeyOwner};
use crate::crypto::{self, Asymmetric, Compression, Hash, Signature, Symmetric};
use crate::message::transport::DataSizeSettings;

use super::state::Role;
use super::wire::{Reader, Writer};

macro_rules! algo_codec {
    ($name:ident, $ty:ty, [$($variant:ident = $value:expr),+ $(,)?]) => {
        fn $name(value: u16) -> Option<$ty> {
            match value {
                $($value => Some(<$ty>::$variant),)+
                _ => None,
            }
        }
    };
}

algo_codec!(hash_from_u16, Hash, [Sha256 = 1, Blake2s256 = 2, Sha512 = 3, Blake2b512 = 4]);
algo_codec!(
    asymmetric_from_u16,
    Asymmetric,
    [
        EcdhX25519 = 1,
        KemNewHope = 2,
        KemNtruPrime = 3,
        EcdhX448 = 4,
        KemClassicMcEliece = 5,
        EcdhSecp521r1 = 6,
    ]
);
algo_codec!(signature_from_u16, Signature, [Ed25519 = 1, Ed448 = 2]);
algo_codec!(symmetric_from_u16, Symmetric, [ChaCha20Poly1305 = 1, Aes256Gcm = 2]);
algo_codec!(compression_from_u16, Compression, [Deflate = 1, Zstandard = 2]);

fn put_algo_list<T: Copy>(buf: &mut Vec<u8>, list: &[T], as_u16: impl Fn(T) -> u16) {
    buf.put_u16(list.len() as u16);
    for value in list {
        buf.put_u16(as_u16(*value));
    }
}

fn get_algo_list<T>(reader: &mut Reader, from_u16: impl Fn(u16) -> Option<T>) -> Result<Vec<T>> {
    let count = reader.u16()? as usize;
    let mut out = Vec::with_capacity(count);
    for _ in 0..count {
        let raw = reader.u16()?;
        out.push(from_u16(raw).ok_or_else(|| ArgumentError::UnrecognizedAlgorithm(raw.to_string()))?);
    }
    Ok(out)
}

/// First handshake payload: protocol version, self-identification, the
/// full algorithm vocabulary this side supports, and the transport
/// obfuscation settings it proposes.
#[derive(Debug, Clone)]
pub struct MetaExchangePayload {
    /// Sender's protocol major version.
    pub protocol_version_major: u16,
    /// Sender's protocol minor version.
    pub protocol_version_minor: u16,
    /// Sender's self-verifying identifier.
    pub uuid: PeerUUID,
    /// Whether the sender requires mutual authentication for this session.
    pub require_authentication: bool,
    /// Supported hash algorithms, ascending.
    pub hash: Vec<Hash>,
    /// Supported primary-slot asymmetric algorithms, ascending.
    pub primary_asymmetric: Vec<Asymmetric>,
    /// Supported secondary-slot asymmetric algorithms, ascending.
    pub secondary_asymmetric: Vec<Asymmetric>,
    /// Supported symmetric AEAD algorithms, ascending.
    pub symmetric: Vec<Symmetric>,
    /// Supported compression algorithms, ascending. May be empty.
    pub compression: Vec<Compression>,
    /// Supported signature algorithms, ascending.
    pub signature: Vec<Signature>,
    /// Proposed data-size obfuscation bit offset.
    pub data_size_offset: u8,
    /// Proposed data-size obfuscation XOR mask.
    pub data_size_xor_mask: u32,
}

impl MetaExchangePayload {
    /// Serialize this payload to its wire form.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.put_u16(self.protocol_version_major);
        buf.put_u16(self.protocol_version_minor);
        buf.extend_from_slice(self.uuid.as_uuid().as_bytes());
        buf.put_u8(self.require_authentication as u8);
        put_algo_list(&mut buf, &self.hash, |v| v as u16);
        put_algo_list(&mut buf, &self.primary_asymmetric, |v| v as u16);
        put_algo_list(&mut buf, &self.secondary_asymmetric, |v| v as u16);
        put_algo_list(&mut buf, &self.symmetric, |v| v as u16);
        put_algo_list(&mut buf, &self.compression, |v| v as u16);
        put_algo_list(&mut buf, &self.signature, |v| v as u16);
        buf.put_u8(self.data_size_offset);
        buf.put_u32(self.data_size_xor_mask);
        buf
    }

    /// Parse a payload produced by [`Self::encode`].
    pub fn decode(buf: &[u8]) -> Result<Self> {
        let mut reader = Reader::new(buf);
        let protocol_version_major = reader.u16()?;
        let protocol_version_minor = reader.u16()?;
        let uuid = PeerUUID::from_uuid(uuid::Uuid::from_bytes(reader.uuid_bytes()?));
        let require_authentication = reader.u8()? != 0;
        let hash = get_algo_list(&mut reader, hash_from_u16)?;
        let primary_asymmetric = get_algo_list(&mut reader, asymmetric_from_u16)?;
        let secondary_asymmetric = get_algo_list(&mut reader, asymmetric_from_u16)?;
        let symmetric = get_algo_list(&mut reader, symmetric_from_u16)?;
        let compression = get_algo_list(&mut reader, compression_from_u16)?;
        let signature = get_algo_list(&mut reader, signature_from_u16)?;
        let data_size_offset = reader.u8()?;
        let data_size_xor_mask = reader.u32()?;
        Ok(Self {
            protocol_version_major,
            protocol_version_minor,
            uuid,
            require_authentication,
            hash,
            primary_asymmetric,
            secondary_asymmetric,
            symmetric,
            compression,
            signature,
            data_size_offset,
            data_size_xor_mask,
        })
    }
}

/// Outcome of negotiating two [`MetaExchangePayload`]s against each other.
#[derive(Debug, Clone, Copy)]
pub struct NegotiatedAlgorithms {
    /// Chosen hash algorithm.
    pub hash: Hash,
    /// Chosen primary-slot asymmetric algorithm.
    pub primary_asymmetric: Asymmetric,
    /// Chosen secondary-slot asymmetric algorithm.
    pub secondary_asymmetric: Asymmetric,
    /// Chosen symmetric AEAD algorithm.
    pub symmetric: Symmetric,
    /// Chosen compression algorithm, if either side supports any.
    pub compression: Option<Compression>,
    /// Chosen signature algorithm, only meaningful when authentication runs.
    pub signature: Option<Signature>,
    /// Whether either side's MetaExchange required authentication.
    pub require_authentication: bool,
}

/// Negotiate local vs. peer MetaExchange payloads. Either payload's lists
/// are sorted ascending before intersecting, per §4.1's negotiation rule:
/// the highest-valued algorithm present in both sorted lists wins.
pub fn negotiate(local: &MetaExchangePayload, peer: &MetaExchangePayload) -> Result<NegotiatedAlgorithms> {
    let mut local_hash = local.hash.clone();
    let mut peer_hash = peer.hash.clone();
    sort_algorithms(&mut local_hash);
    sort_algorithms(&mut peer_hash);
    let hash = choose_algorithm(&local_hash, &peer_hash).ok_or(ProtocolError::NoCommonAlgorithm)?;

    let mut local_primary = local.primary_asymmetric.clone();
    let mut peer_primary = peer.primary_asymmetric.clone();
    sort_algorithms(&mut local_primary);
    sort_algorithms(&mut peer_primary);
    let primary_asymmetric =
        choose_algorithm(&local_primary, &peer_primary).ok_or(ProtocolError::NoCommonAlgorithm)?;

    let mut local_secondary = local.secondary_asymmetric.clone();
    let mut peer_secondary = peer.secondary_asymmetric.clone();
    sort_algorithms(&mut local_secondary);
    sort_algorithms(&mut peer_secondary);
    let secondary_asymmetric =
        choose_algorithm(&local_secondary, &peer_secondary).ok_or(ProtocolError::NoCommonAlgorithm)?;

    let mut local_symmetric = local.symmetric.clone();
    let mut peer_symmetric = peer.symmetric.clone();
    sort_algorithms(&mut local_symmetric);
    sort_algorithms(&mut peer_symmetric);
    let symmetric = choose_algorithm(&local_symmetric, &peer_symmetric).ok_or(ProtocolError::NoCommonAlgorithm)?;

    let mut local_compression = local.compression.clone();
    let mut peer_compression = peer.compression.clone();
    sort_algorithms(&mut local_compression);
    sort_algorithms(&mut peer_compression);
    let compression = choose_algorithm(&local_compression, &peer_compression);

    let require_authentication = local.require_authentication || peer.require_authentication;
    let signature = if require_authentication {
        let mut local_signature = local.signature.clone();
        let mut peer_signature = peer.signature.clone();
        sort_algorithms(&mut local_signature);
        sort_algorithms(&mut peer_signature);
        Some(choose_algorithm(&local_signature, &peer_signature).ok_or(ProtocolError::NoCommonAlgorithm)?)
    } else {
        None
    };

    Ok(NegotiatedAlgorithms {
        hash,
        primary_asymmetric,
        secondary_asymmetric,
        symmetric,
        compression,
        signature,
        require_authentication,
    })
}

/// The data-size obfuscation settings actually used for a session, decided
/// by the rule that the side with the numerically lower [`PeerUUID`]
/// decides for both (§4.5's "lower-UUID side decides" rule), breaking the
/// otherwise-symmetric proposal in each [`MetaExchangePayload`].
pub fn resolve_data_size_settings(
    local_uuid: PeerUUID,
    local: &MetaExchangePayload,
    peer_uuid: PeerUUID,
    peer: &MetaExchangePayload,
) -> DataSizeSettings {
    let winner = if local_uuid.as_uuid() < peer_uuid.as_uuid() { local } else { peer };
    DataSizeSettings { offset: winner.data_size_offset, xor_mask: winner.data_size_xor_mask }
}

/// One side's contribution to a primary or secondary key exchange: its
/// public key, and for a KEM's encapsulating side, the ciphertext.
#[derive(Debug, Clone)]
pub struct KeyExchangePayload {
    /// The algorithm this exchange uses, already negotiated via MetaExchange.
    pub algorithm: Asymmetric,
    /// The sender's public key (or, for an Alice-side KEM decapsulation
    /// round, unused and left empty).
    pub public_key: Vec<u8>,
    /// KEM-only: the encapsulated ciphertext, present on Bob's message.
    pub ciphertext: Option<Vec<u8>>,
}

impl KeyExchangePayload {
    /// Build the Alice-side (initiator) message: just the local public key.
    pub fn for_alice(key_data: &AsymmetricKeyData) -> Self {
        Self { algorithm: key_data.algorithm(), public_key: key_data.local_public_key.clone(), ciphertext: None }
    }

    /// Build the Bob-side (responder) message: for Diffie-Hellman, just the
    /// local public key; for a KEM, the encapsulated ciphertext instead.
    pub fn for_bob(key_data: &AsymmetricKeyData) -> Self {
        if key_data.algorithm().is_diffie_hellman() {
            Self { algorithm: key_data.algorithm(), public_key: key_data.local_public_key.clone(), ciphertext: None }
        } else {
            Self {
                algorithm: key_data.algorithm(),
                public_key: Vec::new(),
                ciphertext: Some(key_data.encrypted_shared_secret.clone()),
            }
        }
    }

    /// Serialize to wire form.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.put_u16(self.algorithm as u16);
        buf.put_bytes(&self.public_key);
        match &self.ciphertext {
            Some(ct) => {
                buf.put_u8(1);
                buf.put_bytes(ct);
            }
            None => buf.put_u8(0),
        }
        buf
    }

    /// Parse a payload produced by [`Self::encode`].
    pub fn decode(buf: &[u8]) -> Result<Self> {
        let mut reader = Reader::new(buf);
        let raw_algo = reader.u16()?;
        let algorithm = asymmetric_from_u16(raw_algo).ok_or_else(|| ArgumentError::UnrecognizedAlgorithm(raw_algo.to_string()))?;
        let public_key = reader.bytes()?;
        let has_ciphertext = reader.u8()? != 0;
        let ciphertext = if has_ciphertext { Some(reader.bytes()?) } else { None };
        Ok(Self { algorithm, public_key, ciphertext })
    }

    /// Apply this message to a local, already-generated key data instance,
    /// completing it (setting the peer's public key or ciphertext) and
    /// deriving the shared secret.
    pub fn apply(&self, key_data: &mut AsymmetricKeyData) -> Result<()> {
        match key_data.owner() {
            AsymmetricKeyOwner::Alice => {
                if let Some(ct) = &self.ciphertext {
                    key_data.encrypted_shared_secret = ct.clone();
                } else {
                    key_data.peer_public_key = self.public_key.clone();
                }
            }
            AsymmetricKeyOwner::Bob => {
                key_data.peer_public_key = self.public_key.clone();
            }
        }
        crypto::derive_shared_secret(key_data)
    }
}

/// The Authentication-phase payload: a signature over the running
/// handshake transcript, proving possession of the private key bound to
/// the sender's [`PeerUUID`].
#[derive(Debug, Clone)]
pub struct AuthenticationPayload {
    /// Signature algorithm used.
    pub algorithm: Signature,
    /// Signature bytes over the transcript hash.
    pub signature: Vec<u8>,
}

impl AuthenticationPayload {
    /// Serialize to wire form.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.put_u16(self.algorithm as u16);
        buf.put_bytes(&self.signature);
        buf
    }

    /// Parse a payload produced by [`Self::encode`].
    pub fn decode(buf: &[u8]) -> Result<Self> {
        let mut reader = Reader::new(buf);
        let raw_algo = reader.u16()?;
        let algorithm = signature_from_u16(raw_algo).ok_or_else(|| ArgumentError::UnrecognizedAlgorithm(raw_algo.to_string()))?;
        let signature = reader.bytes()?;
        Ok(Self { algorithm, signature })
    }
}

/// The SessionInit payload: the extender UUIDs this side has registered
/// and wants its peer to know about as soon as the session is `Ready`.
#[derive(Debug, Clone, Default)]
pub struct SessionInitPayload {
    /// Locally registered extender UUIDs.
    pub extender_uuids: Vec<ExtenderUUID>,
}

impl SessionInitPayload {
    /// Serialize to wire form.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.put_u16(self.extender_uuids.len() as u16);
        for uuid in &self.extender_uuids {
            buf.extend_from_slice(uuid.as_uuid().as_bytes());
        }
        buf
    }

    /// Parse a payload produced by [`Self::encode`].
    pub fn decode(buf: &[u8]) -> Result<Self> {
        let mut reader = Reader::new(buf);
        let count = reader.u16()? as usize;
        let mut extender_uuids = Vec::with_capacity(count);
        for _ in 0..count {
            extender_uuids.push(ExtenderUUID::from_uuid(uuid::Uuid::from_bytes(reader.uuid_bytes()?)));
        }
        Ok(Self { extender_uuids })
    }
}

/// Accumulates every handshake message exchanged, in wire order, so
/// Authentication can sign the whole transcript rather than a single
/// message (preventing an attacker from splicing a signature from one
/// handshake into another).
#[derive(Debug, Default, Clone)]
pub struct Transcript {
    buf: Vec<u8>,
}

impl Transcript {
    /// An empty transcript.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one encoded handshake message.
    pub fn push(&mut self, encoded: &[u8]) {
        self.buf.extend_from_slice(encoded);
    }

    /// Digest the transcript so far with the negotiated hash algorithm.
    pub fn digest(&self, algo: Hash) -> Vec<u8> {
        crypto::hash(&self.buf, algo)
    }
}

/// Build this side's [`MetaExchangePayload`] from locally supported
/// algorithm sets.
#[allow(clippy::too_many_arguments)]
pub fn build_meta_exchange(
    uuid: PeerUUID,
    require_authentication: bool,
    mut hash: Vec<Hash>,
    mut primary_asymmetric: Vec<Asymmetric>,
    mut secondary_asymmetric: Vec<Asymmetric>,
    mut symmetric: Vec<Symmetric>,
    mut compression: Vec<Compression>,
    mut signature: Vec<Signature>,
    data_size_offset: u8,
    data_size_xor_mask: u32,
) -> MetaExchangePayload {
    sort_algorithms(&mut hash);
    sort_algorithms(&mut primary_asymmetric);
    sort_algorithms(&mut secondary_asymmetric);
    sort_algorithms(&mut symmetric);
    sort_algorithms(&mut compression);
    sort_algorithms(&mut signature);
    MetaExchangePayload {
        protocol_version_major: PROTOCOL_VERSION_MAJOR,
        protocol_version_minor: PROTOCOL_VERSION_MINOR,
        uuid,
        require_authentication,
        hash,
        primary_asymmetric,
        secondary_asymmetric,
        symmetric,
        compression,
        signature,
        data_size_offset,
        data_size_xor_mask,
    }
}

/// Begin a key-exchange step as Alice: generate a fresh key pair for
/// `algorithm` and produce the message to send.
pub fn begin_key_exchange_alice(algorithm: Asymmetric) -> Result<(AsymmetricKeyData, KeyExchangePayload)> {
    let mut key_data = AsymmetricKeyData::new(algorithm, AsymmetricKeyOwner::Alice);
    crypto::generate_keypair(&mut key_data)?;
    let payload = KeyExchangePayload::for_alice(&key_data);
    Ok((key_data, payload))
}

/// Respond to a key-exchange step as Bob: for Diffie-Hellman, generate a
/// fresh key pair and derive the secret immediately; for a KEM,
/// encapsulate against the peer's public key. Either way returns the
/// completed key data and the message to send back.
pub fn respond_key_exchange_bob(peer_message: &KeyExchangePayload) -> Result<(AsymmetricKeyData, KeyExchangePayload)> {
    let mut key_data = AsymmetricKeyData::new(peer_message.algorithm, AsymmetricKeyOwner::Bob);
    if peer_message.algorithm.is_diffie_hellman() {
        crypto::generate_keypair(&mut key_data)?;
        key_data.peer_public_key = peer_message.public_key.clone();
        crypto::derive_shared_secret(&mut key_data)?;
    } else {
        key_data.peer_public_key = peer_message.public_key.clone();
        crypto::derive_shared_secret(&mut key_data)?;
    }
    let payload = KeyExchangePayload::for_bob(&key_data);
    Ok((key_data, payload))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::id::SigningAlgorithmFamily;

    fn full_meta(uuid: PeerUUID, require_authentication: bool) -> MetaExchangePayload {
        build_meta_exchange(
            uuid,
            require_authentication,
            vec![Hash::Sha256, Hash::Blake2s256],
            vec![Asymmetric::EcdhX25519, Asymmetric::EcdhSecp521r1],
            vec![Asymmetric::KemNtruPrime],
            vec![Symmetric::ChaCha20Poly1305, Symmetric::Aes256Gcm],
            vec![Compression::Deflate],
            vec![Signature::Ed25519],
            9,
            0,
        )
    }

    #[test]
    fn meta_exchange_roundtrips() {
        let uuid = PeerUUID::from_public_key(SigningAlgorithmFamily::Ed25519, b"alice's public key material....");
        let payload = full_meta(uuid, false);
        let decoded = MetaExchangePayload::decode(&payload.encode()).unwrap();
        assert_eq!(decoded.uuid, payload.uuid);
        assert_eq!(decoded.hash, payload.hash);
        assert_eq!(decoded.primary_asymmetric, payload.primary_asymmetric);
    }

    #[test]
    fn negotiation_picks_highest_common_algorithm() {
        let alice_uuid = PeerUUID::from_public_key(SigningAlgorithmFamily::Ed25519, b"alice's public key material....");
        let bob_uuid = PeerUUID::from_public_key(SigningAlgorithmFamily::Ed25519, b"bob's public key material......");
        let alice = full_meta(alice_uuid, false);
        let bob = full_meta(bob_uuid, true);

        let negotiated = negotiate(&alice, &bob).unwrap();
        assert_eq!(negotiated.hash, Hash::Blake2s256);
        assert_eq!(negotiated.primary_asymmetric, Asymmetric::EcdhSecp521r1);
        assert_eq!(negotiated.symmetric, Symmetric::Aes256Gcm);
        assert!(negotiated.require_authentication);
        assert_eq!(negotiated.signature, Some(Signature::Ed25519));
    }

    #[test]
    fn negotiation_fails_on_disjoint_lists() {
        let alice_uuid = PeerUUID::from_public_key(SigningAlgorithmFamily::Ed25519, b"alice's public key material....");
        let bob_uuid = PeerUUID::from_public_key(SigningAlgorithmFamily::Ed25519, b"bob's public key material......");
        let mut alice = full_meta(alice_uuid, false);
        alice.symmetric = vec![Symmetric::ChaCha20Poly1305];
        let mut bob = full_meta(bob_uuid, false);
        bob.symmetric = vec![Symmetric::Aes256Gcm];
        bob.hash = alice.hash.clone();
        bob.primary_asymmetric = alice.primary_asymmetric.clone();
        bob.secondary_asymmetric = alice.secondary_asymmetric.clone();

        // hash/primary/secondary still agree; only symmetric is disjoint.
        let err = negotiate(&alice, &bob);
        assert!(err.is_err());
    }

    #[test]
    fn lower_uuid_side_decides_data_size_settings() {
        let alice_uuid = PeerUUID::from_public_key(SigningAlgorithmFamily::Ed25519, b"aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa");
        let bob_uuid = PeerUUID::from_public_key(SigningAlgorithmFamily::Ed25519, b"bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb");
        let mut alice = full_meta(alice_uuid, false);
        alice.data_size_offset = 5;
        let mut bob = full_meta(bob_uuid, false);
        bob.data_size_offset = 11;

        let settings = resolve_data_size_settings(alice_uuid, &alice, bob_uuid, &bob);
        let winner = if alice_uuid.as_uuid() < bob_uuid.as_uuid() { 5 } else { 11 };
        assert_eq!(settings.offset, winner);
    }

    #[test]
    fn diffie_hellman_key_exchange_matches_between_alice_and_bob() {
        let (mut alice_data, alice_msg) = begin_key_exchange_alice(Asymmetric::EcdhX25519).unwrap();
        let (bob_data, bob_msg) = respond_key_exchange_bob(&alice_msg).unwrap();
        alice_msg_apply_check(&mut alice_data, &bob_msg);
        assert_eq!(alice_data.shared_secret, bob_data.shared_secret);
    }

    fn alice_msg_apply_check(alice_data: &mut AsymmetricKeyData, bob_msg: &KeyExchangePayload) {
        bob_msg.apply(alice_data).unwrap();
    }

    #[test]
    fn kem_key_exchange_matches_between_alice_and_bob() {
        let mut alice_data = AsymmetricKeyData::new(Asymmetric::KemNtruPrime, AsymmetricKeyOwner::Alice);
        crypto::generate_keypair(&mut alice_data).unwrap();
        let alice_msg = KeyExchangePayload::for_alice(&alice_data);

        let (bob_data, bob_msg) = respond_key_exchange_bob(&alice_msg).unwrap();
        bob_msg.apply(&mut alice_data).unwrap();

        assert_eq!(alice_data.shared_secret, bob_data.shared_secret);
    }

    #[test]
    fn key_exchange_payload_roundtrips_with_ciphertext() {
        let mut bob_data = AsymmetricKeyData::new(Asymmetric::KemNtruPrime, AsymmetricKeyOwner::Bob);
        bob_data.encrypted_shared_secret = vec![9, 9, 9];
        let payload = KeyExchangePayload::for_bob(&bob_data);
        let decoded = KeyExchangePayload::decode(&payload.encode()).unwrap();
        assert_eq!(decoded.ciphertext, Some(vec![9, 9, 9]));
    }

    #[test]
    fn session_init_payload_roundtrips() {
        let payload = SessionInitPayload { extender_uuids: vec![ExtenderUUID::control()] };
        let decoded = SessionInitPayload::decode(&payload.encode()).unwrap();
        assert_eq!(decoded.extender_uuids, payload.extender_uuids);
    }

    #[test]
    fn transcript_digest_changes_with_content() {
        let mut t1 = Transcript::new();
        t1.push(b"hello");
        let mut t2 = Transcript::new();
        t2.push(b"world");
        assert_ne!(t1.digest(Hash::Blake2s256), t2.digest(Hash::Blake2s256));
    }
}
