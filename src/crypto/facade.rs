//! The crypto façade: a uniform interface over every supported hash, AEAD,
//! key-exchange, signature, and compression algorithm.
//!
//! Grounded on `QuantumGateLib/Crypto/Crypto.h`'s free-function surface
//! (`Hash`, `HMAC`, `HKDF`, `GenerateAsymmetricKeys`,
//! `GenerateSharedSecret`, `GenerateSymmetricKeys`, `Encrypt`, `Decrypt`,
//! `Sign`/`Verify`, `CompareBuffers`, `ValidateBuffer`) rather than on any
//! single algorithm's concrete API; the rest of the core only ever calls
//! through these functions, never a crate directly.

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::Aes256Gcm;
use blake2::{Blake2b512, Blake2s256};
use chacha20poly1305::ChaCha20Poly1305;
use ed25519_dalek::{Signer as _, SigningKey, Verifier as _, VerifyingKey};
use hmac::{Hmac, Mac};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Sha256, Sha512};
use subtle::ConstantTimeEq;

use crate::core::error::{ArgumentError, ProtocolError, QuantumGateError, Result};

use super::algorithms::{Asymmetric, Hash, Signature, Symmetric};
use super::keys::{AsymmetricKeyData, AsymmetricKeyOwner, SymmetricKeyData};

/// Digest `buf` with the given hash algorithm.
pub fn hash(buf: &[u8], algo: Hash) -> Vec<u8> {
    use sha2::Digest;
    match algo {
        Hash::Sha256 => Sha256::digest(buf).to_vec(),
        Hash::Sha512 => Sha512::digest(buf).to_vec(),
        Hash::Blake2s256 => Blake2s256::digest(buf).to_vec(),
        Hash::Blake2b512 => Blake2b512::digest(buf).to_vec(),
    }
}

/// Keyed HMAC of `buf` under `key`, using the given hash algorithm as the
/// HMAC's underlying digest.
pub fn hmac(buf: &[u8], key: &[u8], algo: Hash) -> Result<Vec<u8>> {
    fn run<D: hmac::digest::Digest + hmac::digest::core_api::BlockSizeUser + Clone>(
        buf: &[u8],
        key: &[u8],
    ) -> Result<Vec<u8>>
    where
        Hmac<D>: Mac,
    {
        let mut mac = <Hmac<D> as Mac>::new_from_slice(key)
            .map_err(|_| ArgumentError::OutOfRange("HMAC key length".into()))?;
        mac.update(buf);
        Ok(mac.finalize().into_bytes().to_vec())
    }

    match algo {
        Hash::Sha256 => run::<Sha256>(buf, key),
        Hash::Sha512 => run::<Sha512>(buf, key),
        Hash::Blake2s256 => run::<Blake2s256>(buf, key),
        Hash::Blake2b512 => run::<Blake2b512>(buf, key),
    }
}

/// Expand `secret` into `out_len` bytes of key material via HKDF.
pub fn hkdf(secret: &[u8], out_len: usize, algo: Hash) -> Result<Vec<u8>> {
    fn run<D>(secret: &[u8], out_len: usize) -> Result<Vec<u8>>
    where
        D: hkdf::hmac::digest::Digest
            + hkdf::hmac::digest::core_api::BlockSizeUser
            + Clone
            + hkdf::hmac::digest::OutputSizeUser,
    {
        let hk = hkdf::Hkdf::<D>::new(None, secret);
        let mut out = vec![0u8; out_len];
        hk.expand(b"quantumgate session keys", &mut out)
            .map_err(|_| QuantumGateError::Protocol(ProtocolError::NoCommonAlgorithm))?;
        Ok(out)
    }

    match algo {
        Hash::Sha256 => run::<Sha256>(secret, out_len),
        Hash::Sha512 => run::<Sha512>(secret, out_len),
        Hash::Blake2s256 => run::<Blake2s256>(secret, out_len),
        Hash::Blake2b512 => run::<Blake2b512>(secret, out_len),
    }
}

/// Fill a fresh CSPRNG-sourced buffer of `n` bytes.
pub fn csprng_bytes(n: usize) -> Vec<u8> {
    let mut buf = vec![0u8; n];
    OsRng.fill_bytes(&mut buf);
    buf
}

/// A single CSPRNG-sourced `u64`.
pub fn csprng_u64() -> u64 {
    OsRng.next_u64()
}

/// Generate a fresh key pair (or, for signing algorithms, a signing key
/// pair) into `key_data`.
pub fn generate_keypair(key_data: &mut AsymmetricKeyData) -> Result<()> {
    match key_data.algorithm() {
        Asymmetric::EcdhX25519 => {
            let secret = x25519_dalek::StaticSecret::random_from_rng(OsRng);
            let public = x25519_dalek::PublicKey::from(&secret);
            key_data.local_private_key = secret.to_bytes().to_vec();
            key_data.local_public_key = public.to_bytes().to_vec();
        }
        Asymmetric::EcdhX448 => {
            let secret = ed448_goldilocks::x448::Secret::new(&mut OsRng);
            let public = ed448_goldilocks::x448::PublicKey::from(&secret);
            key_data.local_private_key = secret.as_bytes().to_vec();
            key_data.local_public_key = public.as_bytes().to_vec();
        }
        Asymmetric::EcdhSecp521r1 => {
            let secret = p521::SecretKey::random(&mut OsRng);
            let public = secret.public_key();
            key_data.local_private_key = secret.to_bytes().to_vec();
            key_data.local_public_key = public.to_sec1_bytes().to_vec();
        }
        Asymmetric::KemNtruPrime => {
            let (pk, sk) = pqcrypto_ntruprime::sntrup761::keypair();
            key_data.local_public_key = pqcrypto_traits::kem::PublicKey::as_bytes(&pk).to_vec();
            key_data.local_private_key = pqcrypto_traits::kem::SecretKey::as_bytes(&sk).to_vec();
        }
        Asymmetric::KemNewHope => {
            let (pk, sk) = pqcrypto_newhope::newhope1024cca::keypair();
            key_data.local_public_key = pqcrypto_traits::kem::PublicKey::as_bytes(&pk).to_vec();
            key_data.local_private_key = pqcrypto_traits::kem::SecretKey::as_bytes(&sk).to_vec();
        }
        Asymmetric::KemClassicMcEliece => {
            let (pk, sk) = pqcrypto_classicmceliece::mceliece8192128::keypair();
            key_data.local_public_key = pqcrypto_traits::kem::PublicKey::as_bytes(&pk).to_vec();
            key_data.local_private_key = pqcrypto_traits::kem::SecretKey::as_bytes(&sk).to_vec();
        }
    }
    Ok(())
}

/// Generate a fresh Ed25519 or Ed448 signing key pair.
pub fn generate_signing_keypair(algo: Signature) -> Result<(Vec<u8>, Vec<u8>)> {
    match algo {
        Signature::Ed25519 => {
            let signing_key = SigningKey::generate(&mut OsRng);
            let verifying_key = signing_key.verifying_key();
            Ok((signing_key.to_bytes().to_vec(), verifying_key.to_bytes().to_vec()))
        }
        Signature::Ed448 => {
            let secret = ed448_goldilocks::sign::SigningKey::generate(&mut OsRng);
            let public = secret.verifying_key();
            Ok((secret.to_bytes().to_vec(), public.to_bytes().to_vec()))
        }
    }
}

/// Complete the key-exchange half of a handshake step for `key_data`.
///
/// For Diffie-Hellman algorithms this requires `local_private_key` and
/// `peer_public_key` to already be populated and derives `shared_secret`.
/// For KEM algorithms, role `Bob` encapsulates to `peer_public_key`
/// (populating `shared_secret` and `encrypted_shared_secret`); role
/// `Alice` decapsulates `encrypted_shared_secret` with `local_private_key`.
pub fn derive_shared_secret(key_data: &mut AsymmetricKeyData) -> Result<()> {
    match key_data.algorithm() {
        Asymmetric::EcdhX25519 => {
            let priv_bytes: [u8; 32] = key_data
                .local_private_key
                .as_slice()
                .try_into()
                .map_err(|_| ArgumentError::OutOfRange("X25519 private key length".into()))?;
            let pub_bytes: [u8; 32] = key_data
                .peer_public_key
                .as_slice()
                .try_into()
                .map_err(|_| ArgumentError::OutOfRange("X25519 public key length".into()))?;
            let secret = x25519_dalek::StaticSecret::from(priv_bytes);
            let peer_public = x25519_dalek::PublicKey::from(pub_bytes);
            key_data.shared_secret = secret.diffie_hellman(&peer_public).to_bytes().to_vec();
        }
        Asymmetric::EcdhX448 => {
            let secret = ed448_goldilocks::x448::Secret::from_bytes(&key_data.local_private_key)
                .ok_or(ArgumentError::OutOfRange("X448 private key".into()))?;
            let peer_public =
                ed448_goldilocks::x448::PublicKey::from_bytes(&key_data.peer_public_key)
                    .ok_or(ArgumentError::OutOfRange("X448 public key".into()))?;
            key_data.shared_secret = secret.shared_secret(&peer_public).as_bytes().to_vec();
        }
        Asymmetric::EcdhSecp521r1 => {
            let secret = p521::SecretKey::from_slice(&key_data.local_private_key)
                .map_err(|_| ArgumentError::OutOfRange("secp521r1 private key".into()))?;
            let peer_public = p521::PublicKey::from_sec1_bytes(&key_data.peer_public_key)
                .map_err(|_| ArgumentError::OutOfRange("secp521r1 public key".into()))?;
            let shared = p521::ecdh::diffie_hellman(
                secret.to_nonzero_scalar(),
                peer_public.as_affine(),
            );
            key_data.shared_secret = shared.raw_secret_bytes().to_vec();
        }
        Asymmetric::KemNtruPrime => derive_kem_secret(
            key_data,
            |pk| pqcrypto_ntruprime::sntrup761::encapsulate(pk),
            |ct, sk| pqcrypto_ntruprime::sntrup761::decapsulate(ct, sk),
            pqcrypto_ntruprime::sntrup761::PublicKey::from_bytes,
            pqcrypto_ntruprime::sntrup761::SecretKey::from_bytes,
            pqcrypto_ntruprime::sntrup761::Ciphertext::from_bytes,
        )?,
        Asymmetric::KemNewHope => derive_kem_secret(
            key_data,
            |pk| pqcrypto_newhope::newhope1024cca::encapsulate(pk),
            |ct, sk| pqcrypto_newhope::newhope1024cca::decapsulate(ct, sk),
            pqcrypto_newhope::newhope1024cca::PublicKey::from_bytes,
            pqcrypto_newhope::newhope1024cca::SecretKey::from_bytes,
            pqcrypto_newhope::newhope1024cca::Ciphertext::from_bytes,
        )?,
        Asymmetric::KemClassicMcEliece => derive_kem_secret(
            key_data,
            |pk| pqcrypto_classicmceliece::mceliece8192128::encapsulate(pk),
            |ct, sk| pqcrypto_classicmceliece::mceliece8192128::decapsulate(ct, sk),
            pqcrypto_classicmceliece::mceliece8192128::PublicKey::from_bytes,
            pqcrypto_classicmceliece::mceliece8192128::SecretKey::from_bytes,
            pqcrypto_classicmceliece::mceliece8192128::Ciphertext::from_bytes,
        )?,
    }
    Ok(())
}

/// Shared KEM encapsulate/decapsulate plumbing, generic over one PQClean
/// binding's concrete key/ciphertext types.
fn derive_kem_secret<PK, SK, CT, SS>(
    key_data: &mut AsymmetricKeyData,
    encapsulate: impl Fn(&PK) -> (SS, CT),
    decapsulate: impl Fn(&CT, &SK) -> SS,
    pk_from_bytes: impl Fn(&[u8]) -> std::result::Result<PK, pqcrypto_traits::Error>,
    sk_from_bytes: impl Fn(&[u8]) -> std::result::Result<SK, pqcrypto_traits::Error>,
    ct_from_bytes: impl Fn(&[u8]) -> std::result::Result<CT, pqcrypto_traits::Error>,
) -> Result<()>
where
    SS: pqcrypto_traits::kem::SharedSecret,
    CT: pqcrypto_traits::kem::Ciphertext,
{
    match key_data.owner() {
        AsymmetricKeyOwner::Bob => {
            let peer_pk = pk_from_bytes(&key_data.peer_public_key)
                .map_err(|_| ArgumentError::OutOfRange("KEM public key".into()))?;
            let (shared, ciphertext) = encapsulate(&peer_pk);
            key_data.shared_secret = shared.as_bytes().to_vec();
            key_data.encrypted_shared_secret = ciphertext.as_bytes().to_vec();
        }
        AsymmetricKeyOwner::Alice => {
            let sk = sk_from_bytes(&key_data.local_private_key)
                .map_err(|_| ArgumentError::OutOfRange("KEM secret key".into()))?;
            let ct = ct_from_bytes(&key_data.encrypted_shared_secret)
                .map_err(|_| ArgumentError::OutOfRange("KEM ciphertext".into()))?;
            let shared = decapsulate(&ct, &sk);
            key_data.shared_secret = shared.as_bytes().to_vec();
        }
    }
    Ok(())
}

/// Expand `shared_secret` via HKDF into two directions' symmetric key data.
///
/// The expansion produces `2 * key_size + 128` bytes, partitioned into
/// `(key1.key, key2.key, key1.auth_key, key2.auth_key)` so the two
/// directions obtain independent encryption and authentication keys.
pub fn derive_symmetric_keys(
    shared_secret: &[u8],
    hash_algo: Hash,
    key1: &mut SymmetricKeyData,
    key2: &mut SymmetricKeyData,
) -> Result<()> {
    const KEY_SIZE: usize = 32;
    const AUTH_KEY_SIZE: usize = 64;
    let total = 2 * KEY_SIZE + 2 * AUTH_KEY_SIZE;
    let material = hkdf(shared_secret, total, hash_algo)?;

    key1.key = material[0..KEY_SIZE].to_vec();
    key2.key = material[KEY_SIZE..2 * KEY_SIZE].to_vec();
    key1.auth_key = material[2 * KEY_SIZE..2 * KEY_SIZE + AUTH_KEY_SIZE].to_vec();
    key2.auth_key =
        material[2 * KEY_SIZE + AUTH_KEY_SIZE..2 * KEY_SIZE + 2 * AUTH_KEY_SIZE].to_vec();
    Ok(())
}

/// AEAD-encrypt `plaintext` under `sym_key` with the given 12-byte nonce.
/// The returned buffer is ciphertext with the authentication tag appended.
pub fn encrypt(plaintext: &[u8], sym_key: &SymmetricKeyData, nonce: &[u8; 12]) -> Result<Vec<u8>> {
    match sym_key.symmetric_algorithm() {
        Symmetric::ChaCha20Poly1305 => {
            let cipher = ChaCha20Poly1305::new_from_slice(&sym_key.key)
                .map_err(|_| ArgumentError::OutOfRange("ChaCha20-Poly1305 key length".into()))?;
            cipher
                .encrypt(nonce.into(), Payload { msg: plaintext, aad: &[] })
                .map_err(|_| QuantumGateError::Protocol(ProtocolError::DecryptionFailed))
        }
        Symmetric::Aes256Gcm => {
            let cipher = Aes256Gcm::new_from_slice(&sym_key.key)
                .map_err(|_| ArgumentError::OutOfRange("AES-256-GCM key length".into()))?;
            cipher
                .encrypt(nonce.into(), Payload { msg: plaintext, aad: &[] })
                .map_err(|_| QuantumGateError::Protocol(ProtocolError::DecryptionFailed))
        }
    }
}

/// AEAD-decrypt `ciphertext` (tag appended) under `sym_key` with the given
/// 12-byte nonce.
pub fn decrypt(ciphertext: &[u8], sym_key: &SymmetricKeyData, nonce: &[u8; 12]) -> Result<Vec<u8>> {
    match sym_key.symmetric_algorithm() {
        Symmetric::ChaCha20Poly1305 => {
            let cipher = ChaCha20Poly1305::new_from_slice(&sym_key.key)
                .map_err(|_| ArgumentError::OutOfRange("ChaCha20-Poly1305 key length".into()))?;
            cipher
                .decrypt(nonce.into(), Payload { msg: ciphertext, aad: &[] })
                .map_err(|_| QuantumGateError::Protocol(ProtocolError::DecryptionFailed))
        }
        Symmetric::Aes256Gcm => {
            let cipher = Aes256Gcm::new_from_slice(&sym_key.key)
                .map_err(|_| ArgumentError::OutOfRange("AES-256-GCM key length".into()))?;
            cipher
                .decrypt(nonce.into(), Payload { msg: ciphertext, aad: &[] })
                .map_err(|_| QuantumGateError::Protocol(ProtocolError::DecryptionFailed))
        }
    }
}

/// Sign `msg` with the given signature algorithm and private key.
pub fn sign(msg: &[u8], algo: Signature, priv_key: &[u8]) -> Result<Vec<u8>> {
    match algo {
        Signature::Ed25519 => {
            let bytes: [u8; 32] = priv_key
                .try_into()
                .map_err(|_| ArgumentError::OutOfRange("Ed25519 private key length".into()))?;
            let key = SigningKey::from_bytes(&bytes);
            Ok(key.sign(msg).to_bytes().to_vec())
        }
        Signature::Ed448 => {
            let key = ed448_goldilocks::sign::SigningKey::from_bytes(priv_key)
                .map_err(|_| ArgumentError::OutOfRange("Ed448 private key".into()))?;
            Ok(key.sign(msg).to_bytes().to_vec())
        }
    }
}

/// Verify `sig` over `msg` under `pub_key` with the given signature
/// algorithm.
pub fn verify(msg: &[u8], algo: Signature, pub_key: &[u8], sig: &[u8]) -> Result<bool> {
    match algo {
        Signature::Ed25519 => {
            let key_bytes: [u8; 32] = pub_key
                .try_into()
                .map_err(|_| ArgumentError::OutOfRange("Ed25519 public key length".into()))?;
            let sig_bytes: [u8; 64] = sig
                .try_into()
                .map_err(|_| ArgumentError::OutOfRange("Ed25519 signature length".into()))?;
            let key = VerifyingKey::from_bytes(&key_bytes)
                .map_err(|_| ArgumentError::OutOfRange("Ed25519 public key".into()))?;
            let sig = ed25519_dalek::Signature::from_bytes(&sig_bytes);
            Ok(key.verify(msg, &sig).is_ok())
        }
        Signature::Ed448 => {
            let key = ed448_goldilocks::sign::VerifyingKey::from_bytes(pub_key)
                .map_err(|_| ArgumentError::OutOfRange("Ed448 public key".into()))?;
            let sig = ed448_goldilocks::sign::Signature::from_bytes(sig)
                .map_err(|_| ArgumentError::OutOfRange("Ed448 signature".into()))?;
            Ok(key.verify(msg, &sig).is_ok())
        }
    }
}

/// Constant-time byte-buffer comparison.
pub fn constant_time_equal(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && bool::from(a.ct_eq(b))
}

/// Coarse sanity check on freshly generated key material: neither all-zero
/// nor all-one-bit. Not a statistical randomness test.
pub fn buffer_looks_random(buf: &[u8]) -> bool {
    if buf.is_empty() {
        return false;
    }
    !buf.iter().all(|&b| b == 0x00) && !buf.iter().all(|&b| b == 0xFF)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::keys::SymmetricKeyType;

    #[test]
    fn hash_is_deterministic() {
        assert_eq!(hash(b"hello", Hash::Sha256), hash(b"hello", Hash::Sha256));
        assert_ne!(hash(b"hello", Hash::Sha256), hash(b"world", Hash::Sha256));
    }

    #[test]
    fn hmac_roundtrip_detects_tamper() {
        let key = csprng_bytes(32);
        let tag_a = hmac(b"message", &key, Hash::Blake2s256).unwrap();
        let tag_b = hmac(b"tampered", &key, Hash::Blake2s256).unwrap();
        assert_ne!(tag_a, tag_b);
    }

    #[test]
    fn hkdf_produces_requested_length() {
        let out = hkdf(b"shared secret material", 96, Hash::Sha256).unwrap();
        assert_eq!(out.len(), 96);
    }

    #[test]
    fn x25519_dh_matches_on_both_sides() {
        let mut alice = AsymmetricKeyData::new(Asymmetric::EcdhX25519, AsymmetricKeyOwner::Alice);
        let mut bob = AsymmetricKeyData::new(Asymmetric::EcdhX25519, AsymmetricKeyOwner::Bob);
        generate_keypair(&mut alice).unwrap();
        generate_keypair(&mut bob).unwrap();

        alice.peer_public_key = bob.local_public_key.clone();
        bob.peer_public_key = alice.local_public_key.clone();

        derive_shared_secret(&mut alice).unwrap();
        derive_shared_secret(&mut bob).unwrap();

        assert_eq!(alice.shared_secret, bob.shared_secret);
    }

    #[test]
    fn aead_roundtrip() {
        let mut key = SymmetricKeyData::new(
            SymmetricKeyType::Derived,
            Hash::Blake2s256,
            Symmetric::ChaCha20Poly1305,
            None,
        );
        key.key = csprng_bytes(32);
        let nonce = [0u8; 12];
        let ct = encrypt(b"the quick brown fox", &key, &nonce).unwrap();
        let pt = decrypt(&ct, &key, &nonce).unwrap();
        assert_eq!(pt, b"the quick brown fox");
    }

    #[test]
    fn aead_rejects_tampered_ciphertext() {
        let mut key = SymmetricKeyData::new(
            SymmetricKeyType::Derived,
            Hash::Blake2s256,
            Symmetric::Aes256Gcm,
            None,
        );
        key.key = csprng_bytes(32);
        let nonce = [1u8; 12];
        let mut ct = encrypt(b"payload", &key, &nonce).unwrap();
        let last = ct.len() - 1;
        ct[last] ^= 0xFF;
        assert!(decrypt(&ct, &key, &nonce).is_err());
    }

    #[test]
    fn ed25519_sign_verify_roundtrip() {
        let (priv_key, pub_key) = generate_signing_keypair(Signature::Ed25519).unwrap();
        let sig = sign(b"a transcript", Signature::Ed25519, &priv_key).unwrap();
        assert!(verify(b"a transcript", Signature::Ed25519, &pub_key, &sig).unwrap());
        assert!(!verify(b"a different transcript", Signature::Ed25519, &pub_key, &sig).unwrap());
    }

    #[test]
    fn buffer_looks_random_rejects_degenerate_buffers() {
        assert!(!buffer_looks_random(&[0u8; 32]));
        assert!(!buffer_looks_random(&[0xFFu8; 32]));
        assert!(buffer_looks_random(&csprng_bytes(32)));
    }

    #[test]
    fn constant_time_equal_matches_eq() {
        assert!(constant_time_equal(b"abcdef", b"abcdef"));
        assert!(!constant_time_equal(b"abcdef", b"abcdeg"));
        assert!(!constant_time_equal(b"abc", b"abcd"));
    }
}
