//! Algorithm identifiers and negotiation.
//!
//! Each enum is ordered the same way the wire vocabulary is: ascending by
//! enum value. Negotiation picks, from the intersection of two sorted
//! lists, the element with the highest enum value present in both.

/// Hash algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "config", derive(serde::Serialize, serde::Deserialize))]
#[repr(u16)]
pub enum Hash {
    /// SHA-256.
    Sha256 = 1,
    /// BLAKE2s-256.
    Blake2s256 = 2,
    /// SHA-512.
    Sha512 = 3,
    /// BLAKE2b-512.
    Blake2b512 = 4,
}

/// Asymmetric key-exchange and encapsulation algorithms (primary or
/// secondary slot).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "config", derive(serde::Serialize, serde::Deserialize))]
#[repr(u16)]
pub enum Asymmetric {
    /// ECDH over X25519.
    EcdhX25519 = 1,
    /// KEM NewHope.
    KemNewHope = 2,
    /// KEM NTRU Prime (sntrup761).
    KemNtruPrime = 3,
    /// ECDH over X448.
    EcdhX448 = 4,
    /// KEM Classic McEliece (mceliece8192128).
    KemClassicMcEliece = 5,
    /// ECDH over secp521r1.
    EcdhSecp521r1 = 6,
}

impl Asymmetric {
    /// Whether this algorithm is a Diffie-Hellman key exchange (both sides
    /// derive the shared secret locally from their own private key and the
    /// peer's public key) as opposed to a key-encapsulation mechanism.
    pub fn is_diffie_hellman(self) -> bool {
        matches!(self, Asymmetric::EcdhX25519 | Asymmetric::EcdhX448 | Asymmetric::EcdhSecp521r1)
    }

    /// Whether this algorithm is a key-encapsulation mechanism.
    pub fn is_kem(self) -> bool {
        !self.is_diffie_hellman()
    }
}

/// Digital signature algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "config", derive(serde::Serialize, serde::Deserialize))]
#[repr(u16)]
pub enum Signature {
    /// EdDSA over Ed25519.
    Ed25519 = 1,
    /// EdDSA over Ed448.
    Ed448 = 2,
}

/// Symmetric AEAD algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "config", derive(serde::Serialize, serde::Deserialize))]
#[repr(u16)]
pub enum Symmetric {
    /// ChaCha20-Poly1305.
    ChaCha20Poly1305 = 1,
    /// AES-256-GCM.
    Aes256Gcm = 2,
}

/// Payload compression algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "config", derive(serde::Serialize, serde::Deserialize))]
#[repr(u16)]
pub enum Compression {
    /// DEFLATE.
    Deflate = 1,
    /// Zstandard.
    Zstandard = 2,
}

/// Sort a list of algorithm values in ascending enum order, the
/// presentation order both sides exchange during MetaExchange.
pub fn sort_algorithms<T: Ord + Copy>(list: &mut [T]) {
    list.sort();
}

/// Whether `list` contains `value`.
pub fn has_algorithm<T: PartialEq + Copy>(list: &[T], value: T) -> bool {
    list.contains(&value)
}

/// Choose the highest-valued algorithm present in both sorted lists.
///
/// Returns `None` if the intersection is empty, corresponding to the
/// `NoCommonAlgorithm` protocol error.
pub fn choose_algorithm<T: Ord + Copy>(list1: &[T], list2: &[T]) -> Option<T> {
    list1.iter().copied().filter(|v| list2.contains(v)).max()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn choose_algorithm_picks_highest_common() {
        let a = [Hash::Sha256, Hash::Blake2s256, Hash::Sha512];
        let b = [Hash::Blake2s256, Hash::Sha256];
        assert_eq!(choose_algorithm(&a, &b), Some(Hash::Blake2s256));
    }

    #[test]
    fn choose_algorithm_empty_intersection() {
        let a = [Signature::Ed25519];
        let b = [Signature::Ed448];
        assert_eq!(choose_algorithm(&a, &b), None);
    }

    #[test]
    fn asymmetric_kind_classification() {
        assert!(Asymmetric::EcdhX25519.is_diffie_hellman());
        assert!(Asymmetric::KemNtruPrime.is_kem());
        assert!(!Asymmetric::KemClassicMcEliece.is_diffie_hellman());
    }

    #[test]
    fn sort_algorithms_is_ascending() {
        let mut list = [Compression::Zstandard, Compression::Deflate];
        sort_algorithms(&mut list);
        assert_eq!(list, [Compression::Deflate, Compression::Zstandard]);
    }
}
