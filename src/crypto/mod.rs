//! The cryptographic façade: algorithm vocabulary, key-material containers,
//! and the operations that act on them. Nothing outside this module ever
//! touches an underlying crate directly; everything goes through
//! [`facade`].

pub mod algorithms;
pub mod facade;
pub mod keys;

pub use algorithms::{Asymmetric, Compression, Hash, Signature, Symmetric};
pub use facade::{
    buffer_looks_random, constant_time_equal, csprng_bytes, csprng_u64, decrypt,
    derive_shared_secret, derive_symmetric_keys, encrypt, generate_keypair,
    generate_signing_keypair, hash, hkdf, hmac, sign, verify,
};
pub use keys::{
    AsymmetricKeyData, AsymmetricKeyOwner, KeyExchangeType, SymmetricKeyData, SymmetricKeyType,
};
