//! A cloneable template for the per-connection [`LocalIdentity`] every new
//! session is built from.
//!
//! [`LocalIdentity`] itself isn't `Clone` (it is consumed once by
//! `PeerSession::new`), but a listener or dialer needs to stamp out one
//! per accepted or dialed connection from the same `StartupParameters`.

use crate::config::SecurityParameters;
use crate::core::id::PeerUUID;
use crate::crypto::{Asymmetric, Compression, Hash, Signature, Symmetric};
use crate::session::LocalIdentity;

/// Everything needed to build a fresh [`LocalIdentity`], held once at
/// `Local` construction time and cloned for each new connection.
#[derive(Debug, Clone)]
pub struct LocalIdentityTemplate {
    /// This instance's self-verifying identifier.
    pub uuid: PeerUUID,
    /// Whether this instance requires the peer to authenticate.
    pub require_authentication: bool,
    /// Signing key pair, required when authentication may run.
    pub signing_key: Option<(Vec<u8>, Vec<u8>)>,
    /// An optional pre-shared secret mixed into every session's key
    /// derivation in addition to the handshake's own shared secret.
    pub global_shared_secret: Option<Vec<u8>>,
    /// Supported hash algorithms.
    pub hash: Vec<Hash>,
    /// Supported primary-slot asymmetric algorithms.
    pub primary_asymmetric: Vec<Asymmetric>,
    /// Supported secondary-slot asymmetric algorithms.
    pub secondary_asymmetric: Vec<Asymmetric>,
    /// Supported symmetric AEAD algorithms.
    pub symmetric: Vec<Symmetric>,
    /// Supported compression algorithms.
    pub compression: Vec<Compression>,
    /// Supported signature algorithms.
    pub signature: Vec<Signature>,
    /// This side's proposed data-size obfuscation bit offset.
    pub data_size_offset: u8,
    /// This side's proposed data-size obfuscation XOR mask.
    pub data_size_xor_mask: u32,
    /// Key-update pacing, message padding bounds, and cover-traffic budget
    /// applied to every session built from this template.
    pub security: SecurityParameters,
}

impl LocalIdentityTemplate {
    /// Stamp out a fresh [`LocalIdentity`] for one new connection.
    pub fn build(&self) -> LocalIdentity {
        LocalIdentity {
            uuid: self.uuid,
            require_authentication: self.require_authentication,
            signing_key: self.signing_key.clone(),
            global_shared_secret: self.global_shared_secret.clone(),
            hash: self.hash.clone(),
            primary_asymmetric: self.primary_asymmetric.clone(),
            secondary_asymmetric: self.secondary_asymmetric.clone(),
            symmetric: self.symmetric.clone(),
            compression: self.compression.clone(),
            signature: self.signature.clone(),
        }
    }
}
