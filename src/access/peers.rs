//! Peer allow-list.
//!
//! Grounded on `Core/Access/PeerAccessControl.cpp`: maps `PeerUUID` to an
//! optional public key and an allow flag. A public key, if supplied, must
//! verify against the UUID at insertion time since `PeerUUID`s are
//! self-authenticating.

use std::collections::HashMap;

use crate::core::error::{ArgumentError, Result};
use crate::core::id::PeerUUID;

/// The default policy applied to peers not present in the allow-list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefaultPolicy {
    /// Unlisted peers are allowed.
    Allowed,
    /// Unlisted peers are not allowed.
    NotAllowed,
    /// Unlisted peers are never allowed, regardless of the allow-list.
    RequireAuthentication,
}

struct Entry {
    public_key: Option<Vec<u8>>,
    allowed: bool,
}

/// The peer allow-list and its default policy.
pub struct PeerAccessControl {
    entries: HashMap<PeerUUID, Entry>,
    default_policy: DefaultPolicy,
}

impl PeerAccessControl {
    /// Create an allow-list with the given default policy.
    pub fn new(default_policy: DefaultPolicy) -> Self {
        Self { entries: HashMap::new(), default_policy }
    }

    /// Add or update `uuid`'s allow-list entry. If `public_key` is
    /// supplied, it must verify against `uuid`.
    pub fn add(&mut self, uuid: PeerUUID, public_key: Option<Vec<u8>>, allowed: bool) -> Result<()> {
        if let Some(key) = &public_key {
            if !uuid.verify(key) {
                return Err(ArgumentError::UuidKeyMismatch.into());
            }
        }
        self.entries.insert(uuid, Entry { public_key, allowed });
        Ok(())
    }

    /// Remove `uuid` from the allow-list.
    pub fn remove(&mut self, uuid: &PeerUUID) {
        self.entries.remove(uuid);
    }

    /// The public key on file for `uuid`, if any.
    pub fn public_key(&self, uuid: &PeerUUID) -> Option<&[u8]> {
        self.entries.get(uuid).and_then(|e| e.public_key.as_deref())
    }

    /// Whether `uuid` is allowed to connect, combining its explicit entry
    /// (if any) with the default policy.
    pub fn is_allowed(&self, uuid: &PeerUUID) -> bool {
        match self.entries.get(uuid) {
            Some(entry) => entry.allowed,
            None => match self.default_policy {
                DefaultPolicy::Allowed => true,
                DefaultPolicy::NotAllowed | DefaultPolicy::RequireAuthentication => false,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::id::SigningAlgorithmFamily;

    #[test]
    fn unknown_peer_follows_default_policy() {
        let control = PeerAccessControl::new(DefaultPolicy::Allowed);
        let uuid = PeerUUID::from_public_key(SigningAlgorithmFamily::Ed25519, b"some public key bytes...........");
        assert!(control.is_allowed(&uuid));
    }

    #[test]
    fn mismatched_public_key_is_rejected() {
        let mut control = PeerAccessControl::new(DefaultPolicy::NotAllowed);
        let key = b"a valid public key for this test";
        let uuid = PeerUUID::from_public_key(SigningAlgorithmFamily::Ed25519, key);
        let result = control.add(uuid, Some(b"a different public key.........".to_vec()), true);
        assert!(result.is_err());
    }

    #[test]
    fn explicit_entry_overrides_default_policy() {
        let mut control = PeerAccessControl::new(DefaultPolicy::NotAllowed);
        let key = b"another valid public key for....";
        let uuid = PeerUUID::from_public_key(SigningAlgorithmFamily::Ed448, key);
        control.add(uuid, Some(key.to_vec()), true).unwrap();
        assert!(control.is_allowed(&uuid));
    }

    #[test]
    fn require_authentication_denies_unknown_peers_even_if_default_would_allow() {
        let control = PeerAccessControl::new(DefaultPolicy::RequireAuthentication);
        let uuid = PeerUUID::from_public_key(SigningAlgorithmFamily::Ed25519, b"yet another test public key.....");
        assert!(!control.is_allowed(&uuid));
    }
}
