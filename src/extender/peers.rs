//! Per-peer record of which extender UUIDs the remote side currently
//! supports.
//!
//! Grounded on `Core/Peer/Peer.h`'s assigned-extender-UUID set: each peer
//! session carries the set announced to it via `ExtenderUpdate` messages,
//! and `ExtenderCommunication` is only ever delivered to an extender both
//! sides have in common.

use std::collections::HashSet;

use crate::core::id::ExtenderUUID;

/// The extender UUIDs a single remote peer has announced support for.
#[derive(Debug, Clone, Default)]
pub struct PeerExtenderSet {
    remote: HashSet<ExtenderUUID>,
}

impl PeerExtenderSet {
    /// An empty set, as a freshly connected peer starts with none announced.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that the peer now supports `uuid` (an `ExtenderUpdate` add).
    pub fn add(&mut self, uuid: ExtenderUUID) {
        self.remote.insert(uuid);
    }

    /// Record that the peer retracted `uuid` (an `ExtenderUpdate` remove).
    pub fn remove(&mut self, uuid: ExtenderUUID) {
        self.remote.remove(&uuid);
    }

    /// Whether the peer currently supports `uuid`.
    pub fn supports(&self, uuid: ExtenderUUID) -> bool {
        self.remote.contains(&uuid)
    }

    /// How many extenders this peer currently supports.
    pub fn len(&self) -> usize {
        self.remote.len()
    }

    /// Whether this peer supports no extenders.
    pub fn is_empty(&self) -> bool {
        self.remote.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::id::SigningAlgorithmFamily;

    fn uuid(tag: u8) -> ExtenderUUID {
        ExtenderUUID::from_public_key(SigningAlgorithmFamily::Ed25519, &[tag; 32])
    }

    #[test]
    fn add_then_remove_round_trips() {
        let mut set = PeerExtenderSet::new();
        let id = uuid(1);
        assert!(!set.supports(id));
        set.add(id);
        assert!(set.supports(id));
        set.remove(id);
        assert!(!set.supports(id));
    }

    #[test]
    fn fresh_peer_supports_nothing() {
        let set = PeerExtenderSet::new();
        assert!(set.is_empty());
    }
}
