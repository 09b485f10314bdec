//! Routes inbound extender traffic and peer events to registered
//! extenders, and tracks which extenders each connected peer supports.
//!
//! Grounded on `Core/Extender/ExtenderManager.cpp`: `ExtenderCommunication`
//! is only ever delivered to an extender present on both sides, so every
//! delivery first checks this peer's announced support before handing
//! off to the registry. Socket I/O (actually sending the `ExtenderUpdate`
//! broadcast) lives outside this type; callers are handed the set of
//! peers to notify and the update to send.

use std::collections::HashMap;

use crate::core::id::{ExtenderUUID, PeerLUID};

use super::peers::PeerExtenderSet;
use super::registry::{ExtenderHandle, ExtenderRegistry, PeerEvent};
use crate::core::error::Result;

/// Whether an `ExtenderUpdate` announces or retracts support.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtenderUpdateKind {
    /// The peer now supports this extender.
    Added,
    /// The peer no longer supports this extender.
    Removed,
}

/// Ties the registry of locally installed extenders to the per-peer sets
/// of extenders each remote side has announced.
#[derive(Default)]
pub struct ExtenderMultiplexer {
    registry: ExtenderRegistry,
    peer_extenders: HashMap<PeerLUID, PeerExtenderSet>,
}

impl ExtenderMultiplexer {
    /// A multiplexer with no extenders and no tracked peers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new extender. Returns the peers that should be sent an
    /// `ExtenderUpdate` announcing it.
    pub fn add_extender(&mut self, handle: ExtenderHandle) -> Result<Vec<PeerLUID>> {
        self.registry.add(handle)?;
        Ok(self.peer_extenders.keys().copied().collect())
    }

    /// Unregister an extender. Returns the peers that should be sent an
    /// `ExtenderUpdate` retracting it.
    pub fn remove_extender(&mut self, uuid: ExtenderUUID) -> Vec<PeerLUID> {
        let notify = self.peer_extenders.keys().copied().collect();
        self.registry.remove(uuid);
        notify
    }

    /// Whether `uuid` is currently registered locally.
    pub fn is_registered(&self, uuid: ExtenderUUID) -> bool {
        self.registry.is_registered(uuid)
    }

    /// Every locally registered extender's UUID, to announce to a newly
    /// connected peer.
    pub fn registered_uuids(&self) -> Vec<ExtenderUUID> {
        self.registry.registered_uuids().collect()
    }

    /// Begin tracking a newly `Ready` peer, with no extenders announced
    /// yet.
    pub fn on_peer_ready(&mut self, peer: PeerLUID) {
        self.peer_extenders.entry(peer).or_insert_with(PeerExtenderSet::new);
    }

    /// Stop tracking a disconnected peer, firing `Disconnected` to every
    /// extender it had in common with this side.
    pub fn on_peer_disconnected(&mut self, peer: PeerLUID) {
        if let Some(set) = self.peer_extenders.remove(&peer) {
            for uuid in self.registry.registered_uuids().collect::<Vec<_>>() {
                if set.supports(uuid) {
                    self.registry.dispatch_peer_event(uuid, peer, PeerEvent::Disconnected);
                }
            }
        }
    }

    /// Deliver a `Suspended`/`Resumed` transition to every extender this
    /// peer has in common with this side.
    pub fn on_peer_suspension_changed(&mut self, peer: PeerLUID, suspended: bool) {
        let Some(set) = self.peer_extenders.get(&peer).cloned() else { return };
        let event = if suspended { PeerEvent::Suspended } else { PeerEvent::Resumed };
        for uuid in self.registry.registered_uuids().collect::<Vec<_>>() {
            if set.supports(uuid) {
                self.registry.dispatch_peer_event(uuid, peer, event);
            }
        }
    }

    /// Apply an inbound `ExtenderUpdate` from `peer`, firing `Connected`
    /// once both sides support `uuid` (added) or `Disconnected` when the
    /// peer retracts it.
    pub fn handle_extender_update(&mut self, peer: PeerLUID, uuid: ExtenderUUID, kind: ExtenderUpdateKind) {
        let set = self.peer_extenders.entry(peer).or_insert_with(PeerExtenderSet::new);
        match kind {
            ExtenderUpdateKind::Added => {
                set.add(uuid);
                if self.registry.is_registered(uuid) {
                    self.registry.dispatch_peer_event(uuid, peer, PeerEvent::Connected);
                }
            }
            ExtenderUpdateKind::Removed => {
                set.remove(uuid);
                if self.registry.is_registered(uuid) {
                    self.registry.dispatch_peer_event(uuid, peer, PeerEvent::Disconnected);
                }
            }
        }
    }

    /// Deliver an `ExtenderCommunication` payload from `peer` addressed
    /// to `uuid`. Dropped silently unless both this side and the peer
    /// support `uuid`.
    pub fn dispatch_communication(&mut self, peer: PeerLUID, uuid: ExtenderUUID, payload: &[u8]) {
        let peer_supports = self.peer_extenders.get(&peer).is_some_and(|set| set.supports(uuid));
        if peer_supports && self.registry.is_registered(uuid) {
            self.registry.dispatch_message(uuid, peer, payload);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::id::{PeerLuidAllocator, SigningAlgorithmFamily};
    use crate::extender::registry::ExtenderCallbacks;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn uuid(tag: u8) -> ExtenderUUID {
        ExtenderUUID::from_public_key(SigningAlgorithmFamily::Ed25519, &[tag; 32])
    }

    #[test]
    fn message_is_dropped_until_peer_announces_support() {
        let mut mux = ExtenderMultiplexer::new();
        let received = Arc::new(AtomicUsize::new(0));
        let r = received.clone();
        let callbacks = ExtenderCallbacks {
            on_message: Some(Box::new(move |_peer, _payload| {
                r.fetch_add(1, Ordering::SeqCst);
            })),
            ..Default::default()
        };
        let id = uuid(1);
        mux.add_extender(ExtenderHandle::new(id, "demo", callbacks)).unwrap();

        let allocator = PeerLuidAllocator::new();
        let peer = allocator.allocate();
        mux.on_peer_ready(peer);

        mux.dispatch_communication(peer, id, b"too early");
        assert_eq!(received.load(Ordering::SeqCst), 0);

        mux.handle_extender_update(peer, id, ExtenderUpdateKind::Added);
        mux.dispatch_communication(peer, id, b"now it works");
        assert_eq!(received.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn adding_an_extender_returns_connected_peers_to_notify() {
        let mut mux = ExtenderMultiplexer::new();
        let allocator = PeerLuidAllocator::new();
        let peer = allocator.allocate();
        mux.on_peer_ready(peer);

        let notify = mux.add_extender(ExtenderHandle::new(uuid(2), "demo", ExtenderCallbacks::default())).unwrap();
        assert_eq!(notify, vec![peer]);
    }

    #[test]
    fn disconnect_fires_disconnected_for_shared_extenders_only() {
        let mut mux = ExtenderMultiplexer::new();
        let events = Arc::new(std::sync::Mutex::new(Vec::new()));
        let e = events.clone();
        let callbacks = ExtenderCallbacks {
            on_peer_event: Some(Box::new(move |peer, event| {
                e.lock().unwrap().push((peer, event));
            })),
            ..Default::default()
        };
        let id = uuid(3);
        mux.add_extender(ExtenderHandle::new(id, "demo", callbacks)).unwrap();

        let allocator = PeerLuidAllocator::new();
        let peer = allocator.allocate();
        mux.on_peer_ready(peer);
        mux.handle_extender_update(peer, id, ExtenderUpdateKind::Added);
        mux.on_peer_disconnected(peer);

        let recorded = events.lock().unwrap();
        assert_eq!(recorded.len(), 2);
        assert!(matches!(recorded[0].1, PeerEvent::Connected));
        assert!(matches!(recorded[1].1, PeerEvent::Disconnected));
    }
}
