//! Registry of every peer session this process currently drives, with the
//! pool-affine worker assignment the concurrency model requires.
//!
//! Grounded on `Core/Peer/PeerManager.cpp`: a peer is assigned to a worker
//! pool by hashing its [`PeerLUID`] once, at creation, and that assignment
//! never changes for the life of the session, so a session's state is
//! never torn between two pools mid-handshake.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::RwLock;

use tokio::sync::{mpsc, watch};

use crate::core::id::{PeerLUID, PeerLuidAllocator, PeerUUID};
use crate::message::frame::MessageType;
use crate::session::{Role, SessionStatus};

use crate::core::id::ExtenderUUID;

/// One message handed to a connection's outbound queue.
#[derive(Debug)]
pub enum OutboundMessage {
    /// An application or extender payload to encode and send.
    Application {
        /// The inner message type.
        message_type: MessageType,
        /// The extender this payload belongs to, for `ExtenderCommunication`.
        extender_uuid: Option<ExtenderUUID>,
        /// The payload bytes.
        payload: Vec<u8>,
    },
    /// Ask the connection to begin an orderly disconnect.
    Disconnect,
}

/// A live connection's externally visible handle: how to reach it and how
/// to observe its lifecycle, without touching the `PeerSession` itself
/// (which lives entirely inside the connection task that owns it).
#[derive(Clone)]
pub struct PeerHandle {
    /// This session's process-local handle.
    pub luid: PeerLUID,
    /// Which side of the handshake this session played.
    pub role: Role,
    /// The remote socket address.
    pub endpoint: SocketAddr,
    /// Queue for outbound application/extender traffic.
    pub outbound: mpsc::Sender<OutboundMessage>,
    /// Current lifecycle status, updated by the connection task.
    pub status: watch::Receiver<SessionStatus>,
    /// The peer's verified UUID, once the handshake completes.
    pub uuid: watch::Receiver<Option<PeerUUID>>,
}

/// Owns every peer this process is currently connected to (directly, not
/// counting relayed circuits) and assigns each a stable worker-pool index.
pub struct PeerManager {
    allocator: PeerLuidAllocator,
    pool_count: usize,
    peers: RwLock<HashMap<PeerLUID, PeerHandle>>,
    by_endpoint: RwLock<HashMap<SocketAddr, PeerLUID>>,
}

impl PeerManager {
    /// Create a manager distributing peers across `pool_count` worker
    /// buckets (must be at least 1).
    pub fn new(pool_count: usize) -> Self {
        Self {
            allocator: PeerLuidAllocator::new(),
            pool_count: pool_count.max(1),
            peers: RwLock::new(HashMap::new()),
            by_endpoint: RwLock::new(HashMap::new()),
        }
    }

    /// Allocate a fresh, process-unique handle for a new session.
    pub fn allocate(&self) -> PeerLUID {
        self.allocator.allocate()
    }

    /// Which worker pool a peer's traffic is permanently bound to.
    pub fn pool_of(&self, luid: PeerLUID) -> usize {
        (luid.value() % self.pool_count as u64) as usize
    }

    /// Register a newly accepted or dialed connection.
    pub fn insert(&self, handle: PeerHandle) {
        self.by_endpoint.write().unwrap().insert(handle.endpoint, handle.luid);
        self.peers.write().unwrap().insert(handle.luid, handle);
    }

    /// Remove a connection that has finished, freeing its endpoint slot.
    pub fn remove(&self, luid: PeerLUID) -> Option<PeerHandle> {
        let handle = self.peers.write().unwrap().remove(&luid)?;
        let mut by_endpoint = self.by_endpoint.write().unwrap();
        if by_endpoint.get(&handle.endpoint) == Some(&luid) {
            by_endpoint.remove(&handle.endpoint);
        }
        Some(handle)
    }

    /// Look up a connection by its local handle.
    pub fn get(&self, luid: PeerLUID) -> Option<PeerHandle> {
        self.peers.read().unwrap().get(&luid).cloned()
    }

    /// Look up an existing connection to `endpoint`, for dial-side session
    /// reuse.
    pub fn find_by_endpoint(&self, endpoint: SocketAddr) -> Option<PeerHandle> {
        let luid = *self.by_endpoint.read().unwrap().get(&endpoint)?;
        self.get(luid)
    }

    /// Every `Ready` connection other than `exclude`, as candidate next
    /// hops for a relay circuit.
    pub fn ready_candidates(&self, exclude: PeerLUID) -> Vec<PeerHandle> {
        self.peers
            .read()
            .unwrap()
            .values()
            .filter(|handle| handle.luid != exclude && *handle.status.borrow() == SessionStatus::Ready)
            .cloned()
            .collect()
    }

    /// How many connections are currently tracked.
    pub fn peer_count(&self) -> usize {
        self.peers.read().unwrap().len()
    }

    /// Ask a connection to disconnect. A no-op if it is already gone.
    pub fn disconnect(&self, luid: PeerLUID) {
        if let Some(handle) = self.get(luid) {
            let _ = handle.outbound.try_send(OutboundMessage::Disconnect);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(luid: PeerLUID, endpoint: SocketAddr) -> PeerHandle {
        let (outbound, _rx) = mpsc::channel(1);
        let (_status_tx, status) = watch::channel(SessionStatus::Initialized);
        let (_uuid_tx, uuid) = watch::channel(None);
        PeerHandle { luid, role: Role::Alice, endpoint, outbound, status, uuid }
    }

    fn ready_handle(luid: PeerLUID, endpoint: SocketAddr) -> PeerHandle {
        let (outbound, _rx) = mpsc::channel(1);
        let (_status_tx, status) = watch::channel(SessionStatus::Ready);
        let (_uuid_tx, uuid) = watch::channel(None);
        PeerHandle { luid, role: Role::Alice, endpoint, outbound, status, uuid }
    }

    #[test]
    fn pool_assignment_is_stable_for_a_luid() {
        let manager = PeerManager::new(8);
        let luid = manager.allocate();
        assert_eq!(manager.pool_of(luid), manager.pool_of(luid));
    }

    #[test]
    fn insert_then_find_by_endpoint_round_trips() {
        let manager = PeerManager::new(4);
        let luid = manager.allocate();
        let endpoint: SocketAddr = "127.0.0.1:9000".parse().unwrap();
        manager.insert(handle(luid, endpoint));
        assert_eq!(manager.find_by_endpoint(endpoint).map(|h| h.luid), Some(luid));
        assert_eq!(manager.peer_count(), 1);
    }

    #[test]
    fn remove_frees_the_endpoint_slot() {
        let manager = PeerManager::new(4);
        let luid = manager.allocate();
        let endpoint: SocketAddr = "127.0.0.1:9001".parse().unwrap();
        manager.insert(handle(luid, endpoint));
        manager.remove(luid);
        assert!(manager.find_by_endpoint(endpoint).is_none());
        assert_eq!(manager.peer_count(), 0);
    }

    #[test]
    fn single_pool_assigns_everything_to_bucket_zero() {
        let manager = PeerManager::new(1);
        let luid = manager.allocate();
        assert_eq!(manager.pool_of(luid), 0);
    }

    #[test]
    fn ready_candidates_excludes_the_given_peer_and_non_ready_ones() {
        let manager = PeerManager::new(4);
        let excluded = manager.allocate();
        let ready = manager.allocate();
        let initializing = manager.allocate();
        manager.insert(ready_handle(excluded, "127.0.0.1:9100".parse().unwrap()));
        manager.insert(ready_handle(ready, "127.0.0.1:9101".parse().unwrap()));
        manager.insert(handle(initializing, "127.0.0.1:9102".parse().unwrap()));

        let candidates = manager.ready_candidates(excluded);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].luid, ready);
    }
}
