//! Accepts inbound TCP connections, applies access control, and spawns a
//! connection task in the `Bob` role for each one admitted.
//!
//! Grounded on `Core/Listener.cpp`: a listener binds one socket per
//! configured port; every accepted address is checked against IP filters,
//! reputation, and subnet limits before a session is even allocated, so a
//! blocked or rate-limited peer never reaches the handshake.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::net::TcpListener;
use tokio::sync::Mutex as AsyncMutex;

use crate::access::{AccessManager, CheckKind};
use crate::core::error::Result;
use crate::extender::ExtenderMultiplexer;
use crate::relay::RelayManager;
use crate::session::Role;

use super::connection::{self, ConnectionContext};
use super::identity::LocalIdentityTemplate;
use super::manager::PeerManager;

/// Listener configuration: which addresses to bind and the timing budget
/// given to each accepted connection's handshake.
#[derive(Debug, Clone)]
pub struct ListenerConfig {
    /// Addresses to bind, one socket per entry.
    pub bind: Vec<SocketAddr>,
    /// Upper bound on a single handshake's duration.
    pub max_handshake_duration: Duration,
    /// Upper bound on an on-demand relay dial performed by a connection
    /// this listener accepted (§4.6, `hops == 1`).
    pub relay_connect_timeout: Duration,
}

/// A running set of bound TCP listeners, accepting and dispatching
/// connections until dropped or explicitly stopped.
pub struct Listener {
    config: ListenerConfig,
    identity: Arc<LocalIdentityTemplate>,
    peers: Arc<PeerManager>,
    access: Arc<AccessManager>,
    extenders: Arc<AsyncMutex<ExtenderMultiplexer>>,
    relay: Arc<AsyncMutex<RelayManager>>,
}

impl Listener {
    /// Build a listener sharing the given peer registry and subsystem
    /// managers with the rest of the local instance.
    pub fn new(
        config: ListenerConfig,
        identity: LocalIdentityTemplate,
        peers: Arc<PeerManager>,
        access: Arc<AccessManager>,
        extenders: Arc<AsyncMutex<ExtenderMultiplexer>>,
        relay: Arc<AsyncMutex<RelayManager>>,
    ) -> Self {
        Self { config, identity: Arc::new(identity), peers, access, extenders, relay }
    }

    /// Bind every configured address and accept connections until an
    /// accept call returns a fatal I/O error.
    pub async fn run(self) -> Result<()> {
        let mut sockets = Vec::with_capacity(self.config.bind.len());
        for addr in &self.config.bind {
            sockets.push(TcpListener::bind(addr).await?);
        }

        let state = Arc::new(self.clone_shared());
        let mut tasks = Vec::with_capacity(sockets.len());
        for socket in sockets {
            tasks.push(tokio::spawn(accept_loop(socket, state.clone())));
        }
        for task in tasks {
            let _ = task.await;
        }
        Ok(())
    }

    fn clone_shared(&self) -> SharedListenerState {
        SharedListenerState {
            config: self.config.clone(),
            identity: self.identity.clone(),
            peers: self.peers.clone(),
            access: self.access.clone(),
            extenders: self.extenders.clone(),
            relay: self.relay.clone(),
        }
    }
}

#[derive(Clone)]
struct SharedListenerState {
    config: ListenerConfig,
    identity: Arc<LocalIdentityTemplate>,
    peers: Arc<PeerManager>,
    access: Arc<AccessManager>,
    extenders: Arc<AsyncMutex<ExtenderMultiplexer>>,
    relay: Arc<AsyncMutex<RelayManager>>,
}

async fn accept_loop(socket: TcpListener, state: Arc<SharedListenerState>) {
    loop {
        let (stream, addr) = match socket.accept().await {
            Ok(pair) => pair,
            Err(err) => {
                tracing::warn!(error = %err, "accept failed");
                continue;
            }
        };

        let now = Instant::now();
        if !state.access.is_ip_allowed(addr.ip(), now, CheckKind::All) {
            tracing::debug!(peer = %addr, "rejected by access control");
            continue;
        }
        if !state.access.record_direct_attempt(addr.ip(), now) {
            tracing::debug!(peer = %addr, "direct connect rate limit exceeded");
            continue;
        }
        state.access.record_connection(addr.ip());

        let luid = state.peers.allocate();
        let ctx = ConnectionContext {
            luid,
            endpoint: addr,
            access: state.access.clone(),
            extenders: state.extenders.clone(),
            relay: state.relay.clone(),
            peers: state.peers.clone(),
            max_handshake_duration: state.config.max_handshake_duration,
            identity: state.identity.clone(),
            relay_connect_timeout: state.config.relay_connect_timeout,
            security: state.identity.security,
        };
        let identity = state.identity.build();
        let data_size_offset = state.identity.data_size_offset;
        let data_size_xor_mask = state.identity.data_size_xor_mask;
        tokio::spawn(connection::run_connection(stream, Role::Bob, identity, data_size_offset, data_size_xor_mask, ctx));
    }
}
