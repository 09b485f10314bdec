//! Outbound connection establishment, with session-reuse semantics for a
//! second `connect_to` against an endpoint already `Ready`.
//!
//! Grounded on `Core/Local.cpp`'s `Local::Connect`: dialing an endpoint
//! that already has a live, `Ready` session to it hands back that
//! session's `PeerLUID` instead of opening a second TCP connection,
//! unless the caller explicitly forbids reuse.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::net::TcpStream;
use tokio::sync::Mutex as AsyncMutex;

use crate::access::AccessManager;
use crate::core::error::{PolicyError, Result, TimeoutError};
use crate::core::id::PeerLUID;
use crate::extender::ExtenderMultiplexer;
use crate::relay::RelayManager;
use crate::session::{Role, SessionStatus};

use super::connection::{self, ConnectionContext};
use super::identity::LocalIdentityTemplate;
use super::manager::PeerManager;

/// Per-dial configuration distinct from the shared identity template.
#[derive(Debug, Clone, Copy)]
pub struct ConnectConfig {
    /// Upper bound on TCP connect plus handshake completion.
    pub connect_timeout: Duration,
    /// Whether an existing `Ready` session to the same endpoint may be
    /// returned instead of dialing a new one.
    pub allow_reuse: bool,
}

impl Default for ConnectConfig {
    fn default() -> Self {
        Self { connect_timeout: Duration::from_secs(60), allow_reuse: true }
    }
}

/// Dial `endpoint`, returning the new (or reused) session's handle and
/// whether it was reused rather than freshly dialed.
#[allow(clippy::too_many_arguments)]
pub async fn connect_to_callback(
    endpoint: SocketAddr,
    identity: &LocalIdentityTemplate,
    config: ConnectConfig,
    peers: Arc<PeerManager>,
    access: Arc<AccessManager>,
    extenders: Arc<AsyncMutex<ExtenderMultiplexer>>,
    relay: Arc<AsyncMutex<RelayManager>>,
) -> Result<(PeerLUID, bool)> {
    if let Some(existing) = peers.find_by_endpoint(endpoint) {
        if *existing.status.borrow() == SessionStatus::Ready {
            if !config.allow_reuse {
                return Err(PolicyError::ReuseForbidden.into());
            }
            return Ok((existing.luid, true));
        }
    }

    let now = Instant::now();
    if !access.record_direct_attempt(endpoint.ip(), now) {
        return Err(PolicyError::ReputationUnacceptable.into());
    }
    access.record_connection(endpoint.ip());

    let connect = TcpStream::connect(endpoint);
    let stream = match tokio::time::timeout(config.connect_timeout, connect).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(err)) => {
            access.release_connection(endpoint.ip());
            return Err(err.into());
        }
        Err(_) => {
            access.release_connection(endpoint.ip());
            return Err(TimeoutError::Connect.into());
        }
    };

    let luid = peers.allocate();
    let ctx = ConnectionContext {
        luid,
        endpoint,
        access: access.clone(),
        extenders,
        relay,
        peers: peers.clone(),
        max_handshake_duration: config.connect_timeout,
        identity: Arc::new(identity.clone()),
        relay_connect_timeout: config.connect_timeout,
        security: identity.security,
    };
    let local_identity = identity.build();
    let data_size_offset = identity.data_size_offset;
    let data_size_xor_mask = identity.data_size_xor_mask;
    tokio::spawn(connection::run_connection(stream, Role::Alice, local_identity, data_size_offset, data_size_xor_mask, ctx));

    wait_until_ready(&peers, luid, config.connect_timeout).await?;
    Ok((luid, false))
}

/// Dial `endpoint` and return its handle once `Ready`, without the reuse
/// flag `connect_to_callback` reports.
pub async fn connect_to(
    endpoint: SocketAddr,
    identity: &LocalIdentityTemplate,
    config: ConnectConfig,
    peers: Arc<PeerManager>,
    access: Arc<AccessManager>,
    extenders: Arc<AsyncMutex<ExtenderMultiplexer>>,
    relay: Arc<AsyncMutex<RelayManager>>,
) -> Result<PeerLUID> {
    connect_to_callback(endpoint, identity, config, peers, access, extenders, relay).await.map(|(luid, _)| luid)
}

async fn wait_until_ready(peers: &Arc<PeerManager>, luid: PeerLUID, timeout: Duration) -> Result<()> {
    let Some(mut handle) = peers.get(luid) else {
        return Err(TimeoutError::Handshake.into());
    };
    let wait = async {
        loop {
            if *handle.status.borrow() == SessionStatus::Ready {
                return;
            }
            if handle.status.changed().await.is_err() {
                return;
            }
        }
    };
    tokio::time::timeout(timeout, wait).await.map_err(|_| TimeoutError::Handshake)?;
    Ok(())
}
