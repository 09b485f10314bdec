//! Drives one [`PeerSession`] over a `TcpStream`: the handshake phase
//! (unencrypted inner frames, since no symmetric key exists yet) and,
//! once `Ready`, the encrypted application/extender/relay dispatch loop.
//!
//! Every frame on the wire, in both phases, is a 4-byte big-endian length
//! prefix followed by the frame bytes `message::frame`/`PeerSession`
//! already produce — `message::transport`'s own self-describing size
//! field exists for the outer frame alone and isn't re-derived here, since
//! the TCP stream boundary is already unambiguous from this prefix.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch, Mutex as AsyncMutex};

use crate::access::AccessManager;
use crate::config::SecurityParameters;
use crate::core::constants::transport as tc;
use crate::core::error::{ProtocolError, Result};
use crate::core::id::{ExtenderUUID, PeerLUID};
use crate::extender::{ExtenderMultiplexer, ExtenderUpdateKind};
use crate::message::frame::{self, MessageType};
use crate::relay::RelayManager;
use crate::session::{DisconnectCause, LocalIdentity, PeerSession, Role, SessionStatus};

use super::dialer::{self, ConnectConfig};
use super::identity::LocalIdentityTemplate;
use super::manager::{OutboundMessage, PeerManager};

async fn write_frame(stream: &mut TcpStream, buf: &[u8]) -> Result<()> {
    stream.write_u32(buf.len() as u32).await?;
    stream.write_all(buf).await?;
    Ok(())
}

async fn read_frame(stream: &mut TcpStream) -> Result<Vec<u8>> {
    let len = stream.read_u32().await? as usize;
    if len > tc::MAX_MESSAGE_SIZE {
        return Err(ProtocolError::FrameTooLarge { declared: len, max: tc::MAX_MESSAGE_SIZE }.into());
    }
    let mut buf = vec![0u8; len];
    stream.read_exact(&mut buf).await?;
    Ok(buf)
}

async fn send_handshake_message(stream: &mut TcpStream, message_type: MessageType, payload: &[u8]) -> Result<()> {
    let framed = frame::write(message_type, None, payload, None, tc::MAX_MESSAGE_DATA_SIZE)?;
    write_frame(stream, &framed).await
}

fn encode_extender_update(uuid: ExtenderUUID, kind: ExtenderUpdateKind) -> Vec<u8> {
    let mut buf = Vec::with_capacity(17);
    buf.extend_from_slice(uuid.as_uuid().as_bytes());
    buf.push(match kind {
        ExtenderUpdateKind::Added => 1,
        ExtenderUpdateKind::Removed => 0,
    });
    buf
}

fn decode_extender_update(payload: &[u8]) -> Option<(ExtenderUUID, ExtenderUpdateKind)> {
    if payload.len() != 17 {
        return None;
    }
    let uuid = ExtenderUUID::from_uuid(uuid::Uuid::from_bytes(payload[0..16].try_into().unwrap()));
    let kind = if payload[16] != 0 { ExtenderUpdateKind::Added } else { ExtenderUpdateKind::Removed };
    Some((uuid, kind))
}

/// Everything one connection's task needs beyond the socket and the
/// session it drives, shared with every other live connection.
pub struct ConnectionContext {
    /// This connection's process-local handle.
    pub luid: PeerLUID,
    /// The remote socket address.
    pub endpoint: SocketAddr,
    /// Shared access-control gatekeeper.
    pub access: Arc<AccessManager>,
    /// Shared extender dispatch.
    pub extenders: Arc<AsyncMutex<ExtenderMultiplexer>>,
    /// Shared relay circuit manager.
    pub relay: Arc<AsyncMutex<RelayManager>>,
    /// Registry of every other live connection, for relay forwarding and
    /// dial-side session reuse.
    pub peers: Arc<PeerManager>,
    /// Maximum duration the handshake may take before it's abandoned.
    pub max_handshake_duration: Duration,
    /// This instance's identity template, needed to dial a fresh on-demand
    /// connection when an intermediate relay hop's `final_endpoint` isn't
    /// already `Ready` (§4.6, `hops == 1`).
    pub identity: Arc<LocalIdentityTemplate>,
    /// Upper bound on a relay hop's on-demand dial, mirroring
    /// `relay.connect_timeout`.
    pub relay_connect_timeout: Duration,
    /// Key-update pacing, message padding bounds, and cover-traffic budget
    /// for the session this connection drives.
    pub security: SecurityParameters,
}

/// Run one connection end to end: handshake, registration, and dispatch
/// until the peer disconnects or the socket errors out. Always returns
/// `Ok(())`; failures are logged and simply end the connection.
pub async fn run_connection(
    mut stream: TcpStream,
    role: Role,
    identity: LocalIdentity,
    data_size_offset: u8,
    data_size_xor_mask: u32,
    ctx: ConnectionContext,
) {
    let peer_endpoint = ctx.endpoint;
    let result = drive(&mut stream, role, identity, data_size_offset, data_size_xor_mask, &ctx).await;
    if let Err(err) = &result {
        tracing::debug!(peer = ?peer_endpoint, error = %err, "connection ended");
    }
    ctx.peers.remove(ctx.luid);
    ctx.access.release_connection(peer_endpoint.ip());
}

async fn drive(
    stream: &mut TcpStream,
    role: Role,
    identity: LocalIdentity,
    data_size_offset: u8,
    data_size_xor_mask: u32,
    ctx: &ConnectionContext,
) -> Result<()> {
    let mut session = PeerSession::new(ctx.luid, role, identity, data_size_offset, data_size_xor_mask, ctx.security);

    let (status_tx, status_rx) = watch::channel(SessionStatus::Initialized);
    let (uuid_tx, uuid_rx) = watch::channel(None);
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<OutboundMessage>(64);

    ctx.peers.insert(super::manager::PeerHandle {
        luid: ctx.luid,
        role,
        endpoint: ctx.endpoint,
        outbound: outbound_tx,
        status: status_rx,
        uuid: uuid_rx,
    });

    run_handshake(stream, &mut session, ctx.max_handshake_duration).await?;
    let _ = status_tx.send(SessionStatus::Ready);
    let _ = uuid_tx.send(session.peer_uuid());

    if !ctx.access.is_peer_allowed(&session.peer_uuid().expect("handshake sets peer uuid")) {
        session.disconnect(DisconnectCause::ProtocolViolation);
        return Ok(());
    }

    {
        let mut extenders = ctx.extenders.lock().await;
        extenders.on_peer_ready(ctx.luid);
        for uuid in extenders.registered_uuids() {
            let payload = encode_extender_update(uuid, ExtenderUpdateKind::Added);
            write_frame(stream, &frame::write(MessageType::ExtenderUpdate, None, &payload, None, tc::MAX_MESSAGE_DATA_SIZE)?).await?;
        }
    }

    let local_addr = stream.local_addr().map(|a| a.ip()).unwrap_or(ctx.endpoint.ip());
    let dispatch_result = dispatch_loop(stream, &mut session, &mut outbound_rx, ctx, local_addr).await;

    {
        let mut extenders = ctx.extenders.lock().await;
        extenders.on_peer_disconnected(ctx.luid);
    }
    let _ = status_tx.send(SessionStatus::Disconnected);
    dispatch_result
}

async fn run_handshake(stream: &mut TcpStream, session: &mut PeerSession, max_duration: Duration) -> Result<()> {
    if session.role == Role::Alice {
        let (message_type, payload) = session.start_as_alice()?;
        send_handshake_message(stream, message_type, &payload).await?;
    }

    loop {
        if session.handshake_timed_out(max_duration) {
            return Err(ProtocolError::WrongHandshakePhase.into());
        }
        let framed = read_frame(stream).await?;
        let message = frame::read(&framed, None, tc::MAX_MESSAGE_DATA_SIZE)?;
        let step = session.on_handshake_message(message.message_type, &message.payload)?;
        if let Some((message_type, payload)) = step.to_send {
            send_handshake_message(stream, message_type, &payload).await?;
        }
        if step.done {
            return Ok(());
        }
    }
}

/// How often the dispatch loop checks whether this session's current send
/// key has aged past its key-update trigger (§4.5: byte-count threshold or
/// randomized interval elapsed). A cheap poll, not a precise timer — it
/// only needs to run more often than the shortest configured interval.
const KEY_UPDATE_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// How often the dispatch loop checks whether the session's cover-traffic
/// generator wants to emit a noise message. Shorter than
/// [`KEY_UPDATE_POLL_INTERVAL`] since the shortest configured noise
/// interval (level 5) is much tighter than any key-update interval.
const NOISE_POLL_INTERVAL: Duration = Duration::from_secs(1);

async fn dispatch_loop(
    stream: &mut TcpStream,
    session: &mut PeerSession,
    outbound_rx: &mut mpsc::Receiver<OutboundMessage>,
    ctx: &ConnectionContext,
    local_addr: std::net::IpAddr,
) -> Result<()> {
    let mut key_update_poll = tokio::time::interval(KEY_UPDATE_POLL_INTERVAL);
    key_update_poll.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut noise_poll = tokio::time::interval(NOISE_POLL_INTERVAL);
    noise_poll.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            outbound = outbound_rx.recv() => {
                match outbound {
                    Some(OutboundMessage::Application { message_type, extender_uuid, payload }) => {
                        let frame = session.encode_message(message_type, extender_uuid, &payload)?;
                        write_frame(stream, &frame).await?;
                    }
                    Some(OutboundMessage::Disconnect) | None => {
                        session.disconnect(DisconnectCause::LocalRequest);
                        return Ok(());
                    }
                }
            }
            framed = read_frame(stream) => {
                let framed = framed?;
                let message = session.decode_message(&framed)?;
                handle_inbound(stream, session, message, ctx, local_addr).await?;
            }
            _ = key_update_poll.tick() => {
                if !session.key_update_in_progress() && session.key_update_due() {
                    let (message_type, payload) = session.begin_key_update()?;
                    let frame = session.encode_message(message_type, None, &payload)?;
                    write_frame(stream, &frame).await?;
                }
            }
            _ = noise_poll.tick() => {
                if session.noise_due() {
                    if let Some(noise_payload) = session.generate_noise() {
                        let frame = session.encode_message(MessageType::Noise, None, &noise_payload)?;
                        write_frame(stream, &frame).await?;
                    }
                }
            }
        }
    }
}

/// Drive one inbound key-update control message through the session's
/// rekeying state machine and write out whatever it produces (a single
/// reply, several in sequence, or none once the cycle is done). Unlike the
/// initial handshake, these run after the session is `Ready`, so every
/// message — inbound and outbound — goes through the established
/// encrypted transport rather than the plaintext handshake framing.
async fn handle_key_update_message(
    stream: &mut TcpStream,
    session: &mut PeerSession,
    message_type: MessageType,
    payload: &[u8],
) -> Result<()> {
    for (next_type, next_payload) in session.on_key_update_message(message_type, payload)? {
        let frame = session.encode_message(next_type, None, &next_payload)?;
        write_frame(stream, &frame).await?;
    }
    Ok(())
}

/// Hand a frame to this connection's own outbound queue, so it is written
/// out on this same stream by `dispatch_loop`'s next iteration — the path
/// used to answer the peer that just sent us a relay-control message,
/// without a second lookup through [`PeerManager`].
fn reply_to_sender(ctx: &ConnectionContext, message_type: MessageType, payload: Vec<u8>) {
    let Some(me) = ctx.peers.get(ctx.luid) else { return };
    if me.outbound.try_send(OutboundMessage::Application { message_type, extender_uuid: None, payload }).is_err() {
        tracing::warn!(peer = ?ctx.luid, kind = ?message_type, "outbound queue full, dropping relay reply");
    }
}

/// Forward a frame to another live connection's outbound queue.
fn forward_to(ctx: &ConnectionContext, to: PeerLUID, message_type: MessageType, payload: Vec<u8>) {
    let Some(handle) = ctx.peers.get(to) else {
        tracing::debug!(to = ?to, kind = ?message_type, "next hop no longer connected, dropping relay frame");
        return;
    };
    if handle.outbound.try_send(OutboundMessage::Application { message_type, extender_uuid: None, payload }).is_err() {
        tracing::warn!(to = ?to, kind = ?message_type, "next hop outbound queue full, dropping relay frame");
    }
}

/// Dial `final_endpoint` on demand for a `hops == 1` `RelayCreate` whose
/// final hop isn't already connected. Reuse is irrelevant here (nothing
/// else could already hold the handle we just failed to find), so
/// `allow_reuse` is left at its default; failures (the connect timing out,
/// access control rejecting the address) are logged and reported to the
/// caller as `None`, which surfaces as `NoPeersAvailable` to the circuit.
async fn dial_final_hop(ctx: &ConnectionContext, final_endpoint: SocketAddr) -> Option<super::manager::PeerHandle> {
    let config = ConnectConfig { connect_timeout: ctx.relay_connect_timeout, allow_reuse: true };
    match dialer::connect_to_callback(
        final_endpoint,
        &ctx.identity,
        config,
        ctx.peers.clone(),
        ctx.access.clone(),
        ctx.extenders.clone(),
        ctx.relay.clone(),
    )
    .await
    {
        Ok((luid, _reused)) => ctx.peers.get(luid),
        Err(err) => {
            tracing::debug!(to = %final_endpoint, error = %err, "on-demand relay dial failed");
            None
        }
    }
}

/// Handle an inbound `RelayCreate` (`BeginRelay`) at this hop. Three cases:
/// - `hops == 0`: this hop is the circuit's end.
/// - `hops == 1`: the next hop is `final_endpoint` itself. An
///   already-`Ready` session to it is reused; otherwise one is dialed on
///   demand via [`dialer::connect_to_callback`], using this instance's own
///   identity template, before the circuit opens toward it.
/// - `hops > 1`: pick any other live, same-subnet-excluded peer as the
///   next interior hop.
async fn handle_relay_create(ctx: &ConnectionContext, local_addr: std::net::IpAddr, payload: crate::relay::RelayCreatePayload) {
    use crate::relay::{CircuitId, RelayPosition, RelayStatus as LinkStatus, RelayStatusCode, RelayStatusPayload};

    let circuit = CircuitId(payload.port);
    if payload.hops == 0 {
        ctx.relay.lock().await.open_circuit(circuit, ctx.luid, None, RelayPosition::End);
        ctx.relay.lock().await.set_status(circuit, LinkStatus::Connected);
        reply_to_sender(
            ctx,
            MessageType::RelayStatus,
            RelayStatusPayload { port: payload.port, status: RelayStatusCode::Connected }.encode(),
        );
        return;
    }

    let next = if payload.hops == 1 {
        let existing =
            ctx.peers.find_by_endpoint(payload.final_endpoint).filter(|handle| *handle.status.borrow() == SessionStatus::Ready);
        match existing {
            Some(handle) => Some(handle),
            None => dial_final_hop(ctx, payload.final_endpoint).await,
        }
    } else {
        let candidates = ctx.peers.ready_candidates(ctx.luid);
        let relay = ctx.relay.lock().await;
        candidates.into_iter().find(|candidate| {
            relay.is_next_hop_allowed(
                candidate.endpoint.ip(),
                payload.origin_endpoint.ip(),
                local_addr,
                Some(payload.final_endpoint.ip()),
            )
        })
    };

    match next {
        None => {
            reply_to_sender(
                ctx,
                MessageType::RelayStatus,
                RelayStatusPayload { port: payload.port, status: RelayStatusCode::NoPeersAvailable }.encode(),
            );
        }
        Some(next) => {
            ctx.relay.lock().await.open_circuit(circuit, ctx.luid, Some(next.luid), RelayPosition::Between);
            let forwarded = crate::relay::RelayCreatePayload { hops: payload.hops - 1, ..payload };
            forward_to(ctx, next.luid, MessageType::RelayCreate, forwarded.encode());
        }
    }
}

async fn handle_relay_status(ctx: &ConnectionContext, payload: &[u8]) -> Result<()> {
    use crate::relay::{CircuitId, RelayStatusPayload};

    let decoded = RelayStatusPayload::decode(payload)?;
    let circuit = CircuitId(decoded.port);
    let mut relay = ctx.relay.lock().await;
    relay.set_status(circuit, decoded.status.to_link_status());
    let other = relay.other_hop(circuit, ctx.luid);
    drop(relay);

    if let Some(other) = other {
        forward_to(ctx, other, MessageType::RelayStatus, payload.to_vec());
    } else {
        tracing::trace!(circuit = ?circuit, status = ?decoded.status, "relay status reached the terminus");
    }
    Ok(())
}

async fn handle_relay_data(ctx: &ConnectionContext, payload: &[u8]) -> Result<()> {
    use crate::relay::{CircuitId, RelayDataAckPayload, RelayDataPayload};

    let decoded = RelayDataPayload::decode(payload)?;
    let circuit = CircuitId(decoded.port);

    reply_to_sender(
        ctx,
        MessageType::RelayDataAck,
        RelayDataAckPayload { port: decoded.port, message_id: decoded.message_id }.encode(),
    );

    let mut relay = ctx.relay.lock().await;
    let other = relay.other_hop(circuit, ctx.luid);
    if let Some(other) = other {
        let admitted = relay.try_admit_data_send(circuit, other, decoded.message_id, decoded.data.len(), payload.to_vec());
        drop(relay);
        match admitted {
            Some(forwarded) => forward_to(ctx, other, MessageType::RelayData, forwarded),
            None => {
                tracing::debug!(circuit = ?circuit, "relay data-rate window full, queuing until an ack frees a slot");
            }
        }
    } else {
        relay.deliver(circuit, decoded.data);
    }
    Ok(())
}

async fn handle_relay_data_ack(ctx: &ConnectionContext, payload: &[u8]) -> Result<()> {
    use crate::relay::{CircuitId, RelayDataAckPayload};

    let decoded = RelayDataAckPayload::decode(payload)?;
    let circuit = CircuitId(decoded.port);
    let mut relay = ctx.relay.lock().await;
    let mtu = relay.record_data_ack(circuit, ctx.luid, decoded.message_id);
    if mtu.is_none() {
        tracing::trace!(circuit = ?circuit, message_id = decoded.message_id, "ack for unknown or already-resolved relay send");
    }
    let freed = relay.next_queued_data_send(circuit, ctx.luid);
    drop(relay);
    if let Some((_, payload)) = freed {
        forward_to(ctx, ctx.luid, MessageType::RelayData, payload);
    }
    Ok(())
}

async fn handle_inbound(
    stream: &mut TcpStream,
    session: &mut PeerSession,
    message: frame::Message,
    ctx: &ConnectionContext,
    local_addr: std::net::IpAddr,
) -> Result<()> {
    match message.message_type {
        MessageType::Noise => {}
        MessageType::ExtenderCommunication => {
            if let Some(uuid) = message.extender_uuid {
                ctx.extenders.lock().await.dispatch_communication(ctx.luid, uuid, &message.payload);
            }
        }
        MessageType::ExtenderUpdate => {
            if let Some((uuid, kind)) = decode_extender_update(&message.payload) {
                ctx.extenders.lock().await.handle_extender_update(ctx.luid, uuid, kind);
            }
        }
        MessageType::RelayCreate => {
            let payload = crate::relay::RelayCreatePayload::decode(&message.payload)?;
            handle_relay_create(ctx, local_addr, payload).await;
        }
        MessageType::RelayStatus => handle_relay_status(ctx, &message.payload).await?,
        MessageType::RelayData => handle_relay_data(ctx, &message.payload).await?,
        MessageType::RelayDataAck => handle_relay_data_ack(ctx, &message.payload).await?,
        MessageType::BeginPrimaryKeyUpdateExchange
        | MessageType::EndPrimaryKeyUpdateExchange
        | MessageType::BeginSecondaryKeyUpdateExchange
        | MessageType::EndSecondaryKeyUpdateExchange
        | MessageType::KeyUpdateReady => {
            handle_key_update_message(stream, session, message.message_type, &message.payload).await?;
        }
        other => {
            tracing::trace!(peer = ?ctx.luid, kind = ?other, "unhandled post-handshake message type");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::net::TcpListener;

    use crate::access::{AccessManager, AccessManagerConfig, DefaultPolicy};
    use crate::core::id::PeerUUID;
    use crate::core::id::SigningAlgorithmFamily;
    use crate::crypto::{Asymmetric, Compression, Hash, Signature, Symmetric};
    use crate::extender::ExtenderMultiplexer;
    use crate::relay::RelayManager;
    use crate::session::SessionStatus;

    use super::*;
    use super::super::dialer::{self, ConnectConfig};
    use super::super::manager::PeerManager;

    fn identity_template(uuid_seed: &[u8]) -> LocalIdentityTemplate {
        LocalIdentityTemplate {
            uuid: PeerUUID::from_public_key(SigningAlgorithmFamily::Ed25519, uuid_seed),
            require_authentication: false,
            signing_key: None,
            global_shared_secret: None,
            hash: vec![Hash::Blake2s256, Hash::Sha256],
            primary_asymmetric: vec![Asymmetric::EcdhX25519],
            secondary_asymmetric: vec![Asymmetric::KemNtruPrime],
            symmetric: vec![Symmetric::ChaCha20Poly1305],
            compression: vec![Compression::Deflate],
            signature: vec![Signature::Ed25519],
            data_size_offset: 9,
            data_size_xor_mask: 0,
            security: crate::config::SecurityLevel::Three.parameters().unwrap(),
        }
    }

    struct Stack {
        peers: Arc<PeerManager>,
        access: Arc<AccessManager>,
        extenders: Arc<AsyncMutex<ExtenderMultiplexer>>,
        relay: Arc<AsyncMutex<RelayManager>>,
    }

    impl Stack {
        fn new() -> Self {
            Self {
                peers: Arc::new(PeerManager::new(4)),
                access: Arc::new(AccessManager::new(DefaultPolicy::Allowed, AccessManagerConfig::default())),
                extenders: Arc::new(AsyncMutex::new(ExtenderMultiplexer::new())),
                relay: Arc::new(AsyncMutex::new(RelayManager::new(
                    Duration::from_secs(30),
                    Duration::from_secs(30),
                    24,
                    64,
                ))),
            }
        }
    }

    /// Two live TCP connections, one per side, reaching `Ready` end to end
    /// through a real loopback socket: listener accept, `run_connection` in
    /// the `Bob` role, and `dialer::connect_to` driving the `Alice` role.
    #[tokio::test]
    async fn two_peers_complete_a_real_tcp_handshake() {
        let bob_stack = Stack::new();
        let alice_stack = Stack::new();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let bob_addr = listener.local_addr().unwrap();
        let bob_identity = identity_template(b"bob seed padded out to 32 bytes!");

        let bob_peers = bob_stack.peers.clone();
        let bob_access = bob_stack.access.clone();
        let bob_extenders = bob_stack.extenders.clone();
        let bob_relay = bob_stack.relay.clone();
        tokio::spawn(async move {
            let (stream, addr) = listener.accept().await.unwrap();
            let luid = bob_peers.allocate();
            let ctx = ConnectionContext {
                luid,
                endpoint: addr,
                access: bob_access.clone(),
                extenders: bob_extenders,
                relay: bob_relay,
                peers: bob_peers,
                max_handshake_duration: Duration::from_secs(5),
                identity: Arc::new(bob_identity.clone()),
                relay_connect_timeout: Duration::from_secs(5),
                security: bob_identity.security,
            };
            let identity = bob_identity.build();
            run_connection(stream, Role::Bob, identity, bob_identity.data_size_offset, bob_identity.data_size_xor_mask, ctx).await;
        });

        let alice_identity = identity_template(b"alice seed padded to 32 bytes!!");
        let config = ConnectConfig { connect_timeout: Duration::from_secs(5), allow_reuse: true };
        let luid = dialer::connect_to(
            bob_addr,
            &alice_identity,
            config,
            alice_stack.peers.clone(),
            alice_stack.access.clone(),
            alice_stack.extenders.clone(),
            alice_stack.relay.clone(),
        )
        .await
        .unwrap();

        let handle = alice_stack.peers.get(luid).unwrap();
        assert_eq!(*handle.status.borrow(), SessionStatus::Ready);
    }

    /// Dialing the same already-`Ready` endpoint twice hands back the same
    /// session instead of opening a second connection.
    #[tokio::test]
    async fn second_dial_to_a_ready_endpoint_reuses_the_session() {
        let bob_stack = Stack::new();
        let alice_stack = Stack::new();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let bob_addr = listener.local_addr().unwrap();
        let bob_identity = identity_template(b"bob seed padded out to 32 bytes!");

        let bob_peers = bob_stack.peers.clone();
        let bob_access = bob_stack.access.clone();
        let bob_extenders = bob_stack.extenders.clone();
        let bob_relay = bob_stack.relay.clone();
        tokio::spawn(async move {
            loop {
                let (stream, addr) = listener.accept().await.unwrap();
                let luid = bob_peers.allocate();
                let ctx = ConnectionContext {
                    luid,
                    endpoint: addr,
                    access: bob_access.clone(),
                    extenders: bob_extenders.clone(),
                    relay: bob_relay.clone(),
                    peers: bob_peers.clone(),
                    max_handshake_duration: Duration::from_secs(5),
                    identity: Arc::new(bob_identity.clone()),
                    relay_connect_timeout: Duration::from_secs(5),
                    security: bob_identity.security,
                };
                let identity = bob_identity.build();
                tokio::spawn(run_connection(stream, Role::Bob, identity, bob_identity.data_size_offset, bob_identity.data_size_xor_mask, ctx));
            }
        });

        let alice_identity = identity_template(b"alice seed padded to 32 bytes!!");
        let config = ConnectConfig { connect_timeout: Duration::from_secs(5), allow_reuse: true };
        let (first, reused_first) = dialer::connect_to_callback(
            bob_addr,
            &alice_identity,
            config,
            alice_stack.peers.clone(),
            alice_stack.access.clone(),
            alice_stack.extenders.clone(),
            alice_stack.relay.clone(),
        )
        .await
        .unwrap();
        assert!(!reused_first);

        let (second, reused_second) = dialer::connect_to_callback(
            bob_addr,
            &alice_identity,
            config,
            alice_stack.peers.clone(),
            alice_stack.access.clone(),
            alice_stack.extenders.clone(),
            alice_stack.relay.clone(),
        )
        .await
        .unwrap();
        assert!(reused_second);
        assert_eq!(first, second);
    }
}
