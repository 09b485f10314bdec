//! `PeerSession`: the handshake driver and post-handshake dispatch state
//! for one peer connection.
//!
//! Grounded on `Core/Peer/Peer.cpp`'s phase dispatch table: each inbound
//! message is matched against the session's current [`HandshakePhase`],
//! rejected with [`ProtocolError::WrongHandshakePhase`] if it arrives out
//! of order, and otherwise advances the phase and produces the paired
//! response message. The driver is deliberately transport-agnostic — it
//! consumes and produces `(MessageType, Vec<u8>)` pairs rather than
//! touching a socket, so [`crate::net`] can drive it over a real
//! connection and tests can drive it by handing Alice's output directly to
//! Bob and back.

use crate::config::SecurityParameters;
use crate::core::error::{ProtocolError, Result};
use crate::core::id::{ExtenderUUID, PeerLUID, PeerUUID};
use crate::crypto::keys::{AsymmetricKeyData, SymmetricKeyData, SymmetricKeyType};
use crate::crypto::{self, Asymmetric, Compression, Hash, Signature, Symmetric};
use crate::message::frame::MessageType;
use crate::message::transport::DataSizeSettings;

use super::handshake::{
    self, AuthenticationPayload, KeyExchangePayload, MetaExchangePayload, NegotiatedAlgorithms,
    SessionInitPayload, Transcript,
};
use super::keyupdate::{KeyOverlap, KeyUpdateSchedule, KeyUpdateSettings};
use super::noise::NoiseGenerator;
use super::state::{DisconnectCause, HandshakePhase, Role, SessionStatus, SessionTiming};

/// Locally supplied identity and algorithm-vocabulary inputs used to build
/// this side's `MetaExchangePayload`.
pub struct LocalIdentity {
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
}

/// One step of driving the handshake: an optional message to send next,
/// and whether this step completed the handshake.
pub struct HandshakeStep {
    /// The message to send in response, if any.
    pub to_send: Option<(MessageType, Vec<u8>)>,
    /// Whether the handshake reached [`HandshakePhase::Done`] as of this step.
    pub done: bool,
}

/// A fully driven peer session: handshake state machine plus, once ready,
/// the symmetric keys, key-update schedule, and noise generator needed to
/// carry traffic.
pub struct PeerSession {
    /// Process-local handle, stable for the life of the session.
    pub luid: PeerLUID,
    /// Which side of the handshake this session plays.
    pub role: Role,
    /// Current lifecycle status.
    pub status: SessionStatus,
    /// Current handshake phase.
    pub phase: HandshakePhase,
    /// Timing bookkeeping for handshake timeout enforcement.
    pub timing: SessionTiming,

    local: MetaExchangePayload,
    peer_meta: Option<MetaExchangePayload>,
    peer_uuid: Option<PeerUUID>,
    negotiated: Option<NegotiatedAlgorithms>,
    signing_key: Option<(Vec<u8>, Vec<u8>)>,
    peer_signature_verify_key: Option<Vec<u8>>,
    global_shared_secret: Option<Vec<u8>>,

    primary_key_data: Option<AsymmetricKeyData>,
    secondary_key_data: Option<AsymmetricKeyData>,
    transcript: Transcript,

    data_size_settings: Option<DataSizeSettings>,
    send_keys: Option<KeyOverlap>,
    recv_keys: Option<KeyOverlap>,
    send_counter: u64,
    recv_counter: u64,

    key_update_schedule: Option<KeyUpdateSchedule>,
    key_update_phase: KeyUpdatePhase,
    pending_primary_key_update: Option<AsymmetricKeyData>,
    pending_secondary_key_update: Option<AsymmetricKeyData>,
    key_update_ready_sent: bool,
    key_update_ready_received: bool,
    noise: Option<NoiseGenerator>,

    security: SecurityParameters,
    send_next_prefix_len: u16,
    recv_next_prefix_len: u16,

    local_extenders: Vec<ExtenderUUID>,
    peer_extenders: Vec<ExtenderUUID>,
}

/// Where a key update (§4.5) currently stands. Mirrors the initial
/// handshake's primary-then-secondary phase progression, re-entered after
/// the session is already [`SessionStatus::Ready`] instead of before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KeyUpdatePhase {
    /// No key update in progress; a new one may be started or accepted.
    Idle,
    /// Waiting for the primary key-update exchange to complete.
    PrimaryKeyUpdate,
    /// Waiting for the secondary key-update exchange to complete.
    SecondaryKeyUpdate,
    /// New keys derived on this side; waiting for the peer's
    /// `KeyUpdateReady` to close the overlap window.
    AwaitingReady,
}

impl PeerSession {
    /// Start a fresh session in `Initialized` state, ready to begin its
    /// handshake. `data_size_offset`/`data_size_xor_mask` are this side's
    /// proposed transport-obfuscation settings. `security` governs this
    /// session's key-update pacing, per-message padding bounds, and
    /// cover-traffic budget once the handshake completes.
    pub fn new(
        luid: PeerLUID,
        role: Role,
        identity: LocalIdentity,
        data_size_offset: u8,
        data_size_xor_mask: u32,
        security: SecurityParameters,
    ) -> Self {
        let local = handshake::build_meta_exchange(
            identity.uuid,
            identity.require_authentication,
            identity.hash,
            identity.primary_asymmetric,
            identity.secondary_asymmetric,
            identity.symmetric,
            identity.compression,
            identity.signature,
            data_size_offset,
            data_size_xor_mask,
        );
        Self {
            luid,
            role,
            status: SessionStatus::Initialized,
            phase: HandshakePhase::MetaExchange,
            timing: SessionTiming::new(),
            local,
            peer_meta: None,
            peer_uuid: None,
            negotiated: None,
            signing_key: identity.signing_key,
            peer_signature_verify_key: None,
            global_shared_secret: identity.global_shared_secret,
            primary_key_data: None,
            secondary_key_data: None,
            transcript: Transcript::new(),
            data_size_settings: None,
            send_keys: None,
            recv_keys: None,
            send_counter: 0,
            recv_counter: 0,
            key_update_schedule: None,
            key_update_phase: KeyUpdatePhase::Idle,
            pending_primary_key_update: None,
            pending_secondary_key_update: None,
            key_update_ready_sent: false,
            key_update_ready_received: false,
            noise: None,
            security,
            send_next_prefix_len: 0,
            recv_next_prefix_len: 0,
            local_extenders: Vec::new(),
            peer_extenders: Vec::new(),
        }
    }

    /// Register the local extender UUIDs to announce during SessionInit.
    pub fn set_local_extenders(&mut self, extenders: Vec<ExtenderUUID>) {
        self.local_extenders = extenders;
    }

    /// The peer's UUID, once known (populated after MetaExchange).
    pub fn peer_uuid(&self) -> Option<PeerUUID> {
        self.peer_uuid
    }

    /// The peer's announced extender UUIDs, once the handshake completes.
    pub fn peer_extenders(&self) -> &[ExtenderUUID] {
        &self.peer_extenders
    }

    /// The negotiated transport obfuscation settings, once MetaExchange completes.
    pub fn data_size_settings(&self) -> Option<DataSizeSettings> {
        self.data_size_settings
    }

    /// As Alice, produce the first handshake message and start timing.
    pub fn start_as_alice(&mut self) -> Result<(MessageType, Vec<u8>)> {
        self.status = SessionStatus::Handshake;
        self.timing.start_handshake();
        let payload = self.local.encode();
        self.transcript.push(&payload);
        Ok((MessageType::BeginMetaExchange, payload))
    }

    fn require_phase(&self, expected: HandshakePhase) -> Result<()> {
        if self.phase != expected {
            return Err(ProtocolError::WrongHandshakePhase.into());
        }
        Ok(())
    }

    fn finish_negotiation(&mut self, peer: MetaExchangePayload) -> Result<()> {
        let negotiated = handshake::negotiate(&self.local, &peer)?;
        self.data_size_settings = Some(handshake::resolve_data_size_settings(
            self.local.uuid,
            &self.local,
            peer.uuid,
            &peer,
        ));
        self.peer_uuid = Some(peer.uuid);
        self.negotiated = Some(negotiated);
        self.peer_meta = Some(peer);
        Ok(())
    }

    fn establish_symmetric_keys(&mut self) -> Result<()> {
        let negotiated = self.negotiated.as_ref().expect("negotiated before symmetric key derivation");
        let primary = self.primary_key_data.as_ref().expect("primary key data present");
        let secondary = self.secondary_key_data.as_ref().expect("secondary key data present");

        let mut combined = Vec::new();
        combined.extend_from_slice(&primary.shared_secret);
        combined.extend_from_slice(&secondary.shared_secret);
        if let Some(global) = &self.global_shared_secret {
            combined.extend_from_slice(global);
        }

        let mut key_a = SymmetricKeyData::new(
            SymmetricKeyType::Derived,
            negotiated.hash,
            negotiated.symmetric,
            negotiated.compression,
        );
        let mut key_b = SymmetricKeyData::new(
            SymmetricKeyType::Derived,
            negotiated.hash,
            negotiated.symmetric,
            negotiated.compression,
        );
        crypto::derive_symmetric_keys(&combined, negotiated.hash, &mut key_a, &mut key_b)?;

        let (send, recv) = match self.role {
            Role::Alice => (key_a, key_b),
            Role::Bob => (key_b, key_a),
        };
        self.send_keys = Some(KeyOverlap::new(send));
        self.recv_keys = Some(KeyOverlap::new(recv));
        Ok(())
    }

    /// Derive a fresh pair of symmetric keys from this key update's now
    /// fully-exchanged primary and secondary shared secrets, the same way
    /// [`Self::establish_symmetric_keys`] does for the initial handshake,
    /// and open the send/receive overlap windows around them.
    fn establish_updated_symmetric_keys(&mut self) -> Result<()> {
        let negotiated = self.negotiated.as_ref().expect("negotiated before key update");
        let primary = self.pending_primary_key_update.as_ref().expect("primary key update data present");
        let secondary = self.pending_secondary_key_update.as_ref().expect("secondary key update data present");

        let mut combined = Vec::new();
        combined.extend_from_slice(&primary.shared_secret);
        combined.extend_from_slice(&secondary.shared_secret);
        if let Some(global) = &self.global_shared_secret {
            combined.extend_from_slice(global);
        }

        let mut key_a = SymmetricKeyData::new(
            SymmetricKeyType::Derived,
            negotiated.hash,
            negotiated.symmetric,
            negotiated.compression,
        );
        let mut key_b = SymmetricKeyData::new(
            SymmetricKeyType::Derived,
            negotiated.hash,
            negotiated.symmetric,
            negotiated.compression,
        );
        crypto::derive_symmetric_keys(&combined, negotiated.hash, &mut key_a, &mut key_b)?;

        let (send, recv) = match self.role {
            Role::Alice => (key_a, key_b),
            Role::Bob => (key_b, key_a),
        };
        self.send_keys.as_mut().expect("session ready before key update").begin_update(send);
        self.recv_keys.as_mut().expect("session ready before key update").begin_update(recv);
        self.pending_primary_key_update = None;
        self.pending_secondary_key_update = None;
        Ok(())
    }

    /// Whether both sides have confirmed cutover; if so, close both
    /// overlap windows, drop the stale keys, and return to idle.
    fn try_complete_key_update(&mut self) {
        if self.key_update_ready_sent && self.key_update_ready_received {
            self.send_keys.as_mut().unwrap().confirm_cutover();
            self.recv_keys.as_mut().unwrap().confirm_cutover();
            self.key_update_phase = KeyUpdatePhase::Idle;
            self.key_update_ready_sent = false;
            self.key_update_ready_received = false;
            if let Some(schedule) = self.key_update_schedule.as_mut() {
                schedule.reset();
            }
            tracing::info!(luid = ?self.peer_uuid, "key update cut over");
        }
    }

    /// Whether a key update is currently in progress on this session.
    pub fn key_update_in_progress(&self) -> bool {
        self.key_update_phase != KeyUpdatePhase::Idle
    }

    /// Initiate a key update: begin the primary key-update exchange as
    /// Alice, regardless of this session's handshake role (either side of
    /// an established session may start a rekey). Returns the message to
    /// send. Errors if the session isn't `Ready` or an update is already
    /// under way.
    pub fn begin_key_update(&mut self) -> Result<(MessageType, Vec<u8>)> {
        if !self.is_ready() || self.key_update_phase != KeyUpdatePhase::Idle {
            return Err(ProtocolError::WrongHandshakePhase.into());
        }
        let algo = self.negotiated.as_ref().unwrap().primary_asymmetric;
        let (key_data, msg) = handshake::begin_key_exchange_alice(algo)?;
        self.pending_primary_key_update = Some(key_data);
        self.key_update_phase = KeyUpdatePhase::PrimaryKeyUpdate;
        tracing::info!(luid = ?self.peer_uuid, "key update started");
        Ok((MessageType::BeginPrimaryKeyUpdateExchange, msg.encode()))
    }

    /// Drive one inbound key-update message, re-entering the same
    /// primary/secondary key-exchange machinery the initial handshake uses
    /// (see [`handshake::begin_key_exchange_alice`]/
    /// [`handshake::respond_key_exchange_bob`]), but without touching
    /// `phase`/`status`: the session stays `Ready` and continues to carry
    /// ordinary traffic under its current keys throughout.
    ///
    /// Returns every message this step produces, in order (a single step
    /// may both answer the secondary exchange and send `KeyUpdateReady`).
    pub fn on_key_update_message(&mut self, message_type: MessageType, payload: &[u8]) -> Result<Vec<(MessageType, Vec<u8>)>> {
        use KeyUpdatePhase::*;
        use MessageType::*;

        if !self.is_ready() {
            return Err(ProtocolError::WrongHandshakePhase.into());
        }

        let mut out = Vec::new();
        match (self.key_update_phase, message_type) {
            (Idle, BeginPrimaryKeyUpdateExchange) => {
                let msg = KeyExchangePayload::decode(payload)?;
                let (key_data, reply) = handshake::respond_key_exchange_bob(&msg)?;
                self.pending_primary_key_update = Some(key_data);
                self.key_update_phase = PrimaryKeyUpdate;
                out.push((EndPrimaryKeyUpdateExchange, reply.encode()));
            }
            (PrimaryKeyUpdate, EndPrimaryKeyUpdateExchange) => {
                let msg = KeyExchangePayload::decode(payload)?;
                msg.apply(self.pending_primary_key_update.as_mut().expect("started this key update as initiator"))?;
                let algo = self.negotiated.as_ref().unwrap().secondary_asymmetric;
                let (key_data, reply) = handshake::begin_key_exchange_alice(algo)?;
                self.pending_secondary_key_update = Some(key_data);
                self.key_update_phase = SecondaryKeyUpdate;
                out.push((BeginSecondaryKeyUpdateExchange, reply.encode()));
            }
            (PrimaryKeyUpdate, BeginSecondaryKeyUpdateExchange) => {
                let msg = KeyExchangePayload::decode(payload)?;
                let (key_data, reply) = handshake::respond_key_exchange_bob(&msg)?;
                self.pending_secondary_key_update = Some(key_data);
                self.establish_updated_symmetric_keys()?;
                self.key_update_phase = AwaitingReady;
                out.push((EndSecondaryKeyUpdateExchange, reply.encode()));
                out.push((KeyUpdateReady, Vec::new()));
                self.key_update_ready_sent = true;
            }
            (SecondaryKeyUpdate, EndSecondaryKeyUpdateExchange) => {
                let msg = KeyExchangePayload::decode(payload)?;
                msg.apply(self.pending_secondary_key_update.as_mut().expect("started this key update as initiator"))?;
                self.establish_updated_symmetric_keys()?;
                self.key_update_phase = AwaitingReady;
                out.push((KeyUpdateReady, Vec::new()));
                self.key_update_ready_sent = true;
            }
            (AwaitingReady, KeyUpdateReady) | (Idle, KeyUpdateReady) => {
                self.key_update_ready_received = true;
                self.try_complete_key_update();
            }
            _ => return Err(ProtocolError::WrongHandshakePhase.into()),
        }
        Ok(out)
    }

    /// Drive one inbound handshake message, returning the next message to
    /// send (if any) and whether the handshake is now complete.
    pub fn on_handshake_message(&mut self, message_type: MessageType, payload: &[u8]) -> Result<HandshakeStep> {
        use HandshakePhase::*;
        use MessageType::*;

        let step = match (self.phase, message_type) {
            (MetaExchange, BeginMetaExchange) => {
                self.require_phase(MetaExchange)?;
                self.status = SessionStatus::Handshake;
                self.timing.start_handshake();
                self.transcript.push(payload);
                let peer = MetaExchangePayload::decode(payload)?;
                self.finish_negotiation(peer)?;
                let reply = self.local.encode();
                self.transcript.push(&reply);
                self.phase = PrimaryKeyExchange;
                HandshakeStep { to_send: Some((EndMetaExchange, reply)), done: false }
            }
            (MetaExchange, EndMetaExchange) => {
                self.transcript.push(payload);
                let peer = MetaExchangePayload::decode(payload)?;
                self.finish_negotiation(peer)?;
                let algo = self.negotiated.as_ref().unwrap().primary_asymmetric;
                let (key_data, msg) = handshake::begin_key_exchange_alice(algo)?;
                self.primary_key_data = Some(key_data);
                let encoded = msg.encode();
                self.transcript.push(&encoded);
                self.phase = PrimaryKeyExchange;
                HandshakeStep { to_send: Some((BeginPrimaryKeyExchange, encoded)), done: false }
            }
            (PrimaryKeyExchange, BeginPrimaryKeyExchange) => {
                self.require_phase(PrimaryKeyExchange)?;
                self.transcript.push(payload);
                let msg = KeyExchangePayload::decode(payload)?;
                let (key_data, reply) = handshake::respond_key_exchange_bob(&msg)?;
                self.primary_key_data = Some(key_data);
                let encoded = reply.encode();
                self.transcript.push(&encoded);
                self.phase = SecondaryKeyExchange;
                HandshakeStep { to_send: Some((EndPrimaryKeyExchange, encoded)), done: false }
            }
            (PrimaryKeyExchange, EndPrimaryKeyExchange) => {
                self.transcript.push(payload);
                let msg = KeyExchangePayload::decode(payload)?;
                msg.apply(self.primary_key_data.as_mut().expect("primary key data started as alice"))?;
                let algo = self.negotiated.as_ref().unwrap().secondary_asymmetric;
                let (key_data, reply) = handshake::begin_key_exchange_alice(algo)?;
                self.secondary_key_data = Some(key_data);
                let encoded = reply.encode();
                self.transcript.push(&encoded);
                self.phase = SecondaryKeyExchange;
                HandshakeStep { to_send: Some((BeginSecondaryKeyExchange, encoded)), done: false }
            }
            (SecondaryKeyExchange, BeginSecondaryKeyExchange) => {
                self.require_phase(SecondaryKeyExchange)?;
                self.transcript.push(payload);
                let msg = KeyExchangePayload::decode(payload)?;
                let (key_data, reply) = handshake::respond_key_exchange_bob(&msg)?;
                self.secondary_key_data = Some(key_data);
                let encoded = reply.encode();
                self.transcript.push(&encoded);
                self.establish_symmetric_keys()?;
                self.advance_past_key_exchange()
            }
            (SecondaryKeyExchange, EndSecondaryKeyExchange) => {
                self.transcript.push(payload);
                let msg = KeyExchangePayload::decode(payload)?;
                msg.apply(self.secondary_key_data.as_mut().expect("secondary key data started as alice"))?;
                self.establish_symmetric_keys()?;
                let reply = self.advance_past_key_exchange();
                return Ok(reply);
            }
            (Authentication, BeginAuthentication) => {
                self.require_phase(Authentication)?;
                self.verify_authentication(payload)?;
                let reply = self.sign_transcript()?;
                let encoded = reply.encode();
                self.transcript.push(&encoded);
                self.phase = SessionInit;
                HandshakeStep { to_send: Some((EndAuthentication, encoded)), done: false }
            }
            (Authentication, EndAuthentication) => {
                self.verify_authentication(payload)?;
                self.phase = SessionInit;
                self.begin_session_init()
            }
            (SessionInit, BeginSessionInit) => {
                self.require_phase(SessionInit)?;
                let peer = SessionInitPayload::decode(payload)?;
                self.peer_extenders = peer.extender_uuids;
                let reply = SessionInitPayload { extender_uuids: self.local_extenders.clone() };
                self.phase = Done;
                self.finish_handshake();
                HandshakeStep { to_send: Some((EndSessionInit, reply.encode())), done: true }
            }
            (SessionInit, EndSessionInit) => {
                let peer = SessionInitPayload::decode(payload)?;
                self.peer_extenders = peer.extender_uuids;
                self.phase = Done;
                self.finish_handshake();
                HandshakeStep { to_send: None, done: true }
            }
            _ => return Err(ProtocolError::WrongHandshakePhase.into()),
        };
        Ok(step)
    }

    fn advance_past_key_exchange(&mut self) -> HandshakeStep {
        if self.negotiated.as_ref().unwrap().require_authentication {
            self.phase = HandshakePhase::Authentication;
            if self.role == Role::Alice {
                match self.sign_transcript() {
                    Ok(msg) => {
                        let encoded = msg.encode();
                        self.transcript.push(&encoded);
                        return HandshakeStep { to_send: Some((MessageType::BeginAuthentication, encoded)), done: false };
                    }
                    Err(_) => return HandshakeStep { to_send: None, done: false },
                }
            }
            return HandshakeStep { to_send: None, done: false };
        }
        self.phase = HandshakePhase::SessionInit;
        self.begin_session_init()
    }

    fn begin_session_init(&mut self) -> HandshakeStep {
        if self.role == Role::Alice {
            let payload = SessionInitPayload { extender_uuids: self.local_extenders.clone() };
            return HandshakeStep { to_send: Some((MessageType::BeginSessionInit, payload.encode())), done: false };
        }
        HandshakeStep { to_send: None, done: false }
    }

    fn sign_transcript(&self) -> Result<AuthenticationPayload> {
        let (priv_key, _) = self.signing_key.as_ref().ok_or(ProtocolError::WrongHandshakePhase)?;
        let algo = self.negotiated.as_ref().and_then(|n| n.signature).ok_or(ProtocolError::NoCommonAlgorithm)?;
        let digest = self.transcript.digest(self.negotiated.as_ref().unwrap().hash);
        let signature = crypto::sign(&digest, algo, priv_key)?;
        Ok(AuthenticationPayload { algorithm: algo, signature })
    }

    fn verify_authentication(&mut self, payload: &[u8]) -> Result<()> {
        let msg = AuthenticationPayload::decode(payload)?;
        let verify_key = self
            .peer_signature_verify_key
            .as_ref()
            .ok_or(ProtocolError::WrongHandshakePhase)?;
        let digest = self.transcript.digest(self.negotiated.as_ref().unwrap().hash);
        self.transcript.push(payload);
        if !crypto::verify(&digest, msg.algorithm, verify_key, &msg.signature)? {
            return Err(ProtocolError::WrongHandshakePhase.into());
        }
        Ok(())
    }

    /// Supply the peer's public signature-verification key, looked up by
    /// the caller (typically from an access-list entry) once the peer's
    /// UUID is known. Required before Authentication can verify.
    pub fn set_peer_signature_verify_key(&mut self, key: Vec<u8>) {
        self.peer_signature_verify_key = Some(key);
    }

    fn finish_handshake(&mut self) {
        self.status = SessionStatus::Ready;
        tracing::info!(peer = ?self.peer_uuid, role = ?self.role, "handshake complete, session ready");
        let settings = KeyUpdateSettings {
            min_interval: self.security.key_update.min_interval,
            max_interval: self.security.key_update.max_interval,
            require_after_num_processed_bytes: self.security.key_update.require_after_num_processed_bytes,
        };
        self.key_update_schedule = Some(KeyUpdateSchedule::new(settings));
        self.noise = Some(NoiseGenerator::new(self.security.noise));
    }

    /// Whether the handshake has timed out given `max_duration`.
    pub fn handshake_timed_out(&self, max_duration: std::time::Duration) -> bool {
        self.timing.handshake_timed_out(max_duration)
    }

    /// Begin an orderly disconnect, recording the cause.
    pub fn disconnect(&mut self, cause: DisconnectCause) {
        tracing::debug!(peer = ?self.peer_uuid, ?cause, "session disconnecting");
        self.status = SessionStatus::Disconnecting;
    }

    /// Whether the handshake has completed and application traffic may flow.
    pub fn is_ready(&self) -> bool {
        matches!(self.status, SessionStatus::Ready)
    }

    /// Encode an outbound inner message under this session's current send
    /// key, advancing the send counter and that key's processed-byte count.
    ///
    /// The outer frame's internal padding and random-prefix length are
    /// drawn uniformly from this session's configured
    /// [`crate::config::MessageParameters`] bounds: `current_prefix_len` is
    /// the prefix length promised in the previous outbound frame, and a
    /// fresh `next_prefix_len` is sampled and promised for the frame after
    /// this one.
    pub fn encode_message(
        &mut self,
        message_type: MessageType,
        extender_uuid: Option<ExtenderUUID>,
        payload: &[u8],
    ) -> Result<Vec<u8>> {
        let settings = self.data_size_settings.ok_or(ProtocolError::WrongHandshakePhase)?;
        let send_keys = self.send_keys.as_mut().ok_or(ProtocolError::WrongHandshakePhase)?;

        if message_type != MessageType::Noise {
            if let Some(noise) = self.noise.as_mut() {
                noise.record_real_traffic();
            }
        }

        let inner = crate::message::frame::write(
            message_type,
            extender_uuid,
            payload,
            send_keys.current.compression_algorithm(),
            crate::core::constants::transport::MAX_MESSAGE_DATA_SIZE,
        )?;

        let message = &self.security.message;
        let random_data_size = random_u16_in_range(message.min_internal_random_data_size, message.max_internal_random_data_size);
        let current_prefix_len = self.send_next_prefix_len;
        let next_prefix_len = random_u16_in_range(message.min_random_data_prefix_size, message.max_random_data_prefix_size);

        self.send_counter += 1;
        let nonce_seed = crypto::csprng_u64() as u32;
        let frame = crate::message::transport::write(
            &inner,
            &send_keys.current,
            nonce_seed,
            self.send_counter,
            random_data_size,
            current_prefix_len,
            next_prefix_len,
            settings,
        )?;
        self.send_next_prefix_len = next_prefix_len;
        send_keys.current.add_bytes_processed(frame.len() as u64);
        Ok(frame)
    }

    /// Decode an inbound transport frame, trying the current receive key
    /// first and, if its HMAC doesn't authenticate, the previous key still
    /// held during a key-update overlap window (§4.3/§9: "retry first,
    /// drop only if all candidate keys fail"). Only once both have been
    /// tried does this report [`ProtocolError::HmacMismatch`].
    ///
    /// `frame` must already have this side's expected random-prefix bytes
    /// skipped, as promised by the sender's previous frame; this call
    /// records the prefix length the sender promises for its next one.
    pub fn decode_message(&mut self, frame: &[u8]) -> Result<crate::message::frame::Message> {
        let settings = self.data_size_settings.ok_or(ProtocolError::WrongHandshakePhase)?;
        let skip = self.recv_next_prefix_len as usize;
        let frame = frame.get(skip..).ok_or(ProtocolError::HmacMismatch)?;

        self.recv_counter += 1;
        let counter = self.recv_counter;
        let recv_keys = self.recv_keys.as_mut().ok_or(ProtocolError::WrongHandshakePhase)?;

        let (payload, next_prefix_len, used_previous) = match crate::message::transport::read(frame, &recv_keys.current, counter, settings)? {
            crate::message::transport::ReadOutcome::Frame(decoded) => (decoded.payload, decoded.next_prefix_len, false),
            crate::message::transport::ReadOutcome::RetryAlternateKey => match recv_keys.previous.as_ref() {
                Some(previous) => match crate::message::transport::read(frame, previous, counter, settings)? {
                    crate::message::transport::ReadOutcome::Frame(decoded) => (decoded.payload, decoded.next_prefix_len, true),
                    crate::message::transport::ReadOutcome::RetryAlternateKey => {
                        return Err(ProtocolError::HmacMismatch.into());
                    }
                },
                None => return Err(ProtocolError::HmacMismatch.into()),
            },
        };
        self.recv_next_prefix_len = next_prefix_len;

        let compression_algorithm = if used_previous {
            recv_keys.previous.as_mut().unwrap().add_bytes_processed(frame.len() as u64);
            recv_keys.previous.as_ref().unwrap().compression_algorithm()
        } else {
            recv_keys.current.add_bytes_processed(frame.len() as u64);
            recv_keys.current.compression_algorithm()
        };
        let message = crate::message::frame::read(&payload, compression_algorithm, crate::core::constants::transport::MAX_MESSAGE_DATA_SIZE)?;
        if message.message_type != MessageType::Noise {
            if let Some(noise) = self.noise.as_mut() {
                noise.record_real_traffic();
            }
        }
        Ok(message)
    }

    /// Whether the current send key has processed enough bytes, or enough
    /// time has passed, that a key update should begin.
    pub fn key_update_due(&self) -> bool {
        match (&self.send_keys, &self.key_update_schedule) {
            (Some(overlap), Some(schedule)) => schedule.is_due(overlap.current.num_bytes_processed()),
            _ => false,
        }
    }

    /// Whether this session's cover-traffic generator wants to emit a
    /// noise message right now.
    pub fn noise_due(&self) -> bool {
        self.noise.as_ref().is_some_and(|noise| noise.should_emit())
    }

    /// Produce one noise payload to send as a [`MessageType::Noise`]
    /// message, if this session has a noise generator.
    pub fn generate_noise(&mut self) -> Option<Vec<u8>> {
        self.noise.as_mut().map(|noise| noise.generate())
    }
}

/// Sample uniformly from `[min, max]`, or `min` if the range is empty or
/// inverted.
fn random_u16_in_range(min: u16, max: u16) -> u16 {
    if max <= min {
        return min;
    }
    let span = (max - min) as u32 + 1;
    (min as u32 + (crypto::csprng_u64() as u32 % span)) as u16
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SecurityLevel;
    use crate::core::id::{PeerLuidAllocator, SigningAlgorithmFamily};

    fn test_security() -> SecurityParameters {
        SecurityLevel::Three.parameters().unwrap()
    }

    fn identity(uuid_seed: &[u8], require_authentication: bool, signing_key: Option<(Vec<u8>, Vec<u8>)>) -> LocalIdentity {
        LocalIdentity {
            uuid: PeerUUID::from_public_key(SigningAlgorithmFamily::Ed25519, uuid_seed),
            require_authentication,
            signing_key,
            global_shared_secret: None,
            hash: vec![Hash::Blake2s256, Hash::Sha256],
            primary_asymmetric: vec![Asymmetric::EcdhX25519],
            secondary_asymmetric: vec![Asymmetric::KemNtruPrime],
            symmetric: vec![Symmetric::ChaCha20Poly1305],
            compression: vec![Compression::Deflate],
            signature: vec![Signature::Ed25519],
        }
    }

    fn run_handshake_to_completion(require_authentication: bool) -> (PeerSession, PeerSession) {
        let allocator = PeerLuidAllocator::new();
        let (alice_keys, bob_keys) = if require_authentication {
            (
                Some(crypto::generate_signing_keypair(Signature::Ed25519).unwrap()),
                Some(crypto::generate_signing_keypair(Signature::Ed25519).unwrap()),
            )
        } else {
            (None, None)
        };

        let mut alice = PeerSession::new(
            allocator.allocate(),
            Role::Alice,
            identity(b"alice seed padded to 32 bytes!!", require_authentication, alice_keys.clone()),
            9,
            0,
            test_security(),
        );
        let mut bob = PeerSession::new(
            allocator.allocate(),
            Role::Bob,
            identity(b"bob seed padded out to 32 bytes!", require_authentication, bob_keys.clone()),
            9,
            0,
            test_security(),
        );

        if require_authentication {
            alice.set_peer_signature_verify_key(bob_keys.unwrap().1);
            bob.set_peer_signature_verify_key(alice_keys.unwrap().1);
        }

        let (mut msg_type, mut payload) = alice.start_as_alice().unwrap();
        let mut turn_is_bob = true;
        loop {
            let step = if turn_is_bob {
                bob.on_handshake_message(msg_type, &payload).unwrap()
            } else {
                alice.on_handshake_message(msg_type, &payload).unwrap()
            };
            match step.to_send {
                Some((next_type, next_payload)) => {
                    msg_type = next_type;
                    payload = next_payload;
                    turn_is_bob = !turn_is_bob;
                }
                None => break,
            }
            if step.done && msg_type == MessageType::EndSessionInit {
                // Deliver the final EndSessionInit and stop.
                let final_recipient = if turn_is_bob { &mut bob } else { &mut alice };
                final_recipient.on_handshake_message(msg_type, &payload).unwrap();
                break;
            }
        }

        (alice, bob)
    }

    #[test]
    fn handshake_completes_without_authentication() {
        let (alice, bob) = run_handshake_to_completion(false);
        assert_eq!(alice.status, SessionStatus::Ready);
        assert_eq!(bob.status, SessionStatus::Ready);
        assert_eq!(alice.peer_uuid(), Some(bob.local.uuid));
        assert_eq!(bob.peer_uuid(), Some(alice.local.uuid));
    }

    #[test]
    fn handshake_completes_with_mutual_authentication() {
        let (alice, bob) = run_handshake_to_completion(true);
        assert_eq!(alice.status, SessionStatus::Ready);
        assert_eq!(bob.status, SessionStatus::Ready);
    }

    #[test]
    fn both_sides_derive_matching_symmetric_keys() {
        let (alice, bob) = run_handshake_to_completion(false);
        let alice_send = &alice.send_keys.as_ref().unwrap().current;
        let bob_recv = &bob.recv_keys.as_ref().unwrap().current;
        assert_eq!(alice_send.key, bob_recv.key);
        assert_eq!(alice_send.auth_key, bob_recv.auth_key);
    }

    #[test]
    fn out_of_phase_message_is_rejected() {
        let allocator = PeerLuidAllocator::new();
        let mut bob = PeerSession::new(
            allocator.allocate(),
            Role::Bob,
            identity(b"bob seed padded out to 32 bytes!", false, None),
            9,
            0,
            test_security(),
        );
        let err = bob.on_handshake_message(MessageType::BeginSessionInit, b"");
        assert!(err.is_err());
    }

    /// Drive a full key-update cycle (initiated by Alice) to completion.
    /// Each step may produce more than one outbound message (e.g. the
    /// responder's `EndSecondaryKeyUpdateExchange` is immediately followed
    /// by its own `KeyUpdateReady`), so messages are processed through a
    /// FIFO queue rather than assuming one reply per step.
    fn run_key_update_to_completion(alice: &mut PeerSession, bob: &mut PeerSession) {
        let (msg_type, payload) = alice.begin_key_update().unwrap();
        let mut queue = std::collections::VecDeque::new();
        queue.push_back((true, msg_type, payload));
        while let Some((to_bob, message_type, payload)) = queue.pop_front() {
            let responses = if to_bob {
                bob.on_key_update_message(message_type, &payload).unwrap()
            } else {
                alice.on_key_update_message(message_type, &payload).unwrap()
            };
            for (next_type, next_payload) in responses {
                queue.push_back((!to_bob, next_type, next_payload));
            }
        }
    }

    #[test]
    fn key_update_completes_and_both_sides_agree_on_new_keys() {
        let (mut alice, mut bob) = run_handshake_to_completion(false);
        let alice_old_send = alice.send_keys.as_ref().unwrap().current.key.clone();

        run_key_update_to_completion(&mut alice, &mut bob);

        assert!(!alice.key_update_in_progress());
        assert!(!bob.key_update_in_progress());
        let alice_send = &alice.send_keys.as_ref().unwrap().current;
        let bob_recv = &bob.recv_keys.as_ref().unwrap().current;
        assert_eq!(alice_send.key, bob_recv.key);
        assert_ne!(alice_send.key, alice_old_send);
        assert!(!alice.send_keys.as_ref().unwrap().is_overlapping());
        assert!(!bob.recv_keys.as_ref().unwrap().is_overlapping());
    }

    #[test]
    fn key_update_cannot_start_before_the_handshake_completes() {
        let allocator = PeerLuidAllocator::new();
        let mut bob = PeerSession::new(
            allocator.allocate(),
            Role::Bob,
            identity(b"bob seed padded out to 32 bytes!", false, None),
            9,
            0,
            test_security(),
        );
        assert!(bob.begin_key_update().is_err());
    }
}
