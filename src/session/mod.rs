//! Peer session: handshake, rekeying, cover traffic, and the resulting
//! symmetric-keyed dispatch state for one peer connection.

mod handshake;
mod keyupdate;
mod noise;
mod session;
mod state;
pub(crate) mod wire;

pub use handshake::{
    AuthenticationPayload, KeyExchangePayload, MetaExchangePayload, NegotiatedAlgorithms, SessionInitPayload,
    Transcript,
};
pub use keyupdate::{KeyOverlap, KeyUpdateSchedule, KeyUpdateSettings};
pub use noise::NoiseGenerator;
pub use session::{HandshakeStep, LocalIdentity, PeerSession};
pub use state::{DisconnectCause, HandshakePhase, Role, SessionEndpoints, SessionStatus, SessionTiming};
