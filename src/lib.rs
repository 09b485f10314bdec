//! # QuantumGate
//!
//! A peer-to-peer secure networking library: authenticated, forward-secret
//! sessions between peers identified by self-verifying UUIDs, negotiated
//! over an algorithm-agnostic handshake, carried over an obfuscated and
//! HMAC-protected wire format, and optionally relayed across multiple hops.
//!
//! QuantumGate does not fix a cryptographic suite the way a Noise-pattern
//! protocol does. Each side advertises the hash, asymmetric (Diffie-Hellman
//! or KEM), symmetric, signature, and compression algorithms it supports;
//! the handshake in [`session`] picks the strongest algorithm common to
//! both, including post-quantum KEMs alongside classical ECDH so a process
//! can negotiate up as peers upgrade without a protocol version bump.
//!
//! ## Feature flags
//!
//! - `crypto` (default): the algorithm façade, key containers, and AEAD/KEM/
//!   signature operations (`sha2`, `hmac`, `hkdf`, `chacha20poly1305`,
//!   `aes-gcm`, `x25519-dalek`, `p521`, `ed448-goldilocks`, `ed25519-dalek`,
//!   the `pqcrypto-*` KEMs, `zeroize`, `subtle`).
//! - `message` (default, implies `crypto`): the outer obfuscated+HMAC'd
//!   transport frame and the inner typed, optionally compressed message.
//! - `session` (default, implies `message`, `crypto`): the handshake and
//!   rekeying state machine built on top of the message layer.
//! - `access` (default): IP filters, reputation, rate limiting, subnet
//!   limits, and the peer allow-list.
//! - `relay` (default, implies `message`, `net`): multi-hop circuit links
//!   and the manager that admits and sweeps them.
//! - `extender` (default, implies `message`): the extender multiplexer that
//!   lets add-on protocols share a session's encrypted channel.
//! - `net` (default): the TCP listener, dialer, and peer registry that
//!   drive a [`session::PeerSession`] over real sockets.
//! - `config` (default, implies `crypto`): TOML-loadable startup and
//!   security parameters.
//! - `full`: every feature above, explicitly (equivalent to `default`).
//!
//! ## Modules
//!
//! - [`core`]: constants, the layered error taxonomy, and identifiers
//!   (always included).
//! - [`crypto`]: algorithm vocabulary and key-material containers.
//! - [`message`]: outer transport frame and inner message codec.
//! - [`session`]: handshake, rekeying, and per-peer dispatch state.
//! - [`access`]: access control.
//! - [`relay`]: multi-hop circuits.
//! - [`extender`]: extender multiplexing.
//! - [`net`]: TCP listener/dialer wiring a session to a socket.
//! - [`config`]: startup and security parameter trees.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

/// Core types shared across the rest of the crate (always included).
pub mod core;

/// Algorithm vocabulary, key-material containers, and crypto operations.
#[cfg(feature = "crypto")]
#[cfg_attr(docsrs, doc(cfg(feature = "crypto")))]
pub mod crypto;

/// Outer transport frame and inner message codec.
#[cfg(feature = "message")]
#[cfg_attr(docsrs, doc(cfg(feature = "message")))]
pub mod message;

/// Peer session handshake, rekeying, and dispatch state.
#[cfg(feature = "session")]
#[cfg_attr(docsrs, doc(cfg(feature = "session")))]
pub mod session;

/// Access control: filters, reputation, rate limiting, subnet limits.
#[cfg(feature = "access")]
#[cfg_attr(docsrs, doc(cfg(feature = "access")))]
pub mod access;

/// Multi-hop relay circuits.
#[cfg(feature = "relay")]
#[cfg_attr(docsrs, doc(cfg(feature = "relay")))]
pub mod relay;

/// Extender registration and dispatch.
#[cfg(feature = "extender")]
#[cfg_attr(docsrs, doc(cfg(feature = "extender")))]
pub mod extender;

/// TCP listener, dialer, and peer registry.
#[cfg(feature = "net")]
#[cfg_attr(docsrs, doc(cfg(feature = "net")))]
pub mod net;

/// Startup and security configuration.
#[cfg(feature = "config")]
#[cfg_attr(docsrs, doc(cfg(feature = "config")))]
pub mod config;

/// Convenient re-exports of the types most call sites need.
pub mod prelude {
    pub use crate::core::{
        ArgumentError, ExtenderUUID, PeerLUID, PeerUUID, PolicyError, ProtocolError,
        QuantumGateError, Result, TimeoutError,
    };

    #[cfg(feature = "crypto")]
    pub use crate::crypto::{Asymmetric, Compression, Hash, Signature, Symmetric};

    #[cfg(feature = "message")]
    pub use crate::message::{Message, MessageFlags, MessageType};

    #[cfg(feature = "session")]
    pub use crate::session::{DisconnectCause, LocalIdentity, PeerSession, Role, SessionStatus};

    #[cfg(feature = "access")]
    pub use crate::access::{AccessManager, AccessManagerConfig, CheckKind};

    #[cfg(feature = "relay")]
    pub use crate::relay::{CircuitId, RelayManager};

    #[cfg(feature = "extender")]
    pub use crate::extender::{ExtenderMultiplexer, ExtenderUpdateKind};

    #[cfg(feature = "net")]
    pub use crate::net::{
        connect_to, connect_to_callback, ConnectConfig, Listener, ListenerConfig,
        LocalIdentityTemplate, PeerHandle, PeerManager,
    };

    #[cfg(feature = "config")]
    pub use crate::config::{SecurityLevel, SecurityParameters, StartupParameters};
}
