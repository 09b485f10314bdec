//! TCP transport: listener, dialer, and the peer registry that drives
//! [`crate::session::PeerSession`] over real sockets.
//!
//! [`PeerSession`](crate::session::PeerSession) is transport-agnostic by
//! design; this module is the one place that owns a socket, choosing a
//! simple length-prefixed wire framing and wiring the session's handshake
//! output and post-`Ready` dispatch into [`crate::access::AccessManager`],
//! [`crate::extender::ExtenderMultiplexer`], and [`crate::relay::RelayManager`].

mod connection;
mod dialer;
mod identity;
mod listener;
mod manager;

pub use connection::ConnectionContext;
pub use dialer::{connect_to, connect_to_callback, ConnectConfig};
pub use identity::LocalIdentityTemplate;
pub use listener::{Listener, ListenerConfig};
pub use manager::{OutboundMessage, PeerHandle, PeerManager};
