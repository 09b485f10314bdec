//! Peer session state machine types.
//!
//! Grounded on `Core/Peer/Peer.h`'s session status enum and handshake
//! phase sequence described in the component design.

use std::net::SocketAddr;
use std::time::Instant;

/// Which side of a session this instance plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// The connection initiator (outbound `Connect`).
    Alice,
    /// The connection responder (inbound `Accept`).
    Bob,
}

/// The top-level peer session lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    /// Allocated but not yet associated with a socket.
    Unknown,
    /// A socket exists; the handshake has not started.
    Initialized,
    /// Running the handshake phase sequence.
    Handshake,
    /// Handshake complete; exchanging `SessionInit` parameters.
    SessionInit,
    /// Fully established; application and extender traffic flows.
    Ready,
    /// Disconnect requested; draining the outbound queue.
    Disconnecting,
    /// Socket closed and all queued events drained.
    Disconnected,
}

/// Why a session ended up `Disconnected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectCause {
    /// The peer closed the connection.
    ClosedByPeer,
    /// The local side requested disconnection.
    LocalRequest,
    /// `max_handshake_duration` elapsed before the handshake completed.
    TimedOut,
    /// A protocol violation was detected.
    ProtocolViolation,
    /// Algorithm negotiation failed to find a common choice.
    NegotiationFailed,
    /// Mutual authentication failed verification.
    AuthenticationFailed,
}

/// Which handshake phase a session currently occupies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum HandshakePhase {
    /// Exchanging protocol version, algorithm lists, and transport settings.
    MetaExchange,
    /// Negotiating and performing the primary key exchange.
    PrimaryKeyExchange,
    /// Negotiating and performing the secondary key exchange.
    SecondaryKeyExchange,
    /// Mutual signature-based authentication, only when required.
    Authentication,
    /// Exchanging remaining session-init parameters.
    SessionInit,
    /// The handshake has completed.
    Done,
}

/// Bookkeeping common to a session regardless of its current phase:
/// timestamps used to enforce `max_handshake_duration` and idle detection.
#[derive(Debug, Clone)]
pub struct SessionTiming {
    /// When this session object was created.
    pub created_at: Instant,
    /// When the handshake started (set on transition to `Handshake`).
    pub handshake_started_at: Option<Instant>,
    /// When traffic was last sent or received.
    pub last_activity_at: Instant,
}

impl SessionTiming {
    /// Start timing a fresh session.
    pub fn new() -> Self {
        let now = Instant::now();
        Self { created_at: now, handshake_started_at: None, last_activity_at: now }
    }

    /// Mark the handshake as having started now.
    pub fn start_handshake(&mut self) {
        self.handshake_started_at = Some(Instant::now());
    }

    /// Record activity now.
    pub fn touch(&mut self) {
        self.last_activity_at = Instant::now();
    }

    /// Whether the handshake has been running longer than `max_duration`.
    pub fn handshake_timed_out(&self, max_duration: std::time::Duration) -> bool {
        match self.handshake_started_at {
            Some(start) => start.elapsed() > max_duration,
            None => false,
        }
    }
}

impl Default for SessionTiming {
    fn default() -> Self {
        Self::new()
    }
}

/// A session's local and peer socket endpoints.
#[derive(Debug, Clone, Copy)]
pub struct SessionEndpoints {
    /// This instance's address as seen by the peer.
    pub local: SocketAddr,
    /// The peer's address.
    pub peer: SocketAddr,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handshake_times_out_after_max_duration() {
        let mut timing = SessionTiming::new();
        timing.start_handshake();
        assert!(!timing.handshake_timed_out(std::time::Duration::from_secs(30)));
        // Simulate elapsed time by constructing a timing whose start is in
        // the past; Instant has no public backdating constructor, so we
        // instead assert the zero-duration boundary triggers immediately.
        assert!(timing.handshake_timed_out(std::time::Duration::from_secs(0)));
    }

    #[test]
    fn phases_are_ordered() {
        assert!(HandshakePhase::MetaExchange < HandshakePhase::PrimaryKeyExchange);
        assert!(HandshakePhase::SessionInit < HandshakePhase::Done);
    }
}
