//! A single hop of a multi-hop relay circuit.
//!
//! Grounded on `Core/Relay/RelayLink.cpp`'s status machine and position
//! classification: a link is `Beginning` at the circuit's origin, `Between`
//! for every interior hop, and `End` at the final endpoint; only interior
//! and final hops forward `RelayData`, and only the origin surfaces
//! `RelayStatus` changes to the application.

use crate::core::id::PeerLUID;

use super::limiter::DataRateLimiter;

/// Where a link sits within its circuit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayPosition {
    /// The circuit's origin: the application data enters the relay here.
    Beginning,
    /// An interior hop: forwards `RelayData` toward the next hop.
    Between,
    /// The circuit's final hop: delivers `RelayData` to its destination.
    End,
}

/// A relay link's lifecycle status, propagated end-to-end via `RelayStatus`
/// messages so every hop (and the origin application) learns when any hop
/// fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayStatus {
    /// Allocated but not yet associated with peer sessions.
    Opened,
    /// Requesting the next hop connect onward.
    Connect,
    /// Waiting for the next hop's connection to complete.
    Connecting,
    /// Both adjacent sessions are `Ready`; data may flow.
    Connected,
    /// Temporarily unable to forward (e.g. a rate limit), but not closed.
    Suspended,
    /// Cleanly torn down.
    Disconnected,
    /// Torn down due to a protocol or policy violation.
    Exception,
    /// Fully closed and evicted from the manager.
    Closed,
}

impl RelayStatus {
    /// Whether data may currently flow across this link.
    pub fn can_forward(self) -> bool {
        matches!(self, RelayStatus::Connected)
    }

    /// Whether this status is terminal (no further transitions expected).
    pub fn is_terminal(self) -> bool {
        matches!(self, RelayStatus::Closed)
    }
}

/// One hop of a relay circuit: the two adjacent peer sessions it bridges,
/// its position, its status, and the data-rate limiters for each
/// direction.
pub struct RelayLink {
    /// The peer session toward the circuit's origin.
    pub hop_toward_origin: PeerLUID,
    /// The peer session toward the circuit's destination, absent at `End`.
    pub hop_toward_destination: Option<PeerLUID>,
    /// This link's position within its circuit.
    pub position: RelayPosition,
    /// Current status.
    pub status: RelayStatus,

    limiter_toward_origin: DataRateLimiter,
    limiter_toward_destination: DataRateLimiter,
}

impl RelayLink {
    /// Open a new link at `position`, bridging `hop_toward_origin` and,
    /// unless this is the circuit's `End`, `hop_toward_destination`.
    pub fn new(hop_toward_origin: PeerLUID, hop_toward_destination: Option<PeerLUID>, position: RelayPosition) -> Self {
        debug_assert_eq!(position == RelayPosition::End, hop_toward_destination.is_none());
        Self {
            hop_toward_origin,
            hop_toward_destination,
            position,
            status: RelayStatus::Opened,
            limiter_toward_origin: DataRateLimiter::new(),
            limiter_toward_destination: DataRateLimiter::new(),
        }
    }

    /// Transition this link's status. Transitions into `Closed` or
    /// `Exception` are always accepted; other transitions are accepted
    /// unless the link is already terminal.
    pub fn set_status(&mut self, status: RelayStatus) {
        if self.status.is_terminal() {
            return;
        }
        self.status = status;
    }

    /// Record a round-trip sample observed on traffic flowing toward the
    /// circuit's origin, updating that direction's target MTU.
    pub fn record_sample_toward_origin(&mut self, rtt: std::time::Duration, message_size: usize) -> usize {
        self.limiter_toward_origin.record_sample(rtt, message_size)
    }

    /// Record a round-trip sample observed on traffic flowing toward the
    /// circuit's destination, updating that direction's target MTU.
    pub fn record_sample_toward_destination(&mut self, rtt: std::time::Duration, message_size: usize) -> usize {
        self.limiter_toward_destination.record_sample(rtt, message_size)
    }

    /// The current target MTU for traffic toward the origin.
    pub fn target_mtu_toward_origin(&self) -> usize {
        self.limiter_toward_origin.target_mtu()
    }

    /// The current target MTU for traffic toward the destination.
    pub fn target_mtu_toward_destination(&self) -> usize {
        self.limiter_toward_destination.target_mtu()
    }

    /// Whether this link currently forwards `RelayData` in either direction.
    pub fn can_forward(&self) -> bool {
        self.status.can_forward()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::id::PeerLuidAllocator;

    #[test]
    fn end_link_has_no_destination_hop() {
        let allocator = PeerLuidAllocator::new();
        let link = RelayLink::new(allocator.allocate(), None, RelayPosition::End);
        assert!(link.hop_toward_destination.is_none());
    }

    #[test]
    fn closed_link_ignores_further_transitions() {
        let allocator = PeerLuidAllocator::new();
        let mut link = RelayLink::new(allocator.allocate(), Some(allocator.allocate()), RelayPosition::Between);
        link.set_status(RelayStatus::Connected);
        link.set_status(RelayStatus::Closed);
        link.set_status(RelayStatus::Connecting);
        assert_eq!(link.status, RelayStatus::Closed);
    }

    #[test]
    fn only_connected_links_forward() {
        let allocator = PeerLuidAllocator::new();
        let mut link = RelayLink::new(allocator.allocate(), Some(allocator.allocate()), RelayPosition::Between);
        assert!(!link.can_forward());
        link.set_status(RelayStatus::Connected);
        assert!(link.can_forward());
    }
}
