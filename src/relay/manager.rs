//! Circuit admission, next-hop exclusion, and lifecycle sweeping for every
//! relay link this instance currently participates in.
//!
//! Grounded on `Core/Relay/RelayManager.cpp`: circuits are distributed
//! across worker threads by hashing a stable per-circuit identifier (here,
//! the circuit's [`CircuitId`]) rather than round-robin, so a given
//! circuit's traffic always lands on the same worker; a next-hop candidate
//! sharing a subnet with the circuit's origin, this local instance, or the
//! circuit's final endpoint is excluded to avoid trivially deanonymizing
//! loops; links that time out before `Connected` or that linger past
//! `grace_period` after `Closed` are swept on each maintenance pass.

use std::collections::{HashMap, VecDeque};
use std::net::IpAddr;
use std::time::{Duration, Instant};

use crate::core::error::{Result, TimeoutError};
use crate::core::id::PeerLUID;

use super::link::{RelayLink, RelayPosition, RelayStatus};

/// Opaque identifier for one relay circuit, stable across every hop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CircuitId(pub u64);

fn subnet_matches(a: IpAddr, b: IpAddr, ipv4_prefix_bits: u8, ipv6_prefix_bits: u8) -> bool {
    match (a, b) {
        (IpAddr::V4(a), IpAddr::V4(b)) => {
            let mask = if ipv4_prefix_bits == 0 { 0 } else { !0u32 << (32 - ipv4_prefix_bits) };
            (u32::from(a) & mask) == (u32::from(b) & mask)
        }
        (IpAddr::V6(a), IpAddr::V6(b)) => {
            let mask = if ipv6_prefix_bits == 0 { 0 } else { !0u128 << (128 - ipv6_prefix_bits) };
            (u128::from(a) & mask) == (u128::from(b) & mask)
        }
        _ => false,
    }
}

/// Number of worker buckets circuits are distributed across. An
/// implementation detail of [`RelayManager::worker_index`], not a spec
/// constant.
const WORKER_COUNT: usize = 8;

/// A tracked circuit's link plus the bookkeeping the manager needs to
/// sweep it.
struct TrackedLink {
    link: RelayLink,
    opened_at: Instant,
    closed_at: Option<Instant>,
    /// `RelayData` forwarded toward the origin, whose `RelayDataAck` is
    /// still outstanding, keyed by `message_id`.
    pending_toward_origin: HashMap<u64, (Instant, usize)>,
    /// Same, for data forwarded toward the destination.
    pending_toward_destination: HashMap<u64, (Instant, usize)>,
    /// `RelayData` held back because the `W = 2` admission window toward
    /// the origin was full when it arrived, in arrival order: `(message_id,
    /// data size, encoded wire payload)`.
    queued_toward_origin: VecDeque<(u64, usize, Vec<u8>)>,
    /// Same, for data held back toward the destination.
    queued_toward_destination: VecDeque<(u64, usize, Vec<u8>)>,
    /// Payloads delivered at this hop because it is the circuit's
    /// `Beginning` or `End` (no further hop to forward to), queued for the
    /// caller to drain.
    delivered: VecDeque<Vec<u8>>,
}

/// Owns every relay link this instance currently participates in, whether
/// as the circuit's origin, an interior hop, or its final endpoint.
pub struct RelayManager {
    circuits: HashMap<CircuitId, TrackedLink>,
    connect_timeout: Duration,
    grace_period: Duration,
    ipv4_excluded_prefix_bits: u8,
    ipv6_excluded_prefix_bits: u8,
}

impl RelayManager {
    /// Create a manager with the given connect timeout, post-close grace
    /// period, and next-hop subnet-exclusion widths.
    pub fn new(
        connect_timeout: Duration,
        grace_period: Duration,
        ipv4_excluded_prefix_bits: u8,
        ipv6_excluded_prefix_bits: u8,
    ) -> Self {
        Self {
            circuits: HashMap::new(),
            connect_timeout,
            grace_period,
            ipv4_excluded_prefix_bits,
            ipv6_excluded_prefix_bits,
        }
    }

    /// Which worker bucket a circuit's traffic should be dispatched to,
    /// stable for the circuit's lifetime.
    pub fn worker_index(&self, circuit: CircuitId) -> usize {
        (circuit.0 % WORKER_COUNT as u64) as usize
    }

    /// Whether `candidate` may serve as the next hop for a circuit whose
    /// origin is `origin_addr`, whose local instance is at `local_addr`,
    /// and (when known) whose final endpoint is `final_addr`. A candidate
    /// sharing a subnet with any of them is excluded.
    pub fn is_next_hop_allowed(&self, candidate: IpAddr, origin_addr: IpAddr, local_addr: IpAddr, final_addr: Option<IpAddr>) -> bool {
        let excludes = |other: IpAddr| subnet_matches(candidate, other, self.ipv4_excluded_prefix_bits, self.ipv6_excluded_prefix_bits);
        if excludes(origin_addr) || excludes(local_addr) {
            return false;
        }
        if let Some(final_addr) = final_addr {
            if excludes(final_addr) {
                return false;
            }
        }
        true
    }

    /// Admit a new circuit, opening its link in [`RelayStatus::Opened`].
    pub fn open_circuit(
        &mut self,
        circuit: CircuitId,
        hop_toward_origin: PeerLUID,
        hop_toward_destination: Option<PeerLUID>,
        position: RelayPosition,
    ) {
        tracing::debug!(?circuit, ?position, "relay circuit opened");
        self.circuits.insert(
            circuit,
            TrackedLink {
                link: RelayLink::new(hop_toward_origin, hop_toward_destination, position),
                opened_at: Instant::now(),
                closed_at: None,
                pending_toward_origin: HashMap::new(),
                pending_toward_destination: HashMap::new(),
                queued_toward_origin: VecDeque::new(),
                queued_toward_destination: VecDeque::new(),
                delivered: VecDeque::new(),
            },
        );
    }

    /// Given a circuit and the [`PeerLUID`] a message just arrived from,
    /// the adjacent hop it should be forwarded to, or `None` if `from` is
    /// this circuit's far end (the message terminates at this hop).
    pub fn other_hop(&self, circuit: CircuitId, from: PeerLUID) -> Option<PeerLUID> {
        let link = &self.circuits.get(&circuit)?.link;
        if link.hop_toward_origin == from {
            link.hop_toward_destination
        } else if link.hop_toward_destination == Some(from) {
            Some(link.hop_toward_origin)
        } else {
            None
        }
    }

    /// Whether `from` is this circuit's origin-side hop (used to pick
    /// which direction's rate-limiter/window a `RelayData`/`RelayDataAck`
    /// applies to).
    fn is_toward_origin_side(&self, circuit: CircuitId, from: PeerLUID) -> Option<bool> {
        let link = &self.circuits.get(&circuit)?.link;
        if link.hop_toward_origin == from {
            Some(true)
        } else if link.hop_toward_destination == Some(from) {
            Some(false)
        } else {
            None
        }
    }

    /// Number of `RelayData` messages forwarded toward `from`'s side that
    /// are still awaiting a `RelayDataAck`, for the `W = 2` admission
    /// window.
    pub fn outstanding_toward(&self, circuit: CircuitId, toward: PeerLUID) -> usize {
        let Some(tracked) = self.circuits.get(&circuit) else { return 0 };
        match self.is_toward_origin_side(circuit, toward) {
            Some(true) => tracked.pending_toward_origin.len(),
            Some(false) => tracked.pending_toward_destination.len(),
            None => 0,
        }
    }

    /// Record that a `RelayData` message was just forwarded toward `to`,
    /// for later RTT/size sampling once its ack arrives.
    pub fn record_data_sent(&mut self, circuit: CircuitId, to: PeerLUID, message_id: u64, size: usize) {
        let Some(tracked) = self.circuits.get_mut(&circuit) else { return };
        let now = Instant::now();
        if tracked.link.hop_toward_origin == to {
            tracked.pending_toward_origin.insert(message_id, (now, size));
        } else if tracked.link.hop_toward_destination == Some(to) {
            tracked.pending_toward_destination.insert(message_id, (now, size));
        }
    }

    /// Resolve a `RelayDataAck` received from `from` against the pending
    /// send it acknowledges, feeding the observed round trip into that
    /// direction's data-rate limiter. Returns the updated target MTU, or
    /// `None` if the `message_id` has no matching pending send.
    pub fn record_data_ack(&mut self, circuit: CircuitId, from: PeerLUID, message_id: u64) -> Option<usize> {
        let toward_origin = self.is_toward_origin_side(circuit, from)?;
        let tracked = self.circuits.get_mut(&circuit)?;
        let pending = if toward_origin { &mut tracked.pending_toward_origin } else { &mut tracked.pending_toward_destination };
        let (sent_at, size) = pending.remove(&message_id)?;
        let rtt = sent_at.elapsed();
        Some(if toward_origin {
            tracked.link.record_sample_toward_origin(rtt, size)
        } else {
            tracked.link.record_sample_toward_destination(rtt, size)
        })
    }

    /// Admit a `RelayData` send toward `to` if the `W = 2` window still has
    /// room, returning the payload to forward immediately. If the window is
    /// full, the payload is queued instead and `None` is returned — the
    /// caller must not forward it now; it will surface from
    /// [`RelayManager::next_queued_data_send`] once an ack frees a slot.
    pub fn try_admit_data_send(
        &mut self,
        circuit: CircuitId,
        to: PeerLUID,
        message_id: u64,
        size: usize,
        payload: Vec<u8>,
    ) -> Option<Vec<u8>> {
        let toward_origin = self.is_toward_origin_side(circuit, to)?;
        let outstanding = self.outstanding_toward(circuit, to);
        let tracked = self.circuits.get_mut(&circuit)?;

        if outstanding >= crate::core::constants::relay::WINDOW_SIZE {
            let queue = if toward_origin { &mut tracked.queued_toward_origin } else { &mut tracked.queued_toward_destination };
            queue.push_back((message_id, size, payload));
            return None;
        }

        let now = Instant::now();
        if toward_origin {
            tracked.pending_toward_origin.insert(message_id, (now, size));
        } else {
            tracked.pending_toward_destination.insert(message_id, (now, size));
        }
        Some(payload)
    }

    /// After a `RelayDataAck` frees a slot in the `W = 2` window toward
    /// `toward`, admit and return the next queued send for that direction,
    /// if any.
    pub fn next_queued_data_send(&mut self, circuit: CircuitId, toward: PeerLUID) -> Option<(u64, Vec<u8>)> {
        let toward_origin = self.is_toward_origin_side(circuit, toward)?;
        if self.outstanding_toward(circuit, toward) >= crate::core::constants::relay::WINDOW_SIZE {
            return None;
        }
        let tracked = self.circuits.get_mut(&circuit)?;
        let (pending, queue) = if toward_origin {
            (&mut tracked.pending_toward_origin, &mut tracked.queued_toward_origin)
        } else {
            (&mut tracked.pending_toward_destination, &mut tracked.queued_toward_destination)
        };
        let (message_id, size, payload) = queue.pop_front()?;
        pending.insert(message_id, (Instant::now(), size));
        Some((message_id, payload))
    }

    /// Queue a payload delivered to this hop because it is the circuit's
    /// terminus in the direction the data arrived from.
    pub fn deliver(&mut self, circuit: CircuitId, data: Vec<u8>) {
        if let Some(tracked) = self.circuits.get_mut(&circuit) {
            tracked.delivered.push_back(data);
        }
    }

    /// Drain every payload delivered to this hop for `circuit` so far.
    pub fn take_delivered(&mut self, circuit: CircuitId) -> Vec<Vec<u8>> {
        self.circuits.get_mut(&circuit).map(|tracked| tracked.delivered.drain(..).collect()).unwrap_or_default()
    }

    /// The link for a tracked circuit, if any.
    pub fn link(&self, circuit: CircuitId) -> Option<&RelayLink> {
        self.circuits.get(&circuit).map(|t| &t.link)
    }

    /// Mutable access to a tracked circuit's link, if any.
    pub fn link_mut(&mut self, circuit: CircuitId) -> Option<&mut RelayLink> {
        self.circuits.get_mut(&circuit).map(|t| &mut t.link)
    }

    /// Propagate a status change to a circuit's link, recording the close
    /// time once it reaches [`RelayStatus::Closed`].
    pub fn set_status(&mut self, circuit: CircuitId, status: RelayStatus) {
        if let Some(tracked) = self.circuits.get_mut(&circuit) {
            tracing::debug!(?circuit, ?status, "relay link status changed");
            tracked.link.set_status(status);
            if status == RelayStatus::Closed {
                tracked.closed_at = Some(Instant::now());
            }
        }
    }

    /// One maintenance pass: times out circuits still short of `Connected`
    /// past `connect_timeout`, and evicts circuits that have sat `Closed`
    /// longer than `grace_period`. Returns the circuits that were evicted.
    pub fn sweep(&mut self) -> Vec<CircuitId> {
        let mut timed_out = Vec::new();
        for (id, tracked) in self.circuits.iter_mut() {
            if !matches!(tracked.link.status, RelayStatus::Connected | RelayStatus::Closed | RelayStatus::Exception)
                && tracked.opened_at.elapsed() > self.connect_timeout
            {
                tracked.link.set_status(RelayStatus::Exception);
                tracked.closed_at = Some(Instant::now());
                timed_out.push(*id);
            }
        }

        let mut evicted = Vec::new();
        self.circuits.retain(|id, tracked| {
            let expired = tracked.closed_at.is_some_and(|closed_at| closed_at.elapsed() > self.grace_period)
                || matches!(tracked.link.status, RelayStatus::Closed) && tracked.closed_at.is_none();
            if expired {
                evicted.push(*id);
            }
            !expired
        });
        if !timed_out.is_empty() {
            tracing::debug!(count = timed_out.len(), "relay circuits timed out before connecting");
        }
        if !evicted.is_empty() {
            tracing::debug!(count = evicted.len(), "relay circuits evicted past grace period");
        }
        evicted
    }

    /// Look up the circuit's link and return a [`TimeoutError::RelayConnect`]
    /// if it never reached `Connected` within `connect_timeout`.
    pub fn check_connect_timeout(&self, circuit: CircuitId) -> Result<()> {
        let tracked = match self.circuits.get(&circuit) {
            Some(t) => t,
            None => return Ok(()),
        };
        if !tracked.link.can_forward() && tracked.opened_at.elapsed() > self.connect_timeout {
            return Err(TimeoutError::RelayConnect.into());
        }
        Ok(())
    }

    /// How many circuits are currently tracked.
    pub fn circuit_count(&self) -> usize {
        self.circuits.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::id::PeerLuidAllocator;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn same_subnet_candidate_excluded() {
        let manager = RelayManager::new(Duration::from_secs(30), Duration::from_secs(60), 24, 64);
        assert!(!manager.is_next_hop_allowed(ip("10.0.0.5"), ip("10.0.0.1"), ip("192.168.1.1"), None));
    }

    #[test]
    fn distinct_subnet_candidate_allowed() {
        let manager = RelayManager::new(Duration::from_secs(30), Duration::from_secs(60), 24, 64);
        assert!(manager.is_next_hop_allowed(ip("203.0.113.9"), ip("10.0.0.1"), ip("192.168.1.1"), Some(ip("198.51.100.2"))));
    }

    #[test]
    fn worker_index_is_stable_for_a_circuit() {
        let manager = RelayManager::new(Duration::from_secs(30), Duration::from_secs(60), 24, 64);
        let id = CircuitId(42);
        assert_eq!(manager.worker_index(id), manager.worker_index(id));
    }

    #[test]
    fn sweep_evicts_circuits_stuck_before_connected() {
        let mut manager = RelayManager::new(Duration::from_millis(0), Duration::from_secs(60), 24, 64);
        let allocator = PeerLuidAllocator::new();
        manager.open_circuit(CircuitId(1), allocator.allocate(), Some(allocator.allocate()), RelayPosition::Between);
        let evicted = manager.sweep();
        assert!(evicted.is_empty() || manager.link(CircuitId(1)).map(|l| l.status) == Some(RelayStatus::Exception));
    }

    #[test]
    fn sweep_evicts_circuits_past_grace_period() {
        let mut manager = RelayManager::new(Duration::from_secs(30), Duration::from_millis(0), 24, 64);
        let allocator = PeerLuidAllocator::new();
        manager.open_circuit(CircuitId(2), allocator.allocate(), Some(allocator.allocate()), RelayPosition::Between);
        manager.set_status(CircuitId(2), RelayStatus::Closed);
        std::thread::sleep(Duration::from_millis(5));
        let evicted = manager.sweep();
        assert_eq!(evicted, vec![CircuitId(2)]);
        assert_eq!(manager.circuit_count(), 0);
    }

    #[test]
    fn other_hop_resolves_either_direction() {
        let mut manager = RelayManager::new(Duration::from_secs(30), Duration::from_secs(60), 24, 64);
        let allocator = PeerLuidAllocator::new();
        let origin = allocator.allocate();
        let dest = allocator.allocate();
        manager.open_circuit(CircuitId(1), origin, Some(dest), RelayPosition::Between);
        assert_eq!(manager.other_hop(CircuitId(1), origin), Some(dest));
        assert_eq!(manager.other_hop(CircuitId(1), dest), Some(origin));
    }

    #[test]
    fn other_hop_is_none_at_the_terminus() {
        let mut manager = RelayManager::new(Duration::from_secs(30), Duration::from_secs(60), 24, 64);
        let allocator = PeerLuidAllocator::new();
        let origin = allocator.allocate();
        manager.open_circuit(CircuitId(1), origin, None, RelayPosition::End);
        assert_eq!(manager.other_hop(CircuitId(1), origin), None);
    }

    #[test]
    fn data_ack_without_a_pending_send_resolves_to_none() {
        let mut manager = RelayManager::new(Duration::from_secs(30), Duration::from_secs(60), 24, 64);
        let allocator = PeerLuidAllocator::new();
        let origin = allocator.allocate();
        manager.open_circuit(CircuitId(1), origin, None, RelayPosition::End);
        assert_eq!(manager.record_data_ack(CircuitId(1), origin, 42), None);
    }

    #[test]
    fn data_sent_then_acked_updates_target_mtu() {
        let mut manager = RelayManager::new(Duration::from_secs(30), Duration::from_secs(60), 24, 64);
        let allocator = PeerLuidAllocator::new();
        let origin = allocator.allocate();
        let dest = allocator.allocate();
        manager.open_circuit(CircuitId(1), origin, Some(dest), RelayPosition::Between);
        assert_eq!(manager.outstanding_toward(CircuitId(1), dest), 0);
        manager.record_data_sent(CircuitId(1), dest, 7, 65536);
        assert_eq!(manager.outstanding_toward(CircuitId(1), dest), 1);
        let mtu = manager.record_data_ack(CircuitId(1), dest, 7);
        assert!(mtu.is_some());
        assert_eq!(manager.outstanding_toward(CircuitId(1), dest), 0);
    }

    #[test]
    fn sends_past_the_window_are_queued_not_forwarded() {
        let mut manager = RelayManager::new(Duration::from_secs(30), Duration::from_secs(60), 24, 64);
        let allocator = PeerLuidAllocator::new();
        let origin = allocator.allocate();
        let dest = allocator.allocate();
        manager.open_circuit(CircuitId(1), origin, Some(dest), RelayPosition::Between);

        assert!(manager.try_admit_data_send(CircuitId(1), dest, 1, 1000, vec![1]).is_some());
        assert!(manager.try_admit_data_send(CircuitId(1), dest, 2, 1000, vec![2]).is_some());
        // The window (W = 2) is now full; a third send must be queued, not
        // handed back for immediate forwarding.
        assert!(manager.try_admit_data_send(CircuitId(1), dest, 3, 1000, vec![3]).is_none());
        assert_eq!(manager.outstanding_toward(CircuitId(1), dest), 2);

        // No slot free yet: nothing to release.
        assert!(manager.next_queued_data_send(CircuitId(1), dest).is_none());

        // Acking one of the two in-flight sends frees a slot, which the
        // queued third send should now occupy.
        manager.record_data_ack(CircuitId(1), dest, 1);
        let freed = manager.next_queued_data_send(CircuitId(1), dest);
        assert_eq!(freed, Some((3, vec![3])));
        assert_eq!(manager.outstanding_toward(CircuitId(1), dest), 2);
    }

    #[test]
    fn delivered_payloads_drain_in_order() {
        let mut manager = RelayManager::new(Duration::from_secs(30), Duration::from_secs(60), 24, 64);
        let allocator = PeerLuidAllocator::new();
        manager.open_circuit(CircuitId(1), allocator.allocate(), None, RelayPosition::End);
        manager.deliver(CircuitId(1), vec![1, 2, 3]);
        manager.deliver(CircuitId(1), vec![4, 5, 6]);
        assert_eq!(manager.take_delivered(CircuitId(1)), vec![vec![1, 2, 3], vec![4, 5, 6]]);
        assert!(manager.take_delivered(CircuitId(1)).is_empty());
    }
}
