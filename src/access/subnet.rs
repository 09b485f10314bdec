//! Per-subnet connection-count limits.
//!
//! Grounded on `Core/Access/IPSubnetLimits.cpp`: each configured limit is a
//! `(prefix bits, max connections)` pair for one address family, with a
//! live count kept per exact subnet encountered. Adding a limit while
//! connections already exist folds the current per-subnet counts into the
//! new limit's map, allowing it to start over its maximum rather than
//! retroactively evicting already-accepted connections.

use std::collections::HashMap;
use std::net::IpAddr;

/// One configured subnet limit for a single address family.
struct Limit {
    prefix_bits: u8,
    max_connections: u32,
    current: HashMap<u128, u32>,
}

fn subnet_key(addr: IpAddr, prefix_bits: u8) -> Option<u128> {
    let (bits, width) = match addr {
        IpAddr::V4(a) => (u32::from(a) as u128, 32u8),
        IpAddr::V6(a) => (u128::from(a), 128u8),
    };
    if prefix_bits > width {
        return None;
    }
    if prefix_bits == 0 {
        return Some(0);
    }
    let mask = !0u128 << (width - prefix_bits) & (if width == 128 { !0u128 } else { (1u128 << width) - 1 });
    Some(bits & mask)
}

fn family_matches(addr: IpAddr, prefix_bits: u8) -> bool {
    match addr {
        IpAddr::V4(_) => prefix_bits <= 32,
        IpAddr::V6(_) => prefix_bits <= 128,
    }
}

/// The set of configured subnet limits, all families mixed together.
#[derive(Default)]
pub struct SubnetLimits {
    limits: Vec<Limit>,
}

impl SubnetLimits {
    /// Create an empty limit set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a new limit. `existing_connections` lets the caller fold
    /// already-accepted connections' counts into the fresh limit so they
    /// are never retroactively evicted, even if doing so puts a subnet
    /// over `max_connections`.
    pub fn add_limit(
        &mut self,
        prefix_bits: u8,
        max_connections: u32,
        existing_connections: impl IntoIterator<Item = IpAddr>,
    ) {
        let mut current = HashMap::new();
        for addr in existing_connections {
            if !family_matches(addr, prefix_bits) {
                continue;
            }
            if let Some(key) = subnet_key(addr, prefix_bits) {
                *current.entry(key).or_insert(0) += 1;
            }
        }
        self.limits.push(Limit { prefix_bits, max_connections, current });
    }

    /// Whether a new connection from `addr` would fit under every
    /// applicable configured limit.
    pub fn can_accept_connection(&self, addr: IpAddr) -> bool {
        self.limits.iter().all(|limit| {
            if !family_matches(addr, limit.prefix_bits) {
                return true;
            }
            match subnet_key(addr, limit.prefix_bits) {
                Some(key) => {
                    *limit.current.get(&key).unwrap_or(&0) < limit.max_connections
                }
                None => true,
            }
        })
    }

    /// Record that a connection from `addr` was accepted.
    pub fn record_connection(&mut self, addr: IpAddr) {
        for limit in &mut self.limits {
            if !family_matches(addr, limit.prefix_bits) {
                continue;
            }
            if let Some(key) = subnet_key(addr, limit.prefix_bits) {
                *limit.current.entry(key).or_insert(0) += 1;
            }
        }
    }

    /// Record that a previously accepted connection from `addr` closed.
    pub fn release_connection(&mut self, addr: IpAddr) {
        for limit in &mut self.limits {
            if !family_matches(addr, limit.prefix_bits) {
                continue;
            }
            if let Some(key) = subnet_key(addr, limit.prefix_bits) {
                if let Some(count) = limit.current.get_mut(&key) {
                    *count = count.saturating_sub(1);
                }
            }
        }
    }
}
