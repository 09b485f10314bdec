//! IP address allow/block filters.
//!
//! Grounded on `Core/Access/IPFilters.cpp`: filters compose into two maps
//! (allow, block) keyed by a persistent hash of their textual form, each
//! holding a `(start, end)` address range memoised at insertion so lookups
//! are a linear scan of integer comparisons rather than repeated parsing.

use std::collections::HashMap;
use std::net::IpAddr;

use crate::core::error::{ArgumentError, Result};

/// Whether a filter allows or blocks the addresses it covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterKind {
    /// Addresses in range are explicitly allowed, overriding the block list.
    Allowed,
    /// Addresses in range are blocked unless also covered by an allow filter.
    Blocked,
}

/// A persistent hash of a filter's textual `address/mask` form, used as its
/// map key so the same filter re-added twice collapses to one entry.
pub type FilterId = u64;

fn filter_id(address: IpAddr, mask: IpAddr) -> FilterId {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    address.hash(&mut hasher);
    mask.hash(&mut hasher);
    hasher.finish()
}

/// One allow or block range, with its endpoints memoised at construction.
#[derive(Debug, Clone)]
struct IpRange {
    start: u128,
    end: u128,
}

impl IpRange {
    fn new(address: IpAddr, mask: IpAddr) -> Result<Self> {
        let (addr_bits, mask_bits) = match (address, mask) {
            (IpAddr::V4(a), IpAddr::V4(m)) => (u32::from(a) as u128, u32::from(m) as u128),
            (IpAddr::V6(a), IpAddr::V6(m)) => (u128::from(a), u128::from(m)),
            _ => {
                return Err(ArgumentError::InvalidAddress(
                    "address and mask must be the same family".into(),
                )
                .into())
            }
        };
        let start = addr_bits & mask_bits;
        let end = start | !mask_bits;
        Ok(Self { start, end })
    }

    fn contains(&self, addr: IpAddr) -> bool {
        let bits = match addr {
            IpAddr::V4(a) => u32::from(a) as u128,
            IpAddr::V6(a) => u128::from(a),
        };
        bits >= self.start && bits <= self.end
    }
}

/// The allow/block filter set. Addresses are allowed unless blocked, and a
/// block is overridden by any overlapping allow filter.
#[derive(Debug, Default)]
pub struct IpFilters {
    allow: HashMap<FilterId, IpRange>,
    block: HashMap<FilterId, IpRange>,
}

impl IpFilters {
    /// Create an empty filter set; everything is allowed by default.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a filter of the given kind, returning its id.
    pub fn add(&mut self, kind: FilterKind, address: IpAddr, mask: IpAddr) -> Result<FilterId> {
        let id = filter_id(address, mask);
        let range = IpRange::new(address, mask)?;
        match kind {
            FilterKind::Allowed => self.allow.insert(id, range),
            FilterKind::Blocked => self.block.insert(id, range),
        };
        Ok(id)
    }

    /// Remove a previously added filter by id.
    pub fn remove(&mut self, kind: FilterKind, id: FilterId) {
        match kind {
            FilterKind::Allowed => self.allow.remove(&id),
            FilterKind::Blocked => self.block.remove(&id),
        };
    }

    /// Whether `addr` is allowed: true unless it falls inside a block range
    /// and does not fall inside any allow range.
    pub fn is_allowed(&self, addr: IpAddr) -> bool {
        let blocked = self.block.values().any(|r| r.contains(addr));
        if !blocked {
            return true;
        }
        self.allow.values().any(|r| r.contains(addr))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unfiltered_address_is_allowed() {
        let filters = IpFilters::new();
        assert!(filters.is_allowed("1.2.3.4".parse().unwrap()));
    }

    #[test]
    fn blocked_range_denies() {
        let mut filters = IpFilters::new();
        filters
            .add(FilterKind::Blocked, "10.0.0.0".parse().unwrap(), "255.0.0.0".parse().unwrap())
            .unwrap();
        assert!(!filters.is_allowed("10.1.2.3".parse().unwrap()));
        assert!(filters.is_allowed("11.1.2.3".parse().unwrap()));
    }

    #[test]
    fn allow_overrides_overlapping_block() {
        let mut filters = IpFilters::new();
        filters
            .add(FilterKind::Blocked, "10.0.0.0".parse().unwrap(), "255.0.0.0".parse().unwrap())
            .unwrap();
        filters
            .add(FilterKind::Allowed, "10.1.0.0".parse().unwrap(), "255.255.0.0".parse().unwrap())
            .unwrap();
        assert!(filters.is_allowed("10.1.2.3".parse().unwrap()));
        assert!(!filters.is_allowed("10.2.2.3".parse().unwrap()));
    }

    #[test]
    fn mismatched_family_is_rejected() {
        let mut filters = IpFilters::new();
        let result = filters.add(
            FilterKind::Blocked,
            "10.0.0.0".parse().unwrap(),
            "::".parse().unwrap(),
        );
        assert!(result.is_err());
    }
}
