//! The access manager: the combined gatekeeper over address filters,
//! reputation, rate limiters, subnet limits, and the peer allow-list.
//!
//! Grounded on `Core/Access/AccessManager.cpp`. Each sub-service is
//! protected by its own `RwLock` so a reputation update never blocks an
//! unrelated filter lookup.

use std::net::IpAddr;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use crate::core::id::PeerUUID;

use super::filters::{FilterId, FilterKind, IpFilters};
use super::peers::{DefaultPolicy, PeerAccessControl};
use super::rate_limit::RateLimiter;
use super::reputation::{ReputationTracker, UpdateKind};
use super::subnet::SubnetLimits;

/// Which sub-checks `is_ip_allowed` should run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckKind {
    /// Only the address filters.
    Filters,
    /// Only reputation.
    Reputation,
    /// Only subnet limits.
    SubnetLimits,
    /// Every sub-check.
    All,
}

/// Tunable intervals the access manager applies when calling into its
/// sub-services. Distinct from [`crate::config`]'s wire-facing parameters;
/// this is the manager's internal operating configuration.
#[derive(Debug, Clone, Copy)]
pub struct AccessManagerConfig {
    /// Interval between auto-improve ticks.
    pub reputation_improve_interval: Duration,
    /// Direct-connect rate-limiter window.
    pub direct_rate_limit_interval: Duration,
    /// Maximum direct attempts per window.
    pub direct_rate_limit_max: u32,
    /// Relay-connect rate-limiter window.
    pub relay_rate_limit_interval: Duration,
    /// Maximum relay attempts per window.
    pub relay_rate_limit_max: u32,
}

impl Default for AccessManagerConfig {
    fn default() -> Self {
        Self {
            reputation_improve_interval: Duration::from_secs(300),
            direct_rate_limit_interval: Duration::from_secs(60),
            direct_rate_limit_max: 5,
            relay_rate_limit_interval: Duration::from_secs(60),
            relay_rate_limit_max: 5,
        }
    }
}

/// The combined access-control gatekeeper.
pub struct AccessManager {
    config: AccessManagerConfig,
    filters: RwLock<IpFilters>,
    reputation: RwLock<ReputationTracker>,
    direct_rate_limit: RwLock<RateLimiter>,
    relay_rate_limit: RwLock<RateLimiter>,
    subnet_limits: RwLock<SubnetLimits>,
    peers: RwLock<PeerAccessControl>,
}

impl AccessManager {
    /// Create a manager with the given peer default policy and internal
    /// operating configuration.
    pub fn new(default_policy: DefaultPolicy, config: AccessManagerConfig) -> Self {
        Self {
            config,
            filters: RwLock::new(IpFilters::new()),
            reputation: RwLock::new(ReputationTracker::new()),
            direct_rate_limit: RwLock::new(RateLimiter::new()),
            relay_rate_limit: RwLock::new(RateLimiter::new()),
            subnet_limits: RwLock::new(SubnetLimits::new()),
            peers: RwLock::new(PeerAccessControl::new(default_policy)),
        }
    }

    /// Add an IP filter.
    pub fn add_ip_filter(
        &self,
        kind: FilterKind,
        address: IpAddr,
        mask: IpAddr,
    ) -> crate::core::error::Result<FilterId> {
        self.filters.write().unwrap().add(kind, address, mask)
    }

    /// Add a subnet limit, folding in the given already-connected addresses.
    pub fn add_subnet_limit(
        &self,
        prefix_bits: u8,
        max_connections: u32,
        existing_connections: impl IntoIterator<Item = IpAddr>,
    ) {
        self.subnet_limits.write().unwrap().add_limit(prefix_bits, max_connections, existing_connections);
    }

    /// Add or update a peer allow-list entry.
    pub fn add_peer(
        &self,
        uuid: PeerUUID,
        public_key: Option<Vec<u8>>,
        allowed: bool,
    ) -> crate::core::error::Result<()> {
        self.peers.write().unwrap().add(uuid, public_key, allowed)
    }

    /// Record a direct connection attempt against the rate limiter,
    /// deteriorating reputation on overflow.
    pub fn record_direct_attempt(&self, addr: IpAddr, now: Instant) -> bool {
        let mut reputation = self.reputation.write().unwrap();
        self.direct_rate_limit.write().unwrap().add_attempt(
            addr,
            now,
            self.config.direct_rate_limit_interval,
            self.config.direct_rate_limit_max,
            &mut reputation,
            self.config.reputation_improve_interval,
        )
    }

    /// Record a relay connection attempt against the rate limiter,
    /// deteriorating reputation on overflow.
    pub fn record_relay_attempt(&self, addr: IpAddr, now: Instant) -> bool {
        let mut reputation = self.reputation.write().unwrap();
        self.relay_rate_limit.write().unwrap().add_attempt(
            addr,
            now,
            self.config.relay_rate_limit_interval,
            self.config.relay_rate_limit_max,
            &mut reputation,
            self.config.reputation_improve_interval,
        )
    }

    /// Record a connection's acceptance against subnet limits.
    pub fn record_connection(&self, addr: IpAddr) {
        self.subnet_limits.write().unwrap().record_connection(addr);
    }

    /// Record a connection's closure, freeing its subnet-limit slot.
    pub fn release_connection(&self, addr: IpAddr) {
        self.subnet_limits.write().unwrap().release_connection(addr);
    }

    /// Apply a named reputation event to `addr`.
    pub fn update_reputation(&self, addr: IpAddr, now: Instant, kind: UpdateKind) -> i16 {
        self.reputation.write().unwrap().update_reputation(
            addr,
            now,
            self.config.reputation_improve_interval,
            kind,
        )
    }

    /// Whether `uuid` is present and allowed in the peer allow-list.
    pub fn is_peer_allowed(&self, uuid: &PeerUUID) -> bool {
        let allowed = self.peers.read().unwrap().is_allowed(uuid);
        if !allowed {
            tracing::warn!(%uuid, "peer denied by allow-list");
        }
        allowed
    }

    /// Combine filters, reputation, and subnet limits per `check_kind`.
    pub fn is_ip_allowed(&self, addr: IpAddr, now: Instant, check_kind: CheckKind) -> bool {
        let check_filters = matches!(check_kind, CheckKind::Filters | CheckKind::All);
        let check_reputation = matches!(check_kind, CheckKind::Reputation | CheckKind::All);
        let check_subnets = matches!(check_kind, CheckKind::SubnetLimits | CheckKind::All);

        if check_filters && !self.filters.read().unwrap().is_allowed(addr) {
            tracing::warn!(%addr, "address denied by ip filter");
            return false;
        }
        if check_reputation
            && !self.reputation.write().unwrap().has_acceptable_reputation(
                addr,
                now,
                self.config.reputation_improve_interval,
            )
        {
            tracing::warn!(%addr, "address denied by reputation");
            return false;
        }
        if check_subnets && !self.subnet_limits.read().unwrap().can_accept_connection(addr) {
            tracing::warn!(%addr, "address denied by subnet limit");
            return false;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_manager_allows_unknown_address() {
        let manager = AccessManager::new(DefaultPolicy::Allowed, AccessManagerConfig::default());
        assert!(manager.is_ip_allowed("8.8.8.8".parse().unwrap(), Instant::now(), CheckKind::All));
    }

    #[test]
    fn blocked_filter_denies_even_with_good_reputation() {
        let manager = AccessManager::new(DefaultPolicy::Allowed, AccessManagerConfig::default());
        manager
            .add_ip_filter(FilterKind::Blocked, "9.9.9.0".parse().unwrap(), "255.255.255.0".parse().unwrap())
            .unwrap();
        assert!(!manager.is_ip_allowed("9.9.9.5".parse().unwrap(), Instant::now(), CheckKind::All));
    }

    #[test]
    fn repeated_rate_limit_overflow_eventually_denies_ip_check() {
        let mut config = AccessManagerConfig::default();
        config.direct_rate_limit_max = 1;
        config.reputation_improve_interval = Duration::from_secs(3600);
        let manager = AccessManager::new(DefaultPolicy::Allowed, config);
        let addr = "1.2.3.4".parse().unwrap();
        let now = Instant::now();
        manager.record_direct_attempt(addr, now);
        manager.record_direct_attempt(addr, now);
        let ok = manager.record_direct_attempt(addr, now);
        assert!(!ok);
        assert!(!manager.is_ip_allowed(addr, now, CheckKind::Reputation));
    }
}
