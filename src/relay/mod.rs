//! Multi-hop relay circuits: per-link status and rate limiting, plus the
//! manager that admits circuits, excludes unsafe next hops, and sweeps
//! stale links.

mod limiter;
mod link;
mod manager;
pub mod wire;

pub use limiter::DataRateLimiter;
pub use link::{RelayLink, RelayPosition, RelayStatus};
pub use manager::{CircuitId, RelayManager};
pub use wire::{RelayCreatePayload, RelayDataAckPayload, RelayDataPayload, RelayStatusCode, RelayStatusPayload};
