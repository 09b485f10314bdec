//! Extender registration, per-peer extender-support tracking, and
//! panic-isolated message/event dispatch.

mod multiplexer;
mod peers;
mod registry;

pub use multiplexer::{ExtenderMultiplexer, ExtenderUpdateKind};
pub use peers::PeerExtenderSet;
pub use registry::{ExtenderCallbacks, ExtenderHandle, ExtenderRegistry, PeerEvent};
