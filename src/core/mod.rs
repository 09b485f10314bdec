//! Core types shared across the rest of the crate: protocol constants,
//! the layered error taxonomy, and peer/extender identifiers.

pub mod constants;
pub mod error;
pub mod id;

pub use error::{
    ArgumentError, PolicyError, ProtocolError, QuantumGateError, ResourceError, Result,
    TimeoutError,
};
pub use id::{ExtenderUUID, PeerLUID, PeerLuidAllocator, PeerUUID, SigningAlgorithmFamily};
