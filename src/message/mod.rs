//! The message layer: the outer, encrypted, HMAC-tagged wire frame
//! ([`transport`]) and the inner, typed, optionally compressed and
//! fragmented message ([`frame`]) it carries.

pub mod frame;
pub mod transport;

pub use frame::{Message, MessageFlags, MessageType, Reassembler};
pub use transport::{peek, read, write, DataSizeSettings, DecodedFrame, PeekResult, ReadOutcome};
