//! Wire payloads carried inside the four relay-control `Message` types
//! (`RelayCreate`, `RelayStatus`, `RelayData`, `RelayDataAck`).
//!
//! Grounded on `Core/Relay/RelayLink.h`'s `BeginRelay`/`RelayStatusUpdate`/
//! `RelayData` wire structs; encoded with the same length-prefixed TLV
//! discipline `session::wire` already uses for handshake payloads, reused
//! here rather than re-invented.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use crate::core::error::{ProtocolError, Result};
use crate::session::wire::{Reader, Writer};

use super::link::RelayStatus as LinkStatus;

fn put_addr(buf: &mut Vec<u8>, addr: SocketAddr) {
    match addr.ip() {
        IpAddr::V4(ip) => {
            buf.put_u8(4);
            buf.extend_from_slice(&ip.octets());
        }
        IpAddr::V6(ip) => {
            buf.put_u8(6);
            buf.extend_from_slice(&ip.octets());
        }
    }
    buf.put_u16(addr.port());
}

fn read_addr(reader: &mut Reader<'_>) -> Result<SocketAddr> {
    let family = reader.u8()?;
    let ip = match family {
        4 => {
            let mut octets = [0u8; 4];
            for byte in octets.iter_mut() {
                *byte = reader.u8()?;
            }
            IpAddr::V4(Ipv4Addr::from(octets))
        }
        6 => {
            let mut octets = [0u8; 16];
            for byte in octets.iter_mut() {
                *byte = reader.u8()?;
            }
            IpAddr::V6(Ipv6Addr::from(octets))
        }
        _ => return Err(ProtocolError::UnknownMessageType(family as u16).into()),
    };
    let port = reader.u16()?;
    Ok(SocketAddr::new(ip, port))
}

/// `BeginRelay`: requests the receiving hop extend the circuit one step
/// closer to `final_endpoint`. `hops` is the number of hops still
/// remaining after this one; zero means the receiver is the circuit's end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayCreatePayload {
    /// The circuit's stable identifier.
    pub port: u64,
    /// Hops remaining after the receiving peer.
    pub hops: u32,
    /// The circuit's origin, carried so every intermediate hop can apply
    /// the same-subnet exclusion rule without a round trip to ask.
    pub origin_endpoint: SocketAddr,
    /// The circuit's final destination.
    pub final_endpoint: SocketAddr,
}

impl RelayCreatePayload {
    /// Serialize this payload for the `RelayCreate` inner message.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.put_u64(self.port);
        buf.put_u32(self.hops);
        put_addr(&mut buf, self.origin_endpoint);
        put_addr(&mut buf, self.final_endpoint);
        buf
    }

    /// Parse a `RelayCreate` payload.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        let mut reader = Reader::new(buf);
        let port = reader.u64()?;
        let hops = reader.u32()?;
        let origin_endpoint = read_addr(&mut reader)?;
        let final_endpoint = read_addr(&mut reader)?;
        Ok(Self { port, hops, origin_endpoint, final_endpoint })
    }
}

/// Wire status codes for `RelayStatus` messages, distinct from
/// [`LinkStatus`] (this crate's internal lifecycle states): these are the
/// codes for the message actually exchanged on the wire, which is coarser
/// than the internal state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayStatusCode {
    Connected,
    Suspended,
    Resumed,
    Disconnected,
    GeneralFailure,
    ConnectionReset,
    NoPeersAvailable,
    HostUnreachable,
    ConnectionRefused,
    TimedOut,
}

impl RelayStatusCode {
    fn to_u8(self) -> u8 {
        match self {
            RelayStatusCode::Connected => 0,
            RelayStatusCode::Suspended => 1,
            RelayStatusCode::Resumed => 2,
            RelayStatusCode::Disconnected => 3,
            RelayStatusCode::GeneralFailure => 4,
            RelayStatusCode::ConnectionReset => 5,
            RelayStatusCode::NoPeersAvailable => 6,
            RelayStatusCode::HostUnreachable => 7,
            RelayStatusCode::ConnectionRefused => 8,
            RelayStatusCode::TimedOut => 9,
        }
    }

    fn from_u8(v: u8) -> Result<Self> {
        Ok(match v {
            0 => RelayStatusCode::Connected,
            1 => RelayStatusCode::Suspended,
            2 => RelayStatusCode::Resumed,
            3 => RelayStatusCode::Disconnected,
            4 => RelayStatusCode::GeneralFailure,
            5 => RelayStatusCode::ConnectionReset,
            6 => RelayStatusCode::NoPeersAvailable,
            7 => RelayStatusCode::HostUnreachable,
            8 => RelayStatusCode::ConnectionRefused,
            9 => RelayStatusCode::TimedOut,
            other => return Err(ProtocolError::UnknownMessageType(other as u16).into()),
        })
    }

    /// The internal link-lifecycle status this wire code maps onto, for
    /// bookkeeping inside [`super::RelayManager`].
    pub fn to_link_status(self) -> LinkStatus {
        match self {
            RelayStatusCode::Connected | RelayStatusCode::Resumed => LinkStatus::Connected,
            RelayStatusCode::Suspended => LinkStatus::Suspended,
            RelayStatusCode::Disconnected => LinkStatus::Disconnected,
            RelayStatusCode::GeneralFailure
            | RelayStatusCode::ConnectionReset
            | RelayStatusCode::NoPeersAvailable
            | RelayStatusCode::HostUnreachable
            | RelayStatusCode::ConnectionRefused
            | RelayStatusCode::TimedOut => LinkStatus::Exception,
        }
    }
}

/// A `RelayStatus` message: a status change propagated along the circuit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayStatusPayload {
    /// The circuit this status applies to.
    pub port: u64,
    /// The status being reported.
    pub status: RelayStatusCode,
}

impl RelayStatusPayload {
    /// Serialize this payload for the `RelayStatus` inner message.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.put_u64(self.port);
        buf.put_u8(self.status.to_u8());
        buf
    }

    /// Parse a `RelayStatus` payload.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        let mut reader = Reader::new(buf);
        let port = reader.u64()?;
        let status = RelayStatusCode::from_u8(reader.u8()?)?;
        Ok(Self { port, status })
    }
}

/// A `RelayData` message: one hop's worth of opaque, circuit-identified
/// application data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayDataPayload {
    /// The circuit this data belongs to.
    pub port: u64,
    /// Per-circuit monotonically assigned id, used to match the
    /// corresponding `RelayDataAck` and as the data-rate limiter's sample key.
    pub message_id: u64,
    /// The opaque payload; never inspected at intermediate hops.
    pub data: Vec<u8>,
}

impl RelayDataPayload {
    /// Serialize this payload for the `RelayData` inner message.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.put_u64(self.port);
        buf.put_u64(self.message_id);
        buf.extend_from_slice(&self.data);
        buf
    }

    /// Parse a `RelayData` payload. Unlike the other relay payloads, the
    /// trailing data field is not length-prefixed: it runs to the end of
    /// the buffer, since the enclosing `Message` frame already bounds it.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        let mut reader = Reader::new(buf);
        let port = reader.u64()?;
        let message_id = reader.u64()?;
        let data = reader.take_rest();
        Ok(Self { port, message_id, data })
    }
}

/// A `RelayDataAck` message: per-link flow-control acknowledgement, never
/// forwarded past the hop that sent the corresponding `RelayData`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayDataAckPayload {
    /// The circuit this ack belongs to.
    pub port: u64,
    /// The `message_id` being acknowledged.
    pub message_id: u64,
}

impl RelayDataAckPayload {
    /// Serialize this payload for the `RelayDataAck` inner message.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.put_u64(self.port);
        buf.put_u64(self.message_id);
        buf
    }

    /// Parse a `RelayDataAck` payload.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        let mut reader = Reader::new(buf);
        let port = reader.u64()?;
        let message_id = reader.u64()?;
        Ok(Self { port, message_id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relay_create_roundtrips_both_address_families() {
        let payload = RelayCreatePayload {
            port: 0xDEAD_BEEF,
            hops: 2,
            origin_endpoint: "127.0.0.1:9001".parse().unwrap(),
            final_endpoint: "[::1]:9002".parse().unwrap(),
        };
        let encoded = payload.encode();
        assert_eq!(RelayCreatePayload::decode(&encoded).unwrap(), payload);
    }

    #[test]
    fn relay_status_roundtrips() {
        let payload = RelayStatusPayload { port: 7, status: RelayStatusCode::NoPeersAvailable };
        let encoded = payload.encode();
        assert_eq!(RelayStatusPayload::decode(&encoded).unwrap(), payload);
    }

    #[test]
    fn relay_data_roundtrips_with_unprefixed_trailing_payload() {
        let payload = RelayDataPayload { port: 1, message_id: 2, data: vec![1, 2, 3, 4, 5] };
        let encoded = payload.encode();
        assert_eq!(RelayDataPayload::decode(&encoded).unwrap(), payload);
    }

    #[test]
    fn relay_data_ack_roundtrips() {
        let payload = RelayDataAckPayload { port: 9, message_id: 99 };
        let encoded = payload.encode();
        assert_eq!(RelayDataAckPayload::decode(&encoded).unwrap(), payload);
    }

    #[test]
    fn no_peers_available_maps_to_exception() {
        assert_eq!(RelayStatusCode::NoPeersAvailable.to_link_status(), LinkStatus::Exception);
    }
}
