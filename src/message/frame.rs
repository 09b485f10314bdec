//! The inner `Message` frame: type, size, flags, optional extender UUID,
//! and an optionally compressed payload.
//!
//! Grounded on `Core/MessageTypes.h`/`Core/Message.cpp`. `type_and_size`
//! packs an 11-bit type and a 21-bit size into one 32-bit field, matching
//! [`crate::core::constants::message::SIZE_BITS`].

use std::collections::HashMap;

use bitflags::bitflags;

use crate::core::constants::message as c;
use crate::core::error::{ProtocolError, QuantumGateError, Result};
use crate::core::id::ExtenderUUID;
use crate::crypto::Compression;

/// Every inner message type, covering handshake phases, per-session
/// rekeying, extender traffic, keep-alive noise, and relay control.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum MessageType {
    /// First half of algorithm/parameter negotiation.
    BeginMetaExchange = 0,
    /// Second half of algorithm/parameter negotiation.
    EndMetaExchange = 1,
    /// First half of the primary key exchange.
    BeginPrimaryKeyExchange = 2,
    /// Second half of the primary key exchange.
    EndPrimaryKeyExchange = 3,
    /// First half of the secondary key exchange.
    BeginSecondaryKeyExchange = 4,
    /// Second half of the secondary key exchange.
    EndSecondaryKeyExchange = 5,
    /// First half of mutual authentication.
    BeginAuthentication = 6,
    /// Second half of mutual authentication.
    EndAuthentication = 7,
    /// First half of session initialization.
    BeginSessionInit = 8,
    /// Second half of session initialization.
    EndSessionInit = 9,
    /// First half of a primary key update.
    BeginPrimaryKeyUpdateExchange = 10,
    /// Second half of a primary key update.
    EndPrimaryKeyUpdateExchange = 11,
    /// First half of a secondary key update.
    BeginSecondaryKeyUpdateExchange = 12,
    /// Second half of a secondary key update.
    EndSecondaryKeyUpdateExchange = 13,
    /// Marks a key update ready to cut over.
    KeyUpdateReady = 14,
    /// Payload for a registered extender.
    ExtenderCommunication = 15,
    /// Announces or retracts a peer's supported extender UUID.
    ExtenderUpdate = 16,
    /// Random, incompressible-looking keep-alive traffic.
    Noise = 17,
    /// Opens a relay circuit hop.
    RelayCreate = 18,
    /// Propagates a relay link's status along the circuit.
    RelayStatus = 19,
    /// Carries relayed application data.
    RelayData = 20,
    /// Acknowledges a `RelayData` message for rate-limiting purposes.
    RelayDataAck = 21,
}

impl MessageType {
    fn from_u16(value: u16) -> Option<Self> {
        use MessageType::*;
        Some(match value {
            0 => BeginMetaExchange,
            1 => EndMetaExchange,
            2 => BeginPrimaryKeyExchange,
            3 => EndPrimaryKeyExchange,
            4 => BeginSecondaryKeyExchange,
            5 => EndSecondaryKeyExchange,
            6 => BeginAuthentication,
            7 => EndAuthentication,
            8 => BeginSessionInit,
            9 => EndSessionInit,
            10 => BeginPrimaryKeyUpdateExchange,
            11 => EndPrimaryKeyUpdateExchange,
            12 => BeginSecondaryKeyUpdateExchange,
            13 => EndSecondaryKeyUpdateExchange,
            14 => KeyUpdateReady,
            15 => ExtenderCommunication,
            16 => ExtenderUpdate,
            17 => Noise,
            18 => RelayCreate,
            19 => RelayStatus,
            20 => RelayData,
            21 => RelayDataAck,
            _ => return None,
        })
    }

    /// Whether this message type carries an `extender_uuid` field.
    pub fn carries_extender_uuid(self) -> bool {
        matches!(self, MessageType::ExtenderCommunication)
    }

    /// Whether this message type is ever compressed. `Noise` must stay
    /// incompressible-looking and `RelayData` is opaque ciphertext from
    /// this hop's perspective, so neither is ever compressed.
    pub fn is_compressible(self) -> bool {
        !matches!(self, MessageType::Noise | MessageType::RelayData)
    }
}

bitflags! {
    /// Per-message flags packed alongside `type_and_size`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MessageFlags: u8 {
        /// The payload was compressed and must be decompressed before use.
        const COMPRESSED = 0b0000_0001;
        /// First fragment of a logical buffer split across several frames.
        const PARTIAL_BEGIN = 0b0000_0010;
        /// A middle fragment.
        const PARTIAL = 0b0000_0100;
        /// The final fragment.
        const PARTIAL_END = 0b0000_1000;
    }
}

/// A fully parsed inner message.
pub struct Message {
    /// The message's type.
    pub message_type: MessageType,
    /// Flags describing compression and fragmentation.
    pub flags: MessageFlags,
    /// The extender this message belongs to, if `message_type` carries one.
    pub extender_uuid: Option<ExtenderUUID>,
    /// The (already decompressed) payload.
    pub payload: Vec<u8>,
}

fn compress(payload: &[u8], algo: Compression) -> Vec<u8> {
    match algo {
        Compression::Deflate => {
            use flate2::write::DeflateEncoder;
            use flate2::Compression as Level;
            use std::io::Write;
            let mut encoder = DeflateEncoder::new(Vec::new(), Level::default());
            encoder.write_all(payload).expect("in-memory writer cannot fail");
            encoder.finish().expect("in-memory writer cannot fail")
        }
        Compression::Zstandard => zstd::stream::encode_all(payload, 0).expect("in-memory encode cannot fail"),
    }
}

fn decompress(payload: &[u8], algo: Compression, cap: usize) -> Result<Vec<u8>> {
    let out = match algo {
        Compression::Deflate => {
            use flate2::read::DeflateDecoder;
            use std::io::Read;
            let mut decoder = DeflateDecoder::new(payload).take(cap as u64 + 1);
            let mut buf = Vec::new();
            decoder.read_to_end(&mut buf).map_err(|_| ProtocolError::DecompressionBomb)?;
            buf
        }
        Compression::Zstandard => {
            let mut decoder = zstd::stream::Decoder::new(payload).map_err(|_| ProtocolError::DecompressionBomb)?;
            use std::io::Read;
            let mut buf = Vec::new();
            decoder.by_ref().take(cap as u64 + 1).read_to_end(&mut buf).map_err(|_| ProtocolError::DecompressionBomb)?;
            buf
        }
    };
    if out.len() > cap {
        return Err(ProtocolError::DecompressionBomb.into());
    }
    Ok(out)
}

/// Serialize `message_type`/`extender_uuid`/`payload` into the inner wire
/// format, compressing the payload with `compression` when it helps and
/// the type allows it.
pub fn write(
    message_type: MessageType,
    extender_uuid: Option<ExtenderUUID>,
    payload: &[u8],
    compression: Option<Compression>,
    max_plaintext: usize,
) -> Result<Vec<u8>> {
    let mut flags = MessageFlags::empty();
    let mut body = payload.to_vec();

    if message_type.is_compressible() && payload.len() >= c::COMPRESSION_THRESHOLD {
        if let Some(algo) = compression {
            let compressed = compress(payload, algo);
            if compressed.len() < payload.len() {
                body = compressed;
                flags |= MessageFlags::COMPRESSED;
            }
        }
    }

    if body.len() > c::SIZE_MASK as usize {
        return Err(QuantumGateError::Protocol(ProtocolError::FrameTooLarge {
            declared: body.len(),
            max: c::SIZE_MASK as usize,
        }));
    }

    let type_and_size = ((message_type as u32) << c::SIZE_BITS) | (body.len() as u32 & c::SIZE_MASK);

    let mut out = Vec::with_capacity(4 + 1 + c::EXTENDER_UUID_SIZE + body.len());
    out.extend_from_slice(&type_and_size.to_be_bytes());
    out.push(flags.bits());
    if message_type.carries_extender_uuid() {
        let uuid = extender_uuid.unwrap_or_default();
        out.extend_from_slice(uuid.as_uuid().as_bytes());
    }
    out.extend_from_slice(&body);

    if out.len() > max_plaintext {
        return Err(QuantumGateError::Protocol(ProtocolError::FrameTooLarge {
            declared: out.len(),
            max: max_plaintext,
        }));
    }
    Ok(out)
}

/// Parse a single inner message from `buf`, decompressing its payload if
/// the `Compressed` flag is set, with output capped at `max_plaintext` to
/// bound decompression-bomb attacks.
pub fn read(buf: &[u8], compression: Option<Compression>, max_plaintext: usize) -> Result<Message> {
    if buf.len() < 5 {
        return Err(ProtocolError::InnerSizeMismatch { declared: 5, actual: buf.len() }.into());
    }
    let type_and_size = u32::from_be_bytes(buf[0..4].try_into().unwrap());
    let type_value = (type_and_size >> c::SIZE_BITS) as u16;
    let declared_size = (type_and_size & c::SIZE_MASK) as usize;
    let flags = MessageFlags::from_bits_truncate(buf[4]);

    let message_type =
        MessageType::from_u16(type_value).ok_or(ProtocolError::UnknownMessageType(type_value))?;

    let mut offset = 5;
    let extender_uuid = if message_type.carries_extender_uuid() {
        if buf.len() < offset + c::EXTENDER_UUID_SIZE {
            return Err(ProtocolError::InnerSizeMismatch { declared: declared_size, actual: buf.len() }.into());
        }
        let bytes: [u8; 16] = buf[offset..offset + c::EXTENDER_UUID_SIZE].try_into().unwrap();
        offset += c::EXTENDER_UUID_SIZE;
        Some(ExtenderUUID::from_uuid(uuid::Uuid::from_bytes(bytes)))
    } else {
        None
    };

    let body = &buf[offset..];
    if body.len() != declared_size {
        return Err(ProtocolError::InnerSizeMismatch { declared: declared_size, actual: body.len() }.into());
    }

    let payload = if flags.contains(MessageFlags::COMPRESSED) {
        let algo = compression.ok_or(ProtocolError::NoCommonAlgorithm)?;
        decompress(body, algo, max_plaintext)?
    } else {
        body.to_vec()
    };

    Ok(Message { message_type, flags, extender_uuid, payload })
}

/// Reassembles `PartialBegin | Partial | PartialEnd` fragments of a
/// logical extender buffer, keyed per `(peer, extender_uuid)` by the
/// caller.
#[derive(Debug, Default)]
pub struct Reassembler {
    pending: HashMap<ExtenderUUID, Vec<u8>>,
}

impl Reassembler {
    /// Create an empty reassembler for one peer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one fragment in arrival order. Returns the completed buffer
    /// once a `PartialEnd` fragment arrives; otherwise buffers and
    /// returns `None`.
    pub fn feed(&mut self, extender_uuid: ExtenderUUID, flags: MessageFlags, payload: &[u8]) -> Option<Vec<u8>> {
        if flags.contains(MessageFlags::PARTIAL_BEGIN) {
            self.pending.insert(extender_uuid, payload.to_vec());
            return None;
        }
        if flags.contains(MessageFlags::PARTIAL) {
            self.pending.entry(extender_uuid).or_default().extend_from_slice(payload);
            return None;
        }
        if flags.contains(MessageFlags::PARTIAL_END) {
            let mut buf = self.pending.remove(&extender_uuid).unwrap_or_default();
            buf.extend_from_slice(payload);
            return Some(buf);
        }
        Some(payload.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_read_roundtrip_without_compression() {
        let payload = b"short payload".to_vec();
        let frame = write(MessageType::Noise, None, &payload, Some(Compression::Zstandard), 1_048_021).unwrap();
        let decoded = read(&frame, Some(Compression::Zstandard), 1_048_021).unwrap();
        assert_eq!(decoded.payload, payload);
        assert!(!decoded.flags.contains(MessageFlags::COMPRESSED));
    }

    #[test]
    fn noise_and_relay_data_are_never_compressed() {
        let payload = vec![b'a'; 4096];
        let frame = write(MessageType::Noise, None, &payload, Some(Compression::Deflate), 1_048_021).unwrap();
        let decoded = read(&frame, Some(Compression::Deflate), 1_048_021).unwrap();
        assert!(!decoded.flags.contains(MessageFlags::COMPRESSED));
        assert_eq!(decoded.payload, payload);
    }

    #[test]
    fn compressible_payload_over_threshold_gets_compressed() {
        let payload = vec![b'x'; 4096];
        let frame = write(
            MessageType::ExtenderUpdate,
            None,
            &payload,
            Some(Compression::Deflate),
            1_048_021,
        )
        .unwrap();
        assert!(frame.len() < payload.len());
        let decoded = read(&frame, Some(Compression::Deflate), 1_048_021).unwrap();
        assert_eq!(decoded.payload, payload);
    }

    #[test]
    fn unknown_message_type_is_rejected() {
        let mut buf = vec![0u8; 5];
        let type_and_size: u32 = 9999 << c::SIZE_BITS;
        buf[0..4].copy_from_slice(&type_and_size.to_be_bytes());
        assert!(read(&buf, None, 1_048_021).is_err());
    }

    #[test]
    fn extender_communication_carries_extender_uuid() {
        let uuid = ExtenderUUID::control();
        let payload = b"extender data".to_vec();
        let frame = write(MessageType::ExtenderCommunication, Some(uuid), &payload, None, 1_048_021).unwrap();
        let decoded = read(&frame, None, 1_048_021).unwrap();
        assert_eq!(decoded.extender_uuid, Some(uuid));
        assert_eq!(decoded.payload, payload);
    }

    #[test]
    fn reassembler_concatenates_fragments_in_order() {
        let mut reassembler = Reassembler::new();
        let uuid = ExtenderUUID::control();
        assert!(reassembler.feed(uuid, MessageFlags::PARTIAL_BEGIN, b"hello ").is_none());
        assert!(reassembler.feed(uuid, MessageFlags::PARTIAL, b"cruel ").is_none());
        let complete = reassembler.feed(uuid, MessageFlags::PARTIAL_END, b"world").unwrap();
        assert_eq!(complete, b"hello cruel world");
    }
}
