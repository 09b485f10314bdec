//! The outer wire frame: obfuscated size field, nonce seed, keyed HMAC,
//! and AEAD ciphertext, wrapped around an inner [`super::frame`] buffer.
//!
//! Grounded on `Core/MessageTransport.h`/`.cpp`: `OHeader::GetSize()` is
//! `SIZE_FIELD_SIZE + NONCE_SEED_SIZE + HMAC_SIZE` and `IHeader::GetSize()`
//! is `1 + 8 + 2 + 2` bytes, exactly as mirrored in
//! [`crate::core::constants::transport`].

use std::time::{SystemTime, UNIX_EPOCH};

use crate::core::constants::transport as c;
use crate::core::error::{ProtocolError, QuantumGateError, Result};
use crate::crypto::{self, Hash, SymmetricKeyData};

/// Bit-offset and XOR mask applied to the obfuscated size-and-random-bits
/// field. Negotiated once per session during MetaExchange.
#[derive(Debug, Clone, Copy)]
pub struct DataSizeSettings {
    /// Bit offset the data-size field is shifted to within the 32-bit word.
    pub offset: u8,
    /// XOR mask applied after shifting.
    pub xor_mask: u32,
}

impl Default for DataSizeSettings {
    fn default() -> Self {
        Self { offset: c::DEFAULT_MESSAGE_DATA_SIZE_OFFSET, xor_mask: 0 }
    }
}

fn obfuscate_size(data_size: u32, random_bits: u32, settings: DataSizeSettings) -> u32 {
    let shifted_mask = c::SIZE_MASK << settings.offset;
    let masked_random = random_bits & !shifted_mask;
    ((data_size << settings.offset) | masked_random) ^ settings.xor_mask
}

fn deobfuscate_size(size32: u32, settings: DataSizeSettings) -> u32 {
    let unmasked = size32 ^ settings.xor_mask;
    (unmasked >> settings.offset) & c::SIZE_MASK
}

/// The outcome of inspecting a buffer's header without decrypting it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeekResult {
    /// The buffer holds at least one complete frame of this many bytes.
    CompleteMessage(usize),
    /// The buffer is shorter than the declared frame.
    NotEnoughData,
    /// The declared size exceeds the maximum permitted frame size.
    TooMuchData,
}

/// Inspect the first [`crate::core::constants::transport::OHEADER_SIZE`]
/// bytes of `buf` (the outer header) and report whether a complete frame
/// is present, without mutating or decrypting anything.
pub fn peek(buf: &[u8], settings: DataSizeSettings) -> PeekResult {
    if buf.len() < c::SIZE_FIELD_SIZE {
        return PeekResult::NotEnoughData;
    }
    let size32 = u32::from_be_bytes(buf[0..4].try_into().unwrap());
    let data_size = deobfuscate_size(size32, settings) as usize;
    if data_size > c::MAX_MESSAGE_SIZE {
        return PeekResult::TooMuchData;
    }
    let total = c::OHEADER_SIZE + data_size;
    if buf.len() < total {
        PeekResult::NotEnoughData
    } else {
        PeekResult::CompleteMessage(total)
    }
}

/// Extract the 4-byte nonce seed from a frame without decrypting it, so a
/// session can pick which candidate symmetric key to attempt during a
/// key-update overlap window.
pub fn nonce_seed_from_buffer(buf: &[u8]) -> Option<u32> {
    if buf.len() < c::SIZE_FIELD_SIZE + c::NONCE_SEED_SIZE {
        return None;
    }
    let start = c::SIZE_FIELD_SIZE;
    Some(u32::from_be_bytes(buf[start..start + 4].try_into().unwrap()))
}

fn build_nonce(nonce_seed: u32, counter: u64) -> [u8; 12] {
    let mut nonce = [0u8; 12];
    nonce[0..4].copy_from_slice(&nonce_seed.to_be_bytes());
    nonce[4..12].copy_from_slice(&counter.to_be_bytes());
    nonce
}

fn now_millis() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as u64).unwrap_or(0)
}

fn encode_iheader(counter: u8, timestamp_ms: u64, next_prefix_len: u16, random_data_size: u16) -> [u8; c::IHEADER_SIZE] {
    let mut buf = [0u8; c::IHEADER_SIZE];
    buf[0] = counter;
    buf[1..9].copy_from_slice(&timestamp_ms.to_be_bytes());
    buf[9..11].copy_from_slice(&next_prefix_len.to_be_bytes());
    buf[11..13].copy_from_slice(&random_data_size.to_be_bytes());
    buf
}

struct IHeader {
    counter: u8,
    timestamp_ms: u64,
    next_prefix_len: u16,
    random_data_size: u16,
}

fn decode_iheader(buf: &[u8]) -> Option<IHeader> {
    if buf.len() < c::IHEADER_SIZE {
        return None;
    }
    Some(IHeader {
        counter: buf[0],
        timestamp_ms: u64::from_be_bytes(buf[1..9].try_into().unwrap()),
        next_prefix_len: u16::from_be_bytes(buf[9..11].try_into().unwrap()),
        random_data_size: u16::from_be_bytes(buf[11..13].try_into().unwrap()),
    })
}

/// The outcome of reading a frame once its HMAC and AEAD tag have both
/// been checked.
pub struct DecodedFrame {
    /// The inner-layer payload (still subject to [`super::frame`] parsing).
    pub payload: Vec<u8>,
    /// The low byte of the sender's send counter, for replay detection.
    pub counter: u8,
    /// The sender's wall-clock timestamp in milliseconds since the epoch.
    pub timestamp_ms: u64,
    /// The random-prefix length the sender wants prepended to its next frame.
    pub next_prefix_len: u16,
}

/// Serialize `payload` (already assembled by [`super::frame`]) into a
/// complete, encrypted, HMAC-tagged outer frame, optionally preceded by a
/// CSPRNG padding prefix.
#[allow(clippy::too_many_arguments)]
pub fn write(
    payload: &[u8],
    sym_key: &SymmetricKeyData,
    nonce_seed: u32,
    counter: u64,
    random_data_size: u16,
    current_prefix_len: u16,
    next_prefix_len: u16,
    settings: DataSizeSettings,
) -> Result<Vec<u8>> {
    let iheader = encode_iheader(
        (counter & 0xFF) as u8,
        now_millis(),
        next_prefix_len,
        random_data_size,
    );

    let mut plaintext = Vec::with_capacity(c::IHEADER_SIZE + payload.len() + random_data_size as usize);
    plaintext.extend_from_slice(&iheader);
    plaintext.extend_from_slice(payload);
    plaintext.extend(crypto::csprng_bytes(random_data_size as usize));

    if plaintext.len() > c::MAX_MESSAGE_AND_RANDOM_DATA_SIZE {
        return Err(QuantumGateError::Protocol(ProtocolError::FrameTooLarge {
            declared: plaintext.len(),
            max: c::MAX_MESSAGE_AND_RANDOM_DATA_SIZE,
        }));
    }

    let nonce = build_nonce(nonce_seed, counter);
    let ciphertext = crypto::encrypt(&plaintext, sym_key, &nonce)?;
    let hmac_tag = crypto::hmac(&ciphertext, &sym_key.auth_key, Hash::Blake2s256)?;

    let data_size = ciphertext.len() as u32;
    let random_bits = crypto::csprng_u64() as u32;
    let size32 = obfuscate_size(data_size, random_bits, settings);

    let mut frame = Vec::with_capacity(current_prefix_len as usize + c::OHEADER_SIZE + ciphertext.len());
    frame.extend(crypto::csprng_bytes(current_prefix_len as usize));
    frame.extend_from_slice(&size32.to_be_bytes());
    frame.extend_from_slice(&nonce_seed.to_be_bytes());
    frame.extend_from_slice(&hmac_tag);
    frame.extend_from_slice(&ciphertext);
    Ok(frame)
}

/// The result of attempting to read a frame whose random prefix has
/// already been skipped by the caller.
pub enum ReadOutcome {
    /// The frame decoded and authenticated successfully.
    Frame(DecodedFrame),
    /// HMAC verification failed under this key; the caller should retry
    /// with an alternate candidate key before treating the session as
    /// corrupted (see [`ProtocolError::is_retryable`]).
    RetryAlternateKey,
}

/// Decode and decrypt a complete frame (starting at the outer header, i.e.
/// after any random prefix has been skipped) under `sym_key`.
///
/// `counter` is the sender's full 64-bit send counter reconstructed by the
/// session from the low byte carried on the wire plus its own tracked high
/// bits; it is required to rebuild the AEAD nonce.
pub fn read(buf: &[u8], sym_key: &SymmetricKeyData, counter: u64, settings: DataSizeSettings) -> Result<ReadOutcome> {
    match peek(buf, settings) {
        PeekResult::TooMuchData => {
            return Err(QuantumGateError::Protocol(ProtocolError::FrameTooLarge {
                declared: buf.len(),
                max: c::MAX_MESSAGE_SIZE,
            }))
        }
        PeekResult::NotEnoughData => {
            return Err(QuantumGateError::Protocol(ProtocolError::FrameTooLarge {
                declared: buf.len(),
                max: c::OHEADER_SIZE,
            }))
        }
        PeekResult::CompleteMessage(_) => {}
    }

    let nonce_seed = nonce_seed_from_buffer(buf)
        .ok_or(QuantumGateError::Protocol(ProtocolError::FrameTooLarge { declared: buf.len(), max: c::OHEADER_SIZE }))?;
    let hmac_start = c::SIZE_FIELD_SIZE + c::NONCE_SEED_SIZE;
    let hmac_end = hmac_start + c::HMAC_SIZE;
    let received_hmac = &buf[hmac_start..hmac_end];
    let ciphertext = &buf[hmac_end..];

    let expected_hmac = crypto::hmac(ciphertext, &sym_key.auth_key, Hash::Blake2s256)?;
    if !crypto::constant_time_equal(&expected_hmac, received_hmac) {
        return Ok(ReadOutcome::RetryAlternateKey);
    }

    let nonce = build_nonce(nonce_seed, counter);
    let plaintext = match crypto::decrypt(ciphertext, sym_key, &nonce) {
        Ok(p) => p,
        Err(_) => return Ok(ReadOutcome::RetryAlternateKey),
    };

    let iheader = decode_iheader(&plaintext)
        .ok_or(QuantumGateError::Protocol(ProtocolError::InnerSizeMismatch { declared: 0, actual: plaintext.len() }))?;
    let body_start = c::IHEADER_SIZE;
    let body_end = plaintext.len().saturating_sub(iheader.random_data_size as usize);
    if body_end < body_start {
        return Err(QuantumGateError::Protocol(ProtocolError::InnerSizeMismatch {
            declared: iheader.random_data_size as usize,
            actual: plaintext.len(),
        }));
    }
    let payload = plaintext[body_start..body_end].to_vec();

    Ok(ReadOutcome::Frame(DecodedFrame {
        payload,
        counter: iheader.counter,
        timestamp_ms: iheader.timestamp_ms,
        next_prefix_len: iheader.next_prefix_len,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{Symmetric, SymmetricKeyType};

    fn test_key() -> SymmetricKeyData {
        let mut key = SymmetricKeyData::new(
            SymmetricKeyType::Derived,
            Hash::Blake2s256,
            Symmetric::ChaCha20Poly1305,
            None,
        );
        key.key = crypto::csprng_bytes(32);
        key.auth_key = crypto::csprng_bytes(64);
        key
    }

    #[test]
    fn obfuscate_deobfuscate_roundtrip() {
        let settings = DataSizeSettings::default();
        let size32 = obfuscate_size(12345, 0xDEADBEEF, settings);
        assert_eq!(deobfuscate_size(size32, settings), 12345);
    }

    #[test]
    fn write_read_roundtrip() {
        let key = test_key();
        let payload = b"a complete inner message frame".to_vec();
        let settings = DataSizeSettings::default();
        let frame = write(&payload, &key, 0x1234_5678, 7, 16, 0, 0, settings).unwrap();

        match peek(&frame, settings) {
            PeekResult::CompleteMessage(total) => assert_eq!(total, frame.len()),
            other => panic!("expected complete message, got {other:?}"),
        }

        let nonce_seed = nonce_seed_from_buffer(&frame).unwrap();
        assert_eq!(nonce_seed, 0x1234_5678);

        match read(&frame, &key, 7, settings).unwrap() {
            ReadOutcome::Frame(decoded) => assert_eq!(decoded.payload, payload),
            ReadOutcome::RetryAlternateKey => panic!("expected a successful decode"),
        }
    }

    #[test]
    fn tampered_hmac_requests_alternate_key_retry_not_a_hard_error() {
        let key = test_key();
        let settings = DataSizeSettings::default();
        let mut frame = write(b"payload", &key, 1, 1, 0, 0, 0, settings).unwrap();
        let last = frame.len() - 1;
        frame[last] ^= 0xFF;

        let other_key = test_key();
        let outcome = read(&frame, &other_key, 1, settings).unwrap();
        assert!(matches!(outcome, ReadOutcome::RetryAlternateKey));
    }

    #[test]
    fn oversized_frame_is_rejected() {
        let key = test_key();
        let payload = vec![0u8; c::MAX_MESSAGE_AND_RANDOM_DATA_SIZE];
        let settings = DataSizeSettings::default();
        let result = write(&payload, &key, 1, 1, 0, 0, 0, settings);
        assert!(result.is_err());
    }

    #[test]
    fn not_enough_data_is_reported() {
        let settings = DataSizeSettings::default();
        assert_eq!(peek(&[0u8; 2], settings), PeekResult::NotEnoughData);
    }
}
