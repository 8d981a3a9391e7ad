//! Binary codec for encoding and decoding ADB wire-protocol messages.
//!
//! Wire format:
//! ```text
//! [command:4][arg0:4][arg1:4][data_length:4][data_checksum:4][magic:4][payload:N]
//! ```
//! Total header size: 24 bytes. All fields are little-endian. `magic` is the
//! bitwise complement of `command`; `data_checksum` is the wrapping byte sum
//! of the payload. Devices running a newer bridge send a zero checksum and
//! expect it to be skipped, so a zero on the wire is accepted unverified.

use thiserror::Error;

use crate::protocol::messages::{AdbCommand, AdbMessage, HEADER_SIZE, MAX_PAYLOAD};

/// Errors that can occur during message encoding or decoding.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    /// The byte slice is shorter than a full header.
    #[error("insufficient data: need at least {needed} bytes, got {available}")]
    InsufficientData { needed: usize, available: usize },

    /// The command word in the header is not a recognized value.
    #[error("unknown command word: 0x{0:08X}")]
    UnknownCommand(u32),

    /// The magic field is not the complement of the command word.
    #[error("bad magic: command 0x{command:08X} vs magic 0x{magic:08X}")]
    BadMagic { command: u32, magic: u32 },

    /// The header declares a payload larger than the advertised maximum.
    #[error("declared payload of {0} bytes exceeds maximum of {MAX_PAYLOAD}")]
    PayloadTooLarge(u32),

    /// The payload byte sum does not match the header checksum.
    #[error("payload checksum mismatch: header says 0x{declared:08X}, computed 0x{computed:08X}")]
    ChecksumMismatch { declared: u32, computed: u32 },
}

/// A decoded message header: command, args, declared payload length, and the
/// declared checksum. The caller reads `data_length` further bytes and then
/// validates them with [`verify_payload`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdbHeader {
    pub command: AdbCommand,
    pub arg0: u32,
    pub arg1: u32,
    pub data_length: u32,
    pub data_checksum: u32,
}

/// Computes the ADB payload checksum: the wrapping sum of all payload bytes.
pub fn payload_checksum(payload: &[u8]) -> u32 {
    payload.iter().fold(0u32, |sum, &b| sum.wrapping_add(u32::from(b)))
}

/// Encodes an [`AdbMessage`] into a byte vector including the 24-byte header.
pub fn encode_message(msg: &AdbMessage) -> Vec<u8> {
    let command = msg.command as u32;
    let mut buf = Vec::with_capacity(HEADER_SIZE + msg.payload.len());
    buf.extend_from_slice(&command.to_le_bytes());
    buf.extend_from_slice(&msg.arg0.to_le_bytes());
    buf.extend_from_slice(&msg.arg1.to_le_bytes());
    buf.extend_from_slice(&(msg.payload.len() as u32).to_le_bytes());
    buf.extend_from_slice(&payload_checksum(&msg.payload).to_le_bytes());
    buf.extend_from_slice(&(command ^ 0xFFFF_FFFF).to_le_bytes());
    buf.extend_from_slice(&msg.payload);
    buf
}

/// Decodes one message header from the beginning of `bytes`.
///
/// # Errors
///
/// Returns [`ProtocolError`] if fewer than 24 bytes are available, the magic
/// does not match the command, the command word is unknown, or the declared
/// payload exceeds [`MAX_PAYLOAD`].
pub fn decode_header(bytes: &[u8]) -> Result<AdbHeader, ProtocolError> {
    if bytes.len() < HEADER_SIZE {
        return Err(ProtocolError::InsufficientData {
            needed: HEADER_SIZE,
            available: bytes.len(),
        });
    }

    let word = |i: usize| u32::from_le_bytes([bytes[i], bytes[i + 1], bytes[i + 2], bytes[i + 3]]);
    let command_raw = word(0);
    let magic = word(20);

    // Check the magic before interpreting the command word: a framing slip
    // shows up here first, and the complement test catches it for any value.
    if command_raw ^ 0xFFFF_FFFF != magic {
        return Err(ProtocolError::BadMagic {
            command: command_raw,
            magic,
        });
    }

    let command =
        AdbCommand::try_from(command_raw).map_err(|_| ProtocolError::UnknownCommand(command_raw))?;

    let data_length = word(12);
    if data_length > MAX_PAYLOAD {
        return Err(ProtocolError::PayloadTooLarge(data_length));
    }

    Ok(AdbHeader {
        command,
        arg0: word(4),
        arg1: word(8),
        data_length,
        data_checksum: word(16),
    })
}

/// Validates a received payload against the header's declared checksum.
///
/// A declared checksum of zero is accepted without verification: post-2017
/// device bridges no longer compute it.
///
/// # Errors
///
/// Returns [`ProtocolError::ChecksumMismatch`] when a non-zero declared
/// checksum disagrees with the computed byte sum.
pub fn verify_payload(header: &AdbHeader, payload: &[u8]) -> Result<(), ProtocolError> {
    if header.data_checksum == 0 {
        return Ok(());
    }
    let computed = payload_checksum(payload);
    if computed != header.data_checksum {
        return Err(ProtocolError::ChecksumMismatch {
            declared: header.data_checksum,
            computed,
        });
    }
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
