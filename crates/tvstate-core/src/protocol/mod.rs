//! Protocol module containing ADB message types and the binary codec.

pub mod codec;
pub mod messages;

pub use codec::{decode_header, encode_message, payload_checksum, verify_payload, AdbHeader, ProtocolError};
pub use messages::*;
