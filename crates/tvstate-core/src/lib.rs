//! # tvstate-core
//!
//! Shared library for tvstate containing the ADB wire-protocol codec, the RSA
//! authentication helpers, and the pure signal parsers that turn device
//! diagnostic dumps into typed facts.
//!
//! This crate is used by the `tvstate-agent` daemon. It has zero dependencies
//! on network sockets or the async runtime: everything here operates on byte
//! slices, strings, and key files, which keeps the whole crate unit-testable
//! without a device on the network.
//!
//! # Architecture overview
//!
//! tvstate watches a streaming-media set-top box over its debug bridge and
//! publishes three derived signals: whether the target app owns input focus,
//! whether media is playing, and which channel is on screen.
//!
//! This crate defines the three layers underneath that:
//!
//! - **`protocol`** – How bytes travel over the wire. ADB messages are a
//!   24-byte little-endian header plus payload; the codec encodes typed
//!   [`protocol::AdbMessage`]s and decodes device replies.
//!
//! - **`auth`** – ADB's public-key handshake. Loads (or generates) the RSA
//!   key pair and signs the device's 20-byte auth challenge.
//!
//! - **`signals`** – Pure parsers over the device's free-text and XML
//!   diagnostic output. Pattern mismatches are modeled as "no match", never
//!   as errors; only malformed XML is logged.

pub mod auth;
pub mod protocol;
pub mod signals;

// Re-export the most-used items at the crate root so callers can write
// `tvstate_core::AdbMessage` instead of the full path.
pub use auth::{load_or_create_keypair, sign_token, AuthError, KeyPair};
pub use protocol::codec::{decode_header, encode_message, payload_checksum, ProtocolError};
pub use protocol::messages::{AdbCommand, AdbMessage};
pub use signals::{
    channel_before_profile_link, parse_app_focus, parse_playback_state, PlaybackState,
};
