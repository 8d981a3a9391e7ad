//! ADB wire-protocol message types.
//!
//! The debug bridge speaks a simple framed protocol: every message is a
//! 24-byte little-endian header followed by an optional payload. Command
//! words are four ASCII bytes read as a little-endian `u32` (so `CNXN` is
//! `0x4E58_4E43`). The set below is the subset a shell-only client needs:
//! connect, authenticate, open a stream, ack, stream data, stream close.

// ── Protocol constants ────────────────────────────────────────────────────────

/// Protocol version advertised in the CONNECT message.
pub const PROTOCOL_VERSION: u32 = 0x0100_0000;

/// Maximum payload size this client advertises and accepts.
pub const MAX_PAYLOAD: u32 = 1024 * 1024;

/// Total size of the message header in bytes.
pub const HEADER_SIZE: usize = 24;

/// System identity banner sent in the CONNECT message. The trailing `::`
/// delimits the (empty) serial and feature fields.
pub const CONNECT_BANNER: &str = "host::";

// ── AUTH sub-types ────────────────────────────────────────────────────────────

/// AUTH arg0: the device is challenging us with a 20-byte token to sign.
pub const AUTH_TOKEN: u32 = 1;
/// AUTH arg0: our reply carrying the RSA signature over the token.
pub const AUTH_SIGNATURE: u32 = 2;
/// AUTH arg0: our reply carrying the public key, when the device does not
/// recognize the signature (triggers the on-screen confirmation dialog).
pub const AUTH_RSA_PUBLIC_KEY: u32 = 3;

// ── Command words ─────────────────────────────────────────────────────────────

/// All command words understood by this client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum AdbCommand {
    /// `CNXN` – connection handshake, carries version/maxdata/banner.
    Connect = 0x4E58_4E43,
    /// `AUTH` – authentication challenge or response, see the AUTH sub-types.
    Auth = 0x4854_5541,
    /// `OPEN` – open a stream to a device service such as `shell:`.
    Open = 0x4E45_504F,
    /// `OKAY` – stream ready / data acknowledged.
    Okay = 0x5941_4B4F,
    /// `WRTE` – stream payload data.
    Write = 0x4554_5257,
    /// `CLSE` – stream closed.
    Close = 0x4553_4C43,
}

impl TryFrom<u32> for AdbCommand {
    type Error = ();

    fn try_from(value: u32) -> Result<Self, ()> {
        match value {
            0x4E58_4E43 => Ok(AdbCommand::Connect),
            0x4854_5541 => Ok(AdbCommand::Auth),
            0x4E45_504F => Ok(AdbCommand::Open),
            0x5941_4B4F => Ok(AdbCommand::Okay),
            0x4554_5257 => Ok(AdbCommand::Write),
            0x4553_4C43 => Ok(AdbCommand::Close),
            _ => Err(()),
        }
    }
}

// ── Message struct ────────────────────────────────────────────────────────────

/// One framed ADB message: command word, two arguments, and a payload.
///
/// The header checksum and magic fields are derived at encode time and
/// validated at decode time; they never appear here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdbMessage {
    pub command: AdbCommand,
    pub arg0: u32,
    pub arg1: u32,
    pub payload: Vec<u8>,
}

impl AdbMessage {
    /// Builds the CONNECT message that opens every session.
    pub fn connect() -> Self {
        let mut banner = CONNECT_BANNER.as_bytes().to_vec();
        banner.push(0); // banners are NUL-terminated on the wire
        Self {
            command: AdbCommand::Connect,
            arg0: PROTOCOL_VERSION,
            arg1: MAX_PAYLOAD,
            payload: banner,
        }
    }

    /// Builds the AUTH reply carrying the RSA signature over the device token.
    pub fn auth_signature(signature: Vec<u8>) -> Self {
        Self {
            command: AdbCommand::Auth,
            arg0: AUTH_SIGNATURE,
            arg1: 0,
            payload: signature,
        }
    }

    /// Builds the AUTH reply carrying our public key.
    ///
    /// The payload is the Android public-key file content plus a trailing
    /// NUL, matching what the stock `adb` client sends.
    pub fn auth_rsa_public_key(public_key: &[u8]) -> Self {
        let mut payload = public_key.to_vec();
        payload.push(0);
        Self {
            command: AdbCommand::Auth,
            arg0: AUTH_RSA_PUBLIC_KEY,
            arg1: 0,
            payload,
        }
    }

    /// Builds an OPEN message for a device service destination such as
    /// `shell:dumpsys window`.
    pub fn open(local_id: u32, destination: &str) -> Self {
        let mut payload = destination.as_bytes().to_vec();
        payload.push(0);
        Self {
            command: AdbCommand::Open,
            arg0: local_id,
            arg1: 0,
            payload,
        }
    }

    /// Builds an OKAY acknowledgement for a stream.
    pub fn okay(local_id: u32, remote_id: u32) -> Self {
        Self {
            command: AdbCommand::Okay,
            arg0: local_id,
            arg1: remote_id,
            payload: Vec::new(),
        }
    }

    /// Builds a CLSE message tearing down a stream.
    pub fn close(local_id: u32, remote_id: u32) -> Self {
        Self {
            command: AdbCommand::Close,
            arg0: local_id,
            arg1: remote_id,
            payload: Vec::new(),
        }
    }
}
