//! Persistent authenticated session with the device's debug bridge.
//!
//! [`AdbSession`] owns one TCP connection and drives the CONNECT/AUTH
//! handshake and per-command OPEN/WRTE/CLSE stream exchanges, using the
//! framing and key material from `tvstate-core`. The poller talks to it
//! through the [`DeviceLink`] trait so tests can substitute a fake.
//!
//! Failure policy: nothing at this layer is fatal. A connect or handshake
//! error surfaces as a [`SessionError`] for the caller to log and retry;
//! an I/O error during a shell command tears down the connection and
//! returns empty output, and the next poll tick reconnects.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use tvstate_core::auth::{load_or_create_keypair, sign_token, AuthError};
use tvstate_core::protocol::{
    decode_header, encode_message, verify_payload, AdbCommand, AdbHeader, AdbMessage,
    ProtocolError, AUTH_TOKEN, HEADER_SIZE,
};

use crate::config::AgentConfig;

/// Error type for session establishment.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The TCP connection could not be established.
    #[error("connect to {addr} failed: {source}")]
    ConnectFailed {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// The TCP connection attempt outran its deadline.
    #[error("connect to {addr} timed out")]
    ConnectTimeout { addr: String },

    /// Key material could not be loaded or used.
    #[error(transparent)]
    Keys(#[from] AuthError),

    /// The device never accepted our signature or public key.
    ///
    /// On first contact this usually means the on-screen authorization
    /// dialog was dismissed or ignored.
    #[error("device rejected authentication")]
    AuthRejected,

    /// The handshake did not complete within the authentication budget.
    #[error("authentication timed out (waiting for on-screen approval?)")]
    AuthTimeout,

    /// A read or write on the established socket failed.
    #[error("session I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The peer sent bytes that do not frame as a valid message.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The peer sent a well-formed message we did not expect at this point.
    #[error("unexpected {got:?} message during {phase}")]
    Unexpected { phase: &'static str, got: AdbCommand },
}

// ── DeviceLink trait ──────────────────────────────────────────────────────────

/// The poller's view of the device connection.
///
/// `shell` deliberately returns a plain `String`: command output is parsed
/// with substring and regex matching that treats missing markers as "not
/// found", so an error maps naturally onto empty output. The caller checks
/// [`DeviceLink::is_connected`] afterwards to distinguish "marker absent"
/// from "transport gone".
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DeviceLink: Send {
    /// Establishes (or re-establishes) the authenticated session.
    async fn connect(&mut self) -> Result<(), SessionError>;

    /// Whether the last operation left the session usable.
    fn is_connected(&self) -> bool;

    /// Runs one shell command and returns its collected output.
    ///
    /// Returns an empty string when disconnected or when the command
    /// fails; a failure also marks the session disconnected.
    async fn shell(&mut self, command: &str) -> String;

    /// Drops the connection, if any.
    async fn close(&mut self);
}

// ── AdbSession ────────────────────────────────────────────────────────────────

/// Live connection state: the socket plus the stream-id counter.
struct Connection {
    stream: TcpStream,
    next_local_id: u32,
}

/// A TCP debug-bridge session speaking the framed wire protocol.
pub struct AdbSession {
    host: String,
    port: u16,
    key_path: PathBuf,
    connect_timeout: Duration,
    auth_timeout: Duration,
    command_timeout: Duration,
    conn: Option<Connection>,
}

impl AdbSession {
    pub fn new(config: &AgentConfig) -> Self {
        Self {
            host: config.device.host.clone(),
            port: config.device.port,
            key_path: config.expanded_key_path(),
            connect_timeout: config.connect_timeout(),
            auth_timeout: config.auth_timeout(),
            command_timeout: config.command_timeout(),
            conn: None,
        }
    }

    fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Runs the handshake on a fresh socket: send CNXN, then answer AUTH
    /// challenges until the device replies with its own CNXN banner.
    ///
    /// The first token challenge is answered with a signature. If the
    /// device challenges again the signature was not recognized, so the
    /// public key goes out instead and the device shows its authorization
    /// dialog. A third challenge means the dialog was declined.
    async fn handshake(
        &self,
        stream: &mut TcpStream,
        keypair: &tvstate_core::auth::KeyPair,
    ) -> Result<(), SessionError> {
        write_message(stream, &AdbMessage::connect()).await?;

        let mut challenges = 0u8;
        loop {
            let (header, payload) = read_message(stream).await?;
            match header.command {
                AdbCommand::Connect => {
                    let banner = String::from_utf8_lossy(&payload);
                    info!(device = %banner.trim_end_matches('\0'), "session established");
                    return Ok(());
                }
                AdbCommand::Auth if header.arg0 == AUTH_TOKEN => {
                    challenges += 1;
                    match challenges {
                        1 => {
                            debug!("signing auth token");
                            let signature = sign_token(keypair, &payload)?;
                            write_message(stream, &AdbMessage::auth_signature(signature)).await?;
                        }
                        2 => {
                            info!("signature not recognized, sending public key (check the TV screen)");
                            write_message(
                                stream,
                                &AdbMessage::auth_rsa_public_key(&keypair.public_key_wire),
                            )
                            .await?;
                        }
                        _ => return Err(SessionError::AuthRejected),
                    }
                }
                other => {
                    return Err(SessionError::Unexpected {
                        phase: "handshake",
                        got: other,
                    })
                }
            }
        }
    }

    /// One full shell exchange: OPEN the service, collect WRTE payloads
    /// (acking each), and stop at CLSE.
    async fn run_shell(conn: &mut Connection, command: &str) -> Result<String, SessionError> {
        let local_id = conn.next_local_id;
        conn.next_local_id = conn.next_local_id.wrapping_add(1).max(1);

        let destination = format!("shell:{command}");
        write_message(&mut conn.stream, &AdbMessage::open(local_id, &destination)).await?;

        let mut remote_id = 0u32;
        let mut output = Vec::new();
        loop {
            let (header, payload) = read_message(&mut conn.stream).await?;
            match header.command {
                AdbCommand::Okay => {
                    remote_id = header.arg0;
                }
                AdbCommand::Write => {
                    remote_id = header.arg0;
                    output.extend_from_slice(&payload);
                    write_message(&mut conn.stream, &AdbMessage::okay(local_id, remote_id)).await?;
                }
                AdbCommand::Close => {
                    write_message(&mut conn.stream, &AdbMessage::close(local_id, remote_id))
                        .await?;
                    return Ok(String::from_utf8_lossy(&output).into_owned());
                }
                other => {
                    return Err(SessionError::Unexpected {
                        phase: "shell",
                        got: other,
                    })
                }
            }
        }
    }
}

#[async_trait]
impl DeviceLink for AdbSession {
    async fn connect(&mut self) -> Result<(), SessionError> {
        self.conn = None;

        // Key generation on first run can take a few seconds; keep it
        // outside the handshake deadline.
        let keypair = load_or_create_keypair(&self.key_path)?;

        let addr = self.addr();
        let mut stream = match timeout(self.connect_timeout, TcpStream::connect(&addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(source)) => return Err(SessionError::ConnectFailed { addr, source }),
            Err(_) => return Err(SessionError::ConnectTimeout { addr }),
        };
        stream.set_nodelay(true)?;

        match timeout(self.auth_timeout, self.handshake(&mut stream, &keypair)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e),
            Err(_) => return Err(SessionError::AuthTimeout),
        }

        self.conn = Some(Connection {
            stream,
            next_local_id: 1,
        });
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.conn.is_some()
    }

    async fn shell(&mut self, command: &str) -> String {
        // Take the connection out so an error path leaves us disconnected.
        let Some(mut conn) = self.conn.take() else {
            return String::new();
        };

        match timeout(self.command_timeout, Self::run_shell(&mut conn, command)).await {
            Ok(Ok(output)) => {
                self.conn = Some(conn);
                output
            }
            Ok(Err(e)) => {
                warn!(command, error = %e, "shell command failed, dropping session");
                String::new()
            }
            Err(_) => {
                warn!(command, "shell command timed out, dropping session");
                String::new()
            }
        }
    }

    async fn close(&mut self) {
        if let Some(mut conn) = self.conn.take() {
            if let Err(e) = conn.stream.shutdown().await {
                debug!(error = %e, "socket shutdown failed during close");
            }
        }
    }
}

// ── Framed I/O helpers ────────────────────────────────────────────────────────

async fn write_message(stream: &mut TcpStream, msg: &AdbMessage) -> Result<(), SessionError> {
    stream.write_all(&encode_message(msg)).await?;
    Ok(())
}

async fn read_message(stream: &mut TcpStream) -> Result<(AdbHeader, Vec<u8>), SessionError> {
    let mut header_buf = [0u8; HEADER_SIZE];
    stream.read_exact(&mut header_buf).await?;
    let header = decode_header(&header_buf)?;

    let mut payload = vec![0u8; header.data_length as usize];
    if !payload.is_empty() {
        stream.read_exact(&mut payload).await?;
    }
    verify_payload(&header, &payload)?;
    Ok((header, payload))
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    fn test_config(port: u16, key_dir: &std::path::Path) -> AgentConfig {
        let mut cfg = AgentConfig::default();
        cfg.device.host = "127.0.0.1".to_string();
        cfg.device.port = port;
        cfg.device.key_path = key_dir.join("adbkey").to_string_lossy().into_owned();
        cfg.device.connect_timeout_secs = 1;
        cfg.device.auth_timeout_secs = 2;
        cfg.device.command_timeout_secs = 1;
        cfg
    }

    async fn read_one(stream: &mut TcpStream) -> (AdbHeader, Vec<u8>) {
        read_message(stream).await.expect("read message")
    }

    #[tokio::test]
    async fn test_connect_fails_when_nothing_listens() {
        let dir = std::env::temp_dir().join("tvstate-session-test-refused");
        std::fs::create_dir_all(&dir).unwrap();
        // Port 1 is unassigned and rejects connections on any sane host.
        let mut session = AdbSession::new(&test_config(1, &dir));

        let result = session.connect().await;
        assert!(matches!(
            result,
            Err(SessionError::ConnectFailed { .. }) | Err(SessionError::ConnectTimeout { .. })
        ));
        assert!(!session.is_connected());
    }

    #[tokio::test]
    async fn test_handshake_completes_against_unauthenticated_peer() {
        // A peer that skips AUTH entirely and answers CNXN with CNXN,
        // like a device with verification disabled.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let dir = std::env::temp_dir().join("tvstate-session-test-noauth");
        std::fs::create_dir_all(&dir).unwrap();

        let peer = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let (header, _) = read_one(&mut stream).await;
            assert_eq!(header.command, AdbCommand::Connect);
            write_message(&mut stream, &AdbMessage::connect()).await.unwrap();
            stream
        });

        let mut session = AdbSession::new(&test_config(port, &dir));
        session.connect().await.expect("handshake");
        assert!(session.is_connected());
        peer.await.unwrap();
    }

    #[tokio::test]
    async fn test_handshake_signs_token_then_succeeds() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let dir = std::env::temp_dir().join("tvstate-session-test-token");
        std::fs::create_dir_all(&dir).unwrap();

        let peer = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let (header, _) = read_one(&mut stream).await;
            assert_eq!(header.command, AdbCommand::Connect);

            let challenge = AdbMessage {
                command: AdbCommand::Auth,
                arg0: AUTH_TOKEN,
                arg1: 0,
                payload: vec![0x5A; 20],
            };
            write_message(&mut stream, &challenge).await.unwrap();

            let (header, signature) = read_one(&mut stream).await;
            assert_eq!(header.command, AdbCommand::Auth);
            assert_eq!(header.arg0, tvstate_core::protocol::AUTH_SIGNATURE);
            assert_eq!(signature.len(), 256, "RSA-2048 signature");

            write_message(&mut stream, &AdbMessage::connect()).await.unwrap();
        });

        let mut session = AdbSession::new(&test_config(port, &dir));
        session.connect().await.expect("handshake with token");
        assert!(session.is_connected());
        peer.await.unwrap();
    }

    #[tokio::test]
    async fn test_third_challenge_is_rejection() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let dir = std::env::temp_dir().join("tvstate-session-test-reject");
        std::fs::create_dir_all(&dir).unwrap();

        let peer = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let _ = read_one(&mut stream).await; // CNXN

            for _ in 0..3 {
                let challenge = AdbMessage {
                    command: AdbCommand::Auth,
                    arg0: AUTH_TOKEN,
                    arg1: 0,
                    payload: vec![0x11; 20],
                };
                write_message(&mut stream, &challenge).await.unwrap();
                let _ = read_one(&mut stream).await; // signature, then pubkey, then nothing
            }
        });

        let mut session = AdbSession::new(&test_config(port, &dir));
        let result = session.connect().await;
        assert!(matches!(result, Err(SessionError::AuthRejected)));
        assert!(!session.is_connected());
        peer.abort();
    }

    #[tokio::test]
    async fn test_shell_collects_write_payloads_until_close() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let dir = std::env::temp_dir().join("tvstate-session-test-shell");
        std::fs::create_dir_all(&dir).unwrap();

        let peer = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let _ = read_one(&mut stream).await; // CNXN
            write_message(&mut stream, &AdbMessage::connect()).await.unwrap();

            let (header, destination) = read_one(&mut stream).await;
            assert_eq!(header.command, AdbCommand::Open);
            assert_eq!(destination, b"shell:echo hi\0");
            let local = header.arg0;

            write_message(&mut stream, &AdbMessage::okay(7, local)).await.unwrap();
            let chunk = AdbMessage {
                command: AdbCommand::Write,
                arg0: 7,
                arg1: local,
                payload: b"hi\n".to_vec(),
            };
            write_message(&mut stream, &chunk).await.unwrap();
            let (ack, _) = read_one(&mut stream).await;
            assert_eq!(ack.command, AdbCommand::Okay);

            write_message(&mut stream, &AdbMessage::close(7, local)).await.unwrap();
            let (fin, _) = read_one(&mut stream).await;
            assert_eq!(fin.command, AdbCommand::Close);
        });

        let mut session = AdbSession::new(&test_config(port, &dir));
        session.connect().await.expect("handshake");
        let output = session.shell("echo hi").await;
        assert_eq!(output, "hi\n");
        assert!(session.is_connected());
        peer.await.unwrap();
    }

    #[tokio::test]
    async fn test_shell_on_dropped_peer_returns_empty_and_disconnects() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let dir = std::env::temp_dir().join("tvstate-session-test-drop");
        std::fs::create_dir_all(&dir).unwrap();

        let peer = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let _ = read_one(&mut stream).await;
            write_message(&mut stream, &AdbMessage::connect()).await.unwrap();
            // Hang up before the first shell command.
            drop(stream);
        });

        let mut session = AdbSession::new(&test_config(port, &dir));
        session.connect().await.expect("handshake");
        peer.await.unwrap();

        let output = session.shell("dumpsys window").await;
        assert_eq!(output, "");
        assert!(!session.is_connected());
    }

    #[tokio::test]
    async fn test_shell_without_connection_returns_empty() {
        let dir = std::env::temp_dir().join("tvstate-session-test-noconn");
        std::fs::create_dir_all(&dir).unwrap();
        let mut session = AdbSession::new(&test_config(1, &dir));
        assert_eq!(session.shell("echo hi").await, "");
    }
}
