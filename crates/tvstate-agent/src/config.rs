//! TOML configuration for the agent.
//!
//! Loaded from the path given on the command line (default `tvstate.toml`
//! in the working directory). Every field carries a serde default so a
//! partial file works, and a missing file falls back to defaults entirely —
//! useful on first run, though in practice `[device].host` always needs to
//! be set.
//!
//! Configuration mistakes are the only fatal error class in the agent:
//! a bad poll interval or timeout fails validation at startup, while every
//! remote-device condition at runtime is retried forever.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error type for configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// A field value is syntactically valid but unusable.
    #[error("invalid config: {0}")]
    Invalid(String),
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level agent configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct AgentConfig {
    #[serde(default)]
    pub device: DeviceConfig,
    #[serde(default)]
    pub poll: PollConfig,
    #[serde(default)]
    pub app: TargetAppConfig,
    #[serde(default)]
    pub agent: RuntimeConfig,
}

/// Where the set-top box lives and how to authenticate to it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeviceConfig {
    /// Device hostname or IP address.
    #[serde(default = "default_host")]
    pub host: String,
    /// Debug-bridge TCP port.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Path to the RSA private key; the public half lives at `<key_path>.pub`.
    /// A leading `~` expands to the home directory.
    #[serde(default = "default_key_path")]
    pub key_path: String,
    /// TCP connection establishment timeout.
    #[serde(default = "default_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Budget for the whole authentication handshake, including the user
    /// accepting the on-screen dialog on first contact.
    #[serde(default = "default_timeout_secs")]
    pub auth_timeout_secs: u64,
    /// Per-command timeout for shell executions.
    #[serde(default = "default_timeout_secs")]
    pub command_timeout_secs: u64,
}

/// Polling cadence and entity naming.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PollConfig {
    /// Seconds between the end of one tick and the start of the next.
    #[serde(default = "default_poll_interval")]
    pub interval_secs: u64,
    /// Prefix for all published entity identifiers.
    #[serde(default = "default_entity_prefix")]
    pub entity_prefix: String,
}

/// Identity of the application being watched.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TargetAppConfig {
    /// Package identifier looked for on the focused-window line.
    #[serde(default = "default_package")]
    pub package: String,
    /// Exact header line anchoring the app's block in the media-session dump.
    #[serde(default = "default_session_header")]
    pub session_header: String,
}

/// Agent-wide runtime settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RuntimeConfig {
    /// `tracing` log level: `"error"`, `"warn"`, `"info"`, `"debug"`, `"trace"`.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    5555
}
fn default_key_path() -> String {
    "~/.config/tvstate/adbkey".to_string()
}
fn default_timeout_secs() -> u64 {
    10
}
fn default_poll_interval() -> u64 {
    5
}
fn default_entity_prefix() -> String {
    "firetv_twitch".to_string()
}
fn default_package() -> String {
    "tv.twitch.android.viewer".to_string()
}
fn default_session_header() -> String {
    "TwitchMediaSession tv.twitch.android.viewer/TwitchMediaSession".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            key_path: default_key_path(),
            connect_timeout_secs: default_timeout_secs(),
            auth_timeout_secs: default_timeout_secs(),
            command_timeout_secs: default_timeout_secs(),
        }
    }
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_poll_interval(),
            entity_prefix: default_entity_prefix(),
        }
    }
}

impl Default for TargetAppConfig {
    fn default() -> Self {
        Self {
            package: default_package(),
            session_header: default_session_header(),
        }
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

// ── Loading and validation ────────────────────────────────────────────────────

impl AgentConfig {
    /// Loads the configuration from `path`, returning defaults if the file
    /// does not yet exist.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] for file-system errors other than
    /// "not found", [`ConfigError::Parse`] for malformed TOML, and
    /// [`ConfigError::Invalid`] when validation fails.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let cfg = match std::fs::read_to_string(path) {
            Ok(content) => toml::from_str(&content)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Self::default(),
            Err(source) => {
                return Err(ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        cfg.validate()?;
        Ok(cfg)
    }

    /// Checks field values that TOML typing alone cannot enforce.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.poll.interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "poll.interval_secs must be at least 1".to_string(),
            ));
        }
        if self.device.port == 0 {
            return Err(ConfigError::Invalid(
                "device.port must be non-zero".to_string(),
            ));
        }
        for (name, value) in [
            ("device.connect_timeout_secs", self.device.connect_timeout_secs),
            ("device.auth_timeout_secs", self.device.auth_timeout_secs),
            ("device.command_timeout_secs", self.device.command_timeout_secs),
        ] {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{name} must be at least 1")));
            }
        }
        if self.poll.entity_prefix.is_empty() {
            return Err(ConfigError::Invalid(
                "poll.entity_prefix must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// The key path with a leading `~` expanded to `$HOME`.
    pub fn expanded_key_path(&self) -> PathBuf {
        expand_home(&self.device.key_path)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.device.connect_timeout_secs)
    }

    pub fn auth_timeout(&self) -> Duration {
        Duration::from_secs(self.device.auth_timeout_secs)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.device.command_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll.interval_secs)
    }
}

/// Expands a leading `~/` (or bare `~`) to the home directory. Paths without
/// a tilde, and tildes when `$HOME` is unset, pass through unchanged.
fn expand_home(path: &str) -> PathBuf {
    if path == "~" || path.starts_with("~/") {
        if let Some(home) = std::env::var_os("HOME") {
            let mut expanded = PathBuf::from(home);
            if let Some(rest) = path.strip_prefix("~/") {
                expanded.push(rest);
            }
            return expanded;
        }
    }
    PathBuf::from(path)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
