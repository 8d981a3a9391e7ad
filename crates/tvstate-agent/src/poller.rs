//! The polling loop: one tick per interval, three signals per tick.
//!
//! Each tick connects if needed, then samples the focused window, the
//! media-session playback state, and (only while the app is focused and
//! playing) the on-screen channel name. Entity states go to the sink every
//! tick; change events fire only when a value differs from the last tick.
//!
//! Resilience rule: any shell command that fails mid-tick drops the
//! connection, aborts the rest of the tick, and leaves every signal at its
//! previous value. The next tick starts with a reconnect. Stale values are
//! preferred over flapping to "unknown" during a transient network blip.

use serde_json::json;
use tracing::{debug, info, warn};

use tvstate_core::signals::{
    channel_before_profile_link, parse_app_focus, parse_playback_state, PlaybackState,
};

use crate::config::AgentConfig;
use crate::publish::{now_rfc3339, StateSink};
use crate::session::DeviceLink;

/// Shell command reading the window manager state.
const CMD_WINDOW_DUMP: &str = "dumpsys window";
/// Shell command reading active media sessions.
const CMD_MEDIA_DUMP: &str = "dumpsys media_session";
/// On-device path the UI snapshot is written to before being read back.
const UI_DUMP_PATH: &str = "/sdcard/window_dump.xml";

/// Settings the loop needs from the configuration.
#[derive(Debug, Clone)]
pub struct PollOptions {
    pub entity_prefix: String,
    pub package: String,
    pub session_header: String,
    pub host: String,
}

impl From<&AgentConfig> for PollOptions {
    fn from(cfg: &AgentConfig) -> Self {
        Self {
            entity_prefix: cfg.poll.entity_prefix.clone(),
            package: cfg.app.package.clone(),
            session_header: cfg.app.session_header.clone(),
            host: cfg.device.host.clone(),
        }
    }
}

/// Last published value of each signal, for change detection.
///
/// Fields start as `None` ("never observed"), so the first successful tick
/// emits a change event for every signal: the initial-state announcement.
/// The channel's observed value is itself optional (`None` = unknown), so
/// its history wraps that in a second `Option` to keep "never observed"
/// distinct from "observed as unknown".
#[derive(Debug, Default)]
struct SignalHistory {
    focus: Option<bool>,
    playback: Option<u32>,
    channel: Option<Option<String>>,
}

/// The agent's main loop body. Generic over the device link and the sink
/// so tests can drive a scripted fake through full tick sequences.
pub struct PollLoop<L: DeviceLink, S: StateSink> {
    link: L,
    sink: S,
    options: PollOptions,
    history: SignalHistory,
}

impl<L: DeviceLink, S: StateSink> PollLoop<L, S> {
    pub fn new(link: L, sink: S, options: PollOptions) -> Self {
        Self {
            link,
            sink,
            options,
            history: SignalHistory::default(),
        }
    }

    /// Runs one poll cycle. Never returns an error: every failure mode is
    /// logged and absorbed so the caller's loop just keeps ticking.
    pub async fn tick(&mut self) {
        if !self.link.is_connected() {
            match self.link.connect().await {
                Ok(()) => info!(host = %self.options.host, "connected to device"),
                Err(e) => {
                    warn!(host = %self.options.host, error = %e, "connect failed, will retry next tick");
                    return;
                }
            }
        }

        let window_dump = self.link.shell(CMD_WINDOW_DUMP).await;
        if !self.link.is_connected() {
            warn!("lost connection during window poll");
            return;
        }
        let focused = parse_app_focus(&window_dump, &self.options.package);
        self.report_focus(focused);

        let media_dump = self.link.shell(CMD_MEDIA_DUMP).await;
        if !self.link.is_connected() {
            warn!("lost connection during media-session poll");
            return;
        }
        let code = parse_playback_state(&media_dump, &self.options.session_header);
        self.report_playback(code);

        // The UI snapshot is expensive (the device serializes its whole
        // view tree), so only take it when a channel can plausibly be on
        // screen: app focused and actively playing, as of this tick.
        let playing = code.map(|c| PlaybackState::from_code(c).is_playing()).unwrap_or(false);
        let channel = if focused && playing {
            match self.fetch_ui_dump().await {
                Some(xml) => channel_before_profile_link(&xml),
                None => {
                    if !self.link.is_connected() {
                        warn!("lost connection during UI snapshot");
                        return;
                    }
                    None
                }
            }
        } else {
            None
        };
        self.report_channel(channel);
    }

    /// Closes the device connection. Called once on shutdown.
    pub async fn shutdown(&mut self) {
        self.link.close().await;
    }

    /// Takes a UI snapshot on the device and reads it back.
    ///
    /// Returns `None` when either command fails or the read-back does not
    /// look like a hierarchy document (`uiautomator` prints its error
    /// messages to stdout, so a bare non-empty check is not enough).
    async fn fetch_ui_dump(&mut self) -> Option<String> {
        let dump_cmd = format!("uiautomator dump --compressed {UI_DUMP_PATH} 2>&1");
        let status = self.link.shell(&dump_cmd).await;
        if !self.link.is_connected() {
            return None;
        }
        // The tool always prints something (a success banner or an error);
        // silence means the dump never ran, so skip the read-back entirely.
        if status.is_empty() {
            warn!("uiautomator dump produced no output");
            return None;
        }
        // The tool misspells "hierarchy" in its own success banner, so
        // match loosely and let the read-back check decide.
        if !status.contains("dumped to") {
            debug!(output = %status.trim(), "uiautomator dump did not confirm a snapshot");
        }

        let xml = self.link.shell(&format!("cat {UI_DUMP_PATH}")).await;
        if !self.link.is_connected() {
            return None;
        }
        if !xml.contains("<hierarchy") {
            warn!("UI snapshot read-back is not a hierarchy document");
            return None;
        }
        Some(xml)
    }

    // ── Per-signal reporting ──────────────────────────────────────────────────

    fn report_focus(&mut self, focused: bool) {
        let entity_id = format!("binary_sensor.{}_is_focused", self.options.entity_prefix);
        self.sink.publish(
            &entity_id,
            on_off(focused),
            json!({
                "friendly_name": "App focused",
                "source": "dumpsys window",
                "package": self.options.package,
                "device": self.options.host,
                "updated": now_rfc3339(),
            }),
        );

        if self.history.focus != Some(focused) {
            self.sink.emit_event(
                "tvstate_focus_changed",
                json!({
                    "entity_id": entity_id,
                    "host": self.options.host,
                    "from": self.history.focus,
                    "to": focused,
                }),
            );
            self.history.focus = Some(focused);
        }
    }

    fn report_playback(&mut self, code: Option<u32>) {
        let state = code.map(PlaybackState::from_code);
        let entity_id = format!("sensor.{}_playback_state", self.options.entity_prefix);
        let state_str = match code {
            Some(c) => c.to_string(),
            None => "unknown".to_string(),
        };
        self.sink.publish(
            &entity_id,
            &state_str,
            json!({
                "friendly_name": "Playback state",
                "meaning": state.map(|s| s.meaning()),
                "source": "dumpsys media_session",
                "device": self.options.host,
                "updated": now_rfc3339(),
            }),
        );

        let playing = state.map(|s| s.is_playing()).unwrap_or(false);
        self.sink.publish(
            &format!("binary_sensor.{}_playing", self.options.entity_prefix),
            on_off(playing),
            json!({
                "friendly_name": "Playing",
                "source": "dumpsys media_session",
                "device": self.options.host,
                "updated": now_rfc3339(),
            }),
        );

        if self.history.playback != code {
            self.sink.emit_event(
                "tvstate_playback_changed",
                json!({
                    "entity_id": entity_id,
                    "host": self.options.host,
                    "from_code": self.history.playback,
                    "to_code": code,
                    "playing": playing,
                }),
            );
            self.history.playback = code;
        }
    }

    fn report_channel(&mut self, channel: Option<String>) {
        let entity_id = format!("sensor.{}_playback_channel", self.options.entity_prefix);
        let state_str = channel.as_deref().unwrap_or("unknown");
        self.sink.publish(
            &entity_id,
            state_str,
            json!({
                "friendly_name": "Playback channel",
                "source": "uiautomator dump",
                "device": self.options.host,
                "updated": now_rfc3339(),
            }),
        );

        if self.history.channel.as_ref() != Some(&channel) {
            self.sink.emit_event(
                "tvstate_channel_changed",
                json!({
                    "entity_id": entity_id,
                    "host": self.options.host,
                    "from": self.history.channel.clone().flatten(),
                    "to": channel,
                }),
            );
            self.history.channel = Some(channel);
        }
    }
}

fn on_off(value: bool) -> &'static str {
    if value {
        "on"
    } else {
        "off"
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
