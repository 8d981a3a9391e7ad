//! Pure parsers that derive typed signals from device diagnostic output.
//!
//! Three independent signals are extracted, each from its own diagnostic
//! report:
//!
//! - app focus, from the window-manager dump ([`parse_app_focus`]);
//! - playback state, from the media-session dump ([`parse_playback_state`]);
//! - active channel, from the XML UI-hierarchy dump
//!   ([`channel_before_profile_link`]).
//!
//! Everything here is stateless and operates on borrowed strings. A pattern
//! that does not match is a "no match" result, never an error: the dumps
//! drift between device firmware revisions and unrelated lines must not
//! break extraction.

pub mod channel;
pub mod focus;
pub mod playback;

pub use channel::channel_before_profile_link;
pub use focus::parse_app_focus;
pub use playback::parse_playback_state;

/// Media playback state as reported by the device's session dump.
///
/// The numeric codes are defined by the remote device, not by tvstate.
/// Codes outside the observed set pass through as [`PlaybackState::Other`]
/// rather than being rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    /// Code 1 – stopped, idle, or sitting in a menu.
    Idle,
    /// Code 3 – actively playing media.
    Playing,
    /// Code 6 – transitioning between streams (observed, undocumented).
    Transitioning,
    /// Any other code the device reports.
    Other(u32),
}

impl PlaybackState {
    /// Maps a raw device code to a state.
    pub fn from_code(code: u32) -> Self {
        match code {
            1 => PlaybackState::Idle,
            3 => PlaybackState::Playing,
            6 => PlaybackState::Transitioning,
            other => PlaybackState::Other(other),
        }
    }

    /// The raw device code for this state.
    pub fn code(self) -> u32 {
        match self {
            PlaybackState::Idle => 1,
            PlaybackState::Playing => 3,
            PlaybackState::Transitioning => 6,
            PlaybackState::Other(code) => code,
        }
    }

    /// True only for the playing state; everything else, including
    /// unrecognized codes, counts as not playing.
    pub fn is_playing(self) -> bool {
        matches!(self, PlaybackState::Playing)
    }

    /// Human-readable meaning, published as an entity attribute.
    pub fn meaning(self) -> &'static str {
        match self {
            PlaybackState::Idle => "stopped/idle/menu",
            PlaybackState::Playing => "playing",
            PlaybackState::Transitioning => "transition/unknown (observed)",
            PlaybackState::Other(_) => "unrecognized",
        }
    }
}
