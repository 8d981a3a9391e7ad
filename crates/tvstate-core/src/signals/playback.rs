//! Playback-state extraction from the media-session dump.
//!
//! The dump lists every media session on the device. We anchor on the exact
//! header line identifying the target app's session and only accept a
//! `PlaybackState { ... state=N ... }` record within a bounded window below
//! it. The window keeps a dead session's stale state record, or another
//! app's session further down the dump, from being misattributed.

use std::sync::OnceLock;

use regex::Regex;

/// How many lines below (and including) the header line a state record may
/// appear. Chosen against real dumps: the state line sits within the first
/// dozen lines of its session block, while unrelated sessions start well
/// past forty.
const WINDOW_LINES: usize = 40;

fn state_record_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"PlaybackState\s*\{[^}]*\bstate\s*=\s*(\d+)\b").expect("static pattern")
    })
}

/// Extracts the playback-state code for the session identified by `header`.
///
/// Fast path: find the exact header string and scan the next
/// [`WINDOW_LINES`] lines for the first state record. If the first header
/// occurrence has no state record in its window, a single bounded regex
/// scan over the whole text picks up any later occurrence that does. The
/// regex window is bounded identically, so a state record appearing only
/// beyond the window is never matched.
///
/// Returns `None` when the header is absent, no state record falls inside a
/// window, or the dump is empty — "no state known", not an error.
pub fn parse_playback_state(dump: &str, header: &str) -> Option<u32> {
    if dump.is_empty() || header.is_empty() {
        return None;
    }

    // 1) fast path: exact header anchor (cheap and reliable)
    if let Some(idx) = dump.find(header) {
        for line in dump[idx..].lines().take(WINDOW_LINES) {
            if let Some(caps) = state_record_re().captures(line) {
                return caps[1].parse().ok();
            }
        }
        // fall through if not seen within the window
    }

    // 2) fallback: header followed by up to WINDOW_LINES-1 further lines,
    //    then the state record. Leftmost-match semantics try each header
    //    occurrence in turn, so a later session block with a state record in
    //    range still matches after the first block fails.
    let pattern = format!(
        r"{}(?:[^\n]*\n){{0,{}}}?[^\n]*?PlaybackState\s*\{{[^}}]*\bstate\s*=\s*(\d+)\b",
        regex::escape(header),
        WINDOW_LINES - 1,
    );
    // Compiled per call: the header is configuration, and this path only
    // runs when the fast path has already failed.
    let re = Regex::new(&pattern).ok()?;
    re.captures(dump).and_then(|caps| caps[1].parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str = "TwitchMediaSession tv.twitch.android.viewer/TwitchMediaSession";

    #[test]
    fn test_state_shortly_after_header_is_extracted() {
        let dump = format!(
            "MEDIA SESSION SERVICE (dumpsys media_session)\n\
             {HEADER}\n\
             foo\n\
             PlaybackState {{token=1 state=3 extra}}\n\
             more"
        );
        assert_eq!(parse_playback_state(&dump, HEADER), Some(3));
    }

    #[test]
    fn test_first_state_record_in_window_wins() {
        let dump = format!(
            "{HEADER}\n\
             PlaybackState {{state=1}}\n\
             PlaybackState {{state=3}}"
        );
        assert_eq!(parse_playback_state(&dump, HEADER), Some(1));
    }

    #[test]
    fn test_state_beyond_window_is_ignored() {
        // Header, then 40 unrelated lines, then the state record: out of range
        // for both the fast path and the fallback.
        let mut dump = format!("{HEADER}\n");
        for i in 0..WINDOW_LINES {
            dump.push_str(&format!("filler line {i}\n"));
        }
        dump.push_str("PlaybackState {state=3}\n");
        assert_eq!(parse_playback_state(&dump, HEADER), None);
    }

    #[test]
    fn test_state_on_last_window_line_is_found() {
        // Header line is line 0; a record on line WINDOW_LINES-1 is in range.
        let mut dump = format!("{HEADER}\n");
        for i in 0..WINDOW_LINES - 2 {
            dump.push_str(&format!("filler line {i}\n"));
        }
        dump.push_str("PlaybackState {state=6}\n");
        assert_eq!(parse_playback_state(&dump, HEADER), Some(6));
    }

    #[test]
    fn test_header_absent_returns_none() {
        let dump = "PlaybackState {state=3}\nno header anywhere";
        assert_eq!(parse_playback_state(dump, HEADER), None);
    }

    #[test]
    fn test_empty_dump_returns_none() {
        assert_eq!(parse_playback_state("", HEADER), None);
    }

    #[test]
    fn test_fallback_finds_later_header_occurrence() {
        // First header block has no state record in range; a second block
        // further down does. The fast path fails on the first occurrence,
        // the bounded regex scan picks up the second.
        let mut dump = format!("{HEADER}\n");
        for i in 0..WINDOW_LINES + 5 {
            dump.push_str(&format!("filler line {i}\n"));
        }
        dump.push_str(&format!("{HEADER}\nPlaybackState {{state=3}}\n"));
        assert_eq!(parse_playback_state(&dump, HEADER), Some(3));
    }

    #[test]
    fn test_state_record_from_unrelated_session_is_not_matched() {
        // A state record with no target header above it anywhere.
        let dump = "SomeOtherSession com.example/OtherSession\n\
                    PlaybackState {state=3}";
        assert_eq!(parse_playback_state(dump, HEADER), None);
    }

    #[test]
    fn test_header_with_regex_metacharacters_is_escaped_in_fallback() {
        // Header contains '/' and '.' which must be treated literally. Force
        // the fallback by keeping the state out of the first window.
        let header = "Session (a.b+c)/Session";
        let mut dump = format!("{header}\n");
        for i in 0..WINDOW_LINES + 1 {
            dump.push_str(&format!("filler {i}\n"));
        }
        dump.push_str(&format!("{header}\nPlaybackState {{state=1}}\n"));
        assert_eq!(parse_playback_state(&dump, header), Some(1));
    }

    #[test]
    fn test_state_with_whitespace_variants_is_extracted() {
        let dump = format!("{HEADER}\nPlaybackState  {{ position=0, state = 3 , speed=1.0 }}");
        assert_eq!(parse_playback_state(&dump, HEADER), Some(3));
    }
}
