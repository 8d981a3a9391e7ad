//! App-focus extraction from the window-manager dump.

/// Marker the window manager prints on the line naming the focused window.
/// Stable across device firmware revisions even when surrounding content
/// drifts.
const FOCUS_MARKER: &str = "mCurrentFocus=";

/// Returns true iff any single line of the window-manager dump contains both
/// the target package identifier and the focus marker.
///
/// Both substrings must co-occur on the *same* line. The package name alone
/// appears all over the dump (task records, surfaces, intent history), so a
/// whole-document scan would report focus whenever the app is merely alive in
/// the background.
pub fn parse_app_focus(dump: &str, package: &str) -> bool {
    if package.is_empty() {
        return false;
    }
    dump.lines()
        .any(|line| line.contains(package) && line.contains(FOCUS_MARKER))
}
