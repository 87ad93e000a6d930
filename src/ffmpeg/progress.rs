//! Progress scraping for FFmpeg's line-oriented diagnostic output.
//!
//! Only the `time=HH:MM:SS.fraction` token is trusted. It appears both in the
//! `-progress` key=value block (`out_time=...`) and in the classic stats line
//! (`frame=.. time=.. bitrate=..`); whichever comes first on a line wins.

use regex::Regex;
use std::sync::LazyLock;

static TIME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"time=(\d+):(\d{1,2}):(\d{1,2}(?:\.\d+)?)").expect("invalid time regex")
});

/// Extract elapsed media time in seconds from one diagnostic line.
pub fn parse_elapsed_seconds(line: &str) -> Option<f64> {
    let caps = TIME_RE.captures(line)?;
    let hours: f64 = caps[1].parse().ok()?;
    let minutes: f64 = caps[2].parse().ok()?;
    let seconds: f64 = caps[3].parse().ok()?;
    if minutes >= 60.0 || seconds >= 60.0 {
        return None;
    }
    Some(hours * 3600.0 + minutes * 60.0 + seconds)
}

/// Parse a progress percentage (0-100) from a line, given the total duration.
/// Returns None for "no update": no timestamp, malformed timestamp, or duration <= 0.
pub fn parse_progress_percent(line: &str, duration_secs: f64) -> Option<u8> {
    if duration_secs.is_nan() || duration_secs <= 0.0 {
        return None;
    }
    let elapsed = parse_elapsed_seconds(line)?;
    let percent = (100.0 * elapsed / duration_secs).floor();
    Some(percent.clamp(0.0, 100.0) as u8)
}
