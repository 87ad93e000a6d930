//! Map FFmpeg exit codes to user-friendly messages.
//!
//! Exit codes are from ffmpeg.c: 1 (general), 69 (rate exceeded),
//! 123 (hard exit), 255 (signal). -1 is used when the process ended without
//! an exit code (killed by a signal). Stderr is kept as detail for debugging.

use serde::Serialize;

/// Payload for job error events. The UI shows summary; detail is expandable.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FfmpegErrorPayload {
    pub summary: String,
    pub detail: String,
}

/// Maps FFmpeg exit code to a short user-facing summary. Stderr is passed through as detail.
pub fn parse_ffmpeg_error(stderr: &str, exit_code: Option<i32>) -> FfmpegErrorPayload {
    let summary = match exit_code {
        Some(code) => match known_exit_code_summary(code) {
            Some(msg) => msg,
            None => summary_for_unknown_code(code, stderr),
        },
        None => fallback_summary(stderr),
    };
    let detail = stderr.trim().to_string();
    FfmpegErrorPayload { summary, detail }
}

fn known_exit_code_summary(code: i32) -> Option<String> {
    match code {
        -1 => Some("FFmpeg was terminated before it reported an exit code.".into()),
        1 => Some("FFmpeg failed.".into()),
        69 => Some("Encoding rate limit exceeded.".into()),
        123 | 255 => Some("Encoding was stopped.".into()),
        _ => None,
    }
}

const ELLIPSIS: &str = "…";

/// Last non-empty line of stderr, truncated to max_len bytes. FFmpeg prints the
/// fatal reason last, after the banner and stream listing.
fn last_line_truncated(stderr: &str, max_len: usize) -> String {
    let last = stderr
        .lines()
        .rev()
        .find(|l| !l.trim().is_empty())
        .map(|l| l.trim())
        .unwrap_or(stderr);
    if last.len() <= max_len {
        return last.to_string();
    }
    let mut cut = max_len.saturating_sub(ELLIPSIS.len());
    while !last.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}{}", &last[..cut], ELLIPSIS)
}

fn summary_for_unknown_code(code: i32, stderr: &str) -> String {
    if stderr.trim().is_empty() {
        format!("FFmpeg failed (exit code {}).", code)
    } else {
        format!(
            "FFmpeg failed (exit code {}): {}",
            code,
            last_line_truncated(stderr, 120)
        )
    }
}

fn fallback_summary(stderr: &str) -> String {
    last_line_truncated(stderr, 120)
}
