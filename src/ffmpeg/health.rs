//! Health scan via FFmpeg decode-to-null.
//!
//! A clean file decodes without messages at `-v error`; damaged streams produce
//! one or more error lines. The scan is bounded by a long timeout and expiry is
//! its own outcome rather than a failure.

use std::path::Path;
use std::time::Duration;

use serde::Serialize;

use super::builder::build_health_args;
use super::process::run_captured;
use crate::error::AppError;

/// Characters of collected error output kept in [`HealthReport::render`].
const RENDERED_ERRORS_LIMIT: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum HealthStatus {
    Healthy,
    MinorIssues,
    ModerateCorruption,
    SevereCorruption,
    Timeout,
}

impl HealthStatus {
    pub fn from_error_count(count: usize) -> Self {
        match count {
            0 => Self::Healthy,
            1..5 => Self::MinorIssues,
            5..20 => Self::ModerateCorruption,
            _ => Self::SevereCorruption,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub status: HealthStatus,
    /// None when the scan timed out.
    pub error_count: Option<usize>,
    pub errors: String,
}

impl HealthReport {
    pub fn from_stderr(stderr: &str) -> Self {
        let error_count = count_errors(stderr);
        Self {
            status: HealthStatus::from_error_count(error_count),
            error_count: Some(error_count),
            errors: stderr.to_string(),
        }
    }

    pub fn timed_out() -> Self {
        Self {
            status: HealthStatus::Timeout,
            error_count: None,
            errors: String::new(),
        }
    }

    pub fn summary(&self) -> String {
        let count = self.error_count.unwrap_or(0);
        match self.status {
            HealthStatus::Healthy => "Healthy: no errors detected".to_string(),
            HealthStatus::MinorIssues => format!("Minor issues: {} errors found", count),
            HealthStatus::ModerateCorruption => {
                format!("Moderate corruption: {} errors found", count)
            }
            HealthStatus::SevereCorruption => {
                format!("Severe corruption: {} errors found", count)
            }
            HealthStatus::Timeout => "Scan exceeded the time limit".to_string(),
        }
    }

    /// Human-readable report: summary, then the start of the error output.
    pub fn render(&self) -> String {
        let mut out = self.summary();
        let errors = self.errors.trim();
        if !errors.is_empty() {
            out.push_str("\n\nErrors:\n");
            let shown: String = errors.chars().take(RENDERED_ERRORS_LIMIT).collect();
            out.push_str(&shown);
            if errors.chars().count() > RENDERED_ERRORS_LIMIT {
                out.push('…');
            }
        }
        out
    }
}

fn count_errors(stderr: &str) -> usize {
    stderr.to_lowercase().matches("error").count()
}

/// Decode `path` fully and classify the errors FFmpeg reports.
pub fn scan_health(ffmpeg: &Path, path: &Path, timeout: Duration) -> Result<HealthReport, AppError> {
    log::info!(
        target: "video_toolbox::ffmpeg::health",
        "Health scan: {} (timeout {:?})",
        path.display(),
        timeout
    );
    let args = build_health_args(path);
    match run_captured(ffmpeg, &args, timeout, "health scan") {
        Ok(output) => {
            let mut report = HealthReport::from_stderr(&output.stderr);
            // A decoder that exits non-zero without printing anything still failed.
            if !output.status.success() && report.error_count == Some(0) {
                report.status = HealthStatus::MinorIssues;
                report.error_count = Some(1);
                report.errors = format!(
                    "ffmpeg exited with code {}",
                    output.status.code().unwrap_or(-1)
                );
            }
            log::info!(
                target: "video_toolbox::ffmpeg::health",
                "Health scan finished: {} -> {:?}",
                path.display(),
                report.status
            );
            Ok(report)
        }
        Err(AppError::Timeout { .. }) => Ok(HealthReport::timed_out()),
        Err(e) => Err(e),
    }
}
