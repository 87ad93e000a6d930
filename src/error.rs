//! App error type for the orchestration core. Implements Display and Serialize for the sidecar.

use crate::ffmpeg::parse_ffmpeg_error;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    FfmpegNotFound(String),

    /// Bad or missing parameters. Raised before any process is launched.
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("Failed to start {0}")]
    Launch(String),

    #[error("Probe failed: {0}")]
    Probe(String),

    #[error("{operation} timed out after {seconds}s")]
    Timeout { operation: String, seconds: u64 },

    #[error("FFmpeg failed (code {code}): {stderr}")]
    ProcessFailed { code: i32, stderr: String },

    #[error("Filesystem error: {0}")]
    Filesystem(String),

    #[error("Cancelled")]
    Cancelled,
}

impl AppError {
    pub fn cancelled() -> Self {
        Self::Cancelled
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub fn launch(message: impl Into<String>) -> Self {
        Self::Launch(message.into())
    }

    pub fn probe(message: impl Into<String>) -> Self {
        Self::Probe(message.into())
    }

    pub fn filesystem(message: impl Into<String>) -> Self {
        Self::Filesystem(message.into())
    }

    pub fn process_failed(code: i32, stderr: impl Into<String>) -> Self {
        Self::ProcessFailed {
            code,
            stderr: stderr.into(),
        }
    }

    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Short human-readable status line for job outcome events.
    pub fn summary(&self) -> String {
        match self {
            AppError::ProcessFailed { code, stderr } => {
                parse_ffmpeg_error(stderr, Some(*code)).summary
            }
            other => other.to_string(),
        }
    }
}

impl serde::Serialize for AppError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        match self {
            AppError::ProcessFailed { code, stderr } => {
                let payload = parse_ffmpeg_error(stderr, Some(*code));
                let json =
                    serde_json::json!({ "summary": payload.summary, "detail": payload.detail });
                serializer.serialize_str(&json.to_string())
            }
            _ => serializer.serialize_str(&self.to_string()),
        }
    }
}
