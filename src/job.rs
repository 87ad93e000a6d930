//! Job model: what to run (`JobSpec`) and where it stands (`Job`).

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::codec;
use crate::error::AppError;
use crate::settings::{DEFAULT_AUDIO_BITRATE_KBPS, Settings};

static NEXT_JOB_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub u64);

impl JobId {
    pub fn next() -> Self {
        Self(NEXT_JOB_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "job-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Whether the lifecycle allows moving from `self` to `to`.
    pub fn can_transition_to(self, to: JobStatus) -> bool {
        use JobStatus::*;
        match (self, to) {
            (Pending, Running | Failed | Cancelled) => true,
            (Running, Paused | Completed | Failed | Cancelled) => true,
            (Paused, Running | Failed | Cancelled) => true,
            _ => false,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Audio formats accepted by [`Operation::ExtractAudio`].
pub const AUDIO_FORMATS: &[&str] = &["mp3", "aac", "m4a", "wav", "flac", "ogg", "opus"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Operation {
    Convert,
    CompressToSize {
        target_size_mb: f64,
    },
    CompressByPercent {
        percent: u32,
    },
    ChangeResolution {
        width: u32,
        #[serde(default)]
        height: Option<u32>,
        #[serde(default = "default_true")]
        keep_aspect: bool,
        /// Re-encode audio at the job's audio bitrate instead of copying it.
        #[serde(default)]
        reencode_audio: bool,
    },
    Join,
    ExtractAudio {
        format: String,
    },
    AddSubtitle {
        #[serde(default)]
        subtitle_path: Option<PathBuf>,
    },
    BurnSubtitle {
        #[serde(default)]
        subtitle_path: Option<PathBuf>,
    },
    ExtractSubtitle {
        stream_index: u32,
    },
    Repair,
}

fn default_true() -> bool {
    true
}

impl Operation {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Convert => "convert",
            Self::CompressToSize { .. } => "compressToSize",
            Self::CompressByPercent { .. } => "compressByPercent",
            Self::ChangeResolution { .. } => "changeResolution",
            Self::Join => "join",
            Self::ExtractAudio { .. } => "extractAudio",
            Self::AddSubtitle { .. } => "addSubtitle",
            Self::BurnSubtitle { .. } => "burnSubtitle",
            Self::ExtractSubtitle { .. } => "extractSubtitle",
            Self::Repair => "repair",
        }
    }

    /// True when the video stream goes through the selected encoder.
    pub fn encodes_video(&self) -> bool {
        !matches!(
            self,
            Self::ExtractAudio { .. } | Self::ExtractSubtitle { .. } | Self::Repair
        )
    }

    /// Re-encoding operations can be suspended; stream copies are short and are not.
    pub fn is_pausable(&self) -> bool {
        !matches!(self, Self::ExtractSubtitle { .. } | Self::Repair)
    }

    /// Whether the command cannot be built without probed metadata.
    pub fn requires_probe(&self) -> bool {
        matches!(
            self,
            Self::CompressToSize { .. } | Self::CompressByPercent { .. } | Self::Join
        )
    }

    /// File extension of the output when none is given explicitly.
    pub fn default_extension(&self, container: &str) -> String {
        match self {
            Self::ExtractAudio { format } => format.to_lowercase(),
            Self::ExtractSubtitle { .. } => "srt".to_string(),
            _ => container.to_string(),
        }
    }
}

/// Encoding parameters. Unset fields fall back to [`Settings`] and then to
/// built-in defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobParams {
    pub encoder: Option<String>,
    pub preset: Option<String>,
    pub quality: Option<u32>,
    pub container: Option<String>,
    pub audio_bitrate_kbps: Option<u32>,
}

impl JobParams {
    /// Fill unset fields from settings. The encoder falls back to `default_encoder`
    /// only when settings name none.
    pub fn with_defaults(self, settings: &Settings, default_encoder: Option<&str>) -> Self {
        Self {
            encoder: self
                .encoder
                .or_else(|| settings.encoder.clone())
                .or_else(|| default_encoder.map(str::to_string)),
            preset: self.preset.or_else(|| settings.preset.clone()),
            quality: self.quality.or(settings.quality),
            container: self.container.or_else(|| settings.container.clone()),
            audio_bitrate_kbps: self.audio_bitrate_kbps.or(settings.audio_bitrate_kbps),
        }
    }

    pub fn effective_preset(&self) -> &str {
        self.preset.as_deref().unwrap_or("medium")
    }

    pub fn effective_quality(&self) -> u32 {
        self.quality.unwrap_or(23)
    }

    pub fn effective_audio_bitrate_kbps(&self) -> u32 {
        self.audio_bitrate_kbps.unwrap_or(DEFAULT_AUDIO_BITRATE_KBPS)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSpec {
    pub operation: Operation,
    pub inputs: Vec<PathBuf>,
    /// Derived by the queue from the first input when absent.
    #[serde(default)]
    pub output: Option<PathBuf>,
    #[serde(default)]
    pub params: JobParams,
}

impl JobSpec {
    pub fn new(operation: Operation, inputs: Vec<PathBuf>, output: impl Into<PathBuf>) -> Self {
        Self {
            operation,
            inputs,
            output: Some(output.into()),
            params: JobParams::default(),
        }
    }

    pub fn with_params(mut self, params: JobParams) -> Self {
        self.params = params;
        self
    }

    /// Target container: explicit param, else the output extension, else mp4.
    pub fn container(&self) -> String {
        self.params
            .container
            .clone()
            .or_else(|| {
                self.output
                    .as_deref()
                    .and_then(Path::extension)
                    .and_then(|e| e.to_str())
                    .map(str::to_string)
            })
            .unwrap_or_else(|| "mp4".to_string())
            .trim_start_matches('.')
            .to_lowercase()
    }

    pub fn encoder(&self) -> String {
        self.params
            .encoder
            .clone()
            .unwrap_or_else(|| codec::default_encoder_for_container(&self.container()).to_string())
    }

    pub fn output_path(&self) -> Result<&Path, AppError> {
        self.output
            .as_deref()
            .ok_or_else(|| AppError::configuration("output path is required"))
    }

    /// Checks the spec without touching the filesystem or spawning anything.
    pub fn validate(&self) -> Result<(), AppError> {
        let op = &self.operation;
        match op {
            Operation::Join => {
                if self.inputs.len() < 2 {
                    return Err(AppError::configuration(
                        "join requires at least 2 input files",
                    ));
                }
            }
            _ if self.inputs.len() != 1 => {
                return Err(AppError::configuration(format!(
                    "{} requires exactly one input file, got {}",
                    op.name(),
                    self.inputs.len()
                )));
            }
            _ => {}
        }
        if self.inputs.iter().any(|p| p.as_os_str().is_empty()) {
            return Err(AppError::configuration("input path is empty"));
        }

        let output = self.output_path()?;
        if output.as_os_str().is_empty() {
            return Err(AppError::configuration("output path is empty"));
        }
        if self.inputs.iter().any(|p| p == output) {
            return Err(AppError::configuration(format!(
                "output {} would overwrite an input",
                output.display()
            )));
        }

        if op.encodes_video() {
            if self.encoder().trim().is_empty() {
                return Err(AppError::configuration("encoder is empty"));
            }
            let quality = self.params.effective_quality();
            if quality > 63 {
                return Err(AppError::configuration(format!(
                    "quality {} out of range 0-63",
                    quality
                )));
            }
        }

        match op {
            Operation::CompressToSize { target_size_mb } => {
                if !target_size_mb.is_finite() || *target_size_mb <= 0.0 {
                    return Err(AppError::configuration(format!(
                        "target size must be positive, got {} MB",
                        target_size_mb
                    )));
                }
            }
            Operation::CompressByPercent { percent } => {
                if !(1..=100).contains(percent) {
                    return Err(AppError::configuration(format!(
                        "percent must be between 1 and 100, got {}",
                        percent
                    )));
                }
            }
            Operation::ChangeResolution {
                width,
                height,
                keep_aspect,
                ..
            } => {
                if *width == 0 {
                    return Err(AppError::configuration("width must be positive"));
                }
                if !keep_aspect && height.unwrap_or(0) == 0 {
                    return Err(AppError::configuration(
                        "height is required when aspect ratio is not kept",
                    ));
                }
            }
            Operation::ExtractAudio { format } => {
                if !AUDIO_FORMATS.contains(&format.to_lowercase().as_str()) {
                    return Err(AppError::configuration(format!(
                        "unsupported audio format: {}",
                        format
                    )));
                }
            }
            Operation::AddSubtitle { subtitle_path } | Operation::BurnSubtitle { subtitle_path } => {
                match subtitle_path {
                    Some(p) if !p.as_os_str().is_empty() => {}
                    _ => {
                        return Err(AppError::configuration(format!(
                            "{} requires a subtitle file",
                            op.name()
                        )));
                    }
                }
            }
            _ => {}
        }
        Ok(())
    }
}

/// One unit of work and its observable state.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: JobId,
    pub spec: JobSpec,
    pub status: JobStatus,
    pub progress_percent: u8,
    pub error: Option<String>,
    pub duration_seconds: f64,
}

impl Job {
    pub fn new(spec: JobSpec) -> Self {
        Self::with_id(JobId::next(), spec)
    }

    pub fn with_id(id: JobId, spec: JobSpec) -> Self {
        Self {
            id,
            spec,
            status: JobStatus::Pending,
            progress_percent: 0,
            error: None,
            duration_seconds: 0.0,
        }
    }

    /// Applies a lifecycle transition. Returns false (and leaves the job as is)
    /// when the move is not allowed, including any move out of a terminal status.
    pub fn transition(&mut self, to: JobStatus) -> bool {
        if !self.status.can_transition_to(to) {
            return false;
        }
        self.status = to;
        true
    }

    /// Raises progress to `percent` (capped at 100). Returns true only if it increased.
    pub fn advance_progress(&mut self, percent: u8) -> bool {
        let percent = percent.min(100);
        if percent > self.progress_percent {
            self.progress_percent = percent;
            true
        } else {
            false
        }
    }
}
