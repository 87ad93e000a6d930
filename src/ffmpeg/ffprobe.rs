//! FFprobe-based metadata queries. The probe is a collaborator of the command
//! builder (bitrate targeting) and the runner (progress denominator).

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::builder::build_probe_args;
use super::discovery::Toolchain;
use super::process::run_captured;
use crate::error::AppError;

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
    size: Option<String>,
    #[serde(default)]
    bit_rate: Option<String>,
    #[serde(default)]
    format_name: Option<String>,
    #[serde(default)]
    format_long_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    #[serde(default)]
    index: u32,
    codec_type: Option<String>,
    #[serde(default)]
    codec_name: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    r_frame_rate: Option<String>,
    #[serde(default)]
    bit_rate: Option<String>,
    #[serde(default)]
    channels: Option<u32>,
    #[serde(default)]
    sample_rate: Option<String>,
    #[serde(default)]
    tags: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    format: Option<FfprobeFormat>,
    streams: Option<Vec<FfprobeStream>>,
}

fn parse_frame_rate(s: &str) -> Option<f64> {
    let (num, den) = s.split_once('/')?;
    let num: f64 = num.trim().parse().ok()?;
    let den: f64 = den.trim().parse().ok()?;
    if den == 0.0 {
        return None;
    }
    Some(num / den)
}

fn parse_number<T: std::str::FromStr>(s: Option<&String>) -> Option<T> {
    s.and_then(|v| v.trim().parse().ok())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    Video,
    Audio,
    Subtitle,
    Other,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamInfo {
    pub index: u32,
    pub kind: StreamKind,
    pub codec_name: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub fps: Option<f64>,
    pub bit_rate: Option<u64>,
    pub channels: Option<u32>,
    pub sample_rate: Option<u32>,
    pub language: Option<String>,
}

/// Format- and stream-level metadata of one media file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaInfo {
    pub duration_seconds: f64,
    pub size: u64,
    pub bit_rate: Option<u64>,
    pub format_name: Option<String>,
    pub format_long_name: Option<String>,
    pub streams: Vec<StreamInfo>,
}

impl MediaInfo {
    pub fn video_stream(&self) -> Option<&StreamInfo> {
        self.streams.iter().find(|s| s.kind == StreamKind::Video)
    }

    /// Bitrate of the first video stream, falling back to the container bitrate
    /// (some muxers such as MKV don't record per-stream rates).
    pub fn video_bit_rate(&self) -> Option<u64> {
        self.video_stream()
            .and_then(|s| s.bit_rate)
            .or(self.bit_rate)
            .filter(|&b| b > 0)
    }

    pub fn resolution(&self) -> Option<(u32, u32)> {
        let v = self.video_stream()?;
        Some((v.width?, v.height?))
    }

    pub fn fps(&self) -> Option<f64> {
        self.video_stream().and_then(|s| s.fps)
    }

    pub fn audio_streams(&self) -> impl Iterator<Item = &StreamInfo> {
        self.streams.iter().filter(|s| s.kind == StreamKind::Audio)
    }

    pub fn subtitle_streams(&self) -> impl Iterator<Item = &StreamInfo> {
        self.streams
            .iter()
            .filter(|s| s.kind == StreamKind::Subtitle)
    }
}

/// Parse ffprobe JSON output into MediaInfo.
pub fn parse_ffprobe_json(json: &str) -> Result<MediaInfo, AppError> {
    let output: FfprobeOutput = serde_json::from_str(json)
        .map_err(|e| AppError::probe(format!("Failed to parse ffprobe JSON: {}", e)))?;

    let format = output.format.as_ref();
    let duration_seconds = format
        .and_then(|f| parse_number::<f64>(f.duration.as_ref()))
        .filter(|d| d.is_finite())
        .unwrap_or(0.0);
    let size = format
        .and_then(|f| parse_number(f.size.as_ref()))
        .unwrap_or(0);
    let bit_rate = format.and_then(|f| parse_number(f.bit_rate.as_ref()));

    let streams = output
        .streams
        .unwrap_or_default()
        .into_iter()
        .map(|s| {
            let kind = match s.codec_type.as_deref() {
                Some("video") => StreamKind::Video,
                Some("audio") => StreamKind::Audio,
                Some("subtitle") => StreamKind::Subtitle,
                _ => StreamKind::Other,
            };
            StreamInfo {
                index: s.index,
                kind,
                codec_name: s.codec_name,
                width: s.width,
                height: s.height,
                fps: s.r_frame_rate.as_deref().and_then(parse_frame_rate),
                bit_rate: parse_number(s.bit_rate.as_ref()),
                channels: s.channels,
                sample_rate: parse_number(s.sample_rate.as_ref()),
                language: s.tags.get("language").cloned(),
            }
        })
        .collect();

    Ok(MediaInfo {
        duration_seconds,
        size,
        bit_rate,
        format_name: format.and_then(|f| f.format_name.clone()),
        format_long_name: format.and_then(|f| f.format_long_name.clone()),
        streams,
    })
}

/// Synchronous metadata query against a media file.
pub trait MediaProbe: Send + Sync {
    fn probe(&self, path: &Path) -> Result<MediaInfo, AppError>;
}

/// [`MediaProbe`] backed by the ffprobe binary, bounded by a short timeout.
#[derive(Debug, Clone)]
pub struct FfprobeProbe {
    ffprobe: std::path::PathBuf,
    timeout: Duration,
}

impl FfprobeProbe {
    pub fn new(toolchain: &Toolchain, timeout: Duration) -> Self {
        Self {
            ffprobe: toolchain.ffprobe.clone(),
            timeout,
        }
    }
}

impl MediaProbe for FfprobeProbe {
    fn probe(&self, path: &Path) -> Result<MediaInfo, AppError> {
        log::debug!(
            target: "video_toolbox::ffmpeg::ffprobe",
            "probe: path={}",
            path.display()
        );
        let args = build_probe_args(path);
        let output = match run_captured(&self.ffprobe, &args, self.timeout, "ffprobe") {
            Ok(output) => output,
            Err(AppError::Launch(msg)) => {
                return Err(AppError::probe(format!("Failed to run ffprobe: {}", msg)));
            }
            Err(e) => return Err(e),
        };

        if !output.status.success() {
            return Err(AppError::probe(format!(
                "ffprobe failed on {}: {}",
                path.display(),
                output.stderr.trim()
            )));
        }

        parse_ffprobe_json(&output.stdout)
    }
}
