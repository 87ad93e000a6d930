//! Hardware encoder detection.
//!
//! Detection shells out twice: `ffmpeg -encoders` tells whether the FFmpeg
//! build carries NVENC, `nvidia-smi` names the GPUs. Results are cached until
//! [`HardwareCapability::redetect`] is called.

use std::path::{Path, PathBuf};
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;

use super::process::run_captured;
use crate::codec::{HARDWARE_DEFAULT_ENCODER, SOFTWARE_DEFAULT_ENCODER};

const NVENC_ENCODERS: &[&str] = &["h264_nvenc", "hevc_nvenc"];

pub trait HardwareCapability: Send + Sync {
    fn supports_hardware_encoder(&self) -> bool;

    fn list_devices(&self) -> Vec<String>;

    /// Encoders a job may pick: the software default always, NVENC when usable.
    fn available_encoders(&self) -> Vec<String> {
        let mut encoders = vec![SOFTWARE_DEFAULT_ENCODER.to_string()];
        if self.supports_hardware_encoder() {
            encoders.extend(NVENC_ENCODERS.iter().map(|e| e.to_string()));
        }
        encoders
    }

    fn default_encoder(&self) -> &'static str {
        if self.supports_hardware_encoder() {
            HARDWARE_DEFAULT_ENCODER
        } else {
            SOFTWARE_DEFAULT_ENCODER
        }
    }

    /// Drop cached results and detect again.
    fn redetect(&self) {}
}

/// Snapshot of what detection found, as reported to the UI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Capabilities {
    pub hardware_encoder: bool,
    pub devices: Vec<String>,
    pub available_encoders: Vec<String>,
    pub default_encoder: String,
}

impl Capabilities {
    pub fn from_detector(hw: &dyn HardwareCapability) -> Self {
        Self {
            hardware_encoder: hw.supports_hardware_encoder(),
            devices: hw.list_devices(),
            available_encoders: hw.available_encoders(),
            default_encoder: hw.default_encoder().to_string(),
        }
    }
}

/// Encoder names from `ffmpeg -encoders` output. Rows look like
/// ` V....D h264_nvenc   NVIDIA NVENC H.264 encoder (codec h264)`.
pub fn parse_encoder_list(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            let flags = parts.next()?;
            let name = parts.next()?;
            let is_row = flags.len() == 6
                && name != "="
                && flags.starts_with(['V', 'A', 'S'])
                && flags.chars().all(|c| c.is_ascii_uppercase() || c == '.');
            is_row.then(|| name.to_string())
        })
        .collect()
}

#[derive(Debug, Clone, Default)]
struct Detected {
    nvenc: bool,
    devices: Vec<String>,
}

/// [`HardwareCapability`] backed by the FFmpeg build and the NVIDIA driver tools.
#[derive(Debug)]
pub struct FfmpegHardwareDetector {
    ffmpeg: PathBuf,
    nvidia_smi: PathBuf,
    timeout: Duration,
    cache: Mutex<Option<Detected>>,
}

impl FfmpegHardwareDetector {
    pub fn new(ffmpeg: &Path, timeout: Duration) -> Self {
        Self {
            ffmpeg: ffmpeg.to_path_buf(),
            nvidia_smi: PathBuf::from("nvidia-smi"),
            timeout,
            cache: Mutex::new(None),
        }
    }

    pub fn with_nvidia_smi(mut self, path: impl Into<PathBuf>) -> Self {
        self.nvidia_smi = path.into();
        self
    }

    fn detect_nvenc(&self) -> bool {
        let args = ["-hide_banner".to_string(), "-encoders".to_string()];
        match run_captured(&self.ffmpeg, &args, self.timeout, "encoder detection") {
            Ok(output) => {
                let encoders = parse_encoder_list(&output.stdout);
                encoders.iter().any(|e| e == HARDWARE_DEFAULT_ENCODER)
            }
            Err(e) => {
                log::warn!(
                    target: "video_toolbox::ffmpeg::hardware",
                    "Encoder detection failed, assuming software only: {}",
                    e
                );
                false
            }
        }
    }

    fn detect_devices(&self) -> Vec<String> {
        let args = [
            "--query-gpu=name".to_string(),
            "--format=csv,noheader".to_string(),
        ];
        match run_captured(&self.nvidia_smi, &args, self.timeout, "GPU listing") {
            Ok(output) if output.status.success() => output
                .stdout
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(str::to_string)
                .collect(),
            Ok(_) => Vec::new(),
            Err(e) => {
                log::debug!(
                    target: "video_toolbox::ffmpeg::hardware",
                    "GPU listing unavailable: {}",
                    e
                );
                Vec::new()
            }
        }
    }

    fn detected(&self) -> Detected {
        let mut cache = self.cache.lock();
        if let Some(d) = cache.as_ref() {
            return d.clone();
        }
        let detected = Detected {
            nvenc: self.detect_nvenc(),
            devices: self.detect_devices(),
        };
        log::info!(
            target: "video_toolbox::ffmpeg::hardware",
            "Hardware detection: nvenc={}, devices={:?}",
            detected.nvenc,
            detected.devices
        );
        *cache = Some(detected.clone());
        detected
    }
}

impl HardwareCapability for FfmpegHardwareDetector {
    fn supports_hardware_encoder(&self) -> bool {
        self.detected().nvenc
    }

    fn list_devices(&self) -> Vec<String> {
        self.detected().devices
    }

    fn redetect(&self) {
        self.cache.lock().take();
        self.detected();
    }
}
