//! Application settings. Constructed once at startup and passed explicitly to
//! the runner, the queue and the sidecar; nothing here is global.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::AppError;

pub const DEFAULT_PROBE_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_HEALTH_SCAN_TIMEOUT_SECS: u64 = 300;
pub const DEFAULT_HARDWARE_DETECT_TIMEOUT_SECS: u64 = 5;
pub const DEFAULT_AUDIO_BITRATE_KBPS: u32 = 128;

#[derive(Debug, Deserialize, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    pub ffmpeg_path: Option<PathBuf>,
    pub ffprobe_path: Option<PathBuf>,
    pub probe_timeout_secs: Option<u64>,
    pub health_scan_timeout_secs: Option<u64>,
    pub hardware_detect_timeout_secs: Option<u64>,
    /// Preferred encoder. When unset, hardware detection picks one.
    pub encoder: Option<String>,
    pub preset: Option<String>,
    pub quality: Option<u32>,
    pub container: Option<String>,
    /// Appended to the input stem when the queue derives output names.
    pub output_suffix: Option<String>,
    pub audio_bitrate_kbps: Option<u32>,
}

impl Settings {
    /// Settings with tool paths taken from `FFMPEG_PATH` / `FFPROBE_PATH`.
    pub fn from_env() -> Self {
        let env_path = |key: &str| {
            std::env::var_os(key)
                .filter(|v| !v.is_empty())
                .map(PathBuf::from)
        };
        Self {
            ffmpeg_path: env_path("FFMPEG_PATH"),
            ffprobe_path: env_path("FFPROBE_PATH"),
            ..Self::default()
        }
    }

    pub fn from_json_file(path: &Path) -> Result<Self, AppError> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            AppError::configuration(format!("cannot read {}: {}", path.display(), e))
        })?;
        serde_json::from_str(&text).map_err(|e| {
            AppError::configuration(format!("invalid settings file {}: {}", path.display(), e))
        })
    }

    /// Fill unset fields from `other`.
    pub fn or(self, other: Settings) -> Settings {
        Settings {
            ffmpeg_path: self.ffmpeg_path.or(other.ffmpeg_path),
            ffprobe_path: self.ffprobe_path.or(other.ffprobe_path),
            probe_timeout_secs: self.probe_timeout_secs.or(other.probe_timeout_secs),
            health_scan_timeout_secs: self
                .health_scan_timeout_secs
                .or(other.health_scan_timeout_secs),
            hardware_detect_timeout_secs: self
                .hardware_detect_timeout_secs
                .or(other.hardware_detect_timeout_secs),
            encoder: self.encoder.or(other.encoder),
            preset: self.preset.or(other.preset),
            quality: self.quality.or(other.quality),
            container: self.container.or(other.container),
            output_suffix: self.output_suffix.or(other.output_suffix),
            audio_bitrate_kbps: self.audio_bitrate_kbps.or(other.audio_bitrate_kbps),
        }
    }

    pub fn effective_probe_timeout(&self) -> Duration {
        Duration::from_secs(
            self.probe_timeout_secs
                .unwrap_or(DEFAULT_PROBE_TIMEOUT_SECS)
                .max(1),
        )
    }

    pub fn effective_health_scan_timeout(&self) -> Duration {
        Duration::from_secs(
            self.health_scan_timeout_secs
                .unwrap_or(DEFAULT_HEALTH_SCAN_TIMEOUT_SECS)
                .max(1),
        )
    }

    pub fn effective_hardware_detect_timeout(&self) -> Duration {
        Duration::from_secs(
            self.hardware_detect_timeout_secs
                .unwrap_or(DEFAULT_HARDWARE_DETECT_TIMEOUT_SECS)
                .max(1),
        )
    }

    pub fn effective_preset(&self) -> &str {
        self.preset.as_deref().unwrap_or("medium")
    }

    pub fn effective_quality(&self) -> u32 {
        self.quality.unwrap_or(23)
    }

    pub fn effective_container(&self) -> String {
        self.container
            .as_deref()
            .unwrap_or("mp4")
            .trim_start_matches('.')
            .to_lowercase()
    }

    pub fn effective_output_suffix(&self) -> &str {
        self.output_suffix.as_deref().unwrap_or("_converted")
    }

    pub fn effective_audio_bitrate_kbps(&self) -> u32 {
        self.audio_bitrate_kbps
            .unwrap_or(DEFAULT_AUDIO_BITRATE_KBPS)
            .clamp(32, 512)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn defaults() {
        let s = Settings::default();
        assert_eq!(s.effective_probe_timeout(), Duration::from_secs(10));
        assert_eq!(s.effective_health_scan_timeout(), Duration::from_secs(300));
        assert_eq!(s.effective_preset(), "medium");
        assert_eq!(s.effective_quality(), 23);
        assert_eq!(s.effective_container(), "mp4");
        assert_eq!(s.effective_output_suffix(), "_converted");
        assert_eq!(s.effective_audio_bitrate_kbps(), 128);
    }

    #[test]
    fn container_is_normalized() {
        let s = Settings {
            container: Some(".MKV".into()),
            ..Settings::default()
        };
        assert_eq!(s.effective_container(), "mkv");
    }

    #[test]
    fn json_file_uses_camel_case() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"ffmpegPath": "/opt/ff/ffmpeg", "probeTimeoutSecs": 3, "outputSuffix": "_small"}"#,
        )
        .expect("write");
        let s = Settings::from_json_file(&path).expect("load");
        assert_eq!(s.ffmpeg_path, Some(PathBuf::from("/opt/ff/ffmpeg")));
        assert_eq!(s.effective_probe_timeout(), Duration::from_secs(3));
        assert_eq!(s.effective_output_suffix(), "_small");
    }

    #[test]
    fn invalid_json_is_configuration_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{not json").expect("write");
        let err = Settings::from_json_file(&path).unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn or_prefers_self() {
        let a = Settings {
            preset: Some("fast".into()),
            ..Settings::default()
        };
        let b = Settings {
            preset: Some("slow".into()),
            quality: Some(30),
            ..Settings::default()
        };
        let merged = a.or(b);
        assert_eq!(merged.effective_preset(), "fast");
        assert_eq!(merged.effective_quality(), 30);
    }

    #[test]
    #[serial]
    fn from_env_reads_tool_paths() {
        // SAFETY: serialized with other env-mutating tests.
        unsafe {
            std::env::set_var("FFMPEG_PATH", "/custom/ffmpeg");
            std::env::remove_var("FFPROBE_PATH");
        }
        let s = Settings::from_env();
        assert_eq!(s.ffmpeg_path, Some(PathBuf::from("/custom/ffmpeg")));
        assert_eq!(s.ffprobe_path, None);
        unsafe {
            std::env::remove_var("FFMPEG_PATH");
        }
    }
}
