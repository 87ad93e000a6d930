//! Ready-made output settings: named device profiles, and fanning one input
//! out to several containers.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::codec;
use crate::error::AppError;
use crate::job::{JobParams, JobSpec, Operation};
use crate::queue::default_output_path;
use crate::settings::Settings;

/// Encoding settings tuned for one device or platform.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeviceProfile {
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub encoder: &'static str,
    pub preset: &'static str,
    pub quality: u32,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub audio_bitrate_kbps: u32,
    pub container: &'static str,
}

macro_rules! profile_table {
    (
        $( [$id:expr, $name:expr, $desc:expr, $preset:expr, $crf:expr, $w:expr, $h:expr, $abr:expr] ),* $(,)?
    ) => {
        /// Every built-in profile, in display order.
        pub const PROFILES: &[DeviceProfile] = &[
            $( DeviceProfile {
                id: $id,
                name: $name,
                description: $desc,
                encoder: codec::SOFTWARE_DEFAULT_ENCODER,
                preset: $preset,
                quality: $crf,
                width: $w,
                height: $h,
                fps: 30,
                audio_bitrate_kbps: $abr,
                container: "mp4",
            } ),*
        ];
    };
}

profile_table!(
    ["youtube_1080p", "YouTube 1080p", "YouTube upload at 1080p", "slow", 18, 1920, 1080, 192],
    ["youtube_4k", "YouTube 4K", "YouTube upload at 4K", "slow", 18, 3840, 2160, 192],
    ["instagram", "Instagram", "Instagram feed, square 1:1", "medium", 23, 1080, 1080, 128],
    ["instagram_story", "Instagram Stories", "Instagram Stories, vertical 9:16", "medium", 23, 1080, 1920, 128],
    ["tiktok", "TikTok", "TikTok, vertical 9:16", "medium", 23, 1080, 1920, 128],
    ["iphone", "iPhone", "Plays on iPhone", "medium", 23, 1920, 1080, 192],
    ["android", "Android", "Plays on Android phones", "medium", 23, 1920, 1080, 192],
    ["tv_4k", "TV 4K", "4K televisions", "slow", 18, 3840, 2160, 320],
    ["web_streaming", "Web Streaming", "720p for web players", "fast", 23, 1280, 720, 128],
    ["whatsapp", "WhatsApp", "Small 480p file for messaging", "fast", 28, 854, 480, 96],
);

pub fn profile(id: &str) -> Option<&'static DeviceProfile> {
    PROFILES.iter().find(|p| p.id == id)
}

impl DeviceProfile {
    pub fn params(&self) -> JobParams {
        JobParams {
            encoder: Some(self.encoder.to_string()),
            preset: Some(self.preset.to_string()),
            quality: Some(self.quality),
            container: Some(self.container.to_string()),
            audio_bitrate_kbps: Some(self.audio_bitrate_kbps),
        }
    }

    /// Scales to exactly the profile's frame size and re-encodes audio.
    pub fn operation(&self) -> Operation {
        Operation::ChangeResolution {
            width: self.width,
            height: Some(self.height),
            keep_aspect: false,
            reencode_audio: true,
        }
    }

    /// `<input dir>/<stem>_<profile id>.<container>`.
    pub fn output_for(&self, input: &Path) -> PathBuf {
        default_output_path(input, None, &format!("_{}", self.id), self.container)
    }

    pub fn job_spec(&self, input: PathBuf, output: Option<PathBuf>) -> JobSpec {
        let output = output.unwrap_or_else(|| self.output_for(&input));
        JobSpec::new(self.operation(), vec![input], output).with_params(self.params())
    }
}

/// `queue.enqueue_profile` request.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileRequest {
    pub profile_id: String,
    pub input_path: PathBuf,
    #[serde(default)]
    pub output_path: Option<PathBuf>,
}

impl ProfileRequest {
    pub fn job_spec(&self) -> Result<JobSpec, AppError> {
        let profile = profile(&self.profile_id).ok_or_else(|| {
            AppError::configuration(format!("unknown device profile: {}", self.profile_id))
        })?;
        Ok(profile.job_spec(self.input_path.clone(), self.output_path.clone()))
    }
}

/// One output of a multi-format conversion. Unset fields fall back to the
/// container's defaults and then to settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormatTarget {
    pub container: String,
    #[serde(default)]
    pub encoder: Option<String>,
    #[serde(default)]
    pub preset: Option<String>,
    #[serde(default)]
    pub quality: Option<u32>,
}

/// Convert one input into several containers, one queued job per target.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MultiFormatRequest {
    pub input_path: PathBuf,
    pub targets: Vec<FormatTarget>,
    /// Defaults to the input's directory.
    #[serde(default)]
    pub output_dir: Option<PathBuf>,
}

/// VP9 reaches comparable quality at a higher CRF than H.264.
pub fn default_quality_for_container(container: &str) -> u32 {
    match container {
        "webm" => 30,
        _ => 23,
    }
}

impl MultiFormatRequest {
    /// One `Convert` spec per target, in request order. Rejects an empty or
    /// duplicated target list, since two targets would share an output path.
    pub fn job_specs(&self, settings: &Settings) -> Result<Vec<JobSpec>, AppError> {
        if self.targets.is_empty() {
            return Err(AppError::configuration(
                "multi-format conversion needs at least one target",
            ));
        }
        let mut seen = HashSet::new();
        self.targets
            .iter()
            .map(|target| {
                let container = target.container.trim_start_matches('.').to_lowercase();
                if container.is_empty() {
                    return Err(AppError::configuration("target container is empty"));
                }
                if !seen.insert(container.clone()) {
                    return Err(AppError::configuration(format!(
                        "container {} requested twice",
                        container
                    )));
                }
                let output = default_output_path(
                    &self.input_path,
                    self.output_dir.as_deref(),
                    settings.effective_output_suffix(),
                    &container,
                );
                let params = JobParams {
                    encoder: target.encoder.clone(),
                    preset: target.preset.clone(),
                    quality: target
                        .quality
                        .or(settings.quality)
                        .or_else(|| Some(default_quality_for_container(&container))),
                    container: Some(container),
                    audio_bitrate_kbps: None,
                };
                Ok(JobSpec::new(Operation::Convert, vec![self.input_path.clone()], output)
                    .with_params(params))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_has_unique_ids() {
        let ids: HashSet<_> = PROFILES.iter().map(|p| p.id).collect();
        assert_eq!(ids.len(), PROFILES.len());
        assert_eq!(PROFILES.len(), 10);
    }

    #[test]
    fn whatsapp_profile_builds_scaled_job() {
        let p = profile("whatsapp").unwrap();
        let spec = p.job_spec(PathBuf::from("/v/clip.mov"), None);
        assert_eq!(spec.output, Some(PathBuf::from("/v/clip_whatsapp.mp4")));
        assert_eq!(
            spec.operation,
            Operation::ChangeResolution {
                width: 854,
                height: Some(480),
                keep_aspect: false,
                reencode_audio: true,
            }
        );
        assert_eq!(spec.params.quality, Some(28));
        assert_eq!(spec.params.preset.as_deref(), Some("fast"));
        assert_eq!(spec.params.audio_bitrate_kbps, Some(96));
        assert_eq!(spec.encoder(), "libx264");
        spec.validate().unwrap();
    }

    #[test]
    fn unknown_profile_is_configuration_error() {
        let req = ProfileRequest {
            profile_id: "betamax".into(),
            input_path: PathBuf::from("/v/a.mov"),
            output_path: None,
        };
        assert!(req.job_spec().unwrap_err().is_configuration());
    }

    #[test]
    fn profile_serializes_camel_case() {
        let json = serde_json::to_value(profile("tv_4k").unwrap()).unwrap();
        assert_eq!(json["audioBitrateKbps"], 320);
        assert_eq!(json["width"], 3840);
    }

    #[test]
    fn multi_format_fans_out_per_container() {
        let req: MultiFormatRequest = serde_json::from_value(serde_json::json!({
            "inputPath": "/v/clip.mov",
            "targets": [
                {"container": "mp4"},
                {"container": "webm"},
                {"container": "mkv", "encoder": "libx265", "quality": 26}
            ],
            "outputDir": "/out"
        }))
        .unwrap();
        let specs = req.job_specs(&Settings::default()).unwrap();
        let outputs: Vec<_> = specs.iter().filter_map(|s| s.output.clone()).collect();
        assert_eq!(
            outputs,
            vec![
                PathBuf::from("/out/clip_converted.mp4"),
                PathBuf::from("/out/clip_converted.webm"),
                PathBuf::from("/out/clip_converted.mkv"),
            ]
        );
        assert_eq!(specs[0].encoder(), "libx264");
        assert_eq!(specs[0].params.quality, Some(23));
        assert_eq!(specs[1].encoder(), "libvpx-vp9");
        assert_eq!(specs[1].params.quality, Some(30));
        assert_eq!(specs[2].encoder(), "libx265");
        assert_eq!(specs[2].params.quality, Some(26));
        assert!(specs.iter().all(|s| s.operation == Operation::Convert));
    }

    #[test]
    fn multi_format_rejects_duplicates_and_empty() {
        let mut req = MultiFormatRequest {
            input_path: PathBuf::from("/v/clip.mov"),
            targets: Vec::new(),
            output_dir: None,
        };
        assert!(req.job_specs(&Settings::default()).unwrap_err().is_configuration());

        req.targets = vec![
            FormatTarget {
                container: "mp4".into(),
                ..FormatTarget::default()
            },
            FormatTarget {
                container: ".MP4".into(),
                ..FormatTarget::default()
            },
        ];
        assert!(req.job_specs(&Settings::default()).unwrap_err().is_configuration());
    }
}
