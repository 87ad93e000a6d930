//! Encoder metadata: container compatibility, hardware acceleration and
//! per-encoder quality/preset conventions.

use std::collections::HashMap;
use std::sync::LazyLock;

use serde::Serialize;

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EncoderInfo {
    pub value: String,
    pub name: String,
    pub containers: Vec<String>,
    pub hardware: bool,
    pub preset_type: String,
}

struct EncoderRow {
    value: &'static str,
    name: &'static str,
    containers: &'static [&'static str],
    hardware: bool,
    preset_type: &'static str,
}

macro_rules! encoder_table {
    (
        $( [$value:expr, $name:expr, $containers:expr, $hw:expr, $preset:expr] ),* $(,)?
    ) => {
        const ENCODER_TABLE: &[EncoderRow] = &[
            $( EncoderRow {
                value: $value,
                name: $name,
                containers: $containers,
                hardware: $hw,
                preset_type: $preset,
            } ),*
        ];

        /// Encoder names from ENCODER_TABLE.
        pub const KNOWN_ENCODERS: &[&str] = &[ $($value),* ];
    };
}

encoder_table!(
    ["libx264", "H.264 (CPU)", &["mp4", "mkv", "mov", "avi"], false, "x264"],
    ["libx265", "H.265 (CPU)", &["mp4", "mkv", "mov"], false, "x264"],
    ["h264_nvenc", "H.264 (NVENC)", &["mp4", "mkv", "mov", "avi"], true, "nvenc"],
    ["hevc_nvenc", "H.265 (NVENC)", &["mp4", "mkv", "mov"], true, "nvenc"],
    ["libvpx-vp9", "VP9 (WebM)", &["webm", "mkv"], false, "vp9"],
    ["libsvtav1", "AV1 (SVT)", &["mp4", "webm", "mkv"], false, "av1"],
);

pub const SOFTWARE_DEFAULT_ENCODER: &str = "libx264";
pub const HARDWARE_DEFAULT_ENCODER: &str = "h264_nvenc";

/// NVENC presets p1 (fastest) .. p7 (best). Maps x264-style names.
static NVENC_PRESET_MAP: LazyLock<HashMap<&'static str, &'static str>> = LazyLock::new(|| {
    [
        ("ultrafast", "p1"),
        ("superfast", "p1"),
        ("veryfast", "p2"),
        ("faster", "p3"),
        ("fast", "p3"),
        ("medium", "p4"),
        ("slow", "p5"),
        ("slower", "p6"),
        ("veryslow", "p7"),
    ]
    .into_iter()
    .collect()
});

/// libsvtav1 preset: 0-13 (higher = faster). Maps x264-style names.
static SVTAV1_PRESET_MAP: LazyLock<HashMap<&'static str, &'static str>> = LazyLock::new(|| {
    [
        ("ultrafast", "12"),
        ("superfast", "11"),
        ("veryfast", "10"),
        ("faster", "9"),
        ("fast", "8"),
        ("medium", "6"),
        ("slow", "4"),
        ("slower", "3"),
        ("veryslow", "2"),
    ]
    .into_iter()
    .collect()
});

fn row(encoder: &str) -> Option<&'static EncoderRow> {
    ENCODER_TABLE.iter().find(|r| r.value == encoder)
}

pub fn encoder_info(encoder: &str) -> Option<EncoderInfo> {
    row(encoder).map(|r| EncoderInfo {
        value: r.value.to_string(),
        name: r.name.to_string(),
        containers: r.containers.iter().copied().map(str::to_string).collect(),
        hardware: r.hardware,
        preset_type: r.preset_type.to_string(),
    })
}

/// True for GPU-resident encoders that need `-hwaccel` before the input.
/// Unknown encoders are classified by name.
pub fn is_hardware_encoder(encoder: &str) -> bool {
    match row(encoder) {
        Some(r) => r.hardware,
        None => encoder.to_lowercase().contains("nvenc"),
    }
}

/// Flag carrying the constant-rate-quality factor for this encoder.
pub fn quality_flag(encoder: &str) -> &'static str {
    if encoder.to_lowercase().contains("nvenc") {
        "-cq"
    } else {
        "-crf"
    }
}

/// Encoder-specific preset value for an x264-style preset name.
/// Native NVENC names (`p1`..`p7`) pass through unchanged.
pub fn map_preset(preset: &str, encoder: &str) -> String {
    let preset_type = row(encoder).map(|r| r.preset_type).unwrap_or("x264");
    match preset_type {
        "nvenc" => {
            if preset.len() == 2 && preset.starts_with('p') {
                return preset.to_string();
            }
            NVENC_PRESET_MAP.get(preset).unwrap_or(&"p4").to_string()
        }
        "av1" => SVTAV1_PRESET_MAP.get(preset).unwrap_or(&"6").to_string(),
        _ => preset.to_string(),
    }
}

/// Default video encoder for a target container.
pub fn default_encoder_for_container(container: &str) -> &'static str {
    match container.to_lowercase().as_str() {
        "webm" => "libvpx-vp9",
        _ => SOFTWARE_DEFAULT_ENCODER,
    }
}
