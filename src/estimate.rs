//! Rough conversion time and output size estimates shown before a job starts.

use std::collections::HashMap;
use std::sync::LazyLock;

use serde::Serialize;

use crate::codec;

/// Seconds of media encoded per wall-clock second, by encoder and preset.
static SPEED_FACTORS: LazyLock<HashMap<&'static str, HashMap<&'static str, f64>>> =
    LazyLock::new(|| {
        let x264 = [
            ("ultrafast", 2.0),
            ("superfast", 1.5),
            ("veryfast", 1.2),
            ("faster", 1.0),
            ("fast", 0.8),
            ("medium", 0.6),
            ("slow", 0.4),
            ("slower", 0.3),
            ("veryslow", 0.2),
        ];
        let h264_nvenc = [
            ("p1", 10.0),
            ("p2", 8.0),
            ("p3", 6.0),
            ("p4", 5.0),
            ("p5", 4.0),
            ("p6", 3.0),
            ("p7", 2.5),
        ];
        let hevc_nvenc = [
            ("p1", 8.0),
            ("p2", 6.0),
            ("p3", 5.0),
            ("p4", 4.0),
            ("p5", 3.0),
            ("p6", 2.5),
            ("p7", 2.0),
        ];
        [
            ("libx264", x264.into_iter().collect()),
            ("h264_nvenc", h264_nvenc.into_iter().collect()),
            ("hevc_nvenc", hevc_nvenc.into_iter().collect()),
        ]
        .into_iter()
        .collect()
    });

const DEFAULT_SOFTWARE_SPEED: f64 = 0.6;
const DEFAULT_NVENC_SPEED: f64 = 4.0;

/// Reference bitrates (bits/s) at CRF 23 for common frame sizes.
const BASE_BITRATES: &[((u32, u32), u64)] = &[
    ((3840, 2160), 20_000_000),
    ((2560, 1440), 10_000_000),
    ((1920, 1080), 5_000_000),
    ((1280, 720), 2_500_000),
    ((854, 480), 1_000_000),
    ((640, 360), 500_000),
];

const DEFAULT_BASE_BITRATE: u64 = 5_000_000;
const CONTAINER_OVERHEAD: f64 = 1.02;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Estimate {
    pub seconds: f64,
    pub bytes: u64,
    pub time_display: String,
    pub size_display: String,
}

/// Wall-clock seconds to encode `duration_secs` of media.
pub fn estimate_time(duration_secs: f64, encoder: &str, preset: &str) -> f64 {
    let nvenc = encoder.contains("nvenc");
    let preset = codec::map_preset(preset, encoder);
    let speed = match SPEED_FACTORS.get(encoder) {
        Some(speeds) => speeds.get(preset.as_str()).copied().unwrap_or(if nvenc {
            speeds.get("p4").copied().unwrap_or(DEFAULT_NVENC_SPEED)
        } else {
            DEFAULT_SOFTWARE_SPEED
        }),
        None if nvenc => DEFAULT_NVENC_SPEED,
        None => DEFAULT_SOFTWARE_SPEED,
    };
    duration_secs.max(0.0) / speed
}

/// Bitrate of the nearest reference resolution, scaled so every 6 CRF
/// steps halve or double it.
pub fn estimate_bitrate(crf: u32, resolution: Option<(u32, u32)>) -> u64 {
    let base = resolution
        .and_then(|(w, h)| {
            BASE_BITRATES
                .iter()
                .min_by_key(|((bw, bh), _)| w.abs_diff(*bw) + h.abs_diff(*bh))
                .map(|(_, br)| *br)
        })
        .unwrap_or(DEFAULT_BASE_BITRATE);
    let factor = 2f64.powf((23.0 - crf as f64) / 6.0);
    (base as f64 * factor) as u64
}

/// Output bytes for `duration_secs` at `bitrate` (or a CRF-derived bitrate), plus container overhead.
pub fn estimate_size(
    duration_secs: f64,
    bitrate: Option<u64>,
    crf: u32,
    resolution: Option<(u32, u32)>,
) -> u64 {
    let bitrate = bitrate.unwrap_or_else(|| estimate_bitrate(crf, resolution));
    let bytes = bitrate as f64 * duration_secs.max(0.0) / 8.0;
    (bytes * CONTAINER_OVERHEAD) as u64
}

pub fn format_duration(seconds: f64) -> String {
    let total = seconds.max(0.0) as u64;
    if total < 60 {
        format!("{}s", total)
    } else if total < 3600 {
        format!("{}m {}s", total / 60, total % 60)
    } else {
        format!("{}h {}m", total / 3600, (total % 3600) / 60)
    }
}

pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    for unit in UNITS {
        if size < 1024.0 {
            return format!("{:.2} {}", size, unit);
        }
        size /= 1024.0;
    }
    format!("{:.2} PB", size)
}

pub fn estimate(
    duration_secs: f64,
    encoder: &str,
    preset: &str,
    crf: u32,
    resolution: Option<(u32, u32)>,
) -> Estimate {
    let seconds = estimate_time(duration_secs, encoder, preset);
    let bytes = estimate_size(duration_secs, None, crf, resolution);
    Estimate {
        seconds,
        bytes,
        time_display: format_duration(seconds),
        size_display: format_size(bytes),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn time_uses_speed_factor() {
        assert!((estimate_time(60.0, "libx264", "medium") - 100.0).abs() < 1e-9);
        assert!((estimate_time(60.0, "libx264", "ultrafast") - 30.0).abs() < 1e-9);
    }

    #[test]
    fn nvenc_time_maps_x264_preset_names() {
        // medium -> p4 -> 5x realtime
        assert!((estimate_time(100.0, "h264_nvenc", "medium") - 20.0).abs() < 1e-9);
        assert!((estimate_time(100.0, "hevc_nvenc", "p7") - 50.0).abs() < 1e-9);
    }

    #[test]
    fn unknown_encoder_uses_default_speed() {
        assert!((estimate_time(6.0, "libaom-av1", "medium") - 10.0).abs() < 1e-9);
    }

    #[test]
    fn bitrate_follows_crf_and_nearest_resolution() {
        assert_eq!(estimate_bitrate(23, Some((1920, 1080))), 5_000_000);
        assert_eq!(estimate_bitrate(17, Some((1280, 720))), 5_000_000);
        assert_eq!(estimate_bitrate(29, Some((1900, 1000))), 2_500_000);
        assert_eq!(estimate_bitrate(23, None), DEFAULT_BASE_BITRATE);
    }

    #[test]
    fn size_adds_container_overhead() {
        assert_eq!(estimate_size(10.0, Some(8_000_000), 23, None), 10_200_000);
    }

    #[test]
    fn human_formatting() {
        assert_eq!(format_duration(42.7), "42s");
        assert_eq!(format_duration(125.0), "2m 5s");
        assert_eq!(format_duration(3725.0), "1h 2m");
        assert_eq!(format_size(512), "512.00 B");
        assert_eq!(format_size(1536), "1.50 KB");
        assert_eq!(format_size(5 * 1024 * 1024), "5.00 MB");
    }
}
