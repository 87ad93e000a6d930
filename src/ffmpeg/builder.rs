use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use super::ffprobe::{MediaInfo, MediaProbe};
use super::temp::{TempFile, TempFileManager};
use crate::codec;
use crate::error::AppError;
use crate::job::{JobSpec, Operation};

/// Lowest video bitrate (bits/s) the bitrate-targeting modes will request.
pub const MIN_VIDEO_BITRATE: u64 = 100_000;

/// libvpx-vp9 -cpu-used: 0-5 (0=slowest/best, 5=fastest). Maps x264-style preset names.
/// -deadline good with cpu-used. For "slow" and below we use deadline best.
static VP9_CPU_USED_MAP: LazyLock<HashMap<&'static str, (&'static str, &'static str)>> =
    LazyLock::new(|| {
        [
            ("ultrafast", ("good", "4")),
            ("superfast", ("good", "4")),
            ("veryfast", ("good", "3")),
            ("faster", ("good", "3")),
            ("fast", ("good", "2")),
            ("medium", ("good", "1")),
            ("slow", ("best", "0")),
            ("slower", ("best", "0")),
            ("veryslow", ("best", "0")),
        ]
        .into_iter()
        .collect()
    });

/// For VP9: returns (deadline, cpu_used). For other codecs returns None.
fn get_vp9_speed(preset: &str, codec_lower: &str) -> Option<(&'static str, &'static str)> {
    if codec_lower.contains("vp9") || codec_lower.contains("vpx") {
        VP9_CPU_USED_MAP
            .get(preset)
            .copied()
            .or(Some(("good", "2")))
    } else {
        None
    }
}

pub fn path_to_string(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// Quoting for one `file '...'` line of a concat-demuxer list.
pub fn escape_concat_path(path: &Path) -> String {
    path_to_string(path)
        .replace('\\', "/")
        .replace('\'', "'\\''")
}

/// Escaping for a path embedded in the single-quoted `subtitles=` filter
/// argument. Quotes close the string, emit an escaped quote and reopen it.
pub fn escape_filter_path(path: &Path) -> String {
    path_to_string(path)
        .replace('\\', "/")
        .replace(':', "\\:")
        .replace('\'', "'\\''")
}

pub fn build_concat_list(inputs: &[PathBuf]) -> String {
    inputs
        .iter()
        .map(|p| format!("file '{}'\n", escape_concat_path(p)))
        .collect()
}

/// Video bitrate that lands an encode near `target_size_mb`, after audio.
pub fn target_bitrate_for_size(
    target_size_mb: f64,
    duration_secs: f64,
    audio_bitrate_bps: u64,
) -> Result<u64, AppError> {
    if !duration_secs.is_finite() || duration_secs <= 0.0 {
        return Err(AppError::probe(
            "cannot target an output size without a known duration",
        ));
    }
    let total_bps = target_size_mb * 1024.0 * 1024.0 * 8.0 / duration_secs;
    let video_bps = (total_bps - audio_bitrate_bps as f64).floor();
    if video_bps < MIN_VIDEO_BITRATE as f64 {
        return Ok(MIN_VIDEO_BITRATE);
    }
    Ok(video_bps as u64)
}

/// Current video bitrate scaled by `percent`, with the same floor.
pub fn target_bitrate_for_percent(current_bps: u64, percent: u32) -> u64 {
    let scaled = (current_bps as f64 * f64::from(percent) / 100.0).floor() as u64;
    scaled.max(MIN_VIDEO_BITRATE)
}

fn subtitle_codec_for_container(container: &str) -> &'static str {
    match container {
        "mp4" | "mov" | "m4v" => "mov_text",
        "webm" => "webvtt",
        _ => "srt",
    }
}

/// Audio codec and whether it takes a bitrate.
fn audio_codec_for_format(format: &str) -> Result<(&'static str, bool), AppError> {
    match format.to_lowercase().as_str() {
        "mp3" => Ok(("libmp3lame", true)),
        "aac" | "m4a" => Ok(("aac", true)),
        "wav" => Ok(("pcm_s16le", false)),
        "flac" => Ok(("flac", false)),
        "ogg" => Ok(("libvorbis", true)),
        "opus" => Ok(("libopus", true)),
        other => Err(AppError::configuration(format!(
            "unsupported audio format: {}",
            other
        ))),
    }
}

fn is_quicktime(container: &str) -> bool {
    matches!(container, "mp4" | "mov" | "m4v")
}

enum RateControl {
    Quality(u32),
    Bitrate(u64),
}

fn push_video_codec(args: &mut Vec<String>, spec: &JobSpec, rate: RateControl) {
    let encoder = spec.encoder();
    let codec_lower = encoder.to_lowercase();
    let preset = spec.params.effective_preset();
    let container = spec.container();
    let vp9_speed = get_vp9_speed(preset, &codec_lower);

    args.extend(["-c:v".to_string(), encoder.clone()]);
    match vp9_speed {
        Some((deadline, cpu_used)) => {
            args.extend(["-deadline".to_string(), deadline.to_string()]);
            args.extend(["-cpu-used".to_string(), cpu_used.to_string()]);
            args.extend(["-row-mt".to_string(), "1".to_string()]);
        }
        None => {
            args.extend(["-preset".to_string(), codec::map_preset(preset, &encoder)]);
        }
    }
    match rate {
        RateControl::Quality(q) => {
            args.extend([codec::quality_flag(&encoder).to_string(), q.to_string()]);
            if vp9_speed.is_some() {
                args.extend(["-b:v".to_string(), "0".to_string()]);
            }
        }
        RateControl::Bitrate(bps) => {
            args.extend(["-b:v".to_string(), bps.to_string()]);
        }
    }

    if codec_lower.contains("svtav1") {
        args.extend(["-pix_fmt".to_string(), "yuv420p".to_string()]);
    }
    if (codec_lower.contains("x265") || codec_lower.contains("hevc")) && is_quicktime(&container) {
        args.extend(["-tag:v".to_string(), "hvc1".to_string()]);
    }
}

fn push_audio_encode(args: &mut Vec<String>, spec: &JobSpec) {
    let codec = if spec.container() == "webm" {
        "libopus"
    } else {
        "aac"
    };
    args.extend([
        "-c:a".to_string(),
        codec.to_string(),
        "-b:a".to_string(),
        format!("{}k", spec.params.effective_audio_bitrate_kbps()),
    ]);
}

fn push_container_flags(args: &mut Vec<String>, spec: &JobSpec) {
    if is_quicktime(&spec.container()) {
        args.extend(["-movflags".to_string(), "+faststart".to_string()]);
    }
}

fn quality(spec: &JobSpec) -> RateControl {
    RateControl::Quality(spec.params.effective_quality())
}

/// Builds the full ffmpeg argument list for `spec`.
///
/// `media` holds probe results for the inputs, in input order; it may be empty
/// for operations that don't need them. `concat_list` is the path of the
/// concat-demuxer list for joins. Same inputs always give the same output.
pub fn build_ffmpeg_args(
    spec: &JobSpec,
    media: &[MediaInfo],
    concat_list: Option<&Path>,
) -> Result<Vec<String>, AppError> {
    let op = &spec.operation;
    let output = spec.output_path()?;
    let input = spec
        .inputs
        .first()
        .ok_or_else(|| AppError::configuration("no input file"))?;
    let encoder = spec.encoder();

    log::debug!(
        target: "video_toolbox::ffmpeg::builder",
        "Building FFmpeg command: op={}, encoder={}, preset={}, input={} -> output={}",
        op.name(),
        encoder,
        spec.params.effective_preset(),
        input.display(),
        output.display()
    );

    let mut args: Vec<String> = [
        "-hide_banner",
        "-nostdin",
        "-y",
        "-progress",
        "pipe:2",
    ]
    .into_iter()
    .map(String::from)
    .collect();

    if op.encodes_video() && codec::is_hardware_encoder(&encoder) {
        args.extend(["-hwaccel".to_string(), "cuda".to_string()]);
    }

    match op {
        Operation::Convert => {
            args.extend(["-i".to_string(), path_to_string(input)]);
            push_video_codec(&mut args, spec, quality(spec));
            push_audio_encode(&mut args, spec);
            push_container_flags(&mut args, spec);
        }
        Operation::CompressToSize { target_size_mb } => {
            let duration = media.first().map(|m| m.duration_seconds).unwrap_or(0.0);
            let audio_bps = u64::from(spec.params.effective_audio_bitrate_kbps()) * 1000;
            let bps = target_bitrate_for_size(*target_size_mb, duration, audio_bps)?;
            args.extend(["-i".to_string(), path_to_string(input)]);
            push_video_codec(&mut args, spec, RateControl::Bitrate(bps));
            push_audio_encode(&mut args, spec);
            push_container_flags(&mut args, spec);
        }
        Operation::CompressByPercent { percent } => {
            let current = media
                .first()
                .and_then(MediaInfo::video_bit_rate)
                .ok_or_else(|| {
                    AppError::probe(format!(
                        "could not read the video bitrate of {}",
                        input.display()
                    ))
                })?;
            let bps = target_bitrate_for_percent(current, *percent);
            args.extend(["-i".to_string(), path_to_string(input)]);
            push_video_codec(&mut args, spec, RateControl::Bitrate(bps));
            push_audio_encode(&mut args, spec);
            push_container_flags(&mut args, spec);
        }
        Operation::ChangeResolution {
            width,
            height,
            keep_aspect,
            reencode_audio,
        } => {
            let filter = match (keep_aspect, height) {
                (false, Some(h)) => format!("scale={}:{}", width, h),
                _ => format!("scale={}:-2", width),
            };
            args.extend(["-i".to_string(), path_to_string(input)]);
            args.extend(["-vf".to_string(), filter]);
            push_video_codec(&mut args, spec, quality(spec));
            if *reencode_audio {
                push_audio_encode(&mut args, spec);
            } else {
                args.extend(["-c:a".to_string(), "copy".to_string()]);
            }
            push_container_flags(&mut args, spec);
        }
        Operation::Join => {
            let list = concat_list
                .ok_or_else(|| AppError::configuration("join requires a concat list"))?;
            args.extend([
                "-f".to_string(),
                "concat".to_string(),
                "-safe".to_string(),
                "0".to_string(),
                "-i".to_string(),
                path_to_string(list),
            ]);
            push_video_codec(&mut args, spec, quality(spec));
            push_audio_encode(&mut args, spec);
            push_container_flags(&mut args, spec);
        }
        Operation::ExtractAudio { format } => {
            let (audio_codec, takes_bitrate) = audio_codec_for_format(format)?;
            args.extend(["-i".to_string(), path_to_string(input)]);
            args.extend(["-vn".to_string(), "-c:a".to_string(), audio_codec.to_string()]);
            if takes_bitrate {
                args.extend([
                    "-b:a".to_string(),
                    format!("{}k", spec.params.effective_audio_bitrate_kbps()),
                ]);
            }
        }
        Operation::AddSubtitle { subtitle_path } => {
            let sub = subtitle_path
                .as_deref()
                .ok_or_else(|| AppError::configuration("addSubtitle requires a subtitle file"))?;
            args.extend(["-i".to_string(), path_to_string(input)]);
            args.extend(["-i".to_string(), path_to_string(sub)]);
            args.extend(
                ["-map", "0:v", "-map", "0:a?", "-map", "1:0"]
                    .into_iter()
                    .map(String::from),
            );
            push_video_codec(&mut args, spec, quality(spec));
            args.extend(["-c:a".to_string(), "copy".to_string()]);
            args.extend([
                "-c:s".to_string(),
                subtitle_codec_for_container(&spec.container()).to_string(),
            ]);
            push_container_flags(&mut args, spec);
        }
        Operation::BurnSubtitle { subtitle_path } => {
            let sub = subtitle_path
                .as_deref()
                .ok_or_else(|| AppError::configuration("burnSubtitle requires a subtitle file"))?;
            args.extend(["-i".to_string(), path_to_string(input)]);
            args.extend([
                "-vf".to_string(),
                format!("subtitles='{}'", escape_filter_path(sub)),
            ]);
            push_video_codec(&mut args, spec, quality(spec));
            args.extend(["-c:a".to_string(), "copy".to_string()]);
            push_container_flags(&mut args, spec);
        }
        Operation::ExtractSubtitle { stream_index } => {
            args.extend(["-i".to_string(), path_to_string(input)]);
            args.extend([
                "-map".to_string(),
                format!("0:s:{}", stream_index),
                "-c:s".to_string(),
                "copy".to_string(),
            ]);
        }
        Operation::Repair => {
            args.extend([
                "-err_detect".to_string(),
                "ignore_err".to_string(),
                "-i".to_string(),
                path_to_string(input),
                "-c".to_string(),
                "copy".to_string(),
            ]);
        }
    }

    args.push(path_to_string(output));
    Ok(args)
}

/// Arguments for an ffprobe metadata query with JSON output.
pub fn build_probe_args(path: &Path) -> Vec<String> {
    vec![
        "-v".to_string(),
        "error".to_string(),
        "-print_format".to_string(),
        "json".to_string(),
        "-show_format".to_string(),
        "-show_streams".to_string(),
        path_to_string(path),
    ]
}

/// Arguments for a decode-only pass that reports stream errors on stderr.
pub fn build_health_args(path: &Path) -> Vec<String> {
    vec![
        "-hide_banner".to_string(),
        "-nostdin".to_string(),
        "-v".to_string(),
        "error".to_string(),
        "-i".to_string(),
        path_to_string(path),
        "-f".to_string(),
        "null".to_string(),
        "-".to_string(),
    ]
}

/// A fully built command plus what the runner needs alongside it.
/// Holds the join concat list, which is deleted when this value drops.
#[derive(Debug)]
pub struct PreparedCommand {
    pub args: Vec<String>,
    pub inputs: Vec<PathBuf>,
    pub output: PathBuf,
    /// Progress denominator. Zero when unknown.
    pub duration_seconds: f64,
    concat_list: Option<TempFile>,
}

impl PreparedCommand {
    pub fn concat_list_path(&self) -> Option<&Path> {
        self.concat_list.as_ref().map(TempFile::path)
    }
}

/// Inputs to a join must share dimensions and (within 1 fps) frame rate.
pub fn check_join_compatibility(inputs: &[PathBuf], media: &[MediaInfo]) -> Result<(), AppError> {
    if inputs.len() < 2 {
        return Err(AppError::configuration("join requires at least 2 input files"));
    }
    let first = media.first().ok_or_else(|| {
        AppError::configuration("join inputs were not probed")
    })?;
    let (w, h) = first.resolution().ok_or_else(|| {
        AppError::configuration(format!(
            "could not read the video stream of {}",
            inputs[0].display()
        ))
    })?;
    for (path, info) in inputs.iter().zip(media).skip(1) {
        let Some((ow, oh)) = info.resolution() else {
            return Err(AppError::configuration(format!(
                "could not read the video stream of {}",
                path.display()
            )));
        };
        if (ow, oh) != (w, h) {
            return Err(AppError::configuration(format!(
                "{} is {}x{}, expected {}x{}",
                path.display(),
                ow,
                oh,
                w,
                h
            )));
        }
        if let (Some(a), Some(b)) = (first.fps(), info.fps())
            && (a - b).abs() > 1.0
        {
            return Err(AppError::configuration(format!(
                "{} runs at {:.2} fps, expected {:.2}",
                path.display(),
                b,
                a
            )));
        }
    }
    Ok(())
}

fn probe_inputs(spec: &JobSpec, probe: &dyn MediaProbe) -> Result<Vec<MediaInfo>, AppError> {
    let op = &spec.operation;
    if matches!(op, Operation::Join) {
        return spec.inputs.iter().map(|p| probe.probe(p)).collect();
    }
    let input = &spec.inputs[0];
    match probe.probe(input) {
        Ok(info) => Ok(vec![info]),
        Err(e) if op.requires_probe() => Err(e),
        Err(e) => {
            log::warn!(
                target: "video_toolbox::ffmpeg::builder",
                "Probe failed for {}, progress will stay at 0 until completion: {}",
                input.display(),
                e
            );
            Ok(vec![MediaInfo::default()])
        }
    }
}

/// Validates, probes and renders `spec` into a runnable command.
/// Fails before anything is launched on bad parameters or required metadata.
pub fn prepare_command(
    spec: &JobSpec,
    probe: &dyn MediaProbe,
    temp: &TempFileManager,
) -> Result<PreparedCommand, AppError> {
    spec.validate()?;
    let media = probe_inputs(spec, probe)?;

    let mut concat_list = None;
    let duration_seconds = if matches!(spec.operation, Operation::Join) {
        check_join_compatibility(&spec.inputs, &media)?;
        let list = build_concat_list(&spec.inputs);
        let file = temp.create("concat.txt", list.as_bytes()).map_err(|e| {
            AppError::filesystem(format!("failed to write concat list: {}", e))
        })?;
        concat_list = Some(file);
        media
            .iter()
            .map(|m| m.duration_seconds)
            .filter(|d| *d > 0.0)
            .sum::<f64>()
    } else {
        media.first().map(|m| m.duration_seconds).unwrap_or(0.0)
    };

    let args = build_ffmpeg_args(
        spec,
        &media,
        concat_list.as_ref().map(TempFile::path),
    )?;
    let output = spec.output_path()?.to_path_buf();
    Ok(PreparedCommand {
        args,
        inputs: spec.inputs.clone(),
        output,
        duration_seconds,
        concat_list,
    })
}

/// Formats args for readable display: option and value on the same line when the next arg is a value.
pub fn format_args_for_display_multiline(args: &[String]) -> String {
    if args.is_empty() {
        return String::new();
    }
    let mut lines = Vec::new();
    let mut i = 0;
    while i < args.len() {
        let arg = &args[i];
        let line = if arg.starts_with('-')
            && i + 1 < args.len()
            && !args[i + 1].starts_with('-')
        {
            let value = &args[i + 1];
            i += 2;
            format!("  {} {}", arg, value)
        } else {
            i += 1;
            format!("  {}", arg)
        };
        lines.push(line);
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ffmpeg::ffprobe::{StreamInfo, StreamKind};
    use crate::job::JobParams;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn video(duration: f64, w: u32, h: u32, fps: f64, bps: Option<u64>) -> MediaInfo {
        MediaInfo {
            duration_seconds: duration,
            streams: vec![StreamInfo {
                index: 0,
                kind: StreamKind::Video,
                codec_name: Some("h264".into()),
                width: Some(w),
                height: Some(h),
                fps: Some(fps),
                bit_rate: bps,
                channels: None,
                sample_rate: None,
                language: None,
            }],
            ..MediaInfo::default()
        }
    }

    struct MapProbe {
        media: HashMap<PathBuf, MediaInfo>,
        calls: AtomicUsize,
    }

    impl MapProbe {
        fn new(entries: Vec<(&str, MediaInfo)>) -> Self {
            Self {
                media: entries
                    .into_iter()
                    .map(|(p, m)| (PathBuf::from(p), m))
                    .collect(),
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl MediaProbe for MapProbe {
        fn probe(&self, path: &Path) -> Result<MediaInfo, AppError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.media
                .get(path)
                .cloned()
                .ok_or_else(|| AppError::probe(format!("no such file: {}", path.display())))
        }
    }

    fn spec(op: Operation, output: &str) -> JobSpec {
        JobSpec::new(op, vec!["/in.mp4".into()], output)
    }

    fn value_after<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
        let idx = args.iter().position(|a| a == flag)?;
        args.get(idx + 1).map(String::as_str)
    }

    fn count(args: &[String], needle: &str) -> usize {
        args.iter().filter(|a| *a == needle).count()
    }

    #[test]
    fn convert_default_args() {
        let args = build_ffmpeg_args(&spec(Operation::Convert, "/out.mp4"), &[], None).unwrap();
        assert_eq!(value_after(&args, "-i"), Some("/in.mp4"));
        assert_eq!(value_after(&args, "-c:v"), Some("libx264"));
        assert_eq!(value_after(&args, "-preset"), Some("medium"));
        assert_eq!(value_after(&args, "-crf"), Some("23"));
        assert_eq!(value_after(&args, "-c:a"), Some("aac"));
        assert_eq!(value_after(&args, "-b:a"), Some("128k"));
        assert_eq!(value_after(&args, "-progress"), Some("pipe:2"));
        assert_eq!(value_after(&args, "-movflags"), Some("+faststart"));
        assert_eq!(args.last().map(String::as_str), Some("/out.mp4"));
    }

    #[test]
    fn every_combination_has_one_overwrite_flag_and_one_output() {
        let encoders = ["libx264", "libx265", "h264_nvenc", "libvpx-vp9", "libsvtav1"];
        let presets = ["ultrafast", "medium", "slow"];
        let containers = ["mp4", "mkv", "webm"];
        for encoder in encoders {
            for preset in presets {
                for container in containers {
                    let output = format!("/out.{}", container);
                    let s = spec(Operation::Convert, &output).with_params(JobParams {
                        encoder: Some(encoder.into()),
                        preset: Some(preset.into()),
                        quality: Some(28),
                        container: Some(container.into()),
                        audio_bitrate_kbps: None,
                    });
                    let before = s.clone();
                    let args = build_ffmpeg_args(&s, &[], None).unwrap();
                    assert_eq!(count(&args, "-y"), 1, "{encoder}/{preset}/{container}");
                    assert_eq!(count(&args, &output), 1);
                    assert_eq!(args.last(), Some(&output));
                    assert_eq!(s, before, "builder must not mutate its input");
                }
            }
        }
    }

    #[test]
    fn build_is_deterministic() {
        let s = spec(Operation::CompressByPercent { percent: 40 }, "/out.mkv");
        let media = [video(60.0, 1920, 1080, 30.0, Some(4_000_000))];
        assert_eq!(
            build_ffmpeg_args(&s, &media, None).unwrap(),
            build_ffmpeg_args(&s, &media, None).unwrap()
        );
    }

    #[test]
    fn nvenc_adds_hwaccel_before_input_and_uses_cq() {
        let s = spec(Operation::Convert, "/out.mp4").with_params(JobParams {
            encoder: Some("h264_nvenc".into()),
            preset: Some("slow".into()),
            ..JobParams::default()
        });
        let args = build_ffmpeg_args(&s, &[], None).unwrap();
        let hw = args.iter().position(|a| a == "-hwaccel").unwrap();
        let input = args.iter().position(|a| a == "-i").unwrap();
        assert!(hw < input);
        assert_eq!(value_after(&args, "-hwaccel"), Some("cuda"));
        assert_eq!(value_after(&args, "-preset"), Some("p5"));
        assert_eq!(value_after(&args, "-cq"), Some("23"));
        assert!(!args.contains(&"-crf".to_string()));
    }

    #[test]
    fn software_encoder_has_no_hwaccel() {
        let args = build_ffmpeg_args(&spec(Operation::Convert, "/out.mp4"), &[], None).unwrap();
        assert!(!args.contains(&"-hwaccel".to_string()));
    }

    #[test]
    fn vp9_uses_deadline_cpu_used_bv0() {
        let s = spec(Operation::Convert, "/out.webm").with_params(JobParams {
            preset: Some("fast".into()),
            ..JobParams::default()
        });
        let args = build_ffmpeg_args(&s, &[], None).unwrap();
        assert_eq!(value_after(&args, "-c:v"), Some("libvpx-vp9"));
        assert_eq!(value_after(&args, "-deadline"), Some("good"));
        assert_eq!(value_after(&args, "-cpu-used"), Some("2"));
        assert_eq!(value_after(&args, "-b:v"), Some("0"));
        assert!(!args.contains(&"-preset".to_string()));
        assert_eq!(value_after(&args, "-c:a"), Some("libopus"));
        assert!(!args.contains(&"-movflags".to_string()));
    }

    #[test]
    fn h265_adds_hvc1_tag_for_quicktime_only() {
        let params = JobParams {
            encoder: Some("libx265".into()),
            ..JobParams::default()
        };
        let mp4 = build_ffmpeg_args(&spec(Operation::Convert, "/o.mp4").with_params(params.clone()), &[], None)
            .unwrap();
        assert_eq!(value_after(&mp4, "-tag:v"), Some("hvc1"));
        let mkv = build_ffmpeg_args(&spec(Operation::Convert, "/o.mkv").with_params(params), &[], None)
            .unwrap();
        assert!(!mkv.contains(&"-tag:v".to_string()));
    }

    #[test]
    fn compress_to_size_bitrate() {
        let expected = ((50.0 * 1024.0 * 1024.0 * 8.0 / 120.0) - 128_000.0_f64).floor() as u64;
        assert_eq!(target_bitrate_for_size(50.0, 120.0, 128_000).unwrap(), expected);
        assert_eq!(expected, 3_367_253);

        let s = spec(
            Operation::CompressToSize {
                target_size_mb: 50.0,
            },
            "/out.mp4",
        );
        let args = build_ffmpeg_args(&s, &[video(120.0, 1280, 720, 30.0, None)], None).unwrap();
        assert_eq!(value_after(&args, "-b:v"), Some("3367253"));
        assert!(!args.contains(&"-crf".to_string()));
    }

    #[test]
    fn compress_to_size_clamps_to_floor() {
        assert_eq!(target_bitrate_for_size(1.0, 3600.0, 128_000).unwrap(), MIN_VIDEO_BITRATE);
    }

    #[test]
    fn compress_to_size_uses_configured_audio_bitrate() {
        let s = spec(
            Operation::CompressToSize {
                target_size_mb: 50.0,
            },
            "/out.mp4",
        )
        .with_params(JobParams {
            audio_bitrate_kbps: Some(96),
            ..JobParams::default()
        });
        let args = build_ffmpeg_args(&s, &[video(120.0, 1280, 720, 30.0, None)], None).unwrap();
        let expected = ((50.0 * 1024.0 * 1024.0 * 8.0 / 120.0) - 96_000.0_f64).floor() as u64;
        assert_eq!(value_after(&args, "-b:v"), Some(expected.to_string().as_str()));
        assert_eq!(value_after(&args, "-b:a"), Some("96k"));
    }

    #[test]
    fn compress_to_size_without_duration_is_probe_error() {
        let err = target_bitrate_for_size(50.0, 0.0, 128_000).unwrap_err();
        assert!(matches!(err, AppError::Probe(_)));
    }

    #[test]
    fn compress_by_percent() {
        assert_eq!(target_bitrate_for_percent(4_000_000, 50), 2_000_000);
        assert_eq!(target_bitrate_for_percent(150_000, 10), MIN_VIDEO_BITRATE);
        let s = spec(Operation::CompressByPercent { percent: 25 }, "/out.mp4");
        let args =
            build_ffmpeg_args(&s, &[video(60.0, 1920, 1080, 30.0, Some(8_000_000))], None).unwrap();
        assert_eq!(value_after(&args, "-b:v"), Some("2000000"));
    }

    #[test]
    fn compress_by_percent_without_bitrate_is_probe_error() {
        let s = spec(Operation::CompressByPercent { percent: 25 }, "/out.mp4");
        let err = build_ffmpeg_args(&s, &[video(60.0, 1920, 1080, 30.0, None)], None).unwrap_err();
        assert!(matches!(err, AppError::Probe(_)));
    }

    #[test]
    fn resolution_keep_aspect_constrains_width() {
        let s = spec(
            Operation::ChangeResolution {
                width: 1280,
                height: Some(720),
                keep_aspect: true,
                reencode_audio: false,
            },
            "/out.mp4",
        );
        let args = build_ffmpeg_args(&s, &[], None).unwrap();
        assert_eq!(value_after(&args, "-vf"), Some("scale=1280:-2"));
        assert_eq!(value_after(&args, "-c:a"), Some("copy"));
    }

    #[test]
    fn resolution_forced_dimensions() {
        let s = spec(
            Operation::ChangeResolution {
                width: 640,
                height: Some(480),
                keep_aspect: false,
                reencode_audio: false,
            },
            "/out.mp4",
        );
        let args = build_ffmpeg_args(&s, &[], None).unwrap();
        assert_eq!(value_after(&args, "-vf"), Some("scale=640:480"));
    }

    #[test]
    fn resolution_can_reencode_audio() {
        let s = spec(
            Operation::ChangeResolution {
                width: 854,
                height: Some(480),
                keep_aspect: false,
                reencode_audio: true,
            },
            "/out.mp4",
        )
        .with_params(JobParams {
            audio_bitrate_kbps: Some(96),
            ..JobParams::default()
        });
        let args = build_ffmpeg_args(&s, &[], None).unwrap();
        assert_eq!(value_after(&args, "-c:a"), Some("aac"));
        assert_eq!(value_after(&args, "-b:a"), Some("96k"));
    }

    #[test]
    fn concat_list_escapes_quotes_and_backslashes() {
        let list = build_concat_list(&[
            PathBuf::from("/videos/it's.mp4"),
            PathBuf::from("C:\\clips\\b.mp4"),
        ]);
        assert_eq!(
            list,
            "file '/videos/it'\\''s.mp4'\nfile 'C:/clips/b.mp4'\n"
        );
    }

    #[test]
    fn join_uses_concat_demuxer() {
        let s = JobSpec::new(Operation::Join, vec!["/a.mp4".into(), "/b.mp4".into()], "/ab.mp4");
        let args = build_ffmpeg_args(&s, &[], Some(Path::new("/tmp/list.txt"))).unwrap();
        assert_eq!(value_after(&args, "-f"), Some("concat"));
        assert_eq!(value_after(&args, "-safe"), Some("0"));
        assert_eq!(value_after(&args, "-i"), Some("/tmp/list.txt"));
        assert_eq!(count(&args, "-i"), 1);
    }

    #[test]
    fn add_subtitle_picks_codec_for_container() {
        let op = Operation::AddSubtitle {
            subtitle_path: Some("/subs/a.srt".into()),
        };
        let mp4 = build_ffmpeg_args(&spec(op.clone(), "/out.mp4"), &[], None).unwrap();
        assert_eq!(value_after(&mp4, "-c:s"), Some("mov_text"));
        assert_eq!(count(&mp4, "-i"), 2);
        assert!(mp4.contains(&"1:0".to_string()));
        assert_eq!(value_after(&mp4, "-c:a"), Some("copy"));
        let mkv = build_ffmpeg_args(&spec(op.clone(), "/out.mkv"), &[], None).unwrap();
        assert_eq!(value_after(&mkv, "-c:s"), Some("srt"));
        let webm = build_ffmpeg_args(&spec(op, "/out.webm"), &[], None).unwrap();
        assert_eq!(value_after(&webm, "-c:s"), Some("webvtt"));
    }

    #[test]
    fn burn_subtitle_escapes_filter_path() {
        let s = spec(
            Operation::BurnSubtitle {
                subtitle_path: Some("C:\\subs\\movie.srt".into()),
            },
            "/out.mp4",
        );
        let args = build_ffmpeg_args(&s, &[], None).unwrap();
        assert_eq!(
            value_after(&args, "-vf"),
            Some("subtitles='C\\:/subs/movie.srt'")
        );
    }

    #[test]
    fn burn_subtitle_quotes_apostrophes() {
        let s = spec(
            Operation::BurnSubtitle {
                subtitle_path: Some("/subs/director's cut.srt".into()),
            },
            "/out.mp4",
        );
        let args = build_ffmpeg_args(&s, &[], None).unwrap();
        assert_eq!(
            value_after(&args, "-vf"),
            Some("subtitles='/subs/director'\\''s cut.srt'")
        );
    }

    #[test]
    fn extract_subtitle_is_stream_copy() {
        let s = spec(Operation::ExtractSubtitle { stream_index: 1 }, "/out.srt");
        let args = build_ffmpeg_args(&s, &[], None).unwrap();
        assert_eq!(value_after(&args, "-map"), Some("0:s:1"));
        assert_eq!(value_after(&args, "-c:s"), Some("copy"));
        assert!(!args.contains(&"-c:v".to_string()));
    }

    #[test]
    fn extract_audio_codec_table() {
        let cases = [
            ("mp3", "libmp3lame", true),
            ("aac", "aac", true),
            ("m4a", "aac", true),
            ("wav", "pcm_s16le", false),
            ("flac", "flac", false),
            ("ogg", "libvorbis", true),
            ("opus", "libopus", true),
        ];
        for (format, codec, has_bitrate) in cases {
            let s = spec(
                Operation::ExtractAudio {
                    format: format.into(),
                },
                &format!("/out.{}", format),
            );
            let args = build_ffmpeg_args(&s, &[], None).unwrap();
            assert!(args.contains(&"-vn".to_string()));
            assert_eq!(value_after(&args, "-c:a"), Some(codec), "{format}");
            assert_eq!(args.contains(&"-b:a".to_string()), has_bitrate, "{format}");
        }
    }

    #[test]
    fn extract_audio_never_uses_hwaccel() {
        let s = spec(
            Operation::ExtractAudio {
                format: "mp3".into(),
            },
            "/out.mp3",
        )
        .with_params(JobParams {
            encoder: Some("h264_nvenc".into()),
            ..JobParams::default()
        });
        let args = build_ffmpeg_args(&s, &[], None).unwrap();
        assert!(!args.contains(&"-hwaccel".to_string()));
    }

    #[test]
    fn repair_is_error_tolerant_stream_copy() {
        let args = build_ffmpeg_args(&spec(Operation::Repair, "/fixed.mp4"), &[], None).unwrap();
        let err_detect = args.iter().position(|a| a == "-err_detect").unwrap();
        let input = args.iter().position(|a| a == "-i").unwrap();
        assert!(err_detect < input);
        assert_eq!(value_after(&args, "-err_detect"), Some("ignore_err"));
        assert_eq!(value_after(&args, "-c"), Some("copy"));
    }

    #[test]
    fn probe_args_request_json() {
        let args = build_probe_args(Path::new("/v/a.mkv"));
        assert_eq!(value_after(&args, "-print_format"), Some("json"));
        assert!(args.contains(&"-show_format".to_string()));
        assert!(args.contains(&"-show_streams".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("/v/a.mkv"));
    }

    #[test]
    fn health_args_decode_to_null() {
        let args = build_health_args(Path::new("/v/a.mkv"));
        assert_eq!(value_after(&args, "-f"), Some("null"));
        assert_eq!(args.last().map(String::as_str), Some("-"));
    }

    #[test]
    fn prepare_rejects_bad_spec_before_probing() {
        let probe = MapProbe::new(vec![]);
        let s = spec(
            Operation::AddSubtitle {
                subtitle_path: None,
            },
            "/out.mp4",
        );
        let err = prepare_command(&s, &probe, &TempFileManager::default()).unwrap_err();
        assert!(err.is_configuration());
        assert_eq!(probe.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn prepare_tolerates_probe_failure_for_convert() {
        let probe = MapProbe::new(vec![]);
        let cmd = prepare_command(
            &spec(Operation::Convert, "/out.mp4"),
            &probe,
            &TempFileManager::default(),
        )
        .unwrap();
        assert_eq!(cmd.duration_seconds, 0.0);
        assert_eq!(cmd.output, PathBuf::from("/out.mp4"));
    }

    #[test]
    fn prepare_propagates_probe_failure_for_compress() {
        let probe = MapProbe::new(vec![]);
        let s = spec(Operation::CompressByPercent { percent: 50 }, "/out.mp4");
        let err = prepare_command(&s, &probe, &TempFileManager::default()).unwrap_err();
        assert!(matches!(err, AppError::Probe(_)));
    }

    #[test]
    fn prepare_join_writes_list_and_removes_it_on_drop() {
        let dir = tempfile::tempdir().expect("tempdir");
        let probe = MapProbe::new(vec![
            ("/a.mp4", video(10.0, 1280, 720, 30.0, None)),
            ("/b.mp4", video(5.5, 1280, 720, 29.97, None)),
        ]);
        let s = JobSpec::new(Operation::Join, vec!["/a.mp4".into(), "/b.mp4".into()], "/ab.mp4");
        let cmd = prepare_command(&s, &probe, &TempFileManager::in_dir(dir.path())).unwrap();
        assert_eq!(cmd.duration_seconds, 15.5);
        let list = cmd.concat_list_path().unwrap().to_path_buf();
        assert_eq!(
            std::fs::read_to_string(&list).unwrap(),
            "file '/a.mp4'\nfile '/b.mp4'\n"
        );
        assert_eq!(value_after(&cmd.args, "-i"), Some(path_to_string(&list).as_str()));
        drop(cmd);
        assert!(!list.exists());
    }

    #[test]
    fn join_rejects_mismatched_resolution() {
        let probe = MapProbe::new(vec![
            ("/a.mp4", video(10.0, 1280, 720, 30.0, None)),
            ("/b.mp4", video(10.0, 1920, 1080, 30.0, None)),
        ]);
        let s = JobSpec::new(Operation::Join, vec!["/a.mp4".into(), "/b.mp4".into()], "/ab.mp4");
        let err = prepare_command(&s, &probe, &TempFileManager::default()).unwrap_err();
        assert!(err.is_configuration());
        assert!(err.to_string().contains("1920x1080"));
    }

    #[test]
    fn join_rejects_mismatched_fps() {
        let media = [
            video(10.0, 1280, 720, 30.0, None),
            video(10.0, 1280, 720, 60.0, None),
        ];
        let inputs = [PathBuf::from("/a.mp4"), PathBuf::from("/b.mp4")];
        assert!(check_join_compatibility(&inputs, &media).is_err());
    }

    #[test]
    fn display_multiline_pairs_flags_with_values() {
        let args: Vec<String> = ["-y", "-i", "/in.mp4", "-vn", "/out.mp3"]
            .into_iter()
            .map(String::from)
            .collect();
        assert_eq!(
            format_args_for_display_multiline(&args),
            "  -y\n  -i /in.mp4\n  -vn /out.mp3"
        );
    }
}
