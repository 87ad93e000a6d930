mod builder;
pub mod discovery;
mod error;
pub mod ffprobe;
pub mod hardware;
pub mod health;
mod process;
mod progress;
mod temp;

pub use builder::{
    MIN_VIDEO_BITRATE, PreparedCommand, build_concat_list, build_ffmpeg_args,
    check_join_compatibility, escape_concat_path, escape_filter_path,
    format_args_for_display_multiline, path_to_string, prepare_command,
    target_bitrate_for_percent, target_bitrate_for_size,
};
pub use discovery::Toolchain;
pub use error::{FfmpegErrorPayload, parse_ffmpeg_error};
pub use ffprobe::{FfprobeProbe, MediaInfo, MediaProbe, StreamInfo, StreamKind, parse_ffprobe_json};
pub use hardware::{Capabilities, FfmpegHardwareDetector, HardwareCapability};
pub use health::{HealthReport, HealthStatus, scan_health};
pub use process::{CapturedOutput, ProcessHandle, run_captured};
pub use progress::{parse_elapsed_seconds, parse_progress_percent};
pub use temp::{TempFile, TempFileManager};
