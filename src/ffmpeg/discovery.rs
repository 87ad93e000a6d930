use crate::error::AppError;
use crate::settings::Settings;
use std::path::{Path, PathBuf};
use std::process::Command;

#[cfg(target_os = "windows")]
fn find_in_path(binary: &str) -> Option<PathBuf> {
    let output = Command::new("where").arg(binary).output().ok()?;
    if output.status.success() {
        let path = String::from_utf8_lossy(&output.stdout);
        let first = path.lines().next()?.trim();
        if !first.is_empty() {
            return Some(PathBuf::from(first));
        }
    }
    None
}

#[cfg(not(target_os = "windows"))]
fn find_in_path(binary: &str) -> Option<PathBuf> {
    let output = Command::new("which").arg(binary).output().ok()?;
    if output.status.success() {
        let path = String::from_utf8_lossy(&output.stdout);
        let first = path.lines().next()?.trim();
        if !first.is_empty() {
            return Some(PathBuf::from(first));
        }
    }
    None
}

fn common_paths() -> Vec<PathBuf> {
    #[cfg(target_os = "macos")]
    {
        vec![
            PathBuf::from("/opt/homebrew/bin/ffmpeg"),
            PathBuf::from("/usr/local/bin/ffmpeg"),
            PathBuf::from("/opt/local/bin/ffmpeg"),
        ]
    }

    #[cfg(target_os = "windows")]
    {
        vec![
            PathBuf::from("C:\\ffmpeg\\bin\\ffmpeg.exe"),
            PathBuf::from("C:\\Program Files\\ffmpeg\\bin\\ffmpeg.exe"),
        ]
    }

    #[cfg(all(unix, not(target_os = "macos")))]
    {
        vec![
            PathBuf::from("/usr/bin/ffmpeg"),
            PathBuf::from("/usr/local/bin/ffmpeg"),
        ]
    }

    #[cfg(not(any(target_os = "macos", target_os = "windows", unix)))]
    {
        vec![]
    }
}

fn resolve_ffmpeg_path(settings: &Settings) -> Result<PathBuf, AppError> {
    // 1. Explicit setting (or FFMPEG_PATH via Settings::from_env)
    if let Some(p) = settings.ffmpeg_path.as_ref() {
        if p.exists() {
            log::debug!(
                target: "video_toolbox::ffmpeg::discovery",
                "FFmpeg path from settings: {}",
                p.display()
            );
            return Ok(p.clone());
        }
        log::warn!(
            target: "video_toolbox::ffmpeg::discovery",
            "Configured FFmpeg path does not exist: {}",
            p.display()
        );
    }

    // 2. Pre-installed: common paths first to avoid spawning which/where
    for path in common_paths() {
        if path.exists() {
            log::debug!(
                target: "video_toolbox::ffmpeg::discovery",
                "FFmpeg found in common path: {}",
                path.display()
            );
            return Ok(path);
        }
    }

    // 3. Pre-installed: PATH
    if let Some(p) = find_in_path("ffmpeg")
        && p.exists()
    {
        log::debug!(
            target: "video_toolbox::ffmpeg::discovery",
            "FFmpeg found in PATH: {}",
            p.display()
        );
        return Ok(p);
    }

    log::error!(
        target: "video_toolbox::ffmpeg::discovery",
        "FFmpeg not found in PATH or common locations"
    );
    Err(AppError::FfmpegNotFound(
        "FFmpeg not found. Please install FFmpeg on your system:\n  - macOS: brew install ffmpeg\n  - Linux: sudo apt install ffmpeg\n  - Windows: Download from https://ffmpeg.org/download.html"
            .to_string(),
    ))
}

/// Paths to try for ffprobe given an ffmpeg binary path (suffixed first, then plain).
pub fn ffprobe_candidates(ffmpeg_path: &Path) -> Vec<PathBuf> {
    let parent = match ffmpeg_path.parent() {
        Some(p) => p,
        None => return vec![],
    };
    let mut candidates = Vec::with_capacity(2);
    let stem = ffmpeg_path.file_stem().and_then(|s| s.to_str());
    if let Some(suffix) = stem.and_then(|s| s.strip_prefix("ffmpeg"))
        && !suffix.is_empty()
    {
        #[cfg(target_os = "windows")]
        candidates.push(parent.join(format!("ffprobe{suffix}.exe")));
        #[cfg(not(target_os = "windows"))]
        candidates.push(parent.join(format!("ffprobe{suffix}")));
    }
    #[cfg(target_os = "windows")]
    candidates.push(parent.join("ffprobe.exe"));
    #[cfg(not(target_os = "windows"))]
    candidates.push(parent.join("ffprobe"));
    candidates
}

fn resolve_ffprobe_path(settings: &Settings, ffmpeg: &Path) -> Result<PathBuf, AppError> {
    if let Some(p) = settings.ffprobe_path.as_ref()
        && p.exists()
    {
        return Ok(p.clone());
    }
    if let Some(found) = ffprobe_candidates(ffmpeg).into_iter().find(|c| c.exists()) {
        return Ok(found);
    }
    if let Some(p) = find_in_path("ffprobe")
        && p.exists()
    {
        return Ok(p);
    }
    Err(AppError::FfmpegNotFound(format!(
        "ffprobe not found next to {} or in PATH",
        ffmpeg.display()
    )))
}

/// Resolved locations of the media tools. Built once from [`Settings`] and
/// shared by reference; re-resolve to pick up a changed installation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Toolchain {
    pub ffmpeg: PathBuf,
    pub ffprobe: PathBuf,
}

impl Toolchain {
    /// Resolution order: explicit setting, common install paths, PATH.
    /// ffprobe is looked up next to ffmpeg (matching a platform suffix) unless configured.
    pub fn resolve(settings: &Settings) -> Result<Self, AppError> {
        let ffmpeg = resolve_ffmpeg_path(settings)?;
        let ffprobe = resolve_ffprobe_path(settings, &ffmpeg)?;
        log::info!(
            target: "video_toolbox::ffmpeg::discovery",
            "Using ffmpeg={} ffprobe={}",
            ffmpeg.display(),
            ffprobe.display()
        );
        Ok(Self { ffmpeg, ffprobe })
    }

    /// Use the given binaries as-is, without existence checks.
    pub fn from_paths(ffmpeg: impl Into<PathBuf>, ffprobe: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            ffprobe: ffprobe.into(),
        }
    }
}
