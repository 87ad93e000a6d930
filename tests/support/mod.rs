#![allow(dead_code)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::mpsc::Receiver;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tempfile::TempDir;
use video_toolbox_core::error::AppError;
use video_toolbox_core::ffmpeg::{
    MediaInfo, MediaProbe, StreamInfo, StreamKind, TempFileManager, Toolchain,
};
use video_toolbox_core::runner::ToolContext;

/// Fake ffmpeg: emits `-progress` blocks on stderr, one per step, then
/// creates the output (last argument). Outputs containing "fail" exit 1.
/// Any concat list it is handed is copied to `<script>.concat` and the full
/// argument list is written to `<script>.args`.
const FAKE_FFMPEG: &str = r#"#!/bin/sh
printf '%s\n' "$@" > "$0.args"
for last; do :; done
for a; do
  case "$a" in *concat.txt) cp "$a" "$0.concat" ;; esac
done
case "$last" in
  *fail*)
    echo "[in#0 @ 0x1] Error opening input: Invalid data found when processing input" >&2
    exit 1
    ;;
esac
i=1
while [ "$i" -le @STEPS@ ]; do
  echo "[info] encoding step $i" >&2
  printf 'out_time=00:00:%02d.000000\n' "$i" >&2
  echo "progress=continue" >&2
  @DELAY@
  i=$((i + 1))
done
echo "progress=end" >&2
: > "$last"
exit 0
"#;

pub struct FakeTools {
    pub dir: TempDir,
    pub ffmpeg: PathBuf,
}

impl FakeTools {
    /// Ten steps, as fast as the shell runs them.
    pub fn fast() -> Self {
        Self::with_script(10, None)
    }

    /// Fifty steps of 100ms: long enough to pause or cancel mid-run.
    pub fn slow() -> Self {
        Self::with_script(50, Some("0.1"))
    }

    fn with_script(steps: u32, delay: Option<&str>) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let ffmpeg = dir.path().join("ffmpeg");
        let delay = delay
            .map(|d| format!("sleep {} 2>/dev/null", d))
            .unwrap_or_else(|| ":".to_string());
        let body = FAKE_FFMPEG
            .replace("@STEPS@", &steps.to_string())
            .replace("@DELAY@", &delay);
        fs::write(&ffmpeg, body).expect("write fake ffmpeg");
        fs::set_permissions(&ffmpeg, fs::Permissions::from_mode(0o755)).expect("chmod");
        Self { dir, ffmpeg }
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    /// Input file that exists on disk (content is irrelevant to the fake).
    pub fn input(&self, name: &str) -> PathBuf {
        let path = self.path(name);
        fs::write(&path, b"not really video").expect("write input");
        path
    }

    pub fn context(&self, duration_secs: f64) -> ToolContext {
        let toolchain = Toolchain::from_paths(&self.ffmpeg, self.dir.path().join("ffprobe"));
        ToolContext::new(&toolchain, Arc::new(FakeProbe::new(duration_secs)))
            .with_temp(TempFileManager::in_dir(self.dir.path()))
    }

    pub fn recorded_args(&self) -> Vec<String> {
        fs::read_to_string(self.ffmpeg.with_extension("args"))
            .map(|s| s.lines().map(str::to_string).collect())
            .unwrap_or_default()
    }

    pub fn recorded_concat_list(&self) -> Option<String> {
        fs::read_to_string(self.ffmpeg.with_extension("concat")).ok()
    }

    /// Files left in the tool dir whose name marks them as our temp files.
    pub fn leftover_temp_files(&self) -> Vec<PathBuf> {
        fs::read_dir(self.dir.path())
            .expect("read dir")
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with("video-toolbox-"))
            })
            .collect()
    }
}

/// Probe with a fixed duration and a 1280x720 / 30 fps video stream.
pub struct FakeProbe {
    duration_secs: f64,
}

impl FakeProbe {
    pub fn new(duration_secs: f64) -> Self {
        Self { duration_secs }
    }
}

impl MediaProbe for FakeProbe {
    fn probe(&self, _path: &Path) -> Result<MediaInfo, AppError> {
        Ok(MediaInfo {
            duration_seconds: self.duration_secs,
            size: 1024 * 1024,
            bit_rate: Some(2_000_000),
            streams: vec![StreamInfo {
                index: 0,
                kind: StreamKind::Video,
                codec_name: Some("h264".to_string()),
                width: Some(1280),
                height: Some(720),
                fps: Some(30.0),
                bit_rate: Some(1_800_000),
                channels: None,
                sample_rate: None,
                language: None,
            }],
            ..MediaInfo::default()
        })
    }
}

/// Block until `pred` matches an event, returning everything received so far.
pub fn wait_for<T>(rx: &Receiver<T>, timeout: Duration, pred: impl Fn(&T) -> bool) -> Vec<T> {
    let deadline = Instant::now() + timeout;
    let mut seen = Vec::new();
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match rx.recv_timeout(remaining) {
            Ok(event) => {
                let hit = pred(&event);
                seen.push(event);
                if hit {
                    return seen;
                }
            }
            Err(_) => panic!("timed out waiting for event"),
        }
    }
}

/// Emitter that records every event, plus the shared log it appends to.
pub fn recording_emitter<T: Send + 'static>() -> (Arc<dyn Fn(T) + Send + Sync>, Arc<Mutex<Vec<T>>>)
{
    let log = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&log);
    (Arc::new(move |event: T| sink.lock().push(event)), log)
}

/// Poll `log` until `pred` holds for some entry.
pub fn wait_until<T>(log: &Mutex<Vec<T>>, timeout: Duration, pred: impl Fn(&T) -> bool) {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if log.lock().iter().any(&pred) {
            return;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    panic!("timed out waiting for event");
}
