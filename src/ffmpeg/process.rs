//! Process supervision for media tool invocations.
//!
//! [`ProcessHandle`] owns one long-running FFmpeg child: its stderr is read
//! line by line by the job's worker thread while control calls (pause, resume,
//! kill) arrive from other threads. [`run_captured`] covers short-lived tool
//! runs (ffprobe, encoder listing, health scan) that must finish within a bound.

use std::io::{BufRead, BufReader, Read};
use std::path::Path;
use std::process::{Child, ChildStderr, Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

#[cfg(windows)]
use std::os::windows::process::CommandExt;

use parking_lot::Mutex;

use crate::error::AppError;

const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(25);

fn base_command(program: &Path, args: &[String]) -> Command {
    let mut cmd = Command::new(program);
    cmd.args(args).stdin(Stdio::null());
    #[cfg(windows)]
    cmd.creation_flags(0x08000000); // CREATE_NO_WINDOW
    cmd
}

/// Reads stderr as lines split on `\n` or `\r`. FFmpeg redraws its stats
/// line with a bare carriage return.
struct LineReader {
    inner: BufReader<ChildStderr>,
    buf: Vec<u8>,
}

impl LineReader {
    fn next_line(&mut self) -> Option<String> {
        loop {
            self.buf.clear();
            let mut done = false;
            loop {
                let available = match self.inner.fill_buf() {
                    Ok(bytes) => bytes,
                    Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                    Err(_) => {
                        done = true;
                        break;
                    }
                };
                if available.is_empty() {
                    done = true;
                    break;
                }
                match available.iter().position(|&b| b == b'\n' || b == b'\r') {
                    Some(i) => {
                        self.buf.extend_from_slice(&available[..i]);
                        self.inner.consume(i + 1);
                        break;
                    }
                    None => {
                        let len = available.len();
                        self.buf.extend_from_slice(available);
                        self.inner.consume(len);
                    }
                }
            }
            if done && self.buf.is_empty() {
                return None;
            }
            // "\r\n" yields an empty segment; skip it rather than surfacing blank lines.
            if self.buf.is_empty() {
                continue;
            }
            return Some(String::from_utf8_lossy(&self.buf).into_owned());
        }
    }
}

/// Handle to one running media tool process.
pub struct ProcessHandle {
    pid: u32,
    child: Mutex<Child>,
    stderr: Mutex<Option<LineReader>>,
    paused: AtomicBool,
    killed: AtomicBool,
}

impl std::fmt::Debug for ProcessHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessHandle")
            .field("pid", &self.pid)
            .field("paused", &self.is_paused())
            .field("killed", &self.was_killed())
            .finish()
    }
}

impl ProcessHandle {
    /// Spawn `program args...` with stderr piped and stdout discarded.
    pub fn start(program: &Path, args: &[String]) -> Result<Self, AppError> {
        log::debug!(
            target: "video_toolbox::ffmpeg::process",
            "Spawning {} {}",
            program.display(),
            args.join(" ")
        );
        let mut cmd = base_command(program, args);
        cmd.stdout(Stdio::null()).stderr(Stdio::piped());
        let mut child = cmd
            .spawn()
            .map_err(|e| AppError::launch(format!("{}: {}", program.display(), e)))?;
        let stderr = match child.stderr.take() {
            Some(s) => s,
            None => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(AppError::launch("failed to capture stderr"));
            }
        };
        Ok(Self {
            pid: child.id(),
            child: Mutex::new(child),
            stderr: Mutex::new(Some(LineReader {
                inner: BufReader::new(stderr),
                buf: Vec::with_capacity(256),
            })),
            paused: AtomicBool::new(false),
            killed: AtomicBool::new(false),
        })
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Next diagnostic line, or None at end of stream.
    pub fn read_stderr_line(&self) -> Option<String> {
        let mut guard = self.stderr.lock();
        let reader = guard.as_mut()?;
        let line = reader.next_line();
        if line.is_none() {
            *guard = None;
        }
        line
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub fn was_killed(&self) -> bool {
        self.killed.load(Ordering::SeqCst)
    }

    fn has_exited(&self) -> bool {
        matches!(self.child.lock().try_wait(), Ok(Some(_)))
    }

    /// Suspend the process. Returns false when already paused, already exited,
    /// or when the platform has no suspend primitive.
    pub fn pause(&self) -> bool {
        if self.was_killed() || self.has_exited() {
            return false;
        }
        if self
            .paused
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return false;
        }
        if signal::suspend(self.pid) {
            log::info!(target: "video_toolbox::ffmpeg::process", "Paused pid {}", self.pid);
            true
        } else {
            self.paused.store(false, Ordering::SeqCst);
            log::warn!(
                target: "video_toolbox::ffmpeg::process",
                "Pause unavailable for pid {}",
                self.pid
            );
            false
        }
    }

    /// Continue a paused process. Returns false when it was not paused.
    pub fn resume(&self) -> bool {
        if self
            .paused
            .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return false;
        }
        if signal::resume(self.pid) {
            log::info!(target: "video_toolbox::ffmpeg::process", "Resumed pid {}", self.pid);
            true
        } else {
            self.paused.store(true, Ordering::SeqCst);
            false
        }
    }

    /// Forcefully terminate. Safe to call more than once or after exit.
    pub fn kill(&self) {
        self.killed.store(true, Ordering::SeqCst);
        let mut child = self.child.lock();
        if let Ok(Some(_)) = child.try_wait() {
            return;
        }
        log::info!(target: "video_toolbox::ffmpeg::process", "Killing pid {}", self.pid);
        if let Err(e) = child.kill() {
            log::warn!(
                target: "video_toolbox::ffmpeg::process",
                "Failed to kill pid {}: {}",
                self.pid,
                e
            );
        }
        self.paused.store(false, Ordering::SeqCst);
    }

    /// Block until the process exits.
    pub fn wait(&self) -> Result<ExitStatus, AppError> {
        loop {
            if let Some(status) = self.child.lock().try_wait()? {
                return Ok(status);
            }
            thread::sleep(WAIT_POLL_INTERVAL);
        }
    }
}

impl Drop for ProcessHandle {
    fn drop(&mut self) {
        let child = self.child.get_mut();
        if let Ok(None) = child.try_wait() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

#[cfg(unix)]
mod signal {
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;

    fn send(pid: u32, sig: Signal) -> bool {
        let Ok(raw) = i32::try_from(pid) else {
            return false;
        };
        kill(Pid::from_raw(raw), sig).is_ok()
    }

    pub fn suspend(pid: u32) -> bool {
        send(pid, Signal::SIGSTOP)
    }

    pub fn resume(pid: u32) -> bool {
        send(pid, Signal::SIGCONT)
    }
}

#[cfg(not(unix))]
mod signal {
    // No stop/continue primitive; callers treat false as "pause unavailable".
    pub fn suspend(_pid: u32) -> bool {
        false
    }

    pub fn resume(_pid: u32) -> bool {
        false
    }
}

/// Output of a short-lived tool run.
#[derive(Debug, Clone)]
pub struct CapturedOutput {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

fn drain<R: Read + Send + 'static>(reader: Option<R>) -> thread::JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut r) = reader {
            let _ = r.read_to_end(&mut buf);
        }
        buf
    })
}

/// Run a tool to completion with both streams captured, killing it once
/// `timeout` elapses. Expiry is reported as [`AppError::Timeout`].
pub fn run_captured(
    program: &Path,
    args: &[String],
    timeout: Duration,
    operation: &str,
) -> Result<CapturedOutput, AppError> {
    log::debug!(
        target: "video_toolbox::ffmpeg::process",
        "Running {} {} (timeout {:?})",
        program.display(),
        args.join(" "),
        timeout
    );
    let mut cmd = base_command(program, args);
    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
    let mut child = cmd
        .spawn()
        .map_err(|e| AppError::launch(format!("{}: {}", program.display(), e)))?;

    // Drain both pipes concurrently so a chatty tool cannot block on a full pipe.
    let stdout_handle = drain(child.stdout.take());
    let stderr_handle = drain(child.stderr.take());

    let deadline = Instant::now() + timeout;
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) if Instant::now() >= deadline => {
                let _ = child.kill();
                let _ = child.wait();
                let _ = stdout_handle.join();
                let _ = stderr_handle.join();
                log::warn!(
                    target: "video_toolbox::ffmpeg::process",
                    "{} exceeded {:?}, killed",
                    operation,
                    timeout
                );
                return Err(AppError::Timeout {
                    operation: operation.to_string(),
                    seconds: timeout.as_secs(),
                });
            }
            Ok(None) => thread::sleep(WAIT_POLL_INTERVAL),
            Err(e) => {
                let _ = child.kill();
                return Err(e.into());
            }
        }
    };

    let stdout = stdout_handle.join().unwrap_or_default();
    let stderr = stderr_handle.join().unwrap_or_default();
    Ok(CapturedOutput {
        status,
        stdout: String::from_utf8_lossy(&stdout).into_owned(),
        stderr: String::from_utf8_lossy(&stderr).into_owned(),
    })
}
