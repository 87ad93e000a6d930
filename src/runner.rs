//! Drives one job from `Pending` to a terminal status.
//!
//! The worker thread that calls [`JobRunner::run`] owns the process and pumps
//! its stderr. Control calls ([`JobRunner::pause`], [`JobRunner::resume`],
//! [`JobRunner::cancel`]) may come from any thread. Every status change and
//! every emitted event happens under the job lock, so once a terminal event
//! is out nothing else for that job follows it, and once `cancel` returns no
//! further progress or log event is emitted.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::LazyLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use parking_lot::Mutex;
use regex::Regex;

use crate::error::AppError;
use crate::events::{JobEmitter, JobEvent};
use crate::ffmpeg::{
    MediaProbe, PreparedCommand, ProcessHandle, TempFileManager, Toolchain,
    format_args_for_display_multiline, parse_progress_percent, prepare_command,
};
use crate::job::{Job, JobId, JobStatus};

/// Keep only the last N bytes of stderr to avoid unbounded memory growth.
const MAX_STDERR_BYTES: usize = 64 * 1024;

/// `key=value` lines written by `-progress`; not worth forwarding as log lines.
static PROGRESS_KEY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z_0-9]+=\S*$").expect("invalid progress key regex"));

/// Everything a runner needs from the environment.
#[derive(Clone)]
pub struct ToolContext {
    pub ffmpeg: PathBuf,
    pub probe: Arc<dyn MediaProbe>,
    pub temp: TempFileManager,
}

impl ToolContext {
    pub fn new(toolchain: &Toolchain, probe: Arc<dyn MediaProbe>) -> Self {
        Self {
            ffmpeg: toolchain.ffmpeg.clone(),
            probe,
            temp: TempFileManager::default(),
        }
    }

    pub fn with_temp(mut self, temp: TempFileManager) -> Self {
        self.temp = temp;
        self
    }
}

impl std::fmt::Debug for ToolContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolContext")
            .field("ffmpeg", &self.ffmpeg)
            .field("temp", &self.temp)
            .finish_non_exhaustive()
    }
}

struct StderrTail(Vec<u8>);

impl StderrTail {
    fn push(&mut self, line: &str) {
        self.0.extend_from_slice(line.as_bytes());
        self.0.push(b'\n');
        if self.0.len() > MAX_STDERR_BYTES {
            let excess = self.0.len() - MAX_STDERR_BYTES;
            self.0.drain(..excess);
        }
    }

    fn into_string(self) -> String {
        String::from_utf8_lossy(&self.0).into_owned()
    }
}

struct RunnerInner {
    ctx: ToolContext,
    job: Mutex<Job>,
    process: Mutex<Option<Arc<ProcessHandle>>>,
    cancel_requested: AtomicBool,
    emitter: JobEmitter,
}

/// Cheap to clone; clones share the same job.
#[derive(Clone)]
pub struct JobRunner {
    inner: Arc<RunnerInner>,
}

impl std::fmt::Debug for JobRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobRunner")
            .field("job", &*self.inner.job.lock())
            .finish_non_exhaustive()
    }
}

impl JobRunner {
    pub fn new(job: Job, ctx: ToolContext, emitter: JobEmitter) -> Self {
        Self {
            inner: Arc::new(RunnerInner {
                ctx,
                job: Mutex::new(job),
                process: Mutex::new(None),
                cancel_requested: AtomicBool::new(false),
                emitter,
            }),
        }
    }

    pub fn id(&self) -> JobId {
        self.inner.job.lock().id
    }

    pub fn status(&self) -> JobStatus {
        self.inner.job.lock().status
    }

    /// Snapshot of the job's current state.
    pub fn job(&self) -> Job {
        self.inner.job.lock().clone()
    }

    fn cancel_requested(&self) -> bool {
        self.inner.cancel_requested.load(Ordering::SeqCst)
    }

    fn emit(&self, event: JobEvent) {
        (self.inner.emitter)(event);
    }

    /// Validate synchronously, then run on a dedicated worker thread.
    /// Parameter errors are returned here, before any thread or process exists.
    pub fn start(&self) -> Result<JobHandle, AppError> {
        let spec = self.inner.job.lock().spec.clone();
        if let Err(e) = spec.validate() {
            return Err(self.finish_failed(e));
        }
        let runner = self.clone();
        let id = self.id();
        let thread = thread::Builder::new()
            .name(id.to_string())
            .spawn(move || runner.run())?;
        Ok(JobHandle {
            runner: self.clone(),
            thread,
        })
    }

    /// Run the job to completion on the calling thread.
    ///
    /// Ok means Completed. Cancellation returns [`AppError::Cancelled`]; any
    /// other error means the job ended Failed with that cause.
    pub fn run(&self) -> Result<(), AppError> {
        let spec = {
            let job = self.inner.job.lock();
            if job.status != JobStatus::Pending {
                return Err(AppError::configuration(format!(
                    "{} already ran (status {})",
                    job.id, job.status
                )));
            }
            job.spec.clone()
        };
        if self.cancel_requested() {
            return Err(self.finish_cancelled());
        }

        let prepared = match prepare_command(&spec, self.inner.ctx.probe.as_ref(), &self.inner.ctx.temp)
        {
            Ok(p) => p,
            Err(e) => return Err(self.finish_failed(e)),
        };
        self.inner.job.lock().duration_seconds = prepared.duration_seconds;

        log::debug!(
            target: "video_toolbox::runner",
            "{} command:\n{}",
            self.id(),
            format_args_for_display_multiline(&prepared.args)
        );

        let handle = match ProcessHandle::start(&self.inner.ctx.ffmpeg, &prepared.args) {
            Ok(h) => Arc::new(h),
            Err(e) => return Err(self.finish_failed(e)),
        };
        *self.inner.process.lock() = Some(Arc::clone(&handle));

        {
            let mut job = self.inner.job.lock();
            if !self.cancel_requested() && job.transition(JobStatus::Running) {
                log::info!(
                    target: "video_toolbox::runner",
                    "{} running: {} -> {}",
                    job.id,
                    spec.operation.name(),
                    prepared.output.display()
                );
                self.emit(JobEvent::StatusChanged {
                    status: JobStatus::Running,
                });
            }
        }

        let result = self.pump(&handle, &prepared);
        *self.inner.process.lock() = None;
        // Removes the concat list, if any, before the outcome is reported.
        drop(prepared);
        result
    }

    fn pump(&self, handle: &ProcessHandle, prepared: &PreparedCommand) -> Result<(), AppError> {
        let mut tail = StderrTail(Vec::new());
        while let Some(line) = handle.read_stderr_line() {
            if self.cancel_requested() {
                handle.kill();
                break;
            }
            tail.push(&line);
            let percent = parse_progress_percent(&line, prepared.duration_seconds);
            let is_log_line = !PROGRESS_KEY_RE.is_match(&line);

            let mut job = self.inner.job.lock();
            if self.cancel_requested() || job.status.is_terminal() {
                drop(job);
                handle.kill();
                break;
            }
            if let Some(p) = percent
                && job.advance_progress(p)
            {
                self.emit(JobEvent::Progress { percent: p });
            }
            if is_log_line {
                self.emit(JobEvent::Log { line });
            }
        }

        let status = handle.wait();
        if self.cancel_requested() || handle.was_killed() {
            return Err(self.finish_cancelled());
        }
        match status {
            Ok(s) if s.success() => {
                self.finish_completed(prepared);
                Ok(())
            }
            Ok(s) => {
                let err = AppError::process_failed(s.code().unwrap_or(-1), tail.into_string());
                Err(self.finish_failed(err))
            }
            Err(e) => Err(self.finish_failed(e)),
        }
    }

    fn finish_completed(&self, prepared: &PreparedCommand) {
        let mut job = self.inner.job.lock();
        if !job.transition(JobStatus::Completed) {
            return;
        }
        if job.advance_progress(100) {
            self.emit(JobEvent::Progress { percent: 100 });
        }
        log::info!(
            target: "video_toolbox::runner",
            "{} completed: {}",
            job.id,
            prepared.output.display()
        );
        self.emit(JobEvent::Finished {
            success: true,
            message: format!("Completed: {}", prepared.output.display()),
        });
    }

    fn finish_failed(&self, err: AppError) -> AppError {
        let mut job = self.inner.job.lock();
        if job.transition(JobStatus::Failed) {
            let summary = err.summary();
            log::error!(
                target: "video_toolbox::runner",
                "{} failed: {}",
                job.id,
                err
            );
            job.error = Some(summary.clone());
            self.emit(JobEvent::Finished {
                success: false,
                message: summary,
            });
        }
        err
    }

    fn finish_cancelled(&self) -> AppError {
        let mut job = self.inner.job.lock();
        if job.transition(JobStatus::Cancelled) {
            log::info!(target: "video_toolbox::runner", "{} cancelled", job.id);
            self.emit(JobEvent::Cancelled {
                message: "Cancelled by user".to_string(),
            });
        }
        AppError::cancelled()
    }

    /// Suspend the running process. False when the job isn't running, the
    /// operation can't be paused, or the platform can't suspend processes.
    pub fn pause(&self) -> bool {
        let mut job = self.inner.job.lock();
        if job.status != JobStatus::Running
            || self.cancel_requested()
            || !job.spec.operation.is_pausable()
        {
            return false;
        }
        let Some(handle) = self.inner.process.lock().clone() else {
            return false;
        };
        if !handle.pause() {
            log::warn!(
                target: "video_toolbox::runner",
                "{}: pause unavailable",
                job.id
            );
            return false;
        }
        job.transition(JobStatus::Paused);
        self.emit(JobEvent::StatusChanged {
            status: JobStatus::Paused,
        });
        true
    }

    /// Continue a paused job. False when it isn't paused.
    pub fn resume(&self) -> bool {
        let mut job = self.inner.job.lock();
        if job.status != JobStatus::Paused || self.cancel_requested() {
            return false;
        }
        let Some(handle) = self.inner.process.lock().clone() else {
            return false;
        };
        if !handle.resume() {
            return false;
        }
        job.transition(JobStatus::Running);
        self.emit(JobEvent::StatusChanged {
            status: JobStatus::Running,
        });
        true
    }

    /// Request cancellation and kill the process if one is running. The
    /// worker thread reports the final `Cancelled` event. False when the job
    /// already ended.
    pub fn cancel(&self) -> bool {
        let job = self.inner.job.lock();
        if job.status.is_terminal() {
            return false;
        }
        if self.inner.cancel_requested.swap(true, Ordering::SeqCst) {
            return false;
        }
        log::info!(target: "video_toolbox::runner", "{} cancel requested", job.id);
        drop(job);
        if let Some(handle) = self.inner.process.lock().clone() {
            handle.kill();
        }
        true
    }
}

/// A job running on its own thread.
#[derive(Debug)]
pub struct JobHandle {
    runner: JobRunner,
    thread: thread::JoinHandle<Result<(), AppError>>,
}

impl JobHandle {
    pub fn runner(&self) -> &JobRunner {
        &self.runner
    }

    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Wait for the job to end and return its outcome.
    pub fn join(self) -> Result<(), AppError> {
        match self.thread.join() {
            Ok(result) => result,
            Err(_) => Err(AppError::Io(std::io::Error::other("job worker panicked"))),
        }
    }
}
