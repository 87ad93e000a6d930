//! Sequential batch processing.
//!
//! Jobs run one at a time in submission order. A failing job is recorded and
//! the queue moves on; cancelling stops the in-flight job and leaves the rest
//! `Pending`.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use serde::Serialize;

use crate::error::AppError;
use crate::events::{JobEmitter, JobEvent, QueueEmitter, QueueEvent};
use crate::job::{Job, JobId, JobSpec, JobStatus};
use crate::runner::{JobRunner, ToolContext};
use crate::settings::Settings;

/// Upper bound on `_N` suffixes tried before giving up on a free name.
const MAX_COLLISION_SUFFIX: u32 = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueSummary {
    pub total: usize,
    pub successful: usize,
}

#[derive(Default)]
struct QueueState {
    jobs: Vec<Job>,
    current_index: Option<usize>,
    running: bool,
    current: Option<JobRunner>,
}

impl QueueState {
    fn summary(&self) -> QueueSummary {
        QueueSummary {
            total: self.jobs.len(),
            successful: self
                .jobs
                .iter()
                .filter(|j| j.status == JobStatus::Completed)
                .count(),
        }
    }
}

struct QueueInner {
    ctx: ToolContext,
    settings: Settings,
    state: Mutex<QueueState>,
    cancel_requested: AtomicBool,
}

/// Cheap to clone; clones share the same queue.
#[derive(Clone)]
pub struct QueueScheduler {
    inner: Arc<QueueInner>,
}

impl QueueScheduler {
    pub fn new(ctx: ToolContext, settings: Settings) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                ctx,
                settings,
                state: Mutex::new(QueueState::default()),
                cancel_requested: AtomicBool::new(false),
            }),
        }
    }

    /// Validate and append a job. A missing output path is derived from the
    /// first input. Returns the job id and its position in the queue.
    pub fn enqueue(&self, spec: JobSpec) -> Result<(JobId, usize), AppError> {
        let job = self.prepare(spec)?;
        let mut state = self.inner.state.lock();
        Ok(Self::push(&mut state, job))
    }

    /// Validate every spec, then append them back to back. Nothing is queued
    /// when any of them is rejected.
    pub fn enqueue_all(&self, specs: Vec<JobSpec>) -> Result<Vec<(JobId, usize)>, AppError> {
        let jobs = specs
            .into_iter()
            .map(|spec| self.prepare(spec))
            .collect::<Result<Vec<_>, _>>()?;
        let mut state = self.inner.state.lock();
        Ok(jobs
            .into_iter()
            .map(|job| Self::push(&mut state, job))
            .collect())
    }

    fn prepare(&self, mut spec: JobSpec) -> Result<Job, AppError> {
        if spec.output.is_none()
            && let Some(input) = spec.inputs.first()
        {
            let container = spec
                .params
                .container
                .clone()
                .unwrap_or_else(|| self.inner.settings.effective_container());
            let ext = spec.operation.default_extension(&container);
            spec.output = Some(default_output_path(
                input,
                None,
                self.inner.settings.effective_output_suffix(),
                &ext,
            ));
        }
        spec.validate()?;
        Ok(Job::new(spec))
    }

    fn push(state: &mut QueueState, job: Job) -> (JobId, usize) {
        let id = job.id;
        state.jobs.push(job);
        let index = state.jobs.len() - 1;
        log::info!(target: "video_toolbox::queue", "Enqueued {} at #{}", id, index);
        (id, index)
    }

    pub fn len(&self) -> usize {
        self.inner.state.lock().jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True from [`arm`](Self::arm) until the run finishes or is dropped.
    pub fn is_running(&self) -> bool {
        self.inner.state.lock().running
    }

    pub fn current_index(&self) -> Option<usize> {
        self.inner.state.lock().current_index
    }

    /// Totals over every queued job, whichever run processed it.
    pub fn summary(&self) -> QueueSummary {
        self.inner.state.lock().summary()
    }

    /// All jobs with their current state; the in-flight one is read live.
    pub fn snapshot(&self) -> Vec<Job> {
        let state = self.inner.state.lock();
        let mut jobs = state.jobs.clone();
        if let (Some(index), Some(runner)) = (state.current_index, state.current.as_ref())
            && let Some(slot) = jobs.get_mut(index)
        {
            *slot = runner.job();
        }
        jobs
    }

    /// Stop the armed run and kill its current job. No effect when idle.
    pub fn cancel(&self) {
        self.inner.cancel_requested.store(true, Ordering::SeqCst);
        let current = self.inner.state.lock().current.clone();
        if let Some(runner) = current {
            log::info!(target: "video_toolbox::queue", "Cancelling queue at {}", runner.id());
            runner.cancel();
        }
    }

    fn cancel_requested(&self) -> bool {
        self.inner.cancel_requested.load(Ordering::SeqCst)
    }

    /// Claim the queue for one run. Clears a cancel left over from an idle
    /// queue. From here on a cancel stops the run, even one that has not
    /// started executing yet.
    pub fn arm(&self) -> Result<QueueRun, AppError> {
        let mut state = self.inner.state.lock();
        if state.running {
            return Err(AppError::configuration("queue is already running"));
        }
        state.running = true;
        self.inner.cancel_requested.store(false, Ordering::SeqCst);
        Ok(QueueRun {
            queue: self.clone(),
            released: false,
        })
    }

    /// Arm and run every pending job in order on the calling thread.
    pub fn run(&self, emitter: QueueEmitter) -> Result<QueueSummary, AppError> {
        Ok(self.arm()?.run(emitter))
    }

    fn release(&self) -> QueueSummary {
        let mut state = self.inner.state.lock();
        state.running = false;
        state.current = None;
        state.current_index = None;
        state.summary()
    }

    /// Next `Pending` job at or after `index`.
    fn take_next(&self, index: &mut usize) -> Option<Job> {
        let state = self.inner.state.lock();
        while *index < state.jobs.len() && state.jobs[*index].status != JobStatus::Pending {
            *index += 1;
        }
        state.jobs.get(*index).cloned()
    }

    /// Moves the job's output off an existing file. The new name is stored
    /// on the queued job so snapshots show where it will be written.
    fn claim_output(&self, index: usize, job: &mut Job) -> Result<(), AppError> {
        let Some(output) = job.spec.output.as_deref() else {
            return Ok(());
        };
        let free = resolve_output_collision(output)?;
        if free != output {
            log::info!(
                target: "video_toolbox::queue",
                "{} exists, writing {} instead",
                output.display(),
                free.display()
            );
            job.spec.output = Some(free.clone());
            if let Some(slot) = self.inner.state.lock().jobs.get_mut(index) {
                slot.spec.output = Some(free);
            }
        }
        Ok(())
    }

    /// Returns true when the queue was cancelled during this item.
    fn run_item(&self, index: usize, mut job: Job, emitter: &QueueEmitter) -> bool {
        let job_id = job.id;
        let name = job
            .spec
            .inputs
            .first()
            .and_then(|p| p.file_name())
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        emitter(QueueEvent::CurrentFileChanged { index, name });

        if let Err(e) = self.claim_output(index, &mut job) {
            self.fail_unstarted(index, job, e, emitter);
            return false;
        }

        let forward = Arc::clone(emitter);
        let job_emitter: JobEmitter = Arc::new(move |event| {
            forward(QueueEvent::Job {
                index,
                job_id,
                event,
            })
        });
        let runner = JobRunner::new(job, self.inner.ctx.clone(), job_emitter);
        {
            let mut state = self.inner.state.lock();
            state.current_index = Some(index);
            state.current = Some(runner.clone());
        }
        // A cancel that raced the store above would have missed this runner.
        if self.cancel_requested() {
            runner.cancel();
        }

        let result = runner.run();
        let finished = runner.job();
        let success = result.is_ok();
        let cancelled =
            result.as_ref().is_err_and(AppError::is_cancelled) || self.cancel_requested();
        let message = match &result {
            Ok(()) => format!(
                "Completed: {}",
                finished
                    .spec
                    .output
                    .as_deref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_default()
            ),
            Err(e) => e.summary(),
        };
        if let Err(e) = &result
            && !e.is_cancelled()
        {
            log::warn!(target: "video_toolbox::queue", "#{} failed, continuing: {}", index, e);
        }
        {
            let mut state = self.inner.state.lock();
            if let Some(slot) = state.jobs.get_mut(index) {
                *slot = finished;
            }
            state.current = None;
        }
        emitter(QueueEvent::ItemFinished {
            index,
            success,
            message,
        });
        cancelled
    }

    /// Records a job that failed before its process could be launched.
    fn fail_unstarted(&self, index: usize, mut job: Job, err: AppError, emitter: &QueueEmitter) {
        log::warn!(target: "video_toolbox::queue", "#{} failed, continuing: {}", index, err);
        let message = err.summary();
        job.transition(JobStatus::Failed);
        job.error = Some(message.clone());
        if let Some(slot) = self.inner.state.lock().jobs.get_mut(index) {
            *slot = job.clone();
        }
        emitter(QueueEvent::Job {
            index,
            job_id: job.id,
            event: JobEvent::Finished {
                success: false,
                message: message.clone(),
            },
        });
        emitter(QueueEvent::ItemFinished {
            index,
            success: false,
            message,
        });
    }
}

impl std::fmt::Debug for QueueScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("QueueScheduler")
            .field("jobs", &state.jobs.len())
            .field("current_index", &state.current_index)
            .field("running", &state.running)
            .finish_non_exhaustive()
    }
}

/// A claimed run of the queue, from [`QueueScheduler::arm`]. Dropping it
/// without running releases the claim.
#[must_use = "an armed queue stays claimed until it is run or dropped"]
pub struct QueueRun {
    queue: QueueScheduler,
    released: bool,
}

impl QueueRun {
    /// Run every pending job in order on the calling thread. The summary
    /// covers every queued job, including ones finished by earlier runs.
    pub fn run(mut self, emitter: QueueEmitter) -> QueueSummary {
        let queue = self.queue.clone();
        log::info!(target: "video_toolbox::queue", "Queue started");

        let mut index = 0;
        loop {
            if queue.cancel_requested() {
                log::info!(target: "video_toolbox::queue", "Queue cancelled before #{}", index);
                break;
            }
            let Some(job) = queue.take_next(&mut index) else {
                break;
            };
            let cancelled = queue.run_item(index, job, &emitter);
            index += 1;
            if cancelled {
                break;
            }
        }

        let summary = queue.release();
        self.released = true;
        log::info!(
            target: "video_toolbox::queue",
            "Queue finished: {}/{} successful",
            summary.successful,
            summary.total
        );
        emitter(QueueEvent::AllFinished {
            total: summary.total,
            successful: summary.successful,
        });
        summary
    }
}

impl Drop for QueueRun {
    fn drop(&mut self) {
        if !self.released {
            self.queue.release();
        }
    }
}

impl std::fmt::Debug for QueueRun {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueRun")
            .field("released", &self.released)
            .finish_non_exhaustive()
    }
}

/// `path` if free, else the first of `stem_1.ext`, `stem_2.ext`, ... that is.
pub fn resolve_output_collision(path: &Path) -> Result<PathBuf, AppError> {
    resolve_output_collision_within(path, MAX_COLLISION_SUFFIX)
}

fn resolve_output_collision_within(path: &Path, max_suffix: u32) -> Result<PathBuf, AppError> {
    if !path.exists() {
        return Ok(path.to_path_buf());
    }
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = path.extension().map(|e| e.to_string_lossy().into_owned());
    let parent = path.parent().unwrap_or(Path::new(""));
    for n in 1..=max_suffix {
        let name = match &ext {
            Some(ext) => format!("{}_{}.{}", stem, n, ext),
            None => format!("{}_{}", stem, n),
        };
        let candidate = parent.join(name);
        if !candidate.exists() {
            return Ok(candidate);
        }
    }
    Err(AppError::filesystem(format!(
        "no free output name for {} after {} attempts",
        path.display(),
        max_suffix
    )))
}

/// `<dir or input's dir>/<input stem><suffix>.<ext>`.
pub fn default_output_path(input: &Path, dir: Option<&Path>, suffix: &str, ext: &str) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());
    let dir = dir
        .map(Path::to_path_buf)
        .or_else(|| input.parent().map(Path::to_path_buf))
        .unwrap_or_default();
    dir.join(format!("{}{}.{}", stem, suffix, ext.trim_start_matches('.')))
}
