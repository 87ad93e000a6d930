//! Events the runner and the queue report to whoever drives them.
//!
//! Emitters are plain callbacks. They are invoked on the job's worker thread,
//! while the job's state lock is held, so an emitter must not call back into
//! the runner or queue that produced the event.

use std::sync::Arc;
use std::sync::mpsc;

use serde::Serialize;

use crate::job::{JobId, JobStatus};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum JobEvent {
    Progress { percent: u8 },
    Log { line: String },
    /// Non-terminal status changes only (Running, Paused).
    StatusChanged { status: JobStatus },
    Finished { success: bool, message: String },
    Cancelled { message: String },
}

impl JobEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Progress { .. } => "progress",
            Self::Log { .. } => "log",
            Self::StatusChanged { .. } => "status",
            Self::Finished { .. } => "finished",
            Self::Cancelled { .. } => "cancelled",
        }
    }

    /// The last event a job emits.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished { .. } | Self::Cancelled { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum QueueEvent {
    CurrentFileChanged {
        index: usize,
        name: String,
    },
    Job {
        index: usize,
        job_id: JobId,
        event: JobEvent,
    },
    ItemFinished {
        index: usize,
        success: bool,
        message: String,
    },
    AllFinished {
        total: usize,
        successful: usize,
    },
}

pub type JobEmitter = Arc<dyn Fn(JobEvent) + Send + Sync>;
pub type QueueEmitter = Arc<dyn Fn(QueueEvent) + Send + Sync>;

pub fn noop_job_emitter() -> JobEmitter {
    Arc::new(|_| {})
}

pub fn noop_queue_emitter() -> QueueEmitter {
    Arc::new(|_| {})
}

/// Emitter that forwards into a channel. Send errors (receiver gone) are ignored.
pub fn job_event_channel() -> (JobEmitter, mpsc::Receiver<JobEvent>) {
    let (tx, rx) = mpsc::channel();
    let emitter: JobEmitter = Arc::new(move |event| {
        let _ = tx.send(event);
    });
    (emitter, rx)
}

pub fn queue_event_channel() -> (QueueEmitter, mpsc::Receiver<QueueEvent>) {
    let (tx, rx) = mpsc::channel();
    let emitter: QueueEmitter = Arc::new(move |event| {
        let _ = tx.send(event);
    });
    (emitter, rx)
}
