use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;

use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::{Value, json};
use video_toolbox_core::error::AppError;
use video_toolbox_core::events::{JobEmitter, JobEvent, QueueEmitter, QueueEvent};
use video_toolbox_core::job::{JobId, JobSpec};
use video_toolbox_core::profiles::{MultiFormatRequest, ProfileRequest};
use video_toolbox_core::settings::Settings;
use video_toolbox_core::sidecar_api::{InspectRequest, Services};

/// Optional JSON settings file layered over the environment.
const SETTINGS_ENV: &str = "VIDEO_TOOLBOX_SETTINGS";

#[derive(Debug, Deserialize)]
struct RpcRequest {
    id: u64,
    method: String,
    #[serde(default)]
    params: Value,
}

#[derive(Debug, serde::Serialize)]
struct RpcSuccess {
    id: u64,
    result: Value,
}

#[derive(Debug, serde::Serialize)]
struct RpcFailure {
    id: u64,
    error: RpcErrorPayload,
}

#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
struct RpcErrorPayload {
    summary: String,
    detail: String,
}

#[derive(Debug, serde::Serialize)]
struct RpcEvent {
    event: String,
    payload: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobIdParams {
    job_id: JobId,
}

type SharedWriter = Arc<Mutex<io::Stdout>>;

fn write_json_line<T: serde::Serialize>(writer: &mut impl Write, value: &T) -> io::Result<()> {
    serde_json::to_writer(&mut *writer, value)
        .map_err(|e| io::Error::other(format!("serialize response: {}", e)))?;
    writer.write_all(b"\n")?;
    writer.flush()
}

fn write_json_line_shared<T: serde::Serialize>(writer: &SharedWriter, value: &T) -> io::Result<()> {
    let mut guard = writer.lock();
    write_json_line(&mut *guard, value)
}

fn emit_rpc_event(writer: &SharedWriter, event: &str, payload: Value) {
    let message = RpcEvent {
        event: event.to_string(),
        payload,
    };
    let _ = write_json_line_shared(writer, &message);
}

/// Event payload with extra identifying fields merged in.
fn with_fields(event: impl serde::Serialize, fields: Value) -> Value {
    let mut payload = serde_json::to_value(event).unwrap_or(Value::Null);
    if let (Value::Object(target), Value::Object(extra)) = (&mut payload, fields) {
        target.extend(extra);
    }
    payload
}

fn job_emitter(writer: &SharedWriter, job_id: JobId) -> JobEmitter {
    let writer = Arc::clone(writer);
    Arc::new(move |event: JobEvent| {
        let name = format!("job.{}", event.name());
        emit_rpc_event(&writer, &name, with_fields(event, json!({ "jobId": job_id })));
    })
}

fn queue_emitter(writer: &SharedWriter) -> QueueEmitter {
    let writer = Arc::clone(writer);
    Arc::new(move |event: QueueEvent| match event {
        QueueEvent::CurrentFileChanged { .. } => {
            emit_rpc_event(&writer, "queue.current_file", with_fields(event, json!({})))
        }
        QueueEvent::Job {
            index,
            job_id,
            event: JobEvent::Progress { percent },
        } => emit_rpc_event(
            &writer,
            "queue.progress",
            json!({ "index": index, "jobId": job_id, "percent": percent }),
        ),
        QueueEvent::Job {
            index,
            job_id,
            event,
        } => {
            let name = format!("queue.job.{}", event.name());
            emit_rpc_event(
                &writer,
                &name,
                with_fields(event, json!({ "index": index, "jobId": job_id })),
            )
        }
        QueueEvent::ItemFinished { .. } => {
            emit_rpc_event(&writer, "queue.item_finished", with_fields(event, json!({})))
        }
        QueueEvent::AllFinished { .. } => {
            emit_rpc_event(&writer, "queue.all_finished", with_fields(event, json!({})))
        }
    })
}

fn parse_error_payload(err: &AppError) -> RpcErrorPayload {
    match err {
        AppError::Cancelled => RpcErrorPayload {
            summary: "Cancelled".to_string(),
            detail: "Cancelled".to_string(),
        },
        AppError::ProcessFailed { code, stderr } => {
            let parsed = video_toolbox_core::ffmpeg::parse_ffmpeg_error(stderr, Some(*code));
            RpcErrorPayload {
                summary: parsed.summary,
                detail: parsed.detail,
            }
        }
        _ => {
            let text = err.to_string();
            RpcErrorPayload {
                summary: text.clone(),
                detail: text,
            }
        }
    }
}

fn params_from_value<T: serde::de::DeserializeOwned>(params: Value) -> Result<T, AppError> {
    serde_json::from_value(params)
        .map_err(|e| AppError::configuration(format!("Invalid params payload: {}", e)))
}

fn to_result<T: serde::Serialize>(value: T, what: &str) -> Result<Value, AppError> {
    serde_json::to_value(value)
        .map_err(|e| AppError::configuration(format!("Failed to serialize {}: {}", what, e)))
}

/// Work started only after the request's response is on the wire, so a
/// client never sees events for an id it hasn't been told about.
struct DeferredWorker {
    name: String,
    task: Box<dyn FnOnce() + Send>,
}

struct Sidecar {
    services: Result<Arc<Services>, String>,
    writer: SharedWriter,
    deferred: Vec<DeferredWorker>,
    workers: Vec<thread::JoinHandle<()>>,
}

impl Sidecar {
    fn services(&self) -> Result<Arc<Services>, AppError> {
        self.services
            .as_ref()
            .map(Arc::clone)
            .map_err(|msg| AppError::FfmpegNotFound(msg.clone()))
    }

    fn dispatch(&mut self, method: &str, params: Value) -> Result<Value, AppError> {
        let services = self.services()?;
        match method {
            "app.capabilities" => to_result(services.capabilities(), "capabilities"),
            "app.redetect" => to_result(services.redetect(), "capabilities"),
            "media.inspect" => {
                let request: InspectRequest = params_from_value(params)?;
                to_result(services.inspect(request)?, "inspect result")
            }
            "job.start" => {
                let spec: JobSpec = params_from_value(params)?;
                let writer = Arc::clone(&self.writer);
                let runner = services.create_job(spec, |id| job_emitter(&writer, id))?;
                let job_id = runner.id();
                self.deferred.push(DeferredWorker {
                    name: job_id.to_string(),
                    task: Box::new(move || {
                        if let Err(e) = runner.run()
                            && !e.is_cancelled()
                        {
                            log::warn!(target: "video_toolbox::sidecar", "{} ended: {}", job_id, e);
                        }
                        services.forget_job(job_id);
                    }),
                });
                Ok(json!({ "jobId": job_id }))
            }
            "job.pause" => {
                let p: JobIdParams = params_from_value(params)?;
                Ok(json!({ "applied": services.pause_job(p.job_id)? }))
            }
            "job.resume" => {
                let p: JobIdParams = params_from_value(params)?;
                Ok(json!({ "applied": services.resume_job(p.job_id)? }))
            }
            "job.cancel" => {
                let p: JobIdParams = params_from_value(params)?;
                Ok(json!({ "applied": services.cancel_job(p.job_id)? }))
            }
            "queue.enqueue" => {
                let spec: JobSpec = params_from_value(params)?;
                let (job_id, index) = services.enqueue(spec)?;
                Ok(json!({ "jobId": job_id, "index": index }))
            }
            "queue.enqueue_profile" => {
                let request: ProfileRequest = params_from_value(params)?;
                let (job_id, index) = services.enqueue_profile(&request)?;
                Ok(json!({ "jobId": job_id, "index": index }))
            }
            "queue.enqueue_formats" => {
                let request: MultiFormatRequest = params_from_value(params)?;
                let jobs: Vec<Value> = services
                    .enqueue_formats(&request)?
                    .into_iter()
                    .map(|(job_id, index)| json!({ "jobId": job_id, "index": index }))
                    .collect();
                Ok(json!({ "jobs": jobs }))
            }
            "queue.run" => {
                // Claimed here so a second run or an early cancel is seen
                // before the worker thread exists.
                let armed = services.queue().arm()?;
                let emitter = queue_emitter(&self.writer);
                self.deferred.push(DeferredWorker {
                    name: "queue".to_string(),
                    task: Box::new(move || {
                        armed.run(emitter);
                    }),
                });
                Ok(json!({ "started": true, "total": services.queue().len() }))
            }
            "queue.cancel" => {
                services.queue().cancel();
                Ok(json!({ "cancelled": true }))
            }
            "queue.status" => {
                let queue = services.queue();
                Ok(json!({
                    "running": queue.is_running(),
                    "currentIndex": queue.current_index(),
                    "jobs": to_result(queue.snapshot(), "queue snapshot")?,
                }))
            }
            _ => Err(AppError::configuration(format!("Unknown method: {}", method))),
        }
    }

    fn handle_request(&mut self, request: RpcRequest) {
        let response = match self.dispatch(&request.method, request.params) {
            Ok(result) => serde_json::to_value(RpcSuccess {
                id: request.id,
                result,
            })
            .map_err(|e| io::Error::other(format!("serialize success: {}", e))),
            Err(err) => {
                let payload = parse_error_payload(&err);
                serde_json::to_value(RpcFailure {
                    id: request.id,
                    error: payload,
                })
                .map_err(|e| io::Error::other(format!("serialize failure: {}", e)))
            }
        };

        match response {
            Ok(value) => {
                let _ = write_json_line_shared(&self.writer, &value);
            }
            Err(err) => {
                let failure = RpcFailure {
                    id: request.id,
                    error: RpcErrorPayload {
                        summary: "Serialization error".to_string(),
                        detail: err.to_string(),
                    },
                };
                let _ = write_json_line_shared(&self.writer, &failure);
            }
        }
        self.spawn_deferred();
    }

    fn spawn_deferred(&mut self) {
        for DeferredWorker { name, task } in self.deferred.drain(..) {
            match thread::Builder::new().name(name.clone()).spawn(task) {
                Ok(worker) => self.workers.push(worker),
                Err(e) => log::error!(
                    target: "video_toolbox::sidecar",
                    "Failed to start worker {}: {}",
                    name,
                    e
                ),
            }
        }
    }

    /// Stop outstanding work and wait for worker threads.
    fn shutdown(self) {
        if let Ok(services) = &self.services {
            services.cancel_all();
        }
        for worker in self.workers {
            let _ = worker.join();
        }
    }
}

fn load_settings() -> Settings {
    let env = Settings::from_env();
    let Some(path) = std::env::var_os(SETTINGS_ENV).map(PathBuf::from) else {
        return env;
    };
    match Settings::from_json_file(&path) {
        Ok(file) => env.or(file),
        Err(e) => {
            log::warn!(target: "video_toolbox::sidecar", "Ignoring settings file: {}", e);
            env
        }
    }
}

fn main() -> io::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();

    let services = Services::new(load_settings()).map(Arc::new).map_err(|e| {
        log::error!(target: "video_toolbox::sidecar", "Startup failed: {}", e);
        e.to_string()
    });
    let mut sidecar = Sidecar {
        services,
        writer: Arc::new(Mutex::new(io::stdout())),
        deferred: Vec::new(),
        workers: Vec::new(),
    };

    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let line = match line {
            Ok(line) => line,
            Err(err) => {
                let failure = RpcFailure {
                    id: 0,
                    error: RpcErrorPayload {
                        summary: "Invalid input stream".to_string(),
                        detail: err.to_string(),
                    },
                };
                let _ = write_json_line_shared(&sidecar.writer, &failure);
                continue;
            }
        };

        if line.trim().is_empty() {
            continue;
        }

        let request: RpcRequest = match serde_json::from_str(&line) {
            Ok(request) => request,
            Err(err) => {
                let failure = RpcFailure {
                    id: 0,
                    error: RpcErrorPayload {
                        summary: "Invalid request".to_string(),
                        detail: err.to_string(),
                    },
                };
                let _ = write_json_line_shared(&sidecar.writer, &failure);
                continue;
            }
        };

        sidecar.workers.retain(|w| !w.is_finished());
        sidecar.handle_request(request);
    }

    sidecar.shutdown();
    Ok(())
}
