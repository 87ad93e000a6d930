use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::codec;
use crate::error::AppError;
use crate::estimate::{self, Estimate};
use crate::events::JobEmitter;
use crate::ffmpeg::{
    Capabilities, FfmpegHardwareDetector, FfprobeProbe, HardwareCapability, HealthReport,
    MediaInfo, MediaProbe, TempFileManager, Toolchain, format_args_for_display_multiline,
    path_to_string, prepare_command, scan_health,
};
use crate::job::{Job, JobId, JobSpec};
use crate::profiles::{self, DeviceProfile, MultiFormatRequest, ProfileRequest};
use crate::queue::QueueScheduler;
use crate::runner::{JobRunner, ToolContext};
use crate::settings::Settings;

const PROTOCOL_VERSION: u8 = 1;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppCapabilitiesResult {
    pub protocol_version: u8,
    #[serde(flatten)]
    pub hardware: Capabilities,
    pub encoders: Vec<codec::EncoderInfo>,
    pub profiles: Vec<DeviceProfile>,
}

/// `media.inspect` request, discriminated by `kind`.
#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum InspectRequest {
    Metadata {
        input_path: PathBuf,
    },
    Health {
        input_path: PathBuf,
    },
    CommandPreview {
        spec: JobSpec,
    },
    Estimate {
        input_path: PathBuf,
        encoder: Option<String>,
        preset: Option<String>,
        quality: Option<u32>,
    },
}

#[derive(Debug, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum InspectResult {
    Metadata {
        #[serde(flatten)]
        info: MediaInfo,
        size_mb: f64,
    },
    Health {
        #[serde(flatten)]
        report: HealthReport,
        summary: String,
        rendered: String,
    },
    CommandPreview {
        args: Vec<String>,
        display: String,
        output: String,
    },
    Estimate(Estimate),
}

/// Everything the sidecar binary talks to, built once at startup.
pub struct Services {
    settings: Settings,
    toolchain: Toolchain,
    probe: Arc<dyn MediaProbe>,
    hardware: Arc<dyn HardwareCapability>,
    temp: TempFileManager,
    queue: QueueScheduler,
    jobs: Mutex<HashMap<JobId, JobRunner>>,
}

impl Services {
    /// Resolve the tools and wire the ffprobe / ffmpeg backed collaborators.
    pub fn new(settings: Settings) -> Result<Self, AppError> {
        let toolchain = Toolchain::resolve(&settings)?;
        let probe = Arc::new(FfprobeProbe::new(
            &toolchain,
            settings.effective_probe_timeout(),
        ));
        let hardware = Arc::new(FfmpegHardwareDetector::new(
            &toolchain.ffmpeg,
            settings.effective_hardware_detect_timeout(),
        ));
        Ok(Self::with_collaborators(settings, toolchain, probe, hardware))
    }

    pub fn with_collaborators(
        settings: Settings,
        toolchain: Toolchain,
        probe: Arc<dyn MediaProbe>,
        hardware: Arc<dyn HardwareCapability>,
    ) -> Self {
        let temp = TempFileManager::default();
        let ctx = ToolContext::new(&toolchain, Arc::clone(&probe)).with_temp(temp.clone());
        let queue = QueueScheduler::new(ctx, settings.clone());
        Self {
            settings,
            toolchain,
            probe,
            hardware,
            temp,
            queue,
            jobs: Mutex::new(HashMap::new()),
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn queue(&self) -> &QueueScheduler {
        &self.queue
    }

    fn tool_context(&self) -> ToolContext {
        ToolContext::new(&self.toolchain, Arc::clone(&self.probe)).with_temp(self.temp.clone())
    }

    pub fn capabilities(&self) -> AppCapabilitiesResult {
        AppCapabilitiesResult {
            protocol_version: PROTOCOL_VERSION,
            hardware: Capabilities::from_detector(self.hardware.as_ref()),
            encoders: codec::KNOWN_ENCODERS
                .iter()
                .filter_map(|e| codec::encoder_info(e))
                .collect(),
            profiles: profiles::PROFILES.to_vec(),
        }
    }

    pub fn redetect(&self) -> AppCapabilitiesResult {
        self.hardware.redetect();
        self.capabilities()
    }

    /// Fill unset parameters from settings. Hardware detection picks the
    /// encoder only for containers whose default is the H.264 software encoder.
    pub fn apply_defaults(&self, mut spec: JobSpec) -> JobSpec {
        let container = spec.container();
        let detected = (codec::default_encoder_for_container(&container)
            == codec::SOFTWARE_DEFAULT_ENCODER
            && spec.params.encoder.is_none()
            && self.settings.encoder.is_none())
        .then(|| self.hardware.default_encoder());
        spec.params = spec.params.with_defaults(&self.settings, detected);
        spec
    }

    pub fn inspect(&self, request: InspectRequest) -> Result<InspectResult, AppError> {
        match request {
            InspectRequest::Metadata { input_path } => {
                let info = self.probe.probe(&input_path)?;
                let size_mb = info.size as f64 / 1024.0 / 1024.0;
                Ok(InspectResult::Metadata { info, size_mb })
            }
            InspectRequest::Health { input_path } => {
                let report = inspect_health(&self.toolchain, &self.settings, &input_path)?;
                Ok(InspectResult::Health {
                    summary: report.summary(),
                    rendered: report.render(),
                    report,
                })
            }
            InspectRequest::CommandPreview { spec } => {
                let spec = self.apply_defaults(spec);
                let prepared = prepare_command(&spec, self.probe.as_ref(), &self.temp)?;
                Ok(InspectResult::CommandPreview {
                    display: format_args_for_display_multiline(&prepared.args),
                    output: path_to_string(&prepared.output),
                    args: prepared.args.clone(),
                })
            }
            InspectRequest::Estimate {
                input_path,
                encoder,
                preset,
                quality,
            } => {
                let info = self.probe.probe(&input_path)?;
                let encoder = encoder
                    .or_else(|| self.settings.encoder.clone())
                    .unwrap_or_else(|| self.hardware.default_encoder().to_string());
                let preset = preset.unwrap_or_else(|| self.settings.effective_preset().to_string());
                let quality = quality.unwrap_or_else(|| self.settings.effective_quality());
                Ok(InspectResult::Estimate(estimate::estimate(
                    info.duration_seconds,
                    &encoder,
                    &preset,
                    quality,
                    info.resolution(),
                )))
            }
        }
    }

    /// Validate a standalone job and register it for pause/resume/cancel.
    /// The caller drives it with [`JobRunner::run`] or [`JobRunner::start`].
    pub fn create_job(
        &self,
        spec: JobSpec,
        make_emitter: impl FnOnce(JobId) -> JobEmitter,
    ) -> Result<JobRunner, AppError> {
        let spec = self.apply_defaults(spec);
        spec.validate()?;
        let job = Job::new(spec);
        let id = job.id;
        let runner = JobRunner::new(job, self.tool_context(), make_emitter(id));
        self.jobs.lock().insert(id, runner.clone());
        Ok(runner)
    }

    fn runner(&self, id: JobId) -> Result<JobRunner, AppError> {
        self.jobs
            .lock()
            .get(&id)
            .cloned()
            .ok_or_else(|| AppError::configuration(format!("unknown job {}", id)))
    }

    pub fn pause_job(&self, id: JobId) -> Result<bool, AppError> {
        Ok(self.runner(id)?.pause())
    }

    pub fn resume_job(&self, id: JobId) -> Result<bool, AppError> {
        Ok(self.runner(id)?.resume())
    }

    pub fn cancel_job(&self, id: JobId) -> Result<bool, AppError> {
        Ok(self.runner(id)?.cancel())
    }

    /// Drop a finished job from the registry.
    pub fn forget_job(&self, id: JobId) {
        self.jobs.lock().remove(&id);
    }

    pub fn enqueue(&self, spec: JobSpec) -> Result<(JobId, usize), AppError> {
        self.queue.enqueue(self.apply_defaults(spec))
    }

    /// Queue one job built from a named device profile.
    pub fn enqueue_profile(&self, request: &ProfileRequest) -> Result<(JobId, usize), AppError> {
        self.enqueue(request.job_spec()?)
    }

    /// Queue one conversion per target container. The jobs run one after
    /// another like any other queued work; nothing is queued on error.
    pub fn enqueue_formats(
        &self,
        request: &MultiFormatRequest,
    ) -> Result<Vec<(JobId, usize)>, AppError> {
        let specs = request
            .job_specs(&self.settings)?
            .into_iter()
            .map(|spec| self.apply_defaults(spec))
            .collect();
        self.queue.enqueue_all(specs)
    }

    /// Cancel the queue and every standalone job.
    pub fn cancel_all(&self) {
        self.queue.cancel();
        let runners: Vec<JobRunner> = self.jobs.lock().values().cloned().collect();
        for runner in runners {
            runner.cancel();
        }
    }
}

pub fn inspect_health(
    toolchain: &Toolchain,
    settings: &Settings,
    path: &Path,
) -> Result<HealthReport, AppError> {
    scan_health(
        &toolchain.ffmpeg,
        path,
        settings.effective_health_scan_timeout(),
    )
}
