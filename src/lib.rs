pub mod codec;
pub mod error;
pub mod estimate;
pub mod events;
pub mod ffmpeg;
pub mod job;
pub mod profiles;
pub mod queue;
pub mod runner;
pub mod settings;
pub mod sidecar_api;

pub use codec::EncoderInfo;
pub use error::AppError;
pub use job::{Job, JobId, JobSpec, JobStatus, Operation};
pub use profiles::DeviceProfile;
