//! LUT Renderer
//!
//! Turns source clips, encoding parameters and an optional 3D LUT into ffmpeg
//! invocations, then runs them as a supervised, cancellable job queue.

pub mod command;
pub mod concurrency;
pub mod intake;
pub mod job;
pub mod pipeline;
pub mod policy;
pub mod probe;
pub mod progress;
pub mod queue;
pub mod snapshot;
pub mod startup;
pub mod supervisor;

#[cfg(all(test, unix))]
mod test_support;

pub use lut_renderer_config as config;
pub use lut_renderer_config::{EncodingParameters, Settings};
pub use command::{cover_command, synthesize, CommandRequest, ConfigurationError, SynthesizedCommand};
pub use concurrency::{derive_plan, ConcurrencyPlan};
pub use intake::{
    collect_sources, Admission, IntakeError, JobIntake, MasterEstimate, PathAllocator,
};
pub use job::{Job, JobId, JobRevision, JobStatus};
pub use pipeline::{build_pipeline, validate_pipeline, StageDescriptor};
pub use probe::{FfprobeProbe, ProbeError, SourceDescriptor, SourceProbe};
pub use progress::{ProgressTracker, StageSpan};
pub use queue::{spawn_queue, QueueError, QueueEvent, QueueHandle};
pub use snapshot::QueueSnapshot;
pub use startup::{check_tools, parse_ffmpeg_version, StartupError, ToolReport};
pub use supervisor::{JobEvent, StageError, Supervisor, SupervisorConfig};
