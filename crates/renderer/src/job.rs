//! Render jobs and their lifecycle.
//!
//! A job is created Pending at intake, moves to Running when a worker picks it up
//! and ends Completed, Failed or Canceled. Reprocessing puts it back to Pending.

use crate::probe::SourceDescriptor;
use lut_renderer_config::EncodingParameters;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Job identifier (UUID v4 string).
pub type JobId = String;

/// Status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting for a worker.
    Pending,
    /// A worker is executing the job's stages.
    Running,
    /// All stages exited cleanly.
    Completed,
    /// A stage failed or the pipeline could not be built.
    Failed,
    /// Canceled before completion.
    Canceled,
}

impl Default for JobStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Pending => write!(f, "pending"),
            JobStatus::Running => write!(f, "running"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Failed => write!(f, "failed"),
            JobStatus::Canceled => write!(f, "canceled"),
        }
    }
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Canceled
        )
    }
}

/// Replacement settings applied when a job is reprocessed.
#[derive(Debug, Clone, PartialEq)]
pub struct JobRevision {
    pub params: EncodingParameters,
    pub lut_path: Option<PathBuf>,
    pub output_path: PathBuf,
    pub cover_path: Option<PathBuf>,
    pub intermediate_path: Option<PathBuf>,
}

/// One source file queued for rendering.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Job {
    /// Unique job identifier (UUID).
    pub id: JobId,
    pub source_path: PathBuf,
    /// Final delivery file.
    pub output_path: PathBuf,
    pub lut_path: Option<PathBuf>,
    pub cover_path: Option<PathBuf>,
    pub params: EncodingParameters,
    /// Probed once at intake; `None` when probing failed.
    pub source_info: Option<SourceDescriptor>,
    /// ProRes master location, required in pro mode.
    pub intermediate_path: Option<PathBuf>,
    pub status: JobStatus,
    /// Overall progress, 0..=100.
    pub progress: u8,
    pub error: Option<String>,
    /// Unix timestamp (milliseconds) when the job started running.
    pub started_at: Option<i64>,
    /// Unix timestamp (milliseconds) when the job reached a terminal status.
    pub finished_at: Option<i64>,
}

impl Job {
    /// Create a Pending job with a fresh id.
    pub fn new(source_path: PathBuf, output_path: PathBuf, params: EncodingParameters) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            source_path,
            output_path,
            lut_path: None,
            cover_path: None,
            params,
            source_info: None,
            intermediate_path: None,
            status: JobStatus::Pending,
            progress: 0,
            error: None,
            started_at: None,
            finished_at: None,
        }
    }

    /// Mark the job as running.
    pub fn start(&mut self) {
        self.status = JobStatus::Running;
        self.progress = 0;
        self.error = None;
        self.started_at = Some(current_timestamp_ms());
        self.finished_at = None;
    }

    /// Record progress, clamped to 100.
    pub fn set_progress(&mut self, progress: u8) {
        self.progress = progress.min(100);
    }

    pub fn complete(&mut self) {
        self.status = JobStatus::Completed;
        self.progress = 100;
        self.finish();
    }

    /// Mark the job as failed with a reason.
    pub fn fail(&mut self, reason: &str) {
        self.status = JobStatus::Failed;
        self.error = Some(reason.to_string());
        self.finish();
    }

    pub fn cancel(&mut self) {
        self.status = JobStatus::Canceled;
        self.finish();
    }

    /// Return the job to Pending for another run.
    pub fn reset_for_reprocess(&mut self) {
        self.status = JobStatus::Pending;
        self.progress = 0;
        self.error = None;
        self.started_at = None;
        self.finished_at = None;
    }

    pub fn apply_revision(&mut self, revision: JobRevision) {
        self.params = revision.params;
        self.lut_path = revision.lut_path;
        self.output_path = revision.output_path;
        self.cover_path = revision.cover_path;
        self.intermediate_path = revision.intermediate_path;
    }

    /// Check if the job is in a terminal state (completed, failed, or canceled).
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Check if the job is active (pending or running).
    pub fn is_active(&self) -> bool {
        matches!(self.status, JobStatus::Pending | JobStatus::Running)
    }

    fn finish(&mut self) {
        self.finished_at = Some(current_timestamp_ms());
    }
}

/// Get current timestamp in milliseconds since Unix epoch.
pub(crate) fn current_timestamp_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
