//! Task execution supervisor.
//!
//! Runs a job's stages as ffmpeg subprocesses, one after another, turning their
//! output into progress, log and status events. The supervisor never returns an
//! error past its boundary: every failure becomes a terminal status event, and the
//! terminal status is always the last event emitted for a job.

use crate::command::{cover_command, ConfigurationError, SynthesizedCommand};
use crate::job::{Job, JobId, JobStatus};
use crate::pipeline::{build_pipeline, StageDescriptor};
use crate::probe::{ProbeError, SourceDescriptor, SourceProbe};
use crate::progress::{ProgressTracker, StageSpan};
use serde::Serialize;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicI16, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Child;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Error type for a single stage.
#[derive(Debug, Error)]
pub enum StageError {
    /// The stage's command could not be built.
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    /// ffmpeg could not be started.
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// stdout/stderr were not captured.
    #[error("failed to capture ffmpeg output")]
    MissingPipe,

    /// Waiting for the process failed.
    #[error("failed waiting for ffmpeg: {0}")]
    Wait(#[source] std::io::Error),

    /// ffmpeg exited with a non-zero code.
    #[error("ffmpeg exited with code {0}")]
    ExitCode(i32),

    /// ffmpeg was killed by a signal.
    #[error("ffmpeg was terminated by a signal")]
    Terminated,
}

/// One observation about a job, in emission order.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobEvent {
    Progress { progress: u8 },
    Log { message: String },
    Status {
        status: JobStatus,
        error: Option<String>,
    },
}

/// Multiplexed event channel, tagged by job id.
pub type EventSender = mpsc::UnboundedSender<(JobId, JobEvent)>;

/// Supervisor settings.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// ffmpeg binary name or path.
    pub ffmpeg: String,
    /// How long ffmpeg gets to exit after a graceful terminate.
    pub cancel_grace: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            ffmpeg: "ffmpeg".to_string(),
            cancel_grace: Duration::from_secs(5),
        }
    }
}

/// How a stage ended when it did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StageExit {
    Success,
    Canceled,
}

/// Emits events for one job; a closed channel is ignored.
struct Reporter<'a> {
    id: &'a str,
    events: &'a EventSender,
    /// Last progress sent, -1 before the first; only increases are reported.
    progress: AtomicI16,
}

impl Reporter<'_> {
    fn send(&self, event: JobEvent) {
        let _ = self.events.send((self.id.to_string(), event));
    }

    fn log(&self, message: impl Into<String>) {
        self.send(JobEvent::Log {
            message: message.into(),
        });
    }

    fn progress(&self, progress: u8) {
        if self.progress.fetch_max(i16::from(progress), Ordering::Relaxed) >= i16::from(progress) {
            return;
        }
        self.send(JobEvent::Progress { progress });
    }

    fn status(&self, status: JobStatus, error: Option<String>) -> JobStatus {
        self.send(JobEvent::Status { status, error });
        status
    }
}

/// Executes jobs stage by stage.
#[derive(Clone)]
pub struct Supervisor {
    config: SupervisorConfig,
    probe: Arc<dyn SourceProbe>,
}

impl Supervisor {
    pub fn new(config: SupervisorConfig, probe: Arc<dyn SourceProbe>) -> Self {
        Self { config, probe }
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    /// Run every stage of `job`, reporting on `events`.
    ///
    /// Emits `Running` first and exactly one terminal status last, which is also
    /// returned. Cancellation is observed between stages and while reading output;
    /// once the final stage has exited cleanly it no longer has any effect.
    pub async fn run_job(
        &self,
        job: &Job,
        cancel: &CancellationToken,
        events: &EventSender,
    ) -> JobStatus {
        let reporter = Reporter {
            id: &job.id,
            events,
            progress: AtomicI16::new(-1),
        };
        reporter.status(JobStatus::Running, None);
        reporter.log("started");
        tracing::info!(job = %job.id, source = %job.source_path.display(), "job started");

        let stages = match build_pipeline(job) {
            Ok(stages) => stages,
            Err(e) => return self.fail(job, &reporter, e.to_string()),
        };

        let count = stages.len();
        for (index, stage) in stages.iter().enumerate() {
            if cancel.is_cancelled() {
                return self.canceled(job, &reporter);
            }
            reporter.log(format!("stage {}/{}: {}", index + 1, count, stage.name));
            tracing::info!(job = %job.id, stage = %stage.name, "stage started");

            let descriptor = self.stage_descriptor(job, stage, &reporter).await;
            let cmd = match stage.synthesize(&self.config.ffmpeg, descriptor.as_ref()) {
                Ok(cmd) => cmd,
                Err(e) => return self.fail(job, &reporter, e.to_string()),
            };
            for note in &cmd.notes {
                reporter.log(note.as_str());
            }
            reporter.log(format!("command: {}", cmd.display()));

            let span = StageSpan::for_stage(index, count);
            match self.run_stage(&cmd, span, cancel, &reporter).await {
                Ok(StageExit::Success) => {}
                Ok(StageExit::Canceled) => return self.canceled(job, &reporter),
                Err(e) => return self.fail(job, &reporter, e.to_string()),
            }
        }

        if let Some(cover) = &job.cover_path {
            self.extract_cover(job, cover, &reporter).await;
        }
        cleanup_intermediates(&stages, &reporter).await;

        reporter.progress(100);
        reporter.log("completed");
        tracing::info!(job = %job.id, "job completed");
        reporter.status(JobStatus::Completed, None)
    }

    /// Descriptor for a stage's input: re-probed when the stage asks for it.
    async fn stage_descriptor(
        &self,
        job: &Job,
        stage: &StageDescriptor,
        reporter: &Reporter<'_>,
    ) -> Option<SourceDescriptor> {
        if !stage.probe_source {
            return job.source_info.clone();
        }
        match self.probe_input(&stage.source).await {
            Ok(descriptor) => Some(descriptor),
            Err(e) => {
                tracing::warn!(job = %job.id, error = %e, "stage input probe failed");
                reporter.log(format!("stage input probe failed, treating as unknown: {}", e));
                None
            }
        }
    }

    async fn probe_input(&self, path: &Path) -> Result<SourceDescriptor, ProbeError> {
        let probe = Arc::clone(&self.probe);
        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || probe.probe(&path))
            .await
            .map_err(|e| ProbeError::FfprobeFailed(e.to_string()))?
    }

    /// Spawn one stage and follow its output until exit or cancellation.
    async fn run_stage(
        &self,
        cmd: &SynthesizedCommand,
        span: StageSpan,
        cancel: &CancellationToken,
        reporter: &Reporter<'_>,
    ) -> Result<StageExit, StageError> {
        let mut command = cmd.to_command();
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        let mut child = command.spawn().map_err(|source| StageError::Spawn {
            program: cmd.program().to_string(),
            source,
        })?;

        // Each pipe keeps its own line order; lines from the two pipes interleave
        // in arrival order. ffmpeg writes its status lines to stderr only.
        let stdout = child.stdout.take().ok_or(StageError::MissingPipe)?;
        let stderr = child.stderr.take().ok_or(StageError::MissingPipe)?;
        let (line_tx, mut lines) = mpsc::unbounded_channel();
        tokio::spawn(forward_lines(stdout, line_tx.clone()));
        tokio::spawn(forward_lines(stderr, line_tx));

        let mut tracker = ProgressTracker::new(span);
        let mut output_open = true;
        // None when cancellation was observed first
        let exited = loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break None,
                line = lines.recv(), if output_open => match line {
                    Some(line) => {
                        let message = line.trim();
                        if !message.is_empty() {
                            tracing::debug!(target: "lut_renderer::ffmpeg", "{}", message);
                            reporter.log(message);
                        }
                        if let Some(progress) = tracker.observe(&line) {
                            reporter.progress(progress);
                        }
                    }
                    None => output_open = false,
                },
                status = child.wait(), if !output_open => {
                    break Some(status.map_err(StageError::Wait)?);
                }
            }
        };

        let status = match exited {
            Some(status) => status,
            None => match child.try_wait() {
                // Already gone: judge it by its exit status like any other stage
                Ok(Some(status)) => status,
                _ => {
                    self.terminate(&mut child).await;
                    return Ok(StageExit::Canceled);
                }
            },
        };

        if status.success() {
            if let Some(progress) = tracker.finish() {
                reporter.progress(progress);
            }
            return Ok(StageExit::Success);
        }
        // A failure racing a cancel request reports as canceled
        if cancel.is_cancelled() {
            return Ok(StageExit::Canceled);
        }
        Err(exit_error(status))
    }

    /// Ask ffmpeg to stop, then kill it if it does not exit within the grace period.
    async fn terminate(&self, child: &mut Child) {
        #[cfg(unix)]
        {
            use nix::sys::signal::{kill, Signal};
            use nix::unistd::Pid;

            if let Some(pid) = child.id() {
                if kill(Pid::from_raw(pid as i32), Signal::SIGTERM).is_ok() {
                    match tokio::time::timeout(self.config.cancel_grace, child.wait()).await {
                        Ok(_) => return,
                        Err(_) => tracing::warn!(pid, "ffmpeg ignored SIGTERM, killing"),
                    }
                }
            }
        }

        if let Err(e) = child.kill().await {
            tracing::warn!(error = %e, "failed to kill ffmpeg");
        }
    }

    /// Single-frame cover from the output (or the source when the output is missing).
    ///
    /// Failure is logged; it never fails the job.
    async fn extract_cover(&self, job: &Job, cover: &Path, reporter: &Reporter<'_>) {
        reporter.log("extracting cover");
        let input = if tokio::fs::try_exists(&job.output_path)
            .await
            .unwrap_or(false)
        {
            &job.output_path
        } else {
            &job.source_path
        };

        let mut command = cover_command(&self.config.ffmpeg, input, cover).to_command();
        command
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());

        match command.status().await {
            Ok(status) if status.success() => {
                reporter.log(format!("cover saved: {}", cover.display()));
            }
            Ok(status) => {
                tracing::warn!(job = %job.id, %status, "cover extraction failed");
                reporter.log(format!("cover extraction failed: {}", exit_error(status)));
            }
            Err(e) => {
                tracing::warn!(job = %job.id, error = %e, "cover extraction failed");
                reporter.log(format!("cover extraction failed: {}", e));
            }
        }
    }

    fn fail(&self, job: &Job, reporter: &Reporter<'_>, reason: String) -> JobStatus {
        tracing::warn!(job = %job.id, error = %reason, "job failed");
        reporter.log(format!("failed: {}", reason));
        reporter.status(JobStatus::Failed, Some(reason))
    }

    fn canceled(&self, job: &Job, reporter: &Reporter<'_>) -> JobStatus {
        tracing::info!(job = %job.id, "job canceled");
        reporter.log("canceled");
        reporter.status(JobStatus::Canceled, None)
    }
}

fn exit_error(status: ExitStatus) -> StageError {
    match status.code() {
        Some(code) => StageError::ExitCode(code),
        None => StageError::Terminated,
    }
}

/// Delete stage outputs flagged for cleanup; failures are only logged.
async fn cleanup_intermediates(stages: &[StageDescriptor], reporter: &Reporter<'_>) {
    for stage in stages.iter().filter(|s| s.cleanup_on_success) {
        match tokio::fs::remove_file(&stage.output).await {
            Ok(()) => reporter.log(format!("removed intermediate {}", stage.output.display())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(path = %stage.output.display(), error = %e, "intermediate cleanup failed");
            }
        }
    }
}

/// Forward output lines, splitting on `\n` and on the `\r` ffmpeg uses between
/// status updates.
async fn forward_lines<R>(reader: R, tx: mpsc::UnboundedSender<String>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut pending: Vec<u8> = Vec::new();
    loop {
        let chunk = match reader.fill_buf().await {
            Ok(chunk) if !chunk.is_empty() => chunk,
            Ok(_) => break,
            Err(e) => {
                tracing::debug!(error = %e, "stopped reading ffmpeg output");
                break;
            }
        };
        let consumed = chunk.len();
        for &byte in chunk {
            if byte == b'\n' || byte == b'\r' {
                if !pending.is_empty() {
                    let line = String::from_utf8_lossy(&pending).into_owned();
                    pending.clear();
                    if tx.send(line).is_err() {
                        return;
                    }
                }
            } else {
                pending.push(byte);
            }
        }
        reader.consume(consumed);
    }
    if !pending.is_empty() {
        let _ = tx.send(String::from_utf8_lossy(&pending).into_owned());
    }
}
