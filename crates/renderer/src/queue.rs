//! Job queue.
//!
//! A single coordinator task owns every [`Job`]. Callers talk to it through a
//! cloneable [`QueueHandle`]; workers report [`JobEvent`]s back to it, and it
//! forwards them, in order and tagged by job id, on one outbound channel.

use crate::command::ConfigurationError;
use crate::job::{Job, JobId, JobRevision, JobStatus};
use crate::pipeline::validate_pipeline;
use crate::snapshot::QueueSnapshot;
use crate::supervisor::{EventSender, JobEvent, Supervisor};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

/// Error type for queue requests
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("job not found: {0}")]
    NotFound(JobId),

    #[error("job {0} is running")]
    JobRunning(JobId),

    #[error("job {id} is {status} and cannot be started; reprocess it instead")]
    NotPending { id: JobId, status: JobStatus },

    #[error("job {id} already queued")]
    Duplicate { id: JobId },

    #[error("job {id} rejected: {source}")]
    Invalid {
        id: JobId,
        #[source]
        source: ConfigurationError,
    },

    #[error("job queue has shut down")]
    Closed,
}

/// Everything the queue reports to its owner.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum QueueEvent {
    Job { id: JobId, event: JobEvent },
    /// The last running job finished and nothing else is scheduled.
    Idle,
}

enum Request {
    Add {
        jobs: Vec<Job>,
        reply: oneshot::Sender<Result<Vec<JobId>, QueueError>>,
    },
    StartAll {
        reply: oneshot::Sender<usize>,
    },
    Start {
        id: JobId,
        reply: oneshot::Sender<Result<(), QueueError>>,
    },
    Cancel {
        id: JobId,
        reply: oneshot::Sender<Result<(), QueueError>>,
    },
    CancelAll {
        reply: oneshot::Sender<usize>,
    },
    Reprocess {
        id: JobId,
        revision: Option<JobRevision>,
        reply: oneshot::Sender<Result<(), QueueError>>,
    },
    Remove {
        id: JobId,
        reply: oneshot::Sender<Result<(), QueueError>>,
    },
    ClearFinished {
        reply: oneshot::Sender<usize>,
    },
    SetMaxConcurrency {
        max: usize,
        reply: oneshot::Sender<usize>,
    },
    Snapshot {
        reply: oneshot::Sender<QueueSnapshot>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Cloneable handle to the coordinator task.
#[derive(Clone)]
pub struct QueueHandle {
    requests: mpsc::Sender<Request>,
}

/// Start the coordinator on the current runtime.
///
/// Returns the handle and the outbound event stream. The coordinator exits after
/// [`QueueHandle::shutdown`] or once every handle is dropped, in both cases
/// canceling and draining running jobs first.
pub fn spawn_queue(
    supervisor: Supervisor,
    max_concurrency: usize,
) -> (QueueHandle, mpsc::UnboundedReceiver<QueueEvent>) {
    let (request_tx, request_rx) = mpsc::channel(100);
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let (worker_tx, worker_rx) = mpsc::unbounded_channel();

    let coordinator = Coordinator {
        jobs: Vec::new(),
        scheduled: VecDeque::new(),
        running: HashMap::new(),
        max_concurrency: max_concurrency.max(1),
        supervisor,
        worker_tx,
        events: event_tx,
    };
    tokio::spawn(coordinator.run(request_rx, worker_rx));

    (
        QueueHandle {
            requests: request_tx,
        },
        event_rx,
    )
}

impl QueueHandle {
    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> Request,
    ) -> Result<T, QueueError> {
        let (reply, response) = oneshot::channel();
        self.requests
            .send(make(reply))
            .await
            .map_err(|_| QueueError::Closed)?;
        response.await.map_err(|_| QueueError::Closed)
    }

    /// Add Pending jobs; nothing is added when any job is rejected.
    pub async fn add_jobs(&self, jobs: Vec<Job>) -> Result<Vec<JobId>, QueueError> {
        self.request(|reply| Request::Add { jobs, reply }).await?
    }

    /// Schedule every Pending job; returns how many were newly scheduled.
    pub async fn start_all(&self) -> Result<usize, QueueError> {
        self.request(|reply| Request::StartAll { reply }).await
    }

    pub async fn start(&self, id: &str) -> Result<(), QueueError> {
        let id = id.to_string();
        self.request(|reply| Request::Start { id, reply }).await?
    }

    /// Cancel one job. Finished jobs are left as they are.
    pub async fn cancel(&self, id: &str) -> Result<(), QueueError> {
        let id = id.to_string();
        self.request(|reply| Request::Cancel { id, reply }).await?
    }

    /// Cancel every Pending and Running job; returns how many were affected.
    pub async fn cancel_all(&self) -> Result<usize, QueueError> {
        self.request(|reply| Request::CancelAll { reply }).await
    }

    /// Reset a finished or pending job, optionally revised, and schedule it again.
    pub async fn reprocess(
        &self,
        id: &str,
        revision: Option<JobRevision>,
    ) -> Result<(), QueueError> {
        let id = id.to_string();
        self.request(|reply| Request::Reprocess {
            id,
            revision,
            reply,
        })
        .await?
    }

    /// Remove a job, canceling it first when it is running.
    pub async fn remove(&self, id: &str) -> Result<(), QueueError> {
        let id = id.to_string();
        self.request(|reply| Request::Remove { id, reply }).await?
    }

    /// Drop Completed, Failed and Canceled jobs; returns how many were removed.
    pub async fn clear_finished(&self) -> Result<usize, QueueError> {
        self.request(|reply| Request::ClearFinished { reply }).await
    }

    /// Change the worker limit (at least 1); running jobs are not restarted.
    pub async fn set_max_concurrency(&self, max: usize) -> Result<usize, QueueError> {
        self.request(|reply| Request::SetMaxConcurrency { max, reply })
            .await
    }

    pub async fn snapshot(&self) -> Result<QueueSnapshot, QueueError> {
        self.request(|reply| Request::Snapshot { reply }).await
    }

    /// Cancel everything and wait until running jobs have stopped.
    pub async fn shutdown(&self) -> Result<(), QueueError> {
        self.request(|reply| Request::Shutdown { reply }).await
    }
}

struct Coordinator {
    /// Insertion ordered.
    jobs: Vec<Job>,
    scheduled: VecDeque<JobId>,
    /// Includes removed jobs whose worker has not reported back yet.
    running: HashMap<JobId, CancellationToken>,
    max_concurrency: usize,
    supervisor: Supervisor,
    worker_tx: EventSender,
    events: mpsc::UnboundedSender<QueueEvent>,
}

impl Coordinator {
    async fn run(
        mut self,
        mut requests: mpsc::Receiver<Request>,
        mut worker_events: mpsc::UnboundedReceiver<(JobId, JobEvent)>,
    ) {
        let mut shutdown_reply: Option<oneshot::Sender<()>> = None;
        let mut accepting = true;

        loop {
            if !accepting && self.running.is_empty() {
                break;
            }
            tokio::select! {
                request = requests.recv(), if accepting => match request {
                    Some(Request::Shutdown { reply }) => {
                        tracing::info!("job queue shutting down");
                        self.cancel_everything();
                        shutdown_reply = Some(reply);
                        accepting = false;
                    }
                    Some(request) => self.handle(request),
                    None => {
                        self.cancel_everything();
                        accepting = false;
                    }
                },
                Some((id, event)) = worker_events.recv() => self.apply(id, event),
            }
        }

        if let Some(reply) = shutdown_reply {
            let _ = reply.send(());
        }
        tracing::debug!("job queue stopped");
    }

    fn handle(&mut self, request: Request) {
        match request {
            Request::Add { jobs, reply } => {
                let _ = reply.send(self.add(jobs));
            }
            Request::StartAll { reply } => {
                let pending: Vec<JobId> = self
                    .jobs
                    .iter()
                    .filter(|j| j.status == JobStatus::Pending)
                    .map(|j| j.id.clone())
                    .collect();
                let mut added = 0;
                for id in pending {
                    if self.schedule(id) {
                        added += 1;
                    }
                }
                self.dispatch();
                let _ = reply.send(added);
            }
            Request::Start { id, reply } => {
                let _ = reply.send(self.start(id));
            }
            Request::Cancel { id, reply } => {
                let _ = reply.send(self.cancel(&id));
            }
            Request::CancelAll { reply } => {
                let _ = reply.send(self.cancel_everything());
            }
            Request::Reprocess {
                id,
                revision,
                reply,
            } => {
                let _ = reply.send(self.reprocess(id, revision));
            }
            Request::Remove { id, reply } => {
                let _ = reply.send(self.remove(&id));
            }
            Request::ClearFinished { reply } => {
                let before = self.jobs.len();
                self.jobs.retain(|j| !j.is_terminal());
                let _ = reply.send(before - self.jobs.len());
            }
            Request::SetMaxConcurrency { max, reply } => {
                self.max_concurrency = max.max(1);
                tracing::info!(max = self.max_concurrency, "max concurrency changed");
                self.dispatch();
                let _ = reply.send(self.max_concurrency);
            }
            Request::Snapshot { reply } => {
                let _ = reply.send(QueueSnapshot::from_jobs(self.jobs.clone()));
            }
            // Handled in the run loop
            Request::Shutdown { reply } => {
                let _ = reply.send(());
            }
        }
    }

    fn job_mut(&mut self, id: &str) -> Option<&mut Job> {
        self.jobs.iter_mut().find(|j| j.id == id)
    }

    fn add(&mut self, jobs: Vec<Job>) -> Result<Vec<JobId>, QueueError> {
        for (index, job) in jobs.iter().enumerate() {
            let clash = self.jobs.iter().any(|j| j.id == job.id)
                || jobs[..index].iter().any(|j| j.id == job.id);
            if clash {
                return Err(QueueError::Duplicate { id: job.id.clone() });
            }
            validate_pipeline(job).map_err(|source| QueueError::Invalid {
                id: job.id.clone(),
                source,
            })?;
        }

        let ids = jobs.iter().map(|j| j.id.clone()).collect();
        for mut job in jobs {
            job.reset_for_reprocess();
            tracing::debug!(job = %job.id, source = %job.source_path.display(), "job added");
            self.jobs.push(job);
        }
        Ok(ids)
    }

    /// Queue a Pending job for dispatch; false when it is not eligible.
    fn schedule(&mut self, id: JobId) -> bool {
        if self.scheduled.contains(&id) || self.running.contains_key(&id) {
            return false;
        }
        match self.jobs.iter().find(|j| j.id == id) {
            Some(job) if job.status == JobStatus::Pending => {
                self.scheduled.push_back(id);
                true
            }
            _ => false,
        }
    }

    fn start(&mut self, id: JobId) -> Result<(), QueueError> {
        let status = self
            .jobs
            .iter()
            .find(|j| j.id == id)
            .map(|j| j.status)
            .ok_or_else(|| QueueError::NotFound(id.clone()))?;
        match status {
            JobStatus::Pending => {
                self.schedule(id);
                self.dispatch();
                Ok(())
            }
            JobStatus::Running => Ok(()),
            status => Err(QueueError::NotPending { id, status }),
        }
    }

    /// Start scheduled jobs while there is room.
    fn dispatch(&mut self) {
        while self.running.len() < self.max_concurrency {
            let Some(id) = self.scheduled.pop_front() else {
                break;
            };
            let Some(job) = self.jobs.iter_mut().find(|j| j.id == id) else {
                continue;
            };
            if job.status != JobStatus::Pending {
                continue;
            }
            job.start();

            let token = CancellationToken::new();
            self.running.insert(id, token.clone());

            let job = job.clone();
            let supervisor = self.supervisor.clone();
            let events = self.worker_tx.clone();
            tokio::spawn(async move {
                supervisor.run_job(&job, &token, &events).await;
            });
        }
    }

    fn cancel(&mut self, id: &str) -> Result<(), QueueError> {
        let status = self
            .jobs
            .iter()
            .find(|j| j.id == id)
            .map(|j| j.status)
            .ok_or_else(|| QueueError::NotFound(id.to_string()))?;

        match status {
            JobStatus::Running => {
                if let Some(token) = self.running.get(id) {
                    token.cancel();
                }
            }
            JobStatus::Pending => {
                let was_scheduled = self.scheduled.contains(&id.to_string());
                self.scheduled.retain(|s| s != id);
                if let Some(job) = self.job_mut(id) {
                    job.cancel();
                }
                self.forward(
                    id,
                    JobEvent::Status {
                        status: JobStatus::Canceled,
                        error: None,
                    },
                );
                if was_scheduled {
                    self.notify_if_idle();
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// Cancel all pending and running jobs; returns how many were affected.
    fn cancel_everything(&mut self) -> usize {
        let active: Vec<JobId> = self
            .jobs
            .iter()
            .filter(|j| j.is_active())
            .map(|j| j.id.clone())
            .collect();
        for id in &active {
            let _ = self.cancel(id);
        }
        // Removed jobs still running
        for token in self.running.values() {
            token.cancel();
        }
        active.len()
    }

    fn reprocess(&mut self, id: JobId, revision: Option<JobRevision>) -> Result<(), QueueError> {
        let job = self
            .jobs
            .iter_mut()
            .find(|j| j.id == id)
            .ok_or_else(|| QueueError::NotFound(id.clone()))?;
        if job.status == JobStatus::Running || self.running.contains_key(&id) {
            return Err(QueueError::JobRunning(id));
        }

        let mut candidate = job.clone();
        if let Some(revision) = revision {
            candidate.apply_revision(revision);
        }
        validate_pipeline(&candidate).map_err(|source| QueueError::Invalid {
            id: id.clone(),
            source,
        })?;

        candidate.reset_for_reprocess();
        *job = candidate;
        tracing::info!(job = %id, "job reprocessed");
        self.schedule(id);
        self.dispatch();
        Ok(())
    }

    fn remove(&mut self, id: &str) -> Result<(), QueueError> {
        let index = self
            .jobs
            .iter()
            .position(|j| j.id == id)
            .ok_or_else(|| QueueError::NotFound(id.to_string()))?;
        let running = match self.running.get(id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        };
        self.scheduled.retain(|s| s != id);
        self.jobs.remove(index);
        // A running job reports idle through its terminal event
        if !running {
            self.notify_if_idle();
        }
        Ok(())
    }

    /// Apply a worker event to the store and forward it.
    fn apply(&mut self, id: JobId, mut event: JobEvent) {
        let terminal = matches!(&event, JobEvent::Status { status, .. } if status.is_terminal());
        if terminal {
            let canceled = self
                .running
                .remove(&id)
                .map(|token| token.is_cancelled())
                .unwrap_or(false);
            // A failure racing a cancel request reports as canceled
            if canceled
                && matches!(
                    event,
                    JobEvent::Status {
                        status: JobStatus::Failed,
                        ..
                    }
                )
            {
                event = JobEvent::Status {
                    status: JobStatus::Canceled,
                    error: None,
                };
            }
        }

        if let Some(job) = self.job_mut(&id) {
            match &event {
                JobEvent::Progress { progress } => job.set_progress(*progress),
                JobEvent::Log { .. } => {}
                JobEvent::Status { status, error } => match status {
                    JobStatus::Completed => job.complete(),
                    JobStatus::Failed => job.fail(error.as_deref().unwrap_or("unknown error")),
                    JobStatus::Canceled => job.cancel(),
                    JobStatus::Running | JobStatus::Pending => {}
                },
            }
            self.forward(&id, event);
        }

        if terminal {
            self.dispatch();
            self.notify_if_idle();
        }
    }

    fn forward(&self, id: &str, event: JobEvent) {
        let _ = self.events.send(QueueEvent::Job {
            id: id.to_string(),
            event,
        });
    }

    fn notify_if_idle(&self) {
        if self.running.is_empty() && self.scheduled.is_empty() {
            tracing::info!("job queue idle");
            let _ = self.events.send(QueueEvent::Idle);
        }
    }
}
