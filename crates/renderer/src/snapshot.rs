//! Point-in-time view of the job queue.

use crate::job::{Job, JobStatus};
use serde::{Deserialize, Serialize};

/// Jobs in insertion order plus per-status counts.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct QueueSnapshot {
    pub jobs: Vec<Job>,
    pub pending: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub canceled: usize,
    /// Mean over all jobs: completed count as 100, running as their progress,
    /// everything else as 0.
    pub overall_progress: u8,
}

impl QueueSnapshot {
    pub fn from_jobs(jobs: Vec<Job>) -> Self {
        let count = |status: JobStatus| jobs.iter().filter(|j| j.status == status).count();

        let overall_progress = if jobs.is_empty() {
            0
        } else {
            let total: u32 = jobs
                .iter()
                .map(|job| match job.status {
                    JobStatus::Completed => 100,
                    JobStatus::Running => u32::from(job.progress.min(100)),
                    _ => 0,
                })
                .sum();
            (total / jobs.len() as u32) as u8
        };

        Self {
            pending: count(JobStatus::Pending),
            running: count(JobStatus::Running),
            completed: count(JobStatus::Completed),
            failed: count(JobStatus::Failed),
            canceled: count(JobStatus::Canceled),
            overall_progress,
            jobs,
        }
    }

    /// Number of jobs not yet in a terminal state.
    pub fn active(&self) -> usize {
        self.pending + self.running
    }
}
