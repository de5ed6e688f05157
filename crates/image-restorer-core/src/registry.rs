//! In-memory job registry shared by admission, the worker and status queries

use crate::error::{ProcessingError, Result};
use crate::models::{Job, JobId, JobOptions, JobResult, JobStatus, PendingFile};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tokio::sync::{broadcast, RwLock};

const STATUS_CHANNEL_CAPACITY: usize = 1024;

/// Job status update message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStatusUpdate {
    pub job_id: JobId,
    pub old_status: JobStatus,
    pub new_status: JobStatus,
    pub timestamp: DateTime<Utc>,
    pub message: Option<String>,
}

/// Registry statistics
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RegistryStats {
    pub queued: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
}

impl RegistryStats {
    pub fn total(&self) -> usize {
        self.queued + self.processing + self.completed + self.failed
    }
}

/// Job registry.
///
/// Writers are serialized by the lock; any number of readers may query
/// concurrently. The map itself is never handed out.
#[derive(Debug)]
pub struct JobRegistry {
    jobs: RwLock<HashMap<JobId, Job>>,
    status_sender: broadcast::Sender<JobStatusUpdate>,
}

impl Default for JobRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl JobRegistry {
    pub fn new() -> Self {
        let (status_sender, _) = broadcast::channel(STATUS_CHANNEL_CAPACITY);
        Self {
            jobs: RwLock::new(HashMap::new()),
            status_sender,
        }
    }

    /// Insert a new queued job. The job is visible to `get` once this returns.
    pub async fn create(
        &self,
        job_id: JobId,
        files: Vec<PendingFile>,
        options: JobOptions,
        queue_position: usize,
    ) -> Result<()> {
        {
            let mut jobs = self.jobs.write().await;
            if jobs.contains_key(&job_id) {
                return Err(ProcessingError::InvalidInput {
                    message: format!("Job {} already exists", job_id),
                });
            }
            jobs.insert(job_id, Job::new(job_id, files, options, queue_position));
        }

        self.publish(job_id, JobStatus::Queued, JobStatus::Queued, Some("Job added to queue"));
        tracing::debug!("Job {} registered at queue position {}", job_id, queue_position);
        Ok(())
    }

    /// Get a snapshot of a job
    pub async fn get(&self, job_id: JobId) -> Result<Job> {
        let jobs = self.jobs.read().await;
        jobs.get(&job_id)
            .cloned()
            .ok_or_else(|| ProcessingError::job_not_found(job_id))
    }

    pub async fn status(&self, job_id: JobId) -> Option<JobStatus> {
        let jobs = self.jobs.read().await;
        jobs.get(&job_id).map(|job| job.status)
    }

    /// Move a job to `status`, rejecting transitions outside the lifecycle DAG
    pub async fn set_status(&self, job_id: JobId, status: JobStatus) -> Result<()> {
        let old_status = {
            let mut jobs = self.jobs.write().await;
            let job = jobs
                .get_mut(&job_id)
                .ok_or_else(|| ProcessingError::job_not_found(job_id))?;
            transition(job, status)?
        };

        self.publish(job_id, old_status, status, None);
        tracing::info!("Job {} moved from {} to {}", job_id, old_status, status);
        Ok(())
    }

    /// Move a job to `completed` and publish its results in the same step.
    ///
    /// Results are never visible while the job is still processing.
    pub async fn complete(&self, job_id: JobId, results: Vec<JobResult>) -> Result<()> {
        let result_count = results.len();
        let old_status = {
            let mut jobs = self.jobs.write().await;
            let job = jobs
                .get_mut(&job_id)
                .ok_or_else(|| ProcessingError::job_not_found(job_id))?;
            let old_status = transition(job, JobStatus::Completed)?;
            job.results = results;
            old_status
        };

        self.publish(job_id, old_status, JobStatus::Completed, None);
        tracing::info!("Job {} completed with {} result(s)", job_id, result_count);
        Ok(())
    }

    /// Record a failure message and move the job to `failed`
    pub async fn set_error(&self, job_id: JobId, message: impl Into<String>) -> Result<()> {
        let message = message.into();
        let old_status = {
            let mut jobs = self.jobs.write().await;
            let job = jobs
                .get_mut(&job_id)
                .ok_or_else(|| ProcessingError::job_not_found(job_id))?;
            let old_status = transition(job, JobStatus::Failed)?;
            job.error = Some(message.clone());
            old_status
        };

        tracing::error!("Job {} failed: {}", job_id, message);
        self.publish(job_id, old_status, JobStatus::Failed, Some(&message));
        Ok(())
    }

    /// Drop an input entry once the worker has consumed it
    pub async fn consume_file(&self, job_id: JobId, temp_path: &Path) -> Result<()> {
        let mut jobs = self.jobs.write().await;
        let job = jobs
            .get_mut(&job_id)
            .ok_or_else(|| ProcessingError::job_not_found(job_id))?;
        job.files.retain(|file| file.temp_path != temp_path);
        Ok(())
    }

    /// Input entries the worker has not consumed yet
    pub async fn pending_files(&self, job_id: JobId) -> Result<Vec<PendingFile>> {
        let jobs = self.jobs.read().await;
        jobs.get(&job_id)
            .map(|job| job.files.clone())
            .ok_or_else(|| ProcessingError::job_not_found(job_id))
    }

    /// Subscribe to job status updates
    pub fn subscribe(&self) -> broadcast::Receiver<JobStatusUpdate> {
        self.status_sender.subscribe()
    }

    pub async fn stats(&self) -> RegistryStats {
        let jobs = self.jobs.read().await;
        let mut stats = RegistryStats::default();
        for job in jobs.values() {
            match job.status {
                JobStatus::Queued => stats.queued += 1,
                JobStatus::Processing => stats.processing += 1,
                JobStatus::Completed => stats.completed += 1,
                JobStatus::Failed => stats.failed += 1,
            }
        }
        stats
    }

    fn publish(&self, job_id: JobId, old_status: JobStatus, new_status: JobStatus, message: Option<&str>) {
        let update = JobStatusUpdate {
            job_id,
            old_status,
            new_status,
            timestamp: Utc::now(),
            message: message.map(str::to_string),
        };

        // No subscribers is the common case
        let _ = self.status_sender.send(update);
    }
}

fn transition(job: &mut Job, next: JobStatus) -> Result<JobStatus> {
    let current = job.status;
    if !current.can_transition_to(next) {
        return Err(ProcessingError::InvalidTransition {
            job_id: job.id,
            from: current,
            to: next,
        });
    }

    let now = Utc::now();
    match next {
        JobStatus::Processing => job.started_at = Some(now),
        JobStatus::Completed | JobStatus::Failed => job.finished_at = Some(now),
        JobStatus::Queued => {}
    }
    job.status = next;
    Ok(current)
}
