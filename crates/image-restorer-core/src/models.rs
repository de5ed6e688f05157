//! Core data models for the job lifecycle

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use uuid::Uuid;

/// Unique identifier for restoration jobs
pub type JobId = Uuid;

/// Job status. Transitions form the DAG `queued -> processing -> {completed, failed}`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    /// Terminal states accept no further transitions
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Check whether moving from `self` to `next` is a legal transition.
    ///
    /// A queued job may fail directly when the worker cannot even start it.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Queued, JobStatus::Processing)
                | (JobStatus::Queued, JobStatus::Failed)
                | (JobStatus::Processing, JobStatus::Completed)
                | (JobStatus::Processing, JobStatus::Failed)
        )
    }

    /// Position in the lifecycle, used to check that status never regresses
    pub fn rank(&self) -> u8 {
        match self {
            JobStatus::Queued => 0,
            JobStatus::Processing => 1,
            JobStatus::Completed | JobStatus::Failed => 2,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Processing options captured at admission
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct JobOptions {
    pub face_enhance: bool,
}

impl Default for JobOptions {
    fn default() -> Self {
        Self { face_enhance: true }
    }
}

/// An input artifact waiting for the worker
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PendingFile {
    pub temp_path: PathBuf,
    pub original_filename: String,
}

/// One successfully restored file
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct JobResult {
    pub original_filename: String,
    /// Path under the static-serving prefix
    #[serde(rename = "url")]
    pub output_reference: String,
}

/// A restoration job as tracked by the registry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub status: JobStatus,
    /// Queue depth when the job was admitted; not kept live
    pub queue_position: usize,
    pub results: Vec<JobResult>,
    pub error: Option<String>,
    /// Inputs not yet consumed by the worker
    pub files: Vec<PendingFile>,
    pub options: JobOptions,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn new(id: JobId, files: Vec<PendingFile>, options: JobOptions, queue_position: usize) -> Self {
        Self {
            id,
            status: JobStatus::Queued,
            queue_position,
            results: Vec::new(),
            error: None,
            files,
            options,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }
}

/// Work item handed from admission to the worker
#[derive(Debug, Clone)]
pub struct JobDescriptor {
    pub job_id: JobId,
    pub files: Vec<PendingFile>,
    pub options: JobOptions,
}

/// An upload as received by the transport layer
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub filename: String,
    pub content_type: String,
    pub data: Vec<u8>,
}

impl UploadedFile {
    pub fn new(filename: impl Into<String>, content_type: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            filename: filename.into(),
            content_type: content_type.into(),
            data,
        }
    }

    pub fn is_image(&self) -> bool {
        self.content_type
            .trim()
            .to_ascii_lowercase()
            .starts_with("image/")
    }
}

/// Response returned to a client after a successful submission
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub job_id: JobId,
    pub status: JobStatus,
    pub message: String,
    /// Jobs waiting ahead of this one when it was admitted.
    ///
    /// Read from the queue without serializing concurrent submissions, so two
    /// jobs admitted at the same moment may report the same position. It is
    /// informational only and never updated afterwards.
    pub queue_position: usize,
}

/// Response returned to a status query
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub job_id: JobId,
    pub status: JobStatus,
    pub queue_position: usize,
    pub results: Vec<JobResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<&Job> for StatusResponse {
    fn from(job: &Job) -> Self {
        Self {
            job_id: job.id,
            status: job.status,
            queue_position: job.queue_position,
            results: job.results.clone(),
            error: job.error.clone(),
        }
    }
}

/// Outcome of one janitor sweep
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SweepReport {
    pub scanned: usize,
    pub removed: usize,
    pub failed: usize,
}

impl SweepReport {
    pub fn merge(&mut self, other: SweepReport) {
        self.scanned += other.scanned;
        self.removed += other.removed;
        self.failed += other.failed;
    }
}
