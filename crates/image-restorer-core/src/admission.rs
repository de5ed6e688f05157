//! Submission boundary: authorization, validation and job creation

use crate::error::{ProcessingError, Result};
use crate::models::{JobDescriptor, JobId, JobOptions, JobStatus, PendingFile, StatusResponse, SubmitResponse, UploadedFile};
use crate::queue::WorkQueue;
use crate::registry::JobRegistry;
use crate::storage::ArtifactStore;
use std::sync::Arc;
use uuid::Uuid;

const SUBMIT_MESSAGE: &str = "Processing started in background";

/// Validates uploads, persists them, records the job and queues it
#[derive(Debug, Clone)]
pub struct AdmissionHandler {
    registry: Arc<JobRegistry>,
    store: Arc<ArtifactStore>,
    queue: WorkQueue,
    api_key: Option<String>,
}

impl AdmissionHandler {
    pub fn new(
        registry: Arc<JobRegistry>,
        store: Arc<ArtifactStore>,
        queue: WorkQueue,
        api_key: Option<String>,
    ) -> Self {
        Self {
            registry,
            store,
            queue,
            api_key,
        }
    }

    /// Check a presented shared secret. Everything passes when none is configured.
    pub fn authorize(&self, provided: Option<&str>) -> Result<()> {
        match (&self.api_key, provided) {
            (None, _) => Ok(()),
            (Some(expected), Some(provided)) if constant_time_eq(expected.as_bytes(), provided.as_bytes()) => Ok(()),
            (Some(_), _) => {
                tracing::warn!("Rejected submission with invalid or missing API key");
                Err(ProcessingError::Unauthorized)
            }
        }
    }

    /// Authorize, then submit
    pub async fn submit_authorized(
        &self,
        provided_key: Option<&str>,
        files: Vec<UploadedFile>,
        options: JobOptions,
    ) -> Result<SubmitResponse> {
        self.authorize(provided_key)?;
        self.submit(files, options).await
    }

    /// Admit a batch of uploads as one job.
    ///
    /// Non-image uploads are dropped. An oversized file rejects the whole
    /// batch and removes every artifact already written for it. The job is
    /// recorded before it is queued.
    pub async fn submit(&self, files: Vec<UploadedFile>, options: JobOptions) -> Result<SubmitResponse> {
        let accepted: Vec<UploadedFile> = files
            .into_iter()
            .filter(|file| {
                let keep = file.is_image();
                if !keep {
                    tracing::debug!(
                        filename = %file.filename,
                        content_type = %file.content_type,
                        "Ignoring non-image upload"
                    );
                }
                keep
            })
            .collect();

        if accepted.is_empty() {
            return Err(ProcessingError::NoValidFiles);
        }

        let job_id = Uuid::new_v4();
        let saved = self.save_all(job_id, &accepted).await?;

        // Unserialized snapshot; concurrent submissions may share a position
        let queue_position = self.queue.depth();
        if let Err(e) = self
            .registry
            .create(job_id, saved.clone(), options, queue_position)
            .await
        {
            self.discard(&saved).await;
            return Err(e);
        }

        let descriptor = JobDescriptor {
            job_id,
            files: saved.clone(),
            options,
        };
        if let Err(e) = self.queue.enqueue(descriptor) {
            self.discard(&saved).await;
            if let Err(record_err) = self.registry.set_error(job_id, e.to_string()).await {
                tracing::error!("Could not record enqueue failure for job {}: {}", job_id, record_err);
            }
            return Err(e);
        }

        tracing::info!(
            job_id = %job_id,
            files = saved.len(),
            queue_position,
            face_enhance = options.face_enhance,
            "Job submitted"
        );

        Ok(SubmitResponse {
            job_id,
            status: JobStatus::Queued,
            message: SUBMIT_MESSAGE.to_string(),
            queue_position,
        })
    }

    /// Current state of a job
    pub async fn status(&self, job_id: JobId) -> Result<StatusResponse> {
        let job = self.registry.get(job_id).await?;
        Ok(StatusResponse::from(&job))
    }

    /// Status lookup by the raw identifier a client sent
    pub async fn status_str(&self, job_id: &str) -> Result<StatusResponse> {
        let job_id = Uuid::parse_str(job_id.trim()).map_err(|_| ProcessingError::job_not_found(job_id))?;
        self.status(job_id).await
    }

    async fn save_all(&self, job_id: JobId, uploads: &[UploadedFile]) -> Result<Vec<PendingFile>> {
        let mut saved = Vec::with_capacity(uploads.len());
        for upload in uploads {
            match self.store.save(job_id, &upload.filename, upload.data.as_slice()).await {
                Ok(temp_path) => saved.push(PendingFile {
                    temp_path,
                    original_filename: upload.filename.clone(),
                }),
                Err(e) => {
                    self.discard(&saved).await;
                    return Err(e);
                }
            }
        }
        Ok(saved)
    }

    async fn discard(&self, files: &[PendingFile]) {
        for file in files {
            if let Err(e) = self.store.delete(&file.temp_path).await {
                tracing::warn!("Failed to remove {}: {}", file.temp_path.display(), e);
            }
        }
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
