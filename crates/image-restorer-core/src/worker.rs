//! The single consumer that drives jobs through restoration

use crate::error::{ProcessingError, Result};
use crate::models::{JobDescriptor, JobId, JobOptions, JobResult, JobStatus, PendingFile};
use crate::queue::QueueConsumer;
use crate::registry::JobRegistry;
use crate::restorer::ImageRestorer;
use crate::storage::ArtifactStore;
use crate::utils::performance::Timer;
use image::DynamicImage;
use std::io::ErrorKind;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{info, instrument, warn};

/// Outcome of a single file within a job
#[derive(Debug)]
enum FileOutcome {
    Restored(JobResult),
    Skipped(ProcessingError),
}

/// Job worker. Processes one job at a time in queue order.
pub struct Worker {
    registry: Arc<JobRegistry>,
    store: Arc<ArtifactStore>,
    restorer: Arc<dyn ImageRestorer>,
}

impl Worker {
    pub fn new(registry: Arc<JobRegistry>, store: Arc<ArtifactStore>, restorer: Arc<dyn ImageRestorer>) -> Self {
        Self {
            registry,
            store,
            restorer,
        }
    }

    /// Start consuming on a background task
    pub fn spawn(self, consumer: QueueConsumer) -> JoinHandle<()> {
        tokio::spawn(self.run(consumer))
    }

    /// Consume jobs until every producer is gone.
    ///
    /// A failing job never stops the loop.
    pub async fn run(self, mut consumer: QueueConsumer) {
        info!("Worker started with restorer '{}'", self.restorer.name());
        while let Some(descriptor) = consumer.dequeue().await {
            self.process_job(descriptor).await;
        }
        info!("Work queue closed, worker exiting");
    }

    /// Run one job to a terminal state
    #[instrument(skip(self, descriptor), fields(job_id = %descriptor.job_id))]
    pub async fn process_job(&self, descriptor: JobDescriptor) {
        let job_id = descriptor.job_id;
        let file_count = descriptor.files.len();
        let _timer = Timer::new(format!("job {}", job_id));

        match self.execute(&descriptor).await {
            Ok(restored) => {
                info!(restored, submitted = file_count, "Job completed");
            }
            Err(error) => {
                self.discard_inputs(job_id, &descriptor.files).await;
                if let Err(e) = self.registry.set_error(job_id, error.to_string()).await {
                    tracing::error!("Could not record failure of job {}: {}", job_id, e);
                }
            }
        }
    }

    async fn execute(&self, descriptor: &JobDescriptor) -> Result<usize> {
        let job_id = descriptor.job_id;
        self.registry.set_status(job_id, JobStatus::Processing).await?;

        let mut results = Vec::with_capacity(descriptor.files.len());
        for file in &descriptor.files {
            let outcome = self.process_file(file, descriptor.options).await;

            // Inputs are reclaimed file by file, whatever the outcome
            if let Err(e) = self.store.delete(&file.temp_path).await {
                warn!("Failed to delete input {}: {}", file.temp_path.display(), e);
            }
            self.registry.consume_file(job_id, &file.temp_path).await?;

            match outcome {
                FileOutcome::Restored(result) => results.push(result),
                FileOutcome::Skipped(e) => {
                    warn!(filename = %file.original_filename, error_type = e.error_type(), "Skipping file: {}", e);
                }
            }
        }

        let restored = results.len();
        self.registry.complete(job_id, results).await?;
        Ok(restored)
    }

    async fn process_file(&self, file: &PendingFile, options: JobOptions) -> FileOutcome {
        match self.restore_file(file, options).await {
            Ok(result) => FileOutcome::Restored(result),
            Err(e) => FileOutcome::Skipped(e),
        }
    }

    async fn restore_file(&self, file: &PendingFile, options: JobOptions) -> Result<JobResult> {
        let bytes = match tokio::fs::read(&file.temp_path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(ProcessingError::ArtifactMissing {
                    path: file.temp_path.clone(),
                });
            }
            Err(e) => return Err(e.into()),
        };

        let image = decode(bytes, &file.original_filename).await?;

        // A panic inside the restorer surfaces as a JoinError
        let restorer = self.restorer.clone();
        let face_enhance = options.face_enhance;
        let restored = tokio::spawn(async move { restorer.enhance(image, face_enhance).await })
            .await
            .map_err(|e| ProcessingError::RestorationFailed {
                message: format!("Restorer aborted: {}", e),
            })??;

        let output_reference = self.store.persist_result(restored).await?;
        Ok(JobResult {
            original_filename: file.original_filename.clone(),
            output_reference,
        })
    }

    async fn discard_inputs(&self, job_id: JobId, files: &[PendingFile]) {
        for file in files {
            if let Err(e) = self.store.delete(&file.temp_path).await {
                warn!("Failed to delete input {} of job {}: {}", file.temp_path.display(), job_id, e);
            }
        }
    }
}

async fn decode(bytes: Vec<u8>, filename: &str) -> Result<DynamicImage> {
    let filename = filename.to_string();
    tokio::task::spawn_blocking(move || {
        image::load_from_memory(&bytes).map_err(|e| ProcessingError::DecodeFailed {
            filename,
            message: e.to_string(),
        })
    })
    .await
    .map_err(|e| ProcessingError::RestorationFailed {
        message: format!("Decode task failed: {}", e),
    })?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StorageConfig;
    use crate::queue::WorkQueue;
    use image::ImageOutputFormat;
    use std::io::Cursor;
    use tempfile::TempDir;
    use uuid::Uuid;

    struct FailingRestorer;

    #[async_trait::async_trait]
    impl ImageRestorer for FailingRestorer {
        async fn enhance(&self, _image: DynamicImage, _face_enhance: bool) -> Result<DynamicImage> {
            Err(ProcessingError::RestorationFailed {
                message: "out of memory".to_string(),
            })
        }

        fn name(&self) -> &'static str {
            "failing"
        }
    }

    struct IdentityRestorer;

    #[async_trait::async_trait]
    impl ImageRestorer for IdentityRestorer {
        async fn enhance(&self, image: DynamicImage, _face_enhance: bool) -> Result<DynamicImage> {
            Ok(image)
        }

        fn name(&self) -> &'static str {
            "identity"
        }
    }

    fn png_bytes() -> Vec<u8> {
        let mut buffer = Cursor::new(Vec::new());
        DynamicImage::new_rgb8(2, 2)
            .write_to(&mut buffer, ImageOutputFormat::Png)
            .unwrap();
        buffer.into_inner()
    }

    async fn setup(temp_dir: &TempDir, restorer: Arc<dyn ImageRestorer>) -> (Worker, Arc<JobRegistry>, Arc<ArtifactStore>) {
        let store = Arc::new(
            ArtifactStore::new(&StorageConfig::under(temp_dir.path()), 1024 * 1024)
                .await
                .unwrap(),
        );
        let registry = Arc::new(JobRegistry::new());
        let worker = Worker::new(registry.clone(), store.clone(), restorer);
        (worker, registry, store)
    }

    async fn admit(registry: &JobRegistry, store: &ArtifactStore, uploads: &[(&str, Vec<u8>)]) -> JobDescriptor {
        let job_id = Uuid::new_v4();
        let mut files = Vec::new();
        for (name, data) in uploads {
            let temp_path = store.save(job_id, name, &data[..]).await.unwrap();
            files.push(PendingFile {
                temp_path,
                original_filename: name.to_string(),
            });
        }
        registry
            .create(job_id, files.clone(), JobOptions::default(), 0)
            .await
            .unwrap();
        JobDescriptor {
            job_id,
            files,
            options: JobOptions::default(),
        }
    }

    #[tokio::test]
    async fn test_corrupt_file_is_skipped() {
        let temp_dir = TempDir::new().unwrap();
        let (worker, registry, store) = setup(&temp_dir, Arc::new(IdentityRestorer)).await;
        let descriptor = admit(
            &registry,
            &store,
            &[("good.png", png_bytes()), ("bad.png", b"not an image".to_vec())],
        )
        .await;
        let job_id = descriptor.job_id;
        let inputs: Vec<_> = descriptor.files.iter().map(|f| f.temp_path.clone()).collect();

        worker.process_job(descriptor).await;

        let job = registry.get(job_id).await.unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.results.len(), 1);
        assert_eq!(job.results[0].original_filename, "good.png");
        assert!(job.files.is_empty());
        assert!(inputs.iter().all(|p| !p.exists()));
    }

    #[tokio::test]
    async fn test_missing_input_is_skipped() {
        let temp_dir = TempDir::new().unwrap();
        let (worker, registry, store) = setup(&temp_dir, Arc::new(IdentityRestorer)).await;
        let descriptor = admit(&registry, &store, &[("a.png", png_bytes()), ("b.png", png_bytes())]).await;
        std::fs::remove_file(&descriptor.files[0].temp_path).unwrap();
        let job_id = descriptor.job_id;

        worker.process_job(descriptor).await;

        let job = registry.get(job_id).await.unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.results.len(), 1);
        assert_eq!(job.results[0].original_filename, "b.png");
    }

    #[tokio::test]
    async fn test_restorer_failure_completes_without_results() {
        let temp_dir = TempDir::new().unwrap();
        let (worker, registry, store) = setup(&temp_dir, Arc::new(FailingRestorer)).await;
        let descriptor = admit(&registry, &store, &[("a.png", png_bytes())]).await;
        let job_id = descriptor.job_id;

        worker.process_job(descriptor).await;

        let job = registry.get(job_id).await.unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert!(job.results.is_empty());
        assert!(job.error.is_none());
    }

    #[tokio::test]
    async fn test_unregistered_job_fails_and_loop_continues() {
        let temp_dir = TempDir::new().unwrap();
        let (worker, registry, store) = setup(&temp_dir, Arc::new(IdentityRestorer)).await;
        let (queue, consumer) = WorkQueue::new();

        // Descriptor whose registry entry was never created
        let orphan_path = store.save(Uuid::new_v4(), "orphan.png", &png_bytes()[..]).await.unwrap();
        queue
            .enqueue(JobDescriptor {
                job_id: Uuid::new_v4(),
                files: vec![PendingFile {
                    temp_path: orphan_path.clone(),
                    original_filename: "orphan.png".to_string(),
                }],
                options: JobOptions::default(),
            })
            .unwrap();
        let descriptor = admit(&registry, &store, &[("a.png", png_bytes())]).await;
        let job_id = descriptor.job_id;
        queue.enqueue(descriptor).unwrap();
        drop(queue);

        worker.run(consumer).await;

        assert!(!orphan_path.exists());
        let job = registry.get(job_id).await.unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.results.len(), 1);
    }
}
