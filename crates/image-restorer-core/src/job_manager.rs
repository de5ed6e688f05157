//! Job lifecycle management: wires admission, the queue, the worker and the janitor

use crate::admission::AdmissionHandler;
use crate::config::AppConfig;
use crate::error::{ProcessingError, Result};
use crate::janitor::Janitor;
use crate::models::{JobId, JobOptions, StatusResponse, SubmitResponse, SweepReport, UploadedFile};
use crate::queue::WorkQueue;
use crate::registry::{JobRegistry, JobStatusUpdate, RegistryStats};
use crate::restorer::{load_restorer, RestorerLoader};
use crate::storage::ArtifactStore;
use crate::worker::Worker;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;

const STATUS_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Job manager for the restoration service.
///
/// Owns the process-wide state: one registry, one queue with its single
/// worker, and the janitor. Started once at process initialization.
#[derive(Debug)]
pub struct JobManager {
    admission: AdmissionHandler,
    registry: Arc<JobRegistry>,
    store: Arc<ArtifactStore>,
    janitor: Janitor,
    config: AppConfig,
    worker_handle: JoinHandle<()>,
    janitor_handle: JoinHandle<()>,
    shutdown_token: CancellationToken,
}

impl JobManager {
    /// Load the restorer, then start the worker and the janitor.
    ///
    /// A loader failure is fatal: no manager is returned and nothing is
    /// left running.
    pub async fn start(config: AppConfig, loader: RestorerLoader) -> Result<Self> {
        config.validate()?;

        let store = Arc::new(ArtifactStore::new(&config.storage, config.server.max_upload_bytes()).await?);
        let restorer = load_restorer(loader).await?;

        let registry = Arc::new(JobRegistry::new());
        let (queue, consumer) = WorkQueue::new();
        let worker_handle = Worker::new(registry.clone(), store.clone(), restorer).spawn(consumer);

        let janitor = Janitor::new(store.clone(), config.cleanup.interval(), config.cleanup.expiry());
        let shutdown_token = CancellationToken::new();
        let janitor_handle = janitor.clone().spawn(shutdown_token.child_token());

        let admission = AdmissionHandler::new(registry.clone(), store.clone(), queue, config.server.api_key.clone());

        tracing::info!(
            upload_dir = %store.upload_dir().display(),
            output_dir = %store.output_dir().display(),
            max_upload_kb = config.server.max_upload_kb,
            "Job manager started"
        );

        Ok(Self {
            admission,
            registry,
            store,
            janitor,
            config,
            worker_handle,
            janitor_handle,
            shutdown_token,
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    /// Submit a batch without an API key
    pub async fn submit(&self, files: Vec<UploadedFile>, options: JobOptions) -> Result<SubmitResponse> {
        self.admission.submit_authorized(None, files, options).await
    }

    /// Submit a batch presenting the given shared secret
    pub async fn submit_authorized(
        &self,
        api_key: Option<&str>,
        files: Vec<UploadedFile>,
        options: JobOptions,
    ) -> Result<SubmitResponse> {
        self.admission.submit_authorized(api_key, files, options).await
    }

    pub async fn status(&self, job_id: JobId) -> Result<StatusResponse> {
        self.admission.status(job_id).await
    }

    pub async fn status_str(&self, job_id: &str) -> Result<StatusResponse> {
        self.admission.status_str(job_id).await
    }

    /// Subscribe to job status updates
    pub fn subscribe(&self) -> broadcast::Receiver<JobStatusUpdate> {
        self.registry.subscribe()
    }

    pub async fn stats(&self) -> RegistryStats {
        self.registry.stats().await
    }

    /// Poll until the job reaches a terminal status or `timeout` elapses
    pub async fn wait_for_terminal(&self, job_id: JobId, timeout: Duration) -> Result<StatusResponse> {
        let deadline = Instant::now() + timeout;
        loop {
            let status = self.status(job_id).await?;
            if status.status.is_terminal() {
                return Ok(status);
            }
            if Instant::now() >= deadline {
                return Err(ProcessingError::Timeout {
                    job_id,
                    status: status.status,
                    waited: timeout,
                });
            }
            sleep(STATUS_POLL_INTERVAL).await;
        }
    }

    /// Run one janitor sweep now
    pub async fn sweep_now(&self) -> SweepReport {
        self.janitor.run_once().await
    }

    /// Stop the janitor, close the queue and let the worker drain what was queued
    pub async fn shutdown(self) -> Result<()> {
        self.shutdown_token.cancel();
        if let Err(e) = self.janitor_handle.await {
            tracing::error!("Janitor task ended abnormally: {}", e);
        }

        // Dropping the admission handler drops the last queue producer
        drop(self.admission);
        if let Err(e) = self.worker_handle.await {
            tracing::error!("Worker task ended abnormally: {}", e);
        }

        tracing::info!("Job manager shutdown completed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StorageConfig;
    use crate::models::JobStatus;
    use crate::restorer::{ImageRestorer, ResampleRestorer};
    use image::{DynamicImage, ImageOutputFormat};
    use std::io::Cursor;
    use tempfile::TempDir;

    fn test_config(temp_dir: &TempDir) -> AppConfig {
        AppConfig {
            storage: StorageConfig::under(temp_dir.path()),
            ..Default::default()
        }
    }

    fn resample_loader() -> RestorerLoader {
        Box::new(|| -> Result<Arc<dyn ImageRestorer>> { Ok(Arc::new(ResampleRestorer::new(1)?)) })
    }

    fn png_upload(name: &str) -> UploadedFile {
        let mut buffer = Cursor::new(Vec::new());
        DynamicImage::new_rgb8(4, 4)
            .write_to(&mut buffer, ImageOutputFormat::Png)
            .unwrap();
        UploadedFile::new(name, "image/png", buffer.into_inner())
    }

    #[tokio::test]
    async fn test_job_manager_creation() {
        let temp_dir = TempDir::new().unwrap();
        let manager = JobManager::start(test_config(&temp_dir), resample_loader())
            .await
            .unwrap();

        assert_eq!(manager.stats().await.total(), 0);
        assert!(temp_dir.path().join("uploads").is_dir());
        assert!(temp_dir.path().join("processed_images").is_dir());
        manager.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_loader_failure_prevents_start() {
        let temp_dir = TempDir::new().unwrap();
        let loader: RestorerLoader = Box::new(|| -> Result<Arc<dyn ImageRestorer>> {
            Err(ProcessingError::ModelNotLoaded {
                message: "weights not found".to_string(),
            })
        });

        let result = JobManager::start(test_config(&temp_dir), loader).await;
        assert!(matches!(result, Err(ProcessingError::ModelNotLoaded { .. })));
    }

    #[tokio::test]
    async fn test_job_submission_and_completion() {
        let temp_dir = TempDir::new().unwrap();
        let manager = JobManager::start(test_config(&temp_dir), resample_loader())
            .await
            .unwrap();

        let response = manager
            .submit(vec![png_upload("a.png")], JobOptions::default())
            .await
            .unwrap();
        let status = manager
            .wait_for_terminal(response.job_id, Duration::from_secs(10))
            .await
            .unwrap();

        assert_eq!(status.status, JobStatus::Completed);
        assert_eq!(status.results.len(), 1);
        assert!(manager.store().resolve(&status.results[0].output_reference).unwrap().exists());
        manager.shutdown().await.unwrap();
    }

    struct StalledRestorer;

    #[async_trait::async_trait]
    impl ImageRestorer for StalledRestorer {
        async fn enhance(&self, image: DynamicImage, _face_enhance: bool) -> Result<DynamicImage> {
            sleep(Duration::from_millis(500)).await;
            Ok(image)
        }

        fn name(&self) -> &'static str {
            "stalled"
        }
    }

    #[tokio::test]
    async fn test_wait_for_terminal_times_out() {
        let temp_dir = TempDir::new().unwrap();
        let loader: RestorerLoader =
            Box::new(|| -> Result<Arc<dyn ImageRestorer>> { Ok(Arc::new(StalledRestorer)) });
        let manager = JobManager::start(test_config(&temp_dir), loader).await.unwrap();

        let response = manager
            .submit(vec![png_upload("a.png")], JobOptions::default())
            .await
            .unwrap();
        let error = manager
            .wait_for_terminal(response.job_id, Duration::from_millis(100))
            .await
            .unwrap_err();

        assert!(matches!(error, ProcessingError::Timeout { job_id, .. } if job_id == response.job_id));
        assert!(!error.is_client_error());
        manager.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_drains_queue() {
        let temp_dir = TempDir::new().unwrap();
        let manager = JobManager::start(test_config(&temp_dir), resample_loader())
            .await
            .unwrap();
        let mut updates = manager.subscribe();

        let response = manager
            .submit(vec![png_upload("a.png")], JobOptions::default())
            .await
            .unwrap();
        manager.shutdown().await.unwrap();

        let mut last = None;
        while let Ok(update) = updates.try_recv() {
            if update.job_id == response.job_id {
                last = Some(update.new_status);
            }
        }
        assert_eq!(last, Some(JobStatus::Completed));
    }
}
