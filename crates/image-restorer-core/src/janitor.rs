//! Periodic deletion of expired artifacts

use crate::models::SweepReport;
use crate::storage::ArtifactStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Sweeps the upload and output directories on a fixed interval.
///
/// Runs independently of the job registry: a completed job may keep a
/// reference to an output the janitor has already removed.
#[derive(Debug, Clone)]
pub struct Janitor {
    store: Arc<ArtifactStore>,
    interval: Duration,
    max_age: Duration,
}

impl Janitor {
    pub fn new(store: Arc<ArtifactStore>, interval: Duration, max_age: Duration) -> Self {
        Self {
            store,
            interval,
            max_age,
        }
    }

    /// One sweep over both artifact directories
    pub async fn run_once(&self) -> SweepReport {
        let report = self
            .store
            .sweep_expired(&[self.store.upload_dir(), self.store.output_dir()], self.max_age)
            .await;

        if report.removed > 0 || report.failed > 0 {
            tracing::info!(
                scanned = report.scanned,
                removed = report.removed,
                failed = report.failed,
                "Artifact sweep finished"
            );
        } else {
            tracing::debug!(scanned = report.scanned, "Artifact sweep found nothing to delete");
        }
        report
    }

    /// Sweep immediately, then once per interval until `shutdown` is cancelled
    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            tracing::info!(
                "Janitor started: interval {:?}, expiry {:?}",
                self.interval,
                self.max_age
            );

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        // Each sweep runs on its own task so a panic cannot end the loop
                        let janitor = self.clone();
                        if let Err(e) = tokio::spawn(async move { janitor.run_once().await }).await {
                            tracing::error!("Artifact sweep aborted: {}", e);
                        }
                    }
                    _ = shutdown.cancelled() => {
                        tracing::info!("Janitor shutting down");
                        break;
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StorageConfig;
    use std::time::SystemTime;
    use tempfile::TempDir;
    use uuid::Uuid;

    fn backdate(path: &std::path::Path, age: Duration) {
        let file = std::fs::File::options().write(true).open(path).unwrap();
        file.set_modified(SystemTime::now() - age).unwrap();
    }

    async fn create_store(temp_dir: &TempDir) -> Arc<ArtifactStore> {
        Arc::new(
            ArtifactStore::new(&StorageConfig::under(temp_dir.path()), 1024)
                .await
                .unwrap(),
        )
    }

    #[tokio::test]
    async fn test_run_once_sweeps_both_directories() {
        let temp_dir = TempDir::new().unwrap();
        let store = create_store(&temp_dir).await;

        let old_upload = store.save(Uuid::new_v4(), "a.png", &b"a"[..]).await.unwrap();
        let old_output = store.output_dir().join("stale.jpg");
        std::fs::write(&old_output, b"x").unwrap();
        let fresh_output = store.output_dir().join("fresh.jpg");
        std::fs::write(&fresh_output, b"x").unwrap();
        backdate(&old_upload, Duration::from_secs(120));
        backdate(&old_output, Duration::from_secs(120));

        let janitor = Janitor::new(store.clone(), Duration::from_secs(60), Duration::from_secs(60));
        let report = janitor.run_once().await;

        assert_eq!(report.removed, 2);
        assert!(!old_upload.exists());
        assert!(!old_output.exists());
        assert!(fresh_output.exists());
    }

    #[tokio::test]
    async fn test_spawned_janitor_sweeps_and_stops() {
        let temp_dir = TempDir::new().unwrap();
        let store = create_store(&temp_dir).await;
        let stale = store.output_dir().join("stale.jpg");
        std::fs::write(&stale, b"x").unwrap();
        backdate(&stale, Duration::from_secs(600));

        let shutdown = CancellationToken::new();
        let handle = Janitor::new(store, Duration::from_millis(10), Duration::from_secs(60))
            .spawn(shutdown.clone());

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!stale.exists());

        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
