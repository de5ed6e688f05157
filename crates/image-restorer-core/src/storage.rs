//! Artifact store for uploaded inputs and restored outputs

use crate::config::{OutputFormat, StorageConfig};
use crate::error::{ProcessingError, Result};
use crate::models::{JobId, SweepReport};
use crate::utils::file;
use image::DynamicImage;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::fs;
use tokio::io::{AsyncRead, AsyncWriteExt};
use uuid::Uuid;

/// Filesystem-backed storage for input and output artifacts.
///
/// Input artifacts live in the upload directory until the worker consumes
/// them. Output artifacts live in the output directory until the janitor
/// expires them.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    upload_dir: PathBuf,
    output_dir: PathBuf,
    public_prefix: String,
    output_format: OutputFormat,
    max_upload_bytes: u64,
}

impl ArtifactStore {
    /// Create a store, creating both directories if needed
    pub async fn new(config: &StorageConfig, max_upload_bytes: u64) -> Result<Self> {
        file::ensure_directory_exists(&config.upload_dir).await?;
        file::ensure_directory_exists(&config.output_dir).await?;

        Ok(Self {
            upload_dir: config.upload_dir.clone(),
            output_dir: config.output_dir.clone(),
            public_prefix: config.public_prefix.trim_end_matches('/').to_string(),
            output_format: config.output_format,
            max_upload_bytes,
        })
    }

    pub fn upload_dir(&self) -> &Path {
        &self.upload_dir
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn max_upload_bytes(&self) -> u64 {
        self.max_upload_bytes
    }

    /// Write an upload to a fresh temporary file and check its size afterwards.
    ///
    /// An oversized file is removed before `FileTooLarge` is returned.
    pub async fn save<R>(&self, job_id: JobId, original_filename: &str, mut stream: R) -> Result<PathBuf>
    where
        R: AsyncRead + Unpin,
    {
        let extension = file::image_extension(original_filename).unwrap_or_else(|| "upload".to_string());
        let name = format!("{}_{}.{}", job_id, Uuid::new_v4().simple(), extension);
        let path = self.upload_dir.join(name);

        if let Err(e) = write_stream(&path, &mut stream).await {
            self.delete(&path).await?;
            return Err(e);
        }

        let size = fs::metadata(&path).await?.len();
        if size > self.max_upload_bytes {
            self.delete(&path).await?;
            tracing::warn!(
                job_id = %job_id,
                filename = original_filename,
                size,
                limit = self.max_upload_bytes,
                "Rejected oversized upload"
            );
            return Err(ProcessingError::FileTooLarge {
                filename: original_filename.to_string(),
                size,
                limit: self.max_upload_bytes,
            });
        }

        tracing::debug!(job_id = %job_id, path = %path.display(), size, "Saved upload");
        Ok(path)
    }

    /// Encode a restored image into the output directory and return its public reference
    pub async fn persist_result(&self, image: DynamicImage) -> Result<String> {
        let name = format!("{}.{}", Uuid::new_v4(), self.output_format.extension());
        let path = self.output_dir.join(&name);
        let format = self.output_format;

        let target = path.clone();
        tokio::task::spawn_blocking(move || {
            let image = if format.supports_transparency() {
                image
            } else {
                DynamicImage::ImageRgb8(image.to_rgb8())
            };
            image.save_with_format(&target, format.image_format())
        })
        .await
        .map_err(|e| ProcessingError::RestorationFailed {
            message: format!("Encoding task failed: {}", e),
        })??;

        tracing::debug!(path = %path.display(), "Persisted restored image");
        Ok(format!("{}/{}", self.public_prefix, name))
    }

    /// Map a public reference back to its file in the output directory
    pub fn resolve(&self, reference: &str) -> Option<PathBuf> {
        let name = reference
            .strip_prefix(&self.public_prefix)?
            .strip_prefix('/')?;
        let mut components = Path::new(name).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(file_name)), None) => Some(self.output_dir.join(file_name)),
            _ => None,
        }
    }

    /// Remove an artifact. A missing file is not an error.
    pub async fn delete(&self, path: &Path) -> Result<()> {
        match fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Delete every regular file older than `max_age` in the given directories.
    ///
    /// Failures on individual files are logged and counted; the sweep goes on.
    pub async fn sweep_expired(&self, directories: &[&Path], max_age: Duration) -> SweepReport {
        let mut report = SweepReport::default();
        for dir in directories {
            match self.sweep_directory(dir, max_age).await {
                Ok(dir_report) => report.merge(dir_report),
                Err(e) => {
                    tracing::error!("Failed to sweep {}: {}", dir.display(), e);
                    report.failed += 1;
                }
            }
        }
        report
    }

    async fn sweep_directory(&self, dir: &Path, max_age: Duration) -> Result<SweepReport> {
        let mut report = SweepReport::default();
        let now = SystemTime::now();
        let mut entries = fs::read_dir(dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let metadata = match entry.metadata().await {
                Ok(metadata) => metadata,
                Err(e) => {
                    tracing::warn!("Failed to stat {}: {}", path.display(), e);
                    report.failed += 1;
                    continue;
                }
            };
            if !metadata.is_file() {
                continue;
            }
            report.scanned += 1;

            let modified = match metadata.modified() {
                Ok(modified) => modified,
                Err(e) => {
                    tracing::warn!("No modification time for {}: {}", path.display(), e);
                    report.failed += 1;
                    continue;
                }
            };
            if file::age_of(modified, now) <= max_age {
                continue;
            }

            match self.delete(&path).await {
                Ok(()) => {
                    tracing::debug!("Deleted expired artifact {}", path.display());
                    report.removed += 1;
                }
                Err(e) => {
                    tracing::warn!("Failed to delete expired artifact {}: {}", path.display(), e);
                    report.failed += 1;
                }
            }
        }

        Ok(report)
    }
}

async fn write_stream<R>(path: &Path, stream: &mut R) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut file = fs::File::create(path).await?;
    tokio::io::copy(stream, &mut file).await?;
    file.flush().await?;
    Ok(())
}
