//! Boundary to the external restoration routine

use crate::error::{ProcessingError, Result};
use image::imageops::FilterType;
use image::DynamicImage;
use std::sync::Arc;

/// Core trait that restoration engines must implement
#[async_trait::async_trait]
pub trait ImageRestorer: Send + Sync {
    /// Restore one decoded image
    async fn enhance(&self, image: DynamicImage, face_enhance: bool) -> Result<DynamicImage>;

    /// Get the name of this restorer
    fn name(&self) -> &'static str;
}

/// One-shot loader that produces the process-wide restorer
pub type RestorerLoader = Box<dyn FnOnce() -> Result<Arc<dyn ImageRestorer>> + Send + 'static>;

/// Run a loader once on a blocking thread. A loader failure or panic is fatal.
pub async fn load_restorer(loader: RestorerLoader) -> Result<Arc<dyn ImageRestorer>> {
    let restorer = tokio::task::spawn_blocking(loader)
        .await
        .map_err(|e| ProcessingError::ModelNotLoaded {
            message: format!("Loader panicked: {}", e),
        })?
        .map_err(|e| match e {
            ProcessingError::ModelNotLoaded { .. } => e,
            other => ProcessingError::ModelNotLoaded {
                message: other.to_string(),
            },
        })?;

    tracing::info!("Restoration engine '{}' loaded", restorer.name());
    Ok(restorer)
}

/// Non-ML restorer: Lanczos upscaling, with an unsharp mask when face
/// enhancement is requested.
#[derive(Debug, Clone)]
pub struct ResampleRestorer {
    scale: u32,
}

impl ResampleRestorer {
    const SHARPEN_SIGMA: f32 = 1.2;
    const SHARPEN_THRESHOLD: i32 = 2;

    pub fn new(scale: u32) -> Result<Self> {
        if scale == 0 {
            return Err(ProcessingError::InvalidInput {
                message: "Scale factor must be at least 1".to_string(),
            });
        }
        Ok(Self { scale })
    }

    pub fn scale(&self) -> u32 {
        self.scale
    }
}

#[async_trait::async_trait]
impl ImageRestorer for ResampleRestorer {
    async fn enhance(&self, image: DynamicImage, face_enhance: bool) -> Result<DynamicImage> {
        let scale = self.scale;
        tokio::task::spawn_blocking(move || {
            if image.width() == 0 || image.height() == 0 {
                return Err(ProcessingError::RestorationFailed {
                    message: "Image has no pixels".to_string(),
                });
            }

            let width = image.width().saturating_mul(scale);
            let height = image.height().saturating_mul(scale);
            let upscaled = if scale == 1 {
                image
            } else {
                image.resize_exact(width, height, FilterType::Lanczos3)
            };

            Ok(if face_enhance {
                upscaled.unsharpen(Self::SHARPEN_SIGMA, Self::SHARPEN_THRESHOLD)
            } else {
                upscaled
            })
        })
        .await
        .map_err(|e| ProcessingError::RestorationFailed {
            message: format!("Restoration task failed: {}", e),
        })?
    }

    fn name(&self) -> &'static str {
        "resample"
    }
}
