//! Offline quality evaluation of a restorer over a directory of images

use crate::error::{ProcessingError, Result};
use crate::restorer::ImageRestorer;
use crate::utils::file;
use image::imageops::FilterType;
use image::{DynamicImage, GrayImage, ImageFormat, RgbImage};
use serde::Serialize;
use std::path::{Path, PathBuf};

const MAX_PIXEL_VALUE: f64 = 255.0;
const SSIM_WINDOW: u32 = 7;
const SSIM_K1: f64 = 0.01;
const SSIM_K2: f64 = 0.03;

/// Measurements for one evaluated image
#[derive(Debug, Clone, Serialize)]
pub struct EvaluationEntry {
    pub filename: String,
    pub original_dimensions: (u32, u32),
    pub restored_dimensions: (u32, u32),
    pub original_bytes: u64,
    pub restored_bytes: u64,
    /// Peak signal-to-noise ratio in dB; infinite for identical images
    pub psnr: f64,
    pub ssim: f64,
    pub output_path: PathBuf,
}

impl EvaluationEntry {
    pub fn original_kb(&self) -> f64 {
        self.original_bytes as f64 / 1024.0
    }

    pub fn restored_kb(&self) -> f64 {
        self.restored_bytes as f64 / 1024.0
    }
}

/// Outcome of evaluating a whole directory
#[derive(Debug, Clone, Default, Serialize)]
pub struct EvaluationReport {
    pub entries: Vec<EvaluationEntry>,
    /// Files that could not be read, decoded or restored
    pub skipped: Vec<String>,
}

/// Peak signal-to-noise ratio between two RGB images of equal size
pub fn psnr(reference: &RgbImage, candidate: &RgbImage) -> Result<f64> {
    check_dimensions(reference.dimensions(), candidate.dimensions())?;

    let samples = reference.as_raw().len();
    let squared_error: f64 = reference
        .as_raw()
        .iter()
        .zip(candidate.as_raw())
        .map(|(&a, &b)| {
            let diff = f64::from(a) - f64::from(b);
            diff * diff
        })
        .sum();

    let mse = squared_error / samples as f64;
    if mse == 0.0 {
        return Ok(f64::INFINITY);
    }
    Ok(10.0 * (MAX_PIXEL_VALUE * MAX_PIXEL_VALUE / mse).log10())
}

/// Mean structural similarity between two grayscale images of equal size.
///
/// Uses a uniform 7x7 window with sample covariance, averaged over every
/// position where the window fits. Images smaller than the window are
/// compared with a window as large as the image.
pub fn ssim(reference: &GrayImage, candidate: &GrayImage) -> Result<f64> {
    let (width, height) = reference.dimensions();
    check_dimensions((width, height), candidate.dimensions())?;

    let window = SSIM_WINDOW.min(width).min(height) as usize;
    let (width, height) = (width as usize, height as usize);
    let sums = SummedAreas::new(reference, candidate);

    let n = (window * window) as f64;
    let covariance_norm = if n > 1.0 { n / (n - 1.0) } else { 1.0 };
    let c1 = (SSIM_K1 * MAX_PIXEL_VALUE).powi(2);
    let c2 = (SSIM_K2 * MAX_PIXEL_VALUE).powi(2);

    let mut total = 0.0;
    let mut positions = 0usize;
    for y in 0..=height - window {
        for x in 0..=width - window {
            let [sum_a, sum_b, sum_aa, sum_bb, sum_ab] = sums.window(x, y, window);
            let mean_a = sum_a / n;
            let mean_b = sum_b / n;
            let var_a = covariance_norm * (sum_aa / n - mean_a * mean_a);
            let var_b = covariance_norm * (sum_bb / n - mean_b * mean_b);
            let cov_ab = covariance_norm * (sum_ab / n - mean_a * mean_b);

            total += ((2.0 * mean_a * mean_b + c1) * (2.0 * cov_ab + c2))
                / ((mean_a * mean_a + mean_b * mean_b + c1) * (var_a + var_b + c2));
            positions += 1;
        }
    }

    Ok(total / positions as f64)
}

fn check_dimensions(reference: (u32, u32), candidate: (u32, u32)) -> Result<()> {
    if reference != candidate {
        return Err(ProcessingError::InvalidInput {
            message: format!(
                "Cannot compare a {}x{} image with a {}x{} image",
                reference.0, reference.1, candidate.0, candidate.1
            ),
        });
    }
    if reference.0 == 0 || reference.1 == 0 {
        return Err(ProcessingError::InvalidInput {
            message: "Cannot compare empty images".to_string(),
        });
    }
    Ok(())
}

/// Summed-area tables of a, b, a², b² and ab
struct SummedAreas {
    stride: usize,
    table: Vec<[f64; 5]>,
}

impl SummedAreas {
    fn new(a: &GrayImage, b: &GrayImage) -> Self {
        let (width, height) = (a.width() as usize, a.height() as usize);
        let stride = width + 1;
        let mut table = vec![[0.0; 5]; stride * (height + 1)];

        for y in 0..height {
            let mut row = [0.0; 5];
            for x in 0..width {
                let pa = f64::from(a.get_pixel(x as u32, y as u32)[0]);
                let pb = f64::from(b.get_pixel(x as u32, y as u32)[0]);
                let values = [pa, pb, pa * pa, pb * pb, pa * pb];

                let above = table[y * stride + x + 1];
                let cell = &mut table[(y + 1) * stride + x + 1];
                for i in 0..5 {
                    row[i] += values[i];
                    cell[i] = above[i] + row[i];
                }
            }
        }

        Self { stride, table }
    }

    fn window(&self, x: usize, y: usize, size: usize) -> [f64; 5] {
        let at = |x: usize, y: usize| self.table[y * self.stride + x];
        let (top_left, top_right) = (at(x, y), at(x + size, y));
        let (bottom_left, bottom_right) = (at(x, y + size), at(x + size, y + size));

        let mut sums = [0.0; 5];
        for i in 0..5 {
            sums[i] = bottom_right[i] - bottom_left[i] - top_right[i] + top_left[i];
        }
        sums
    }
}

/// Restore one image with face enhancement, save it under `output_dir` and
/// measure it against the original resized to the restored dimensions.
pub async fn evaluate_file(
    restorer: &dyn ImageRestorer,
    input: &Path,
    output_dir: &Path,
) -> Result<EvaluationEntry> {
    let filename = input
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("image")
        .to_string();
    let stem = input
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or("image");
    let output_path = output_dir.join(format!("{}.png", stem));

    let bytes = tokio::fs::read(input).await?;
    let original_bytes = bytes.len() as u64;

    let decode_name = filename.clone();
    let original = tokio::task::spawn_blocking(move || {
        image::load_from_memory(&bytes).map_err(|e| ProcessingError::DecodeFailed {
            filename: decode_name,
            message: e.to_string(),
        })
    })
    .await
    .map_err(|e| ProcessingError::RestorationFailed {
        message: format!("Decode task failed: {}", e),
    })??;
    let original_dimensions = (original.width(), original.height());

    let restored = restorer.enhance(original.clone(), true).await?;
    let restored_dimensions = (restored.width(), restored.height());

    let target = output_path.clone();
    let (psnr, ssim) = tokio::task::spawn_blocking(move || compare_and_save(original, restored, &target))
        .await
        .map_err(|e| ProcessingError::RestorationFailed {
            message: format!("Evaluation task failed: {}", e),
        })??;

    let restored_bytes = tokio::fs::metadata(&output_path).await?.len();

    Ok(EvaluationEntry {
        filename,
        original_dimensions,
        restored_dimensions,
        original_bytes,
        restored_bytes,
        psnr,
        ssim,
        output_path,
    })
}

fn compare_and_save(original: DynamicImage, restored: DynamicImage, target: &Path) -> Result<(f64, f64)> {
    restored.save_with_format(target, ImageFormat::Png)?;

    let reference = original.resize_exact(restored.width(), restored.height(), FilterType::CatmullRom);
    let psnr = psnr(&reference.to_rgb8(), &restored.to_rgb8())?;
    let ssim = ssim(&reference.to_luma8(), &restored.to_luma8())?;
    Ok((psnr, ssim))
}

/// Evaluate every regular file in `input_dir`, in name order.
///
/// Files that fail are logged and listed in `skipped`; the run goes on.
pub async fn evaluate_directory(
    restorer: &dyn ImageRestorer,
    input_dir: &Path,
    output_dir: &Path,
) -> Result<EvaluationReport> {
    file::ensure_directory_exists(output_dir).await?;

    let mut inputs = Vec::new();
    let mut entries = tokio::fs::read_dir(input_dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_file() {
            inputs.push(entry.path());
        }
    }
    inputs.sort();

    let mut report = EvaluationReport::default();
    for input in inputs {
        match evaluate_file(restorer, &input, output_dir).await {
            Ok(entry) => {
                tracing::info!(
                    filename = %entry.filename,
                    psnr = entry.psnr,
                    ssim = entry.ssim,
                    "Evaluated image"
                );
                report.entries.push(entry);
            }
            Err(e) => {
                tracing::warn!("Skipping {}: {}", input.display(), e);
                report.skipped.push(input.display().to_string());
            }
        }
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::restorer::ResampleRestorer;
    use image::{ImageOutputFormat, Luma, Rgb};
    use tempfile::TempDir;

    fn gradient(width: u32, height: u32) -> GrayImage {
        GrayImage::from_fn(width, height, |x, y| Luma([((x * 7 + y * 13) % 256) as u8]))
    }

    #[test]
    fn test_psnr_identical_is_infinite() {
        let image = RgbImage::from_pixel(4, 4, Rgb([10, 20, 30]));
        assert_eq!(psnr(&image, &image).unwrap(), f64::INFINITY);
    }

    #[test]
    fn test_psnr_known_value() {
        let black = RgbImage::from_pixel(4, 4, Rgb([0, 0, 0]));
        let grey = RgbImage::from_pixel(4, 4, Rgb([10, 10, 10]));

        // MSE of 100 over 8-bit samples
        let expected = 10.0 * (255.0f64 * 255.0 / 100.0).log10();
        assert!((psnr(&black, &grey).unwrap() - expected).abs() < 1e-9);
    }

    #[test]
    fn test_ssim_identical_is_one() {
        let image = gradient(16, 12);
        assert!((ssim(&image, &image).unwrap() - 1.0).abs() < 1e-9);

        let flat = GrayImage::from_pixel(9, 9, Luma([128]));
        assert!((ssim(&flat, &flat).unwrap() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_ssim_drops_for_inverted_image() {
        let image = gradient(16, 12);
        let inverted = GrayImage::from_fn(16, 12, |x, y| Luma([255 - image.get_pixel(x, y)[0]]));

        assert!(ssim(&image, &inverted).unwrap() < 0.5);
    }

    #[test]
    fn test_ssim_small_images_use_smaller_window() {
        let image = gradient(3, 2);
        assert!((ssim(&image, &image).unwrap() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_metrics_reject_mismatched_sizes() {
        let a = gradient(8, 8);
        let b = gradient(8, 9);
        assert!(matches!(ssim(&a, &b), Err(ProcessingError::InvalidInput { .. })));
        assert!(psnr(&RgbImage::new(2, 2), &RgbImage::new(3, 2)).is_err());
    }

    #[tokio::test]
    async fn test_evaluate_directory() {
        let input_dir = TempDir::new().unwrap();
        let output_dir = TempDir::new().unwrap();

        let mut file = std::fs::File::create(input_dir.path().join("portrait.jpg")).unwrap();
        DynamicImage::ImageLuma8(gradient(10, 8))
            .write_to(&mut file, ImageOutputFormat::Png)
            .unwrap();
        std::fs::write(input_dir.path().join("notes.txt"), b"not an image").unwrap();

        let restorer = ResampleRestorer::new(2).unwrap();
        let report = evaluate_directory(&restorer, input_dir.path(), output_dir.path())
            .await
            .unwrap();

        assert_eq!(report.entries.len(), 1);
        assert_eq!(report.skipped.len(), 1);
        assert!(report.skipped[0].ends_with("notes.txt"));

        let entry = &report.entries[0];
        assert_eq!(entry.filename, "portrait.jpg");
        assert_eq!(entry.original_dimensions, (10, 8));
        assert_eq!(entry.restored_dimensions, (20, 16));
        assert!(entry.output_path.ends_with("portrait.png"));
        assert!(entry.output_path.exists());
        assert!(entry.restored_bytes > 0);
        assert!(entry.ssim > 0.0 && entry.ssim <= 1.0 + 1e-9);
        assert!(entry.psnr > 0.0);
    }

    #[tokio::test]
    async fn test_evaluate_missing_directory() {
        let output_dir = TempDir::new().unwrap();
        let restorer = ResampleRestorer::new(1).unwrap();

        let result = evaluate_directory(&restorer, Path::new("/nonexistent/inputs"), output_dir.path()).await;
        assert!(matches!(result, Err(ProcessingError::Io(_))));
    }
}
