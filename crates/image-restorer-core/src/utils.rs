//! Utility functions and helpers

use crate::error::Result;
use std::path::Path;
use std::time::{Duration, SystemTime};

/// File utilities
pub mod file {
    use super::*;

    /// Ensure a directory exists, creating it if necessary
    pub async fn ensure_directory_exists(path: &Path) -> Result<()> {
        tokio::fs::create_dir_all(path).await?;
        Ok(())
    }

    /// Age of a file based on its last modification time.
    ///
    /// Modification times in the future count as age zero.
    pub fn age_of(modified: SystemTime, now: SystemTime) -> Duration {
        now.duration_since(modified).unwrap_or(Duration::ZERO)
    }

    /// Lowercase extension of a client-supplied filename, if it names a known image type
    pub fn image_extension(filename: &str) -> Option<String> {
        let extension = Path::new(filename).extension()?.to_str()?.to_ascii_lowercase();
        super::format::mime_type_for_extension(&extension).map(|_| extension)
    }
}

/// Image format detection
pub mod format {
    use super::*;

    /// Map a file extension to an image MIME type
    pub fn mime_type_for_extension(extension: &str) -> Option<&'static str> {
        match extension.to_ascii_lowercase().as_str() {
            "jpg" | "jpeg" => Some("image/jpeg"),
            "png" => Some("image/png"),
            "webp" => Some("image/webp"),
            "gif" => Some("image/gif"),
            "bmp" => Some("image/bmp"),
            "tiff" | "tif" => Some("image/tiff"),
            _ => None,
        }
    }

    /// Guess a content type from a path, the way a browser upload would label it
    pub fn guess_content_type(path: &Path) -> &'static str {
        path.extension()
            .and_then(|e| e.to_str())
            .and_then(mime_type_for_extension)
            .unwrap_or("application/octet-stream")
    }
}

/// Performance monitoring utilities
pub mod performance {
    use std::time::Instant;

    /// Simple performance timer
    pub struct Timer {
        start: Instant,
        name: String,
    }

    impl Timer {
        pub fn new(name: impl Into<String>) -> Self {
            Self {
                start: Instant::now(),
                name: name.into(),
            }
        }

        pub fn elapsed_ms(&self) -> u128 {
            self.start.elapsed().as_millis()
        }
    }

    impl Drop for Timer {
        fn drop(&mut self) {
            tracing::debug!("Timer '{}' elapsed: {}ms", self.name, self.elapsed_ms());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_image_extension() {
        assert_eq!(file::image_extension("Photo.JPG").as_deref(), Some("jpg"));
        assert_eq!(file::image_extension("scan.tif").as_deref(), Some("tif"));
        assert_eq!(file::image_extension("notes.txt"), None);
        assert_eq!(file::image_extension("noext"), None);
    }

    #[test]
    fn test_age_of_future_file_is_zero() {
        let now = SystemTime::now();
        let future = now + Duration::from_secs(60);
        assert_eq!(file::age_of(future, now), Duration::ZERO);
        assert_eq!(
            file::age_of(now - Duration::from_secs(90), now),
            Duration::from_secs(90)
        );
    }

    #[test]
    fn test_guess_content_type() {
        assert_eq!(format::guess_content_type(&PathBuf::from("a.png")), "image/png");
        assert_eq!(format::guess_content_type(&PathBuf::from("a.jpeg")), "image/jpeg");
        assert_eq!(
            format::guess_content_type(&PathBuf::from("a.pdf")),
            "application/octet-stream"
        );
    }
}
