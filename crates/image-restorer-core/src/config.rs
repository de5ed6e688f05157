//! Configuration management for the restoration service

use crate::error::{ProcessingError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Prefix for environment overrides, e.g. `IMAGE_RESTORER_SERVER__MAX_UPLOAD_KB=800`
pub const ENV_PREFIX: &str = "IMAGE_RESTORER";

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub cleanup: CleanupConfig,
    pub restoration: RestorationConfig,
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Reject values that would make the service unusable
    pub fn validate(&self) -> Result<()> {
        if self.server.max_upload_kb == 0 {
            return Err(config_error("server.max_upload_kb must be greater than zero"));
        }
        if self.server.max_upload_kb > u64::MAX / 1024 {
            return Err(config_error("server.max_upload_kb is too large"));
        }
        if self.cleanup.interval_secs == 0 {
            return Err(config_error("cleanup.interval_secs must be greater than zero"));
        }
        if self.cleanup.expiry_secs == 0 {
            return Err(config_error("cleanup.expiry_secs must be greater than zero"));
        }
        if self.restoration.scale == 0 {
            return Err(config_error("restoration.scale must be greater than zero"));
        }
        if !self.storage.public_prefix.starts_with('/') {
            return Err(config_error("storage.public_prefix must start with '/'"));
        }
        Ok(())
    }
}

/// Submission boundary configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Shared secret; when set, submissions must present it
    pub api_key: Option<String>,
    pub max_upload_kb: u64,
}

impl ServerConfig {
    pub fn max_upload_bytes(&self) -> u64 {
        self.max_upload_kb.saturating_mul(1024)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            max_upload_kb: 400,
        }
    }
}

/// Artifact storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub upload_dir: PathBuf,
    pub output_dir: PathBuf,
    /// Static-serving prefix output references are built from
    pub public_prefix: String,
    pub output_format: OutputFormat,
}

impl StorageConfig {
    /// Storage rooted at a single base directory
    pub fn under(base: &Path) -> Self {
        Self {
            upload_dir: base.join("uploads"),
            output_dir: base.join("processed_images"),
            ..Self::default()
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        let base_dir = dirs::cache_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("image-restorer");

        Self {
            upload_dir: base_dir.join("uploads"),
            output_dir: base_dir.join("processed_images"),
            public_prefix: "/processed".to_string(),
            output_format: OutputFormat::Jpeg,
        }
    }
}

/// Janitor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CleanupConfig {
    pub interval_secs: u64,
    pub expiry_secs: u64,
}

impl CleanupConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn expiry(&self) -> Duration {
        Duration::from_secs(self.expiry_secs)
    }
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            interval_secs: 30 * 60,
            expiry_secs: 60 * 60,
        }
    }
}

/// Settings for the bundled resampling restorer
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RestorationConfig {
    pub scale: u32,
}

impl Default for RestorationConfig {
    fn default() -> Self {
        Self { scale: 2 }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// Directory for daily-rolling log files; console only when unset
    pub output_path: Option<PathBuf>,
    pub structured: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            output_path: None,
            structured: false,
        }
    }
}

/// Encodings available for output artifacts
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Jpeg,
    Png,
    Bmp,
}

impl OutputFormat {
    /// Get the file extension for this format
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Jpeg => "jpg",
            OutputFormat::Png => "png",
            OutputFormat::Bmp => "bmp",
        }
    }

    /// Get the MIME type for this format
    pub fn mime_type(&self) -> &'static str {
        match self {
            OutputFormat::Jpeg => "image/jpeg",
            OutputFormat::Png => "image/png",
            OutputFormat::Bmp => "image/bmp",
        }
    }

    pub fn image_format(&self) -> image::ImageFormat {
        match self {
            OutputFormat::Jpeg => image::ImageFormat::Jpeg,
            OutputFormat::Png => image::ImageFormat::Png,
            OutputFormat::Bmp => image::ImageFormat::Bmp,
        }
    }

    /// JPEG and BMP cannot carry an alpha channel
    pub fn supports_transparency(&self) -> bool {
        matches!(self, OutputFormat::Png)
    }
}

/// Configuration manager
pub struct ConfigManager {
    config_path: PathBuf,
    config: AppConfig,
}

impl ConfigManager {
    /// Create a new configuration manager using the platform config path
    pub fn new() -> Result<Self> {
        let config_path = Self::default_config_path()?;
        Self::with_path(config_path)
    }

    /// Create a configuration manager with a custom path
    pub fn with_path(config_path: PathBuf) -> Result<Self> {
        let config = Self::load(&config_path)?;

        Ok(Self {
            config_path,
            config,
        })
    }

    /// Get the current configuration
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Update the configuration
    pub fn update_config(&mut self, config: AppConfig) -> Result<()> {
        config.validate()?;
        self.config = config;
        self.save()
    }

    /// Save the current configuration to disk
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.config_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ProcessingError::ConfigError {
                message: format!("Failed to create config directory: {}", e),
            })?;
        }

        let config_str = toml::to_string_pretty(&self.config).map_err(|e| {
            ProcessingError::ConfigError {
                message: format!("Failed to serialize config: {}", e),
            }
        })?;

        std::fs::write(&self.config_path, config_str).map_err(|e| {
            ProcessingError::ConfigError {
                message: format!("Failed to write config file: {}", e),
            }
        })?;

        tracing::info!("Configuration saved to {:?}", self.config_path);
        Ok(())
    }

    /// Get the default configuration file path
    fn default_config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| config_error("Could not determine config directory"))?
            .join("image-restorer");

        Ok(config_dir.join("config.toml"))
    }

    /// Layer defaults, the optional TOML file and environment overrides
    fn load(path: &Path) -> Result<AppConfig> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path).format(config::FileFormat::Toml).required(false))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()
            .map_err(|e| ProcessingError::ConfigError {
                message: format!("Failed to read configuration: {}", e),
            })?;

        let config: AppConfig = settings.try_deserialize().map_err(|e| {
            ProcessingError::ConfigError {
                message: format!("Failed to parse configuration: {}", e),
            }
        })?;
        config.validate()?;

        if path.exists() {
            tracing::info!("Configuration loaded from {:?}", path);
        } else {
            tracing::info!("Using default configuration");
        }
        Ok(config)
    }
}

fn config_error(message: &str) -> ProcessingError {
    ProcessingError::ConfigError {
        message: message.to_string(),
    }
}
