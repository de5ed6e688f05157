//! Error types for the image restoration service

use crate::models::{JobId, JobStatus};
use std::path::PathBuf;
use std::time::Duration;

/// Main error type for job lifecycle operations
#[derive(Debug, thiserror::Error)]
pub enum ProcessingError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("File {filename} is too large: {size} bytes exceeds the limit of {limit} bytes")]
    FileTooLarge {
        filename: String,
        size: u64,
        limit: u64,
    },

    #[error("No valid image files were provided")]
    NoValidFiles,

    #[error("Invalid or missing API key")]
    Unauthorized,

    #[error("Job not found: {job_id}")]
    JobNotFound { job_id: String },

    #[error("Job {job_id} cannot move from {from} to {to}")]
    InvalidTransition {
        job_id: JobId,
        from: JobStatus,
        to: JobStatus,
    },

    #[error("Input artifact no longer exists: {}", .path.display())]
    ArtifactMissing { path: PathBuf },

    #[error("Failed to decode {filename}: {message}")]
    DecodeFailed { filename: String, message: String },

    #[error("Restoration failed: {message}")]
    RestorationFailed { message: String },

    #[error("Restoration model not loaded: {message}")]
    ModelNotLoaded { message: String },

    #[error("Work queue is closed")]
    QueueClosed,

    #[error("Job {job_id} still {status} after {waited:?}")]
    Timeout {
        job_id: JobId,
        status: JobStatus,
        waited: Duration,
    },

    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    #[error("Logging initialization failed: {message}")]
    LoggingError { message: String },

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
}

/// Where an error surfaces in the job lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Bad submission; reported synchronously, never queued
    Validation,
    /// Shared-secret check failed before admission
    Authorization,
    /// Unknown job identifier
    NotFound,
    /// One file of a job could not be processed; the job continues
    PerFile,
    /// Failure in the worker's outer control or the service itself
    JobLevel,
}

impl ProcessingError {
    /// Get the error type as a string for categorization
    pub fn error_type(&self) -> &'static str {
        match self {
            ProcessingError::Io(_) => "io_error",
            ProcessingError::FileTooLarge { .. } => "file_too_large",
            ProcessingError::NoValidFiles => "no_valid_files",
            ProcessingError::Unauthorized => "unauthorized",
            ProcessingError::JobNotFound { .. } => "job_not_found",
            ProcessingError::InvalidTransition { .. } => "invalid_transition",
            ProcessingError::ArtifactMissing { .. } => "artifact_missing",
            ProcessingError::DecodeFailed { .. } => "decode_failed",
            ProcessingError::RestorationFailed { .. } => "restoration_failed",
            ProcessingError::ModelNotLoaded { .. } => "model_not_loaded",
            ProcessingError::QueueClosed => "queue_closed",
            ProcessingError::Timeout { .. } => "timeout",
            ProcessingError::ConfigError { .. } => "config_error",
            ProcessingError::LoggingError { .. } => "logging_error",
            ProcessingError::InvalidInput { .. } => "invalid_input",
            ProcessingError::Serialization(_) => "serialization_error",
            ProcessingError::Image(_) => "image_error",
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            ProcessingError::FileTooLarge { .. }
            | ProcessingError::NoValidFiles
            | ProcessingError::InvalidInput { .. } => ErrorCategory::Validation,
            ProcessingError::Unauthorized => ErrorCategory::Authorization,
            ProcessingError::JobNotFound { .. } => ErrorCategory::NotFound,
            ProcessingError::ArtifactMissing { .. }
            | ProcessingError::DecodeFailed { .. }
            | ProcessingError::RestorationFailed { .. }
            | ProcessingError::Image(_) => ErrorCategory::PerFile,
            _ => ErrorCategory::JobLevel,
        }
    }

    /// HTTP status an outer transport layer should answer with
    pub fn status_code(&self) -> u16 {
        match self.category() {
            ErrorCategory::Validation => 400,
            ErrorCategory::Authorization => 401,
            ErrorCategory::NotFound => 404,
            ErrorCategory::PerFile | ErrorCategory::JobLevel => 500,
        }
    }

    /// Check if the error should be reported back to the submitter
    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status_code())
    }

    pub(crate) fn job_not_found(job_id: impl ToString) -> Self {
        ProcessingError::JobNotFound {
            job_id: job_id.to_string(),
        }
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, ProcessingError>;
