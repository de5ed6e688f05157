//! # Image Restorer Core
//!
//! Job lifecycle engine for a small self-hosted image restoration service:
//! upload admission, a single-consumer FIFO work queue, in-memory status
//! tracking and time-based cleanup of on-disk artifacts, plus an offline
//! quality evaluation of the restorer.

pub mod admission;
pub mod config;
pub mod error;
pub mod evaluation;
pub mod janitor;
pub mod job_manager;
pub mod logging;
pub mod models;
pub mod queue;
pub mod registry;
pub mod restorer;
pub mod storage;
pub mod utils;
pub mod worker;

// Re-export commonly used types
pub use admission::AdmissionHandler;
pub use config::*;
pub use error::*;
pub use evaluation::{evaluate_directory, evaluate_file, EvaluationEntry, EvaluationReport};
pub use janitor::Janitor;
pub use job_manager::JobManager;
pub use logging::*;
pub use models::*;
pub use queue::{QueueConsumer, WorkQueue};
pub use registry::{JobRegistry, JobStatusUpdate, RegistryStats};
pub use restorer::{load_restorer, ImageRestorer, ResampleRestorer, RestorerLoader};
pub use storage::ArtifactStore;
pub use worker::Worker;

/// Get the version of the image restorer core
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
