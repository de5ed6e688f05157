//! Logging configuration and initialization

use crate::config::LoggingConfig;
use crate::error::{ProcessingError, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

const LOG_FILE_PREFIX: &str = "image-restorer.log";

/// Initialize the logging system.
///
/// `RUST_LOG` takes precedence over the configured level. When a log directory
/// is configured the returned guard must be kept alive to flush the file writer.
pub fn init_logging(config: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .map_err(|e| ProcessingError::LoggingError {
            message: format!("Invalid log level '{}': {}", config.level, e),
        })?;

    let console_layer = if config.structured {
        fmt::layer().json().boxed()
    } else {
        fmt::layer().boxed()
    };

    let (file_layer, guard) = match &config.output_path {
        Some(dir) => {
            std::fs::create_dir_all(dir).map_err(|e| ProcessingError::LoggingError {
                message: format!("Failed to create log directory {}: {}", dir.display(), e),
            })?;
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_ansi(false).with_writer(writer).boxed();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    match tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
    {
        Ok(()) => Ok(guard),
        Err(e) => {
            // Either the dispatcher or the log bridge was already installed
            let error_msg = e.to_string();
            if error_msg.contains("already") {
                Ok(guard)
            } else {
                Err(ProcessingError::LoggingError {
                    message: format!("Failed to initialize logging: {}", e),
                })
            }
        }
    }
}
