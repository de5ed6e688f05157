//! Command-line interface for the image restoration service

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use image_restorer_core::utils::format::guess_content_type;
use image_restorer_core::{
    evaluate_directory, init_logging, load_restorer, version, ArtifactStore, ConfigManager,
    EvaluationReport, ImageRestorer, JobManager, JobOptions, JobStatus, Janitor, ResampleRestorer,
    RestorerLoader, UploadedFile,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tabled::settings::Style;
use tabled::{Table, Tabled};
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "image-restorer")]
#[command(about = "Self-hosted image restoration job service")]
#[command(version = version())]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Restore images and wait for the job to finish
    Restore {
        /// Image files to submit as one job
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Skip the face enhancement pass
        #[arg(long)]
        no_face_enhance: bool,

        /// Shared secret to present on submission
        #[arg(long)]
        api_key: Option<String>,

        /// Seconds to wait for a terminal status
        #[arg(long, default_value = "300")]
        timeout: u64,
    },

    /// Measure restoration quality over a directory of images
    Evaluate {
        /// Directory of raw input images
        input_dir: PathBuf,

        /// Where restored images are written
        #[arg(short, long, default_value = "evaluation_results")]
        output: PathBuf,
    },

    /// Delete expired artifacts once
    Sweep {
        /// Override the configured expiry age
        #[arg(long)]
        expiry_secs: Option<u64>,
    },

    /// Print the effective configuration
    Config {
        /// Save it to the configuration file
        #[arg(long)]
        write: bool,
    },

    /// Show version and storage information
    Info,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut manager = match &cli.config {
        Some(path) => ConfigManager::with_path(path.clone())?,
        None => ConfigManager::new()?,
    };

    let mut logging = manager.config().logging.clone();
    if cli.verbose {
        logging.level = "debug".to_string();
    }
    let _log_guard = init_logging(&logging)?;

    info!("Image Restorer CLI v{} starting", version());

    match cli.command {
        Commands::Restore {
            files,
            no_face_enhance,
            api_key,
            timeout,
        } => {
            let options = JobOptions {
                face_enhance: !no_face_enhance,
            };
            restore(&manager, files, options, api_key.as_deref(), Duration::from_secs(timeout)).await?;
        }

        Commands::Evaluate { input_dir, output } => {
            evaluate(&manager, &input_dir, &output).await?;
        }

        Commands::Sweep { expiry_secs } => {
            let config = manager.config();
            let expiry = expiry_secs
                .map(Duration::from_secs)
                .unwrap_or_else(|| config.cleanup.expiry());
            let store = Arc::new(ArtifactStore::new(&config.storage, config.server.max_upload_bytes()).await?);
            let report = Janitor::new(store, config.cleanup.interval(), expiry)
                .run_once()
                .await;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }

        Commands::Config { write } => {
            println!("{}", toml::to_string_pretty(manager.config())?);
            if write {
                let config = manager.config().clone();
                manager.update_config(config)?;
                println!("# saved to {}", manager.config_path().display());
            }
        }

        Commands::Info => {
            let config = manager.config();
            println!("Image Restorer v{}", version());
            println!("\nStorage:");
            println!("  Uploads: {}", config.storage.upload_dir.display());
            println!("  Outputs: {}", config.storage.output_dir.display());
            println!("  Public prefix: {}", config.storage.public_prefix);
            println!("  Output format: {}", config.storage.output_format.extension());
            println!("\nLimits:");
            println!("  Max upload: {} KB", config.server.max_upload_kb);
            println!("  Artifact expiry: {}s", config.cleanup.expiry_secs);
            println!("  Sweep interval: {}s", config.cleanup.interval_secs);
            println!("  API key required: {}", config.server.api_key.is_some());
            println!("\nConfig file: {}", manager.config_path().display());
        }
    }

    Ok(())
}

fn resample_loader(scale: u32) -> RestorerLoader {
    Box::new(move || -> image_restorer_core::Result<Arc<dyn ImageRestorer>> {
        Ok(Arc::new(ResampleRestorer::new(scale)?))
    })
}

async fn restore(
    manager: &ConfigManager,
    files: Vec<PathBuf>,
    options: JobOptions,
    api_key: Option<&str>,
    timeout: Duration,
) -> Result<()> {
    let config = manager.config().clone();
    let scale = config.restoration.scale;

    let mut uploads = Vec::with_capacity(files.len());
    for path in &files {
        uploads.push(read_upload(path).await?);
    }

    let jobs = JobManager::start(config, resample_loader(scale)).await?;

    let submitted = jobs.submit_authorized(api_key, uploads, options).await?;
    info!(
        "Job {} queued at position {}",
        submitted.job_id, submitted.queue_position
    );

    let status = jobs.wait_for_terminal(submitted.job_id, timeout).await?;
    println!("{}", serde_json::to_string_pretty(&status)?);

    for result in &status.results {
        if let Some(path) = jobs.store().resolve(&result.output_reference) {
            info!("{} -> {}", result.original_filename, path.display());
        }
    }
    if status.results.len() < files.len() {
        warn!(
            "{} of {} files could not be restored",
            files.len() - status.results.len(),
            files.len()
        );
    }

    jobs.shutdown().await?;

    if status.status == JobStatus::Failed {
        bail!(
            "Job {} failed: {}",
            submitted.job_id,
            status.error.unwrap_or_default()
        );
    }
    Ok(())
}

#[derive(Tabled)]
struct EvaluationRow {
    #[tabled(rename = "Filename")]
    filename: String,
    #[tabled(rename = "Dims (Old->New)")]
    dimensions: String,
    #[tabled(rename = "Size (Old->New)")]
    size: String,
    #[tabled(rename = "PSNR (Noise)")]
    psnr: String,
    #[tabled(rename = "SSIM (Sharpness)")]
    ssim: String,
}

async fn evaluate(manager: &ConfigManager, input_dir: &Path, output_dir: &Path) -> Result<()> {
    let restorer = load_restorer(resample_loader(manager.config().restoration.scale)).await?;

    let report = evaluate_directory(restorer.as_ref(), input_dir, output_dir)
        .await
        .with_context(|| format!("Failed to evaluate {}", input_dir.display()))?;

    if report.entries.is_empty() {
        println!("No images found in {}", input_dir.display());
        return Ok(());
    }

    println!("{}", render_report(&report));
    println!("\nNOTE:");
    println!("- PSNR > 30 is generally considered excellent quality.");
    println!("- SSIM > 0.8 means structure is very well preserved.");
    println!("- Restored images saved to: {}", output_dir.display());
    if !report.skipped.is_empty() {
        println!("- Skipped: {}", report.skipped.join(", "));
    }
    Ok(())
}

fn render_report(report: &EvaluationReport) -> String {
    let rows = report.entries.iter().map(|entry| EvaluationRow {
        filename: entry.filename.clone(),
        dimensions: format!(
            "{}x{} -> {}x{}",
            entry.original_dimensions.0,
            entry.original_dimensions.1,
            entry.restored_dimensions.0,
            entry.restored_dimensions.1
        ),
        size: format!("{:.1} -> {:.1} KB", entry.original_kb(), entry.restored_kb()),
        psnr: format!("{:.2}", entry.psnr),
        ssim: format!("{:.4}", entry.ssim),
    });
    Table::new(rows).with(Style::ascii()).to_string()
}

async fn read_upload(path: &Path) -> Result<UploadedFile> {
    let data = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let filename = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("upload")
        .to_string();
    Ok(UploadedFile::new(filename, guess_content_type(path), data))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parsing() {
        let cli = Cli::try_parse_from(["image-restorer", "info"]);
        assert!(cli.is_ok());
    }

    #[test]
    fn test_evaluate_defaults() {
        let cli = Cli::try_parse_from(["image-restorer", "evaluate", "inputs"]).unwrap();
        match cli.command {
            Commands::Evaluate { input_dir, output } => {
                assert_eq!(input_dir, PathBuf::from("inputs"));
                assert_eq!(output, PathBuf::from("evaluation_results"));
            }
            _ => panic!("expected evaluate"),
        }
    }

    #[test]
    fn test_render_report() {
        let report = EvaluationReport {
            entries: vec![image_restorer_core::EvaluationEntry {
                filename: "face.png".to_string(),
                original_dimensions: (100, 80),
                restored_dimensions: (200, 160),
                original_bytes: 2048,
                restored_bytes: 5120,
                psnr: 31.234,
                ssim: 0.91234,
                output_path: PathBuf::from("out/face.png"),
            }],
            skipped: Vec::new(),
        };

        let table = render_report(&report);
        assert!(table.contains("Dims (Old->New)"));
        assert!(table.contains("100x80 -> 200x160"));
        assert!(table.contains("2.0 -> 5.0 KB"));
        assert!(table.contains("31.23"));
        assert!(table.contains("0.9123"));
    }

    #[test]
    fn test_restore_requires_files() {
        assert!(Cli::try_parse_from(["image-restorer", "restore"]).is_err());

        let cli = Cli::try_parse_from(["image-restorer", "restore", "a.png", "--no-face-enhance"]).unwrap();
        match cli.command {
            Commands::Restore {
                files,
                no_face_enhance,
                timeout,
                ..
            } => {
                assert_eq!(files, vec![PathBuf::from("a.png")]);
                assert!(no_face_enhance);
                assert_eq!(timeout, 300);
            }
            _ => panic!("expected restore"),
        }
    }
}
