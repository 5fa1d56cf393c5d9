//! CLI configuration management.
//!
//! ```text
//! Cli
//! ├── log_format                    # text | json
//! └── command
//!     ├── worker: WorkerArgs        # NATS, topology, storage, OCR, worker
//!     └── submit: SubmitArgs        # NATS, topology, storage, file to upload
//! ```
//!
//! All configuration can be provided via CLI arguments or environment variables.
//! Use `--help` to see all available options.

use std::path::PathBuf;
use std::process;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use dms_nats::{NatsConfig, TopologyConfig};
use dms_ocr::OcrConfig;
use dms_storage::StorageConfig;
use dms_worker::WorkerConfig;

use crate::telemetry::LogFormat;
use crate::{TRACING_TARGET_CONFIG, TRACING_TARGET_STARTUP};

/// Complete CLI configuration.
#[derive(Debug, Parser)]
#[command(name = "dms")]
#[command(about = "Document OCR pipeline worker and upload tool")]
#[command(version)]
pub struct Cli {
    /// Log output format
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value = "text", global = true)]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Consume document notices and extract their text
    Worker(Box<WorkerArgs>),
    /// Upload a local file and publish its processing notice
    Submit(Box<SubmitArgs>),
}

/// Arguments of `dms worker`.
#[derive(Debug, Clone, Args)]
pub struct WorkerArgs {
    #[command(flatten)]
    pub nats: NatsConfig,

    #[command(flatten)]
    pub topology: TopologyConfig,

    #[command(flatten)]
    pub storage: StorageConfig,

    #[command(flatten)]
    pub ocr: OcrConfig,

    #[command(flatten)]
    pub worker: WorkerConfig,
}

/// Arguments of `dms submit`.
#[derive(Debug, Clone, Args)]
pub struct SubmitArgs {
    #[command(flatten)]
    pub nats: NatsConfig,

    #[command(flatten)]
    pub topology: TopologyConfig,

    #[command(flatten)]
    pub storage: StorageConfig,

    /// Document identifier assigned by the metadata store
    #[arg(long)]
    pub id: i64,

    /// Bucket receiving the upload
    #[arg(long, env = "UPLOAD_BUCKET", default_value = "uploads")]
    pub bucket: String,

    /// File to upload
    pub file: PathBuf,
}

impl Cli {
    /// Loads environment variables from .env file (if enabled) and parses CLI arguments.
    ///
    /// The .env file is loaded before clap parses arguments, so its variables
    /// act as defaults for every `env`-backed option.
    pub fn init() -> Self {
        Self::load_dotenv();
        Self::parse()
    }

    #[cfg(feature = "dotenv")]
    fn load_dotenv() {
        if let Err(err) = dotenvy::dotenv()
            && !err.not_found()
        {
            eprintln!("Warning: failed to load .env file: {err}");
        }
    }

    #[cfg(not(feature = "dotenv"))]
    fn load_dotenv() {}

    /// Logs build information and the selected command's configuration
    /// (no credentials).
    pub fn log(&self) {
        tracing::info!(
            target: TRACING_TARGET_STARTUP,
            version = env!("CARGO_PKG_VERSION"),
            "starting dms"
        );
        tracing::debug!(
            target: TRACING_TARGET_STARTUP,
            pid = process::id(),
            arch = std::env::consts::ARCH,
            os = std::env::consts::OS,
            features = ?Self::enabled_features(),
            "Build information"
        );

        let (nats, storage) = match &self.command {
            Command::Worker(args) => {
                tracing::info!(
                    target: TRACING_TARGET_CONFIG,
                    ghostscript = %args.ocr.ghostscript_path.display(),
                    tesseract = %args.ocr.tesseract_path.display(),
                    dpi = args.ocr.dpi,
                    language = %args.ocr.language,
                    concurrency = args.worker.concurrency,
                    max_deliveries = args.worker.max_deliveries,
                    "OCR worker configuration"
                );
                (&args.nats, &args.storage)
            }
            Command::Submit(args) => (&args.nats, &args.storage),
        };

        tracing::info!(
            target: TRACING_TARGET_CONFIG,
            nats_url = %nats.nats_url,
            connect_attempts = nats.nats_connect_attempts,
            connect_delay_secs = nats.nats_connect_delay_secs,
            storage_backend = %storage.storage_backend,
            storage_endpoint = ?storage.storage_endpoint,
            "Connection configuration"
        );
    }

    fn enabled_features() -> Vec<&'static str> {
        [cfg!(feature = "dotenv").then_some("dotenv")]
            .into_iter()
            .flatten()
            .collect()
    }
}

impl WorkerArgs {
    /// Validates every configuration group.
    pub fn validate(&self) -> anyhow::Result<()> {
        self.nats.validate().context("invalid NATS configuration")?;
        self.storage
            .validate()
            .context("invalid storage configuration")?;
        self.ocr.validate().context("invalid OCR configuration")?;
        self.worker
            .validate()
            .context("invalid worker configuration")?;
        Ok(())
    }
}

impl SubmitArgs {
    /// Validates every configuration group.
    pub fn validate(&self) -> anyhow::Result<()> {
        self.nats.validate().context("invalid NATS configuration")?;
        self.storage
            .validate()
            .context("invalid storage configuration")?;
        Ok(())
    }
}
