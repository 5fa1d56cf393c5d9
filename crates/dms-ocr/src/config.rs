//! OCR pipeline configuration.

use std::path::PathBuf;
use std::time::Duration;

#[cfg(feature = "config")]
use clap::Args;
use serde::{Deserialize, Serialize};

use crate::{OcrError, Result};

/// Default rasterization resolution in dots per inch.
pub const DEFAULT_DPI: u32 = 300;

const DEFAULT_GHOSTSCRIPT: &str = "gs";
const DEFAULT_TESSERACT: &str = "tesseract";
const DEFAULT_DEVICE: &str = "pngalpha";
const DEFAULT_LANGUAGE: &str = "eng";
const DEFAULT_BUCKET: &str = "uploads";
const DEFAULT_DOWNLOAD_TIMEOUT_SECS: u64 = 60;
const DEFAULT_PROCESS_TIMEOUT_SECS: u64 = 120;

/// Configuration of the OCR pipeline and its external tools.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "config", derive(Args))]
#[serde(default)]
pub struct OcrConfig {
    /// Ghostscript executable
    #[cfg_attr(
        feature = "config",
        arg(long = "ghostscript-path", env = "GHOSTSCRIPT_PATH", default_value = DEFAULT_GHOSTSCRIPT)
    )]
    pub ghostscript_path: PathBuf,

    /// Tesseract executable
    #[cfg_attr(
        feature = "config",
        arg(long = "tesseract-path", env = "TESSERACT_PATH", default_value = DEFAULT_TESSERACT)
    )]
    pub tesseract_path: PathBuf,

    /// Rasterization resolution in DPI
    #[cfg_attr(
        feature = "config",
        arg(long = "ocr-dpi", env = "OCR_DPI", default_value_t = DEFAULT_DPI)
    )]
    pub dpi: u32,

    /// Ghostscript output device
    #[cfg_attr(
        feature = "config",
        arg(long = "ocr-device", env = "OCR_DEVICE", default_value = DEFAULT_DEVICE)
    )]
    pub device: String,

    /// Tesseract language
    #[cfg_attr(
        feature = "config",
        arg(long = "ocr-language", env = "OCR_LANGUAGE", default_value = DEFAULT_LANGUAGE)
    )]
    pub language: String,

    /// Directory holding Tesseract language data
    #[cfg_attr(feature = "config", arg(long = "tessdata-dir", env = "TESSDATA_PREFIX"))]
    pub tessdata_dir: Option<PathBuf>,

    /// Parent directory of per-invocation scratch directories (system temp by default)
    #[cfg_attr(feature = "config", arg(long = "ocr-scratch-dir", env = "OCR_SCRATCH_DIR"))]
    pub scratch_dir: Option<PathBuf>,

    /// Bucket assumed for locators without a scheme
    #[cfg_attr(
        feature = "config",
        arg(long = "ocr-default-bucket", env = "OCR_DEFAULT_BUCKET", default_value = DEFAULT_BUCKET)
    )]
    pub default_bucket: String,

    /// Time bound of the blob download in seconds
    #[cfg_attr(
        feature = "config",
        arg(long = "ocr-download-timeout", env = "OCR_DOWNLOAD_TIMEOUT_SECS", default_value_t = DEFAULT_DOWNLOAD_TIMEOUT_SECS)
    )]
    pub download_timeout_secs: u64,

    /// Time bound of each external tool run in seconds
    #[cfg_attr(
        feature = "config",
        arg(long = "ocr-process-timeout", env = "OCR_PROCESS_TIMEOUT_SECS", default_value_t = DEFAULT_PROCESS_TIMEOUT_SECS)
    )]
    pub process_timeout_secs: u64,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            ghostscript_path: PathBuf::from(DEFAULT_GHOSTSCRIPT),
            tesseract_path: PathBuf::from(DEFAULT_TESSERACT),
            dpi: DEFAULT_DPI,
            device: DEFAULT_DEVICE.to_owned(),
            language: DEFAULT_LANGUAGE.to_owned(),
            tessdata_dir: None,
            scratch_dir: None,
            default_bucket: DEFAULT_BUCKET.to_owned(),
            download_timeout_secs: DEFAULT_DOWNLOAD_TIMEOUT_SECS,
            process_timeout_secs: DEFAULT_PROCESS_TIMEOUT_SECS,
        }
    }
}

impl OcrConfig {
    /// Returns the download time bound.
    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_secs)
    }

    /// Returns the time bound of each external tool run.
    pub fn process_timeout(&self) -> Duration {
        Duration::from_secs(self.process_timeout_secs)
    }

    /// Sets the parent directory of scratch directories.
    #[must_use]
    pub fn with_scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratch_dir = Some(dir.into());
        self
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: &str| OcrError::InvalidConfig(reason.to_owned());

        if self.dpi == 0 {
            return Err(invalid("dpi must be positive"));
        }
        if self.device.trim().is_empty() {
            return Err(invalid("ghostscript device is empty"));
        }
        if self.default_bucket.trim().is_empty() {
            return Err(invalid("default bucket is empty"));
        }
        if self.download_timeout_secs == 0 || self.process_timeout_secs == 0 {
            return Err(invalid("timeouts must be positive"));
        }
        Ok(())
    }
}
