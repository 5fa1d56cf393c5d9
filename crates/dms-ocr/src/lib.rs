#![forbid(unsafe_code)]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![doc = include_str!("../README.md")]

/// Tracing target for pipeline orchestration.
pub const TRACING_TARGET_PIPELINE: &str = "dms_ocr::pipeline";

/// Tracing target for external tool invocations.
pub const TRACING_TARGET_PROCESS: &str = "dms_ocr::process";

/// Tracing target for scratch space management.
pub const TRACING_TARGET_SCRATCH: &str = "dms_ocr::scratch";

mod config;
mod engine;
mod error;
mod pipeline;
mod process;
mod scratch;

pub use config::OcrConfig;
pub use engine::{Ghostscript, Rasterizer, Recognizer, Tesseract};
pub use error::{OcrError, Result, Stage};
pub use pipeline::{Extraction, OcrPipeline};
pub use scratch::ScratchSpace;
