use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::process::Command;

use super::Recognizer;
use crate::process::run_tool;
use crate::{OcrConfig, OcrError, Result, Stage};

const TOOL: &str = "tesseract";

/// Tesseract recognizer writing `<prefix>.txt`.
#[derive(Debug, Clone)]
pub struct Tesseract {
    program: PathBuf,
    language: String,
    tessdata_dir: Option<PathBuf>,
    timeout: Duration,
}

impl Tesseract {
    /// Creates a recognizer from the pipeline configuration.
    pub fn new(config: &OcrConfig) -> Self {
        Self {
            program: config.tesseract_path.clone(),
            language: config.language.clone(),
            tessdata_dir: config.tessdata_dir.clone(),
            timeout: config.process_timeout(),
        }
    }

    fn command(&self, image: &Path, output_prefix: &Path) -> Command {
        let mut command = Command::new(&self.program);
        command
            .arg(image)
            .arg(output_prefix)
            .args(["-l", &self.language]);

        // Scoped to the child, the worker's own environment stays untouched.
        if let Some(dir) = &self.tessdata_dir {
            command.env("TESSDATA_PREFIX", dir);
        }
        command
    }
}

#[async_trait::async_trait]
impl Recognizer for Tesseract {
    async fn recognize(&self, image: &Path, output_prefix: &Path) -> Result<String> {
        run_tool(
            self.command(image, output_prefix),
            TOOL,
            Stage::Recognize,
            self.timeout,
        )
        .await?;

        let mut text_path = output_prefix.as_os_str().to_owned();
        text_path.push(".txt");
        tokio::fs::read_to_string(PathBuf::from(text_path))
            .await
            .map_err(|e| OcrError::io(Stage::Recognize, "failed to read recognized text", e))
    }
}
