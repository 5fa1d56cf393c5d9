use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::process::Command;

use super::Rasterizer;
use crate::process::run_tool;
use crate::{OcrConfig, OcrError, Result, Stage};

const TOOL: &str = "gs";

/// Ghostscript rasterizer rendering the first page only.
#[derive(Debug, Clone)]
pub struct Ghostscript {
    program: PathBuf,
    device: String,
    dpi: u32,
    timeout: Duration,
}

impl Ghostscript {
    /// Creates a rasterizer from the pipeline configuration.
    pub fn new(config: &OcrConfig) -> Self {
        Self {
            program: config.ghostscript_path.clone(),
            device: config.device.clone(),
            dpi: config.dpi,
            timeout: config.process_timeout(),
        }
    }

    fn command(&self, input: &Path, output: &Path) -> Command {
        // Ghostscript expands `%d` in output file names.
        let output = output.to_string_lossy().replace('%', "%%");

        let mut output_arg = OsString::from("-sOutputFile=");
        output_arg.push(output);

        let mut command = Command::new(&self.program);
        command
            .args(["-q", "-dNOPAUSE", "-dBATCH", "-dSAFER"])
            .arg(format!("-sDEVICE={}", self.device))
            .arg(format!("-r{}", self.dpi))
            .args(["-dFirstPage=1", "-dLastPage=1"])
            .arg(output_arg)
            .arg(input);
        command
    }
}

#[async_trait::async_trait]
impl Rasterizer for Ghostscript {
    async fn rasterize(&self, input: &Path, output: &Path) -> Result<()> {
        run_tool(self.command(input, output), TOOL, Stage::Rasterize, self.timeout).await?;

        match tokio::fs::try_exists(output).await {
            Ok(true) => Ok(()),
            Ok(false) => Err(OcrError::ProcessFailed {
                stage: Stage::Rasterize,
                tool: TOOL,
                status: "exit status: 0".to_owned(),
                stderr: format!("no image written to {}", output.display()),
            }),
            Err(e) => Err(OcrError::io(Stage::Rasterize, "failed to inspect rendered image", e)),
        }
    }
}
