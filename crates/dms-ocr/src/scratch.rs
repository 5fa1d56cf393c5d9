//! Per-invocation scratch directories.

use std::path::{Path, PathBuf};

use tempfile::TempDir;

use crate::{OcrError, Result, Stage, TRACING_TARGET_SCRATCH};

const SCRATCH_PREFIX: &str = "dms-ocr-";

/// Private working directory for one pipeline run.
///
/// Every intermediate file of a run lives below this directory. The
/// directory is removed by [`ScratchSpace::close`], and on drop as a
/// fallback, so no run leaves files behind regardless of how it ends.
#[derive(Debug)]
pub struct ScratchSpace {
    dir: TempDir,
}

impl ScratchSpace {
    /// Creates a fresh scratch directory, below `parent` when given.
    pub fn create(parent: Option<&Path>) -> Result<Self> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(SCRATCH_PREFIX);

        let dir = match parent {
            Some(parent) => builder.tempdir_in(parent),
            None => builder.tempdir(),
        }
        .map_err(|e| OcrError::io(Stage::Download, "failed to create scratch directory", e))?;

        tracing::trace!(
            target: TRACING_TARGET_SCRATCH,
            path = %dir.path().display(),
            "Scratch directory created"
        );
        Ok(Self { dir })
    }

    /// Returns the scratch directory.
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Returns the path of `name` inside the scratch directory.
    pub fn file(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    /// Removes the directory and everything in it.
    ///
    /// Removal failures are logged, never returned.
    pub fn close(self) {
        let path = self.dir.path().to_path_buf();
        match self.dir.close() {
            Ok(()) => tracing::trace!(
                target: TRACING_TARGET_SCRATCH,
                path = %path.display(),
                "Scratch directory removed"
            ),
            Err(err) => tracing::warn!(
                target: TRACING_TARGET_SCRATCH,
                path = %path.display(),
                error = %err,
                "Failed to remove scratch directory"
            ),
        }
    }
}
