//! Rasterization and text recognition engines.

mod ghostscript;
mod tesseract;

use std::path::Path;

pub use ghostscript::Ghostscript;
pub use tesseract::Tesseract;

use crate::Result;

/// Renders the first page of a PDF into an image.
#[async_trait::async_trait]
pub trait Rasterizer: Send + Sync {
    /// Renders `input` to `output`.
    ///
    /// On success the image at `output` exists.
    async fn rasterize(&self, input: &Path, output: &Path) -> Result<()>;
}

/// Extracts text from an image.
#[async_trait::async_trait]
pub trait Recognizer: Send + Sync {
    /// Recognizes the text of `image`.
    ///
    /// `output_prefix` is a path without extension inside the scratch
    /// directory that the engine may use for its own output files.
    async fn recognize(&self, image: &Path, output_prefix: &Path) -> Result<String>;
}
