//! Stored document references and file type classification.

use std::path::Path;

use derive_more::Display;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Maximum length of a document name, in characters.
pub const MAX_DOCUMENT_NAME_LEN: usize = 100;

/// How a document of a given file type is turned into text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingRoute {
    /// Rasterize the first page, then recognize the image.
    Rasterize,
    /// The blob already is an image; recognize it as is.
    RecognizeDirectly,
    /// No OCR is possible for this file type.
    Unsupported,
}

/// File extension of a document, normalized to lower case with a leading dot.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Display, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileType(String);

impl FileType {
    /// Creates a file type from an extension, with or without the leading dot.
    pub fn new(extension: impl AsRef<str>) -> Result<Self> {
        let extension = extension.as_ref().trim().trim_start_matches('.');
        if extension.is_empty() {
            return Err(Error::invalid_input().with_message("file type is empty"));
        }
        Ok(Self(format!(".{}", extension.to_ascii_lowercase())))
    }

    /// Derives the file type from the extension of a file name.
    pub fn from_file_name(name: &str) -> Result<Self> {
        let extension = Path::new(name)
            .extension()
            .and_then(|ext| ext.to_str())
            .ok_or_else(|| {
                Error::invalid_input().with_message(format!("'{name}' has no file extension"))
            })?;
        Self::new(extension)
    }

    /// Returns the extension including the leading dot.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the MIME content type stored alongside the blob.
    pub fn content_type(&self) -> &'static str {
        match self.as_str() {
            ".json" => "application/json",
            ".txt" => "text/plain",
            ".pdf" => "application/pdf",
            ".jpg" | ".jpeg" => "image/jpeg",
            ".png" => "image/png",
            ".gif" => "image/gif",
            ".tif" | ".tiff" => "image/tiff",
            ".bmp" => "image/bmp",
            _ => "application/octet-stream",
        }
    }

    /// Returns how documents of this type are processed by OCR.
    pub fn processing_route(&self) -> ProcessingRoute {
        match self.as_str() {
            ".pdf" => ProcessingRoute::Rasterize,
            ".png" | ".jpg" | ".jpeg" | ".tif" | ".tiff" | ".bmp" | ".gif" => {
                ProcessingRoute::RecognizeDirectly
            }
            _ => ProcessingRoute::Unsupported,
        }
    }
}

/// A stored document as referenced by the processing pipeline.
///
/// The reference is created once the upload side has persisted the blob and
/// its metadata; the pipeline only reads it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentReference {
    id: i64,
    name: String,
    storage_locator: String,
    file_type: FileType,
}

impl DocumentReference {
    /// Creates a validated document reference.
    ///
    /// The file type is derived from the extension of `name`.
    pub fn new(id: i64, name: impl Into<String>, storage_locator: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let storage_locator = storage_locator.into();

        if name.trim().is_empty() {
            return Err(Error::invalid_input().with_message("document name is empty"));
        }
        if name.chars().count() > MAX_DOCUMENT_NAME_LEN {
            return Err(Error::invalid_input().with_message(format!(
                "document name exceeds {MAX_DOCUMENT_NAME_LEN} characters"
            )));
        }
        if storage_locator.trim().is_empty() {
            return Err(Error::invalid_input().with_message("storage locator is empty"));
        }

        let file_type = FileType::from_file_name(&name)?;
        Ok(Self {
            id,
            name,
            storage_locator,
            file_type,
        })
    }

    /// Returns the document identifier.
    pub fn id(&self) -> i64 {
        self.id
    }

    /// Returns the original file name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the blob locator.
    pub fn storage_locator(&self) -> &str {
        &self.storage_locator
    }

    /// Returns the file type.
    pub fn file_type(&self) -> &FileType {
        &self.file_type
    }
}
