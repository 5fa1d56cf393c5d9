#![forbid(unsafe_code)]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![doc = include_str!("../README.md")]

mod document;
mod error;
mod locator;
pub mod message;

pub use document::{DocumentReference, FileType, MAX_DOCUMENT_NAME_LEN, ProcessingRoute};
pub use error::{BoxedError, Error, ErrorKind, Result};
pub use locator::StorageLocator;
