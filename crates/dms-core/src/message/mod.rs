//! Payloads exchanged over the message broker.
//!
//! All payloads are JSON documents carrying a `version` field so consumers
//! can reject formats they do not understand instead of misreading them.

mod completed;
mod dead_letter;
mod notice;

pub use completed::OcrCompleted;
pub use dead_letter::DeadLetter;
pub use notice::DocumentNotice;

/// Current version of every payload produced by this crate.
pub const PAYLOAD_VERSION: u32 = 1;
