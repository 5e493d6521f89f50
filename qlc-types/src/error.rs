use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while constructing or validating shared types.
#[derive(Debug, Error)]
pub enum TypesError {
    #[error("invalid date {0:?}, expected YYYYMMDD")]
    InvalidDate(String),
    #[error("invalid partition key {0:?}")]
    InvalidPartitionKey(String),
}

/// The taxonomy of non-transient errors the compaction engine can raise.
///
/// Transient I/O errors are retried inside the `Blob` implementation and
/// never reach this enum. Everything here is something the partition worker
/// (`qlc-compactor::worker::PartitionWorker`) must classify into a terminal
/// journal status.
#[derive(Debug, Error)]
pub enum CompactorError {
    #[error("corrupt source file: {0}")]
    CorruptSource(String),

    #[error("dictionary-encoded columns use incompatible dictionaries across input files")]
    DictionaryConflict,

    #[error("output verification failed: {0}")]
    VerificationFailed(String),

    #[error("partition lock held by another worker")]
    Locked,

    #[error("cooperative shutdown requested")]
    ShutdownRequested,

    #[error("no raw files found for partition")]
    NoFiles,

    #[error("download failed: {0}")]
    DownloadFailed(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Coarse classification of a [`CompactorError`] recorded in the journal,
/// mirroring `compact.py`'s `error_type` triage field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    DictConflict,
    SnappyCorrupt,
    Other,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::DictConflict => "DICT_CONFLICT",
            ErrorKind::SnappyCorrupt => "SNAPPY_CORRUPT",
            ErrorKind::Other => "OTHER",
        }
    }

    /// Classifies a lowercased error message the way `compact.py` does:
    /// substring sniffing on the rendered error text.
    pub fn classify(message: &str) -> Self {
        let lower = message.to_lowercase();
        if lower.contains("more than one dictionary") {
            ErrorKind::DictConflict
        } else if lower.contains("snappy") || lower.contains("corrupt") {
            ErrorKind::SnappyCorrupt
        } else {
            ErrorKind::Other
        }
    }
}
