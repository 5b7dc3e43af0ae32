#![forbid(unsafe_code)]

use thiserror::Error;

/// Result type used by `mediacache-storage`.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors produced by storage primitives.
///
/// Higher-level crates wrap this error to add domain context (resource URL,
/// cache file path, etc.).
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid range: start {start} >= end {end}")]
    InvalidRange { start: u64, end: u64 },
}
