#![forbid(unsafe_code)]

use mediacache_net::NetError;
use mediacache_storage::StorageError;
use thiserror::Error;

pub type CacheResult<T> = Result<T, CacheError>;

/// Errors surfaced by the cache layer.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Cache directory/file creation or handle acquisition failed. Raised at
    /// worker construction, before any I/O.
    #[error("cache setup failed: {0}")]
    Setup(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("network error: {0}")]
    Net(#[from] NetError),

    /// The response content-type is not a media type we are willing to cache
    /// (guards against redirects to HTML error pages).
    #[error("unsupported content type: {0}")]
    UnsupportedMime(String),

    /// Total content length is required but not yet known.
    #[error("content length unknown for {0}")]
    ContentLengthUnknown(String),

    /// Benign: the loading request was cancelled. Never surfaced as a
    /// playback error.
    #[error("loading request cancelled")]
    Cancelled,

    /// The resource is mid-download; its cache files cannot be deleted.
    #[error("resource is downloading: {url}")]
    Busy { url: String },

    #[error("invalid asset url: {0}")]
    InvalidAssetUrl(String),
}

impl CacheError {
    /// Whether this is the distinguished cancellation error.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
