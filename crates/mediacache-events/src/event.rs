#![forbid(unsafe_code)]

use std::{ops::Range, path::PathBuf};

/// Point-in-time copy of one resource's cache state.
///
/// Carried by value inside events so observers never touch live cache
/// structures.
#[derive(Clone, Debug, PartialEq)]
pub struct CacheSnapshot {
    /// Original resource URL.
    pub url: String,
    /// Cache payload file on disk.
    pub file_path: PathBuf,
    /// Cached fragments, ascending, merged.
    pub fragments: Vec<Range<u64>>,
    /// Total resource length; 0 while unknown.
    pub content_length: u64,
    /// MIME type, once learned from the first response.
    pub mime_type: Option<String>,
    /// Bytes cached so far.
    pub cached_bytes: u64,
    /// Fraction of the resource cached; 0.0 while the length is unknown.
    pub progress: f64,
    /// Observed network throughput in kB/s, if any bytes were downloaded.
    pub download_speed_kbps: Option<f64>,
}

/// Events emitted by the cache layer.
#[derive(Clone, Debug, PartialEq)]
pub enum CacheEvent {
    /// Cache state changed (new bytes written). Rate-limited by the
    /// publisher; always emitted on completion.
    Updated { snapshot: CacheSnapshot },
    /// A download finished, cleanly or with a terminal error.
    Finished {
        url: String,
        error: Option<String>,
    },
}
