#![forbid(unsafe_code)]

//! Per-resource cache metadata: content info, fragment map, download stats,
//! and the sidecar file persisting all of it across launches.

use std::{
    ops::Range,
    path::{Path, PathBuf},
    time::{Duration, Instant},
};

use mediacache_events::CacheSnapshot;
use mediacache_net::ResponseInfo;
use mediacache_storage::FragmentStore;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::CacheResult;

const SIDECAR_VERSION: u32 = 1;
const SIDECAR_SUFFIX: &str = ".metadata";

/// Content facts learned from a resource's first HTTP response.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentMetadata {
    pub mime_type: String,
    /// Total resource length. 0 means "unknown" (length parsing failed).
    pub content_length: u64,
    /// Whether the server advertised `Accept-Ranges: bytes`.
    pub supports_byte_ranges: bool,
}

impl ContentMetadata {
    /// Build metadata from response headers.
    ///
    /// Total length comes from the `Content-Range` total (the part after
    /// `/`); a plain 200 response falls back to `Content-Length`. Parse
    /// failure yields 0, which callers must treat as unknown.
    #[must_use]
    pub fn from_response(info: &ResponseInfo) -> Self {
        let content_length = info
            .content_range
            .as_deref()
            .and_then(parse_content_range_total)
            .or(if info.content_range.is_none() {
                info.content_length
            } else {
                None
            })
            .unwrap_or(0);

        Self {
            mime_type: info
                .mime_type
                .clone()
                .unwrap_or_else(|| "application/octet-stream".to_string()),
            content_length,
            supports_byte_ranges: info.accept_ranges,
        }
    }

    /// Synthesize metadata for a locally imported file.
    #[must_use]
    pub fn for_import(mime_type: String, content_length: u64) -> Self {
        Self {
            mime_type,
            content_length,
            supports_byte_ranges: true,
        }
    }
}

/// Parses the total out of `bytes 0-1/4096` (also `bytes */4096`).
fn parse_content_range_total(value: &str) -> Option<u64> {
    value.rsplit_once('/')?.1.trim().parse().ok()
}

/// On-disk sidecar format.
#[derive(Serialize, Deserialize)]
struct SidecarFile {
    version: u32,
    url: String,
    fragments: FragmentStore,
    metadata: Option<ContentMetadata>,
    downloaded_bytes: u64,
    download_time_ms: u64,
}

/// Aggregated cache state for one resource.
///
/// Loaded from the sidecar at cache-file-open time, mutated by every
/// completed read/write, and saved back with debouncing: `save()` coalesces
/// to at most one sidecar write per `save_interval`; `save_now()` always
/// writes. Sidecar writes are atomic (temp file + rename).
#[derive(Debug)]
pub struct CacheConfiguration {
    url: String,
    file_path: PathBuf,
    fragments: FragmentStore,
    metadata: Option<ContentMetadata>,
    downloaded_bytes: u64,
    download_time_ms: u64,

    save_interval: Duration,
    last_saved: Option<Instant>,
    dirty: bool,
}

impl CacheConfiguration {
    /// Load the configuration for the cache file at `file_path`, or create a
    /// fresh one when the sidecar is absent or unreadable.
    pub fn load<P: Into<PathBuf>>(file_path: P, url: String, save_interval: Duration) -> Self {
        let file_path = file_path.into();
        let sidecar = sidecar_path(&file_path);

        let mut fresh = Self {
            url,
            file_path,
            fragments: FragmentStore::new(),
            metadata: None,
            downloaded_bytes: 0,
            download_time_ms: 0,
            save_interval,
            last_saved: None,
            dirty: false,
        };

        let Ok(bytes) = std::fs::read(&sidecar) else {
            return fresh;
        };
        match bincode::serde::decode_from_slice::<SidecarFile, _>(&bytes, bincode::config::legacy())
        {
            Ok((file, _)) if file.version == SIDECAR_VERSION => {
                debug!(url = %fresh.url, fragments = file.fragments.fragments().len(), "loaded cache sidecar");
                fresh.fragments = file.fragments;
                fresh.metadata = file.metadata;
                fresh.downloaded_bytes = file.downloaded_bytes;
                fresh.download_time_ms = file.download_time_ms;
                fresh
            }
            Ok((file, _)) => {
                warn!(version = file.version, "unknown sidecar version, starting fresh");
                fresh
            }
            Err(e) => {
                warn!(error = %e, path = %sidecar.display(), "corrupt cache sidecar, starting fresh");
                fresh
            }
        }
    }

    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    #[must_use]
    pub fn file_path(&self) -> &Path {
        &self.file_path
    }

    /// Populate content metadata. First writer wins: once set, subsequent
    /// calls are no-ops and return `false`.
    pub fn set_content_info(&mut self, metadata: ContentMetadata) -> bool {
        if self.metadata.is_some() {
            return false;
        }
        self.metadata = Some(metadata);
        self.dirty = true;
        true
    }

    #[must_use]
    pub fn content_info(&self) -> Option<&ContentMetadata> {
        self.metadata.as_ref()
    }

    /// Record a fully-written range.
    pub fn add_fragment(&mut self, range: Range<u64>) {
        self.fragments.add(range);
        self.dirty = true;
    }

    #[must_use]
    pub fn fragment_store(&self) -> &FragmentStore {
        &self.fragments
    }

    pub fn fragments(&self) -> Vec<Range<u64>> {
        self.fragments.fragments()
    }

    /// Accumulate a completed network write session for throughput stats.
    pub fn add_downloaded(&mut self, bytes: u64, elapsed: Duration) {
        if bytes == 0 {
            return;
        }
        self.downloaded_bytes += bytes;
        self.download_time_ms += elapsed.as_millis() as u64;
        self.dirty = true;
    }

    #[must_use]
    pub fn cached_bytes(&self) -> u64 {
        self.fragments.cached_bytes()
    }

    /// Fraction cached, 0.0 while the total length is unknown.
    #[must_use]
    pub fn progress(&self) -> f64 {
        match self.content_length() {
            0 => 0.0,
            total => self.cached_bytes() as f64 / total as f64,
        }
    }

    /// Observed download speed in kB/s across all write sessions.
    #[must_use]
    pub fn download_speed_kbps(&self) -> Option<f64> {
        if self.download_time_ms == 0 {
            return None;
        }
        Some(self.downloaded_bytes as f64 / self.download_time_ms as f64)
    }

    #[must_use]
    pub fn content_length(&self) -> u64 {
        self.metadata.as_ref().map_or(0, |m| m.content_length)
    }

    /// Whether the whole resource is cached.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        match self.content_length() {
            0 => false,
            total => self.fragments.contains(&(0..total)),
        }
    }

    /// Debounced save. Writes the sidecar only when state changed and the
    /// save interval elapsed; returns whether a write happened.
    pub fn save(&mut self) -> CacheResult<bool> {
        if !self.dirty {
            return Ok(false);
        }
        if let Some(last) = self.last_saved {
            if last.elapsed() < self.save_interval {
                return Ok(false);
            }
        }
        self.save_now()?;
        Ok(true)
    }

    /// Unconditional save (used on completion and teardown).
    pub fn save_now(&mut self) -> CacheResult<()> {
        let file = SidecarFile {
            version: SIDECAR_VERSION,
            url: self.url.clone(),
            fragments: self.fragments.clone(),
            metadata: self.metadata.clone(),
            downloaded_bytes: self.downloaded_bytes,
            download_time_ms: self.download_time_ms,
        };
        let bytes = bincode::serde::encode_to_vec(&file, bincode::config::legacy())
            .map_err(|e| crate::CacheError::Setup(format!("sidecar encode: {e}")))?;

        let sidecar = sidecar_path(&self.file_path);
        let tmp = sidecar.with_extension("metadata.tmp");
        std::fs::write(&tmp, &bytes)?;
        std::fs::rename(&tmp, &sidecar)?;

        self.dirty = false;
        self.last_saved = Some(Instant::now());
        Ok(())
    }

    /// Point-in-time copy for event observers.
    #[must_use]
    pub fn snapshot(&self) -> CacheSnapshot {
        CacheSnapshot {
            url: self.url.clone(),
            file_path: self.file_path.clone(),
            fragments: self.fragments.fragments(),
            content_length: self.content_length(),
            mime_type: self.metadata.as_ref().map(|m| m.mime_type.clone()),
            cached_bytes: self.cached_bytes(),
            progress: self.progress(),
            download_speed_kbps: self.download_speed_kbps(),
        }
    }
}

/// Sidecar path for a cache payload file: `<file>.metadata`.
pub(crate) fn sidecar_path(file_path: &Path) -> PathBuf {
    let mut os = file_path.as_os_str().to_owned();
    os.push(SIDECAR_SUFFIX);
    PathBuf::from(os)
}
