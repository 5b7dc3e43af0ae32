#![forbid(unsafe_code)]

//! Per-resource cache file worker.
//!
//! One `CacheFileWorker` exists per cached resource and is shared (via `Arc`)
//! by every concurrent request streaming that resource. It pairs the payload
//! file with its [`CacheConfiguration`] under one lock: a range is recorded in
//! the fragment store only after its bytes hit the file, so the store never
//! claims bytes that are not actually on disk.

use std::{
    ops::Range,
    path::Path,
    sync::Arc,
    time::{Duration, Instant},
};

use mediacache_events::{CacheEvent, CacheSnapshot, EventBus};
use parking_lot::Mutex;
use tracing::debug;
use url::Url;

use crate::{
    config::{CacheConfiguration, ContentMetadata},
    error::{CacheError, CacheResult},
    options::CacheOptions,
    planner::{CacheAction, plan_actions},
};
use mediacache_storage::RandomAccessFile;

/// Timing bracket around one network write session.
struct WriteSession {
    started: Instant,
    bytes: u64,
}

struct WorkerState {
    config: CacheConfiguration,
    session: Option<WriteSession>,
    last_notified: Option<Instant>,
}

/// Read/write access to one resource's cache file and metadata.
pub struct CacheFileWorker {
    file: RandomAccessFile,
    state: Mutex<WorkerState>,
    bus: EventBus,
    notify_interval: Duration,
    url: String,
}

impl CacheFileWorker {
    /// Open (or create) the cache file and its sidecar for `url`.
    ///
    /// # Errors
    ///
    /// [`CacheError::Setup`] when the cache directory or file cannot be
    /// created — checked here, before any I/O.
    pub fn open(
        url: &Url,
        file_path: &Path,
        bus: EventBus,
        options: &CacheOptions,
    ) -> CacheResult<Arc<Self>> {
        if let Some(parent) = file_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| CacheError::Setup(format!("create {}: {e}", parent.display())))?;
        }
        let file = RandomAccessFile::open(file_path)
            .map_err(|e| CacheError::Setup(format!("open {}: {e}", file_path.display())))?;

        let config =
            CacheConfiguration::load(file_path, url.to_string(), options.save_interval);
        debug!(%url, path = %file_path.display(), cached = config.cached_bytes(), "cache file opened");

        Ok(Arc::new(Self {
            file,
            state: Mutex::new(WorkerState {
                config,
                session: None,
                last_notified: None,
            }),
            bus,
            notify_interval: options.notify_interval,
            url: url.to_string(),
        }))
    }

    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    #[must_use]
    pub fn content_info(&self) -> Option<ContentMetadata> {
        self.state.lock().config.content_info().cloned()
    }

    /// Store content metadata (first writer wins) and size the cache file to
    /// the total content length so later writes at arbitrary offsets land
    /// inside the file.
    pub fn set_content_info(&self, metadata: ContentMetadata) -> CacheResult<()> {
        let applied = {
            let mut state = self.state.lock();
            let applied = state.config.set_content_info(metadata.clone());
            if applied {
                state.config.save()?;
            }
            applied
        };
        if applied && metadata.content_length > 0 {
            self.file.set_len(metadata.content_length)?;
        }
        Ok(())
    }

    /// Write a downloaded range into the cache file and record its fragment.
    ///
    /// The fragment is added only after the write succeeds; a failed write
    /// leaves the fragment store untouched.
    pub fn cache_data(&self, offset: u64, data: &[u8]) -> CacheResult<()> {
        if data.is_empty() {
            return Ok(());
        }
        self.file.write_at(offset, data)?;

        let mut state = self.state.lock();
        state.config.add_fragment(offset..offset + data.len() as u64);
        if let Some(session) = state.session.as_mut() {
            session.bytes += data.len() as u64;
        }
        state.config.save()?;
        self.notify_updated(&mut state, false);
        Ok(())
    }

    /// Read a cached range back.
    pub fn cached_data(&self, range: Range<u64>) -> CacheResult<Vec<u8>> {
        Ok(self.file.read_exact_at(range)?)
    }

    /// Split `range` into local/remote actions against the current fragments.
    #[must_use]
    pub fn plan(&self, range: Range<u64>, package_size: u64) -> Vec<CacheAction> {
        plan_actions(range, self.state.lock().config.fragment_store(), package_size)
    }

    /// Begin a network write session (throughput accounting).
    pub fn start_writing(&self) {
        self.state.lock().session = Some(WriteSession {
            started: Instant::now(),
            bytes: 0,
        });
    }

    /// End the current write session, folding its byte count and elapsed time
    /// into the download statistics.
    pub fn finish_writing(&self) {
        let mut state = self.state.lock();
        if let Some(session) = state.session.take() {
            let elapsed = session.started.elapsed();
            state.config.add_downloaded(session.bytes, elapsed);
            let _ = state.config.save();
        }
    }

    /// Flush the file handle and trigger a debounced sidecar save.
    pub fn save(&self) -> CacheResult<()> {
        self.file.flush()?;
        self.state.lock().config.save()?;
        Ok(())
    }

    /// Flush everything unconditionally and emit a final `Updated` event.
    pub fn save_now(&self) -> CacheResult<()> {
        self.file.flush()?;
        let mut state = self.state.lock();
        state.config.save_now()?;
        self.notify_updated(&mut state, true);
        Ok(())
    }

    #[must_use]
    pub fn snapshot(&self) -> CacheSnapshot {
        self.state.lock().config.snapshot()
    }

    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.state.lock().config.is_complete()
    }

    /// Rate-limited `Updated` publication; `force` bypasses the interval
    /// (used on completion).
    fn notify_updated(&self, state: &mut WorkerState, force: bool) {
        let due = force
            || state
                .last_notified
                .map_or(true, |last| last.elapsed() >= self.notify_interval);
        if !due {
            return;
        }
        state.last_notified = Some(Instant::now());
        self.bus.publish(CacheEvent::Updated {
            snapshot: state.config.snapshot(),
        });
    }
}

impl std::fmt::Debug for CacheFileWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheFileWorker")
            .field("url", &self.url)
            .finish_non_exhaustive()
    }
}
