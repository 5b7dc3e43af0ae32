#![forbid(unsafe_code)]

//! Download orchestration for one resource.
//!
//! A [`Downloader`] turns "give me this byte span" calls into planned action
//! lists and runs one [`ActionExecutor`](crate::executor::ActionExecutor) per
//! call. While any download is in flight the resource URL is held in the
//! shared [`ActiveDownloads`] registry so maintenance code refuses to delete
//! its cache files out from under it.

use std::{collections::HashMap, sync::Arc};

use mediacache_events::{CacheEvent, EventBus};
use mediacache_net::HttpClient;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use url::Url;

use crate::{
    error::{CacheError, CacheResult},
    executor::{ActionExecutor, FetchEvent},
    options::CacheOptions,
    worker::CacheFileWorker,
};

/// Probe size used by [`Downloader::download_all`] to learn content metadata
/// cheaply before fetching the body.
const PROBE_LEN: u64 = 2;

/// Registry of resource URLs with downloads in flight.
///
/// Injected (constructor parameter) into every component that needs it; the
/// cache-maintenance routines consult it before deleting files. Entries are
/// reference-counted so concurrent downloads of one resource keep it busy
/// until the last one ends.
#[derive(Debug, Default)]
pub struct ActiveDownloads {
    inner: Mutex<HashMap<String, usize>>,
}

impl ActiveDownloads {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Mark `url` as downloading for the lifetime of the returned guard.
    #[must_use]
    pub fn register(self: &Arc<Self>, url: &str) -> DownloadGuard {
        *self.inner.lock().entry(url.to_string()).or_insert(0) += 1;
        DownloadGuard {
            registry: Arc::clone(self),
            url: url.to_string(),
        }
    }

    #[must_use]
    pub fn is_active(&self, url: &str) -> bool {
        self.inner.lock().contains_key(url)
    }

    /// URLs currently downloading.
    pub fn active_urls(&self) -> Vec<String> {
        self.inner.lock().keys().cloned().collect()
    }

    fn release(&self, url: &str) {
        let mut inner = self.inner.lock();
        if let Some(count) = inner.get_mut(url) {
            *count -= 1;
            if *count == 0 {
                inner.remove(url);
            }
        }
    }
}

/// RAII registration of one in-flight download.
#[derive(Debug)]
pub struct DownloadGuard {
    registry: Arc<ActiveDownloads>,
    url: String,
}

impl Drop for DownloadGuard {
    fn drop(&mut self) {
        self.registry.release(&self.url);
    }
}

/// Orchestrates downloads for one resource.
pub struct Downloader {
    url: Url,
    worker: Arc<CacheFileWorker>,
    client: HttpClient,
    registry: Arc<ActiveDownloads>,
    bus: EventBus,
    cancel: CancellationToken,
    package_size: u64,
    buffer_threshold: usize,
    /// When false, fetched bytes are forwarded to the consumer but never
    /// written to the cache file (concurrent reader of a resource that
    /// already has a writer).
    caching_enabled: bool,
}

impl Downloader {
    /// Most callers go through [`LoaderManager`](crate::LoaderManager); this
    /// is the building block for driving a single resource directly.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        url: Url,
        worker: Arc<CacheFileWorker>,
        client: HttpClient,
        registry: Arc<ActiveDownloads>,
        bus: EventBus,
        options: &CacheOptions,
        cancel: CancellationToken,
        caching_enabled: bool,
    ) -> Self {
        Self {
            url,
            worker,
            client,
            registry,
            bus,
            cancel,
            package_size: options.package_size,
            buffer_threshold: options.buffer_threshold,
            caching_enabled,
        }
    }

    #[must_use]
    pub fn worker(&self) -> &Arc<CacheFileWorker> {
        &self.worker
    }

    /// Cancel the in-flight action list. Subsequent calls are no-ops.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Download `[offset, offset + length)` — or `[offset, content_length)`
    /// when `to_end` is set.
    pub async fn download_range(
        &self,
        offset: u64,
        length: u64,
        to_end: bool,
        events: &mpsc::UnboundedSender<FetchEvent>,
    ) -> CacheResult<()> {
        let _guard = self.registry.register(self.worker.url());

        let result = if to_end {
            self.execute_to_end(offset, events).await
        } else {
            self.execute(offset..offset.saturating_add(length), events).await
        };
        self.notify_finished(&result);
        result
    }

    /// Download the entire resource: a 2-byte probe first (to learn the total
    /// length and MIME type cheaply), then the remainder to the end.
    pub async fn download_all(
        &self,
        events: &mpsc::UnboundedSender<FetchEvent>,
    ) -> CacheResult<()> {
        let _guard = self.registry.register(self.worker.url());

        let result = self.execute_to_end(0, events).await;
        self.notify_finished(&result);
        result
    }

    async fn execute_to_end(
        &self,
        offset: u64,
        events: &mpsc::UnboundedSender<FetchEvent>,
    ) -> CacheResult<()> {
        let mut total = self.worker.content_info().map_or(0, |m| m.content_length);
        let mut pos = offset;

        // Unknown length: probe a couple of bytes so the ranged response's
        // Content-Range tells us the total.
        if total == 0 {
            pos = offset.saturating_add(PROBE_LEN);
            self.execute(offset..pos, events).await?;
            total = self.worker.content_info().map_or(0, |m| m.content_length);
            if total == 0 {
                return Err(CacheError::ContentLengthUnknown(self.url.to_string()));
            }
        }

        if total > pos {
            self.execute(pos..total, events).await?;
        }
        Ok(())
    }

    async fn execute(
        &self,
        range: std::ops::Range<u64>,
        events: &mpsc::UnboundedSender<FetchEvent>,
    ) -> CacheResult<()> {
        let actions = self.worker.plan(range.clone(), self.package_size);
        debug!(url = %self.url, ?range, actions = actions.len(), "download planned");

        ActionExecutor::new(
            self.url.clone(),
            actions,
            Arc::clone(&self.worker),
            self.client.clone(),
            self.cancel.clone(),
            events.clone(),
            self.buffer_threshold,
            self.caching_enabled,
        )
        .run()
        .await
    }

    /// Publish the terminal notification. Cancellation is benign and never
    /// reported as a failure.
    fn notify_finished(&self, result: &CacheResult<()>) {
        match result {
            Ok(()) => {
                let _ = self.worker.save_now();
                self.bus.publish(CacheEvent::Finished {
                    url: self.worker.url().to_string(),
                    error: None,
                });
            }
            Err(e) if e.is_cancelled() => {}
            Err(e) => self.bus.publish(CacheEvent::Finished {
                url: self.worker.url().to_string(),
                error: Some(e.to_string()),
            }),
        }
    }
}

impl std::fmt::Debug for Downloader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Downloader")
            .field("url", &self.url.as_str())
            .finish_non_exhaustive()
    }
}
