#![forbid(unsafe_code)]

//! Per-resource request multiplexing.
//!
//! A [`Loader`] owns the cache file worker for one resource and serves any
//! number of concurrent byte-range requests against it. Each request gets its
//! own [`Downloader`] task and event channel; the first request in flight is
//! the resource's writer (its downloaded bytes go into the cache file), later
//! concurrent requests stream without writing so the file only ever has one
//! writer at a time.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
};

use bytes::Bytes;
use mediacache_events::EventBus;
use mediacache_net::HttpClient;
use parking_lot::Mutex;
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};
use url::Url;

use crate::{
    config::ContentMetadata,
    downloader::{ActiveDownloads, Downloader},
    error::{CacheError, CacheResult},
    executor::FetchEvent,
    options::CacheOptions,
    worker::CacheFileWorker,
};

/// One byte-range loading request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DataRequest {
    pub offset: u64,
    pub length: u64,
    /// Request everything from `offset` to the end of the resource; `length`
    /// is ignored. Requires content metadata to be known (or discoverable).
    pub to_end: bool,
}

impl DataRequest {
    #[must_use]
    pub fn new(offset: u64, length: u64) -> Self {
        Self {
            offset,
            length,
            to_end: false,
        }
    }

    /// Everything from `offset` to the end of the resource.
    #[must_use]
    pub fn to_end(offset: u64) -> Self {
        Self {
            offset,
            length: 0,
            to_end: true,
        }
    }
}

/// Events delivered to the party that submitted a [`DataRequest`].
#[derive(Debug)]
pub enum LoadEvent {
    /// Content metadata, sent before any data once it is known.
    ContentInfo(ContentMetadata),
    /// A chunk of the requested range, ascending and contiguous.
    Data {
        offset: u64,
        bytes: Bytes,
        is_local: bool,
    },
    /// Terminal event; the channel closes after this. Cancellation finishes
    /// with the distinguished [`CacheError::Cancelled`], checkable via
    /// [`CacheError::is_cancelled`] — benign, never a playback failure.
    Finished(CacheResult<()>),
}

/// Consumer side of one in-flight request.
#[derive(Debug)]
pub struct RequestHandle {
    id: u64,
    events: mpsc::UnboundedReceiver<LoadEvent>,
    cancel: CancellationToken,
}

impl RequestHandle {
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Next event, or `None` once the request has fully finished.
    pub async fn recv(&mut self) -> Option<LoadEvent> {
        self.events.recv().await
    }

    /// Cancel this request. The handle still receives a terminal
    /// `Finished(Err(Cancelled))`.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

struct RequestEntry {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Serves byte-range requests for one resource.
pub struct Loader {
    url: Url,
    worker: Arc<CacheFileWorker>,
    client: HttpClient,
    registry: Arc<ActiveDownloads>,
    bus: EventBus,
    options: CacheOptions,
    requests: Mutex<HashMap<u64, RequestEntry>>,
    next_id: AtomicU64,
    /// Set while a caching (writer) request is in flight.
    writer_busy: Arc<AtomicBool>,
}

impl Loader {
    /// Open the loader (and its cache file worker) for one resource.
    pub fn open(
        url: Url,
        client: HttpClient,
        registry: Arc<ActiveDownloads>,
        bus: EventBus,
        options: CacheOptions,
    ) -> CacheResult<Arc<Self>> {
        let path = options.cache_file_path(&url);
        let worker = CacheFileWorker::open(&url, &path, bus.clone(), &options)?;
        Ok(Arc::new(Self {
            url,
            worker,
            client,
            registry,
            bus,
            options,
            requests: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            writer_busy: Arc::new(AtomicBool::new(false)),
        }))
    }

    #[must_use]
    pub fn url(&self) -> &Url {
        &self.url
    }

    #[must_use]
    pub fn worker(&self) -> &Arc<CacheFileWorker> {
        &self.worker
    }

    /// Submit a request; events arrive on the returned handle.
    pub fn request(self: &Arc<Self>, request: DataRequest) -> RequestHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let cancel = CancellationToken::new();

        // First request in flight becomes the writer; the rest only stream.
        let is_writer = !self.writer_busy.swap(true, Ordering::AcqRel);
        debug!(url = %self.url, id, is_writer, ?request, "loading request");

        let downloader = Downloader::new(
            self.url.clone(),
            Arc::clone(&self.worker),
            self.client.clone(),
            Arc::clone(&self.registry),
            self.bus.clone(),
            &self.options,
            cancel.clone(),
            is_writer,
        );

        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run_request(
            request,
            downloader,
            tx,
            is_writer.then(|| Arc::clone(&self.writer_busy)),
        ));

        let mut requests = self.requests.lock();
        requests.retain(|_, entry| !entry.task.is_finished());
        requests.insert(
            id,
            RequestEntry {
                cancel: cancel.clone(),
                task,
            },
        );

        RequestHandle {
            id,
            events: rx,
            cancel,
        }
    }

    /// Cancel one request by id. Returns whether it was still known.
    pub fn cancel_request(&self, id: u64) -> bool {
        let requests = self.requests.lock();
        match requests.get(&id) {
            Some(entry) => {
                entry.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel every in-flight request for this resource.
    pub fn cancel_all(&self) {
        for entry in self.requests.lock().values() {
            entry.cancel.cancel();
        }
    }

    /// Number of requests not yet finished.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        let mut requests = self.requests.lock();
        requests.retain(|_, entry| !entry.task.is_finished());
        requests.len()
    }
}

impl std::fmt::Debug for Loader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Loader")
            .field("url", &self.url.as_str())
            .finish_non_exhaustive()
    }
}

/// Drive one request to completion, forwarding fetch events to the handle.
async fn run_request(
    request: DataRequest,
    downloader: Downloader,
    tx: mpsc::UnboundedSender<LoadEvent>,
    writer_slot: Option<Arc<AtomicBool>>,
) {
    // Metadata known from a previous session goes out before any data.
    if let Some(metadata) = downloader.worker().content_info() {
        if tx.send(LoadEvent::ContentInfo(metadata)).is_err() {
            release_writer(&writer_slot);
            return;
        }
    }

    let (ftx, mut frx) = mpsc::unbounded_channel();
    let downloader = Arc::new(downloader);
    let dl = {
        let downloader = Arc::clone(&downloader);
        tokio::spawn(async move {
            if request.to_end && request.offset == 0 {
                downloader.download_all(&ftx).await
            } else {
                downloader
                    .download_range(request.offset, request.length, request.to_end, &ftx)
                    .await
            }
        })
    };

    // ftx lives only inside the download task, so this loop ends when the
    // download does.
    while let Some(event) = frx.recv().await {
        let forwarded = match event {
            FetchEvent::ContentInfo(metadata) => tx.send(LoadEvent::ContentInfo(metadata)),
            FetchEvent::Data {
                offset,
                bytes,
                is_local,
            } => {
                trace!(offset, len = bytes.len(), is_local, "forwarding chunk");
                tx.send(LoadEvent::Data {
                    offset,
                    bytes,
                    is_local,
                })
            }
        };
        if forwarded.is_err() {
            // Handle dropped; stop the download and drain.
            downloader.cancel();
        }
    }

    let result = match dl.await {
        Ok(result) => result,
        Err(_) => Err(CacheError::Cancelled),
    };
    release_writer(&writer_slot);
    let _ = tx.send(LoadEvent::Finished(result));
}

fn release_writer(slot: &Option<Arc<AtomicBool>>) {
    if let Some(slot) = slot {
        slot.store(false, Ordering::Release);
    }
}
