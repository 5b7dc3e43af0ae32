#![forbid(unsafe_code)]

//! Sequential execution of one action list.
//!
//! An [`ActionExecutor`] works through its actions strictly in order, so the
//! consumer sees one contiguous byte stream: local reads come straight from
//! the cache file, remote actions each issue a single ranged GET whose bytes
//! are written into the cache as they arrive and forwarded on.

use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use mediacache_net::{HttpClient, NetError, RangeSpec};
use std::{ops::Range, sync::Arc};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};
use url::Url;

use crate::{
    config::ContentMetadata,
    error::{CacheError, CacheResult},
    planner::{ActionKind, CacheAction},
    worker::CacheFileWorker,
};

/// Data flowing from an executor to its consumer.
#[derive(Clone, Debug)]
pub enum FetchEvent {
    /// Content metadata became known (first response headers).
    ContentInfo(ContentMetadata),
    /// A chunk of the requested range, in ascending offset order.
    Data {
        offset: u64,
        bytes: Bytes,
        is_local: bool,
    },
}

/// MIME guard: only media-ish payloads are cached. Redirects to HTML error
/// pages must not end up in the cache file.
fn is_cacheable_mime(mime: &str) -> bool {
    mime.starts_with("video/") || mime.starts_with("audio/") || mime.starts_with("application/")
}

/// Parses the first position out of `bytes 4-11/16`.
fn content_range_start(value: &str) -> Option<u64> {
    value
        .strip_prefix("bytes ")?
        .split_once('-')?
        .0
        .trim()
        .parse()
        .ok()
}

pub(crate) struct ActionExecutor {
    url: Url,
    actions: Vec<CacheAction>,
    worker: Arc<CacheFileWorker>,
    client: HttpClient,
    cancel: CancellationToken,
    events: mpsc::UnboundedSender<FetchEvent>,
    /// Network chunks below this size are accumulated before write/forward.
    buffer_threshold: usize,
    /// When false, remote bytes are forwarded but not written to the cache.
    caching_enabled: bool,
}

impl ActionExecutor {
    pub(crate) fn new(
        url: Url,
        actions: Vec<CacheAction>,
        worker: Arc<CacheFileWorker>,
        client: HttpClient,
        cancel: CancellationToken,
        events: mpsc::UnboundedSender<FetchEvent>,
        buffer_threshold: usize,
        caching_enabled: bool,
    ) -> Self {
        Self {
            url,
            actions,
            worker,
            client,
            cancel,
            events,
            buffer_threshold,
            caching_enabled,
        }
    }

    /// Run every action in order. Halts on the first error; the remaining
    /// actions are abandoned (the caller re-requests with a fresh plan).
    pub(crate) async fn run(self) -> CacheResult<()> {
        debug!(url = %self.url, actions = self.actions.len(), "executing action list");
        for action in self.actions.clone() {
            if self.cancel.is_cancelled() {
                return Err(CacheError::Cancelled);
            }
            match action.kind {
                ActionKind::Local => self.run_local(action.range)?,
                ActionKind::Remote => self.run_remote(action.range).await?,
            }
        }
        self.worker.save()?;
        Ok(())
    }

    fn run_local(&self, range: Range<u64>) -> CacheResult<()> {
        trace!(url = %self.url, ?range, "local read");
        let data = self.worker.cached_data(range.clone())?;
        self.send(FetchEvent::Data {
            offset: range.start,
            bytes: Bytes::from(data),
            is_local: true,
        })
    }

    async fn run_remote(&self, range: Range<u64>) -> CacheResult<()> {
        trace!(url = %self.url, ?range, "remote fetch");
        let resp = self
            .client
            .get_range(self.url.clone(), RangeSpec::from_range(&range), None)
            .await?;

        if let Some(mime) = resp.info.mime_type.as_deref() {
            if !is_cacheable_mime(mime) {
                warn!(url = %self.url, mime, "rejecting non-media response");
                return Err(CacheError::UnsupportedMime(mime.to_string()));
            }
        }

        if self.worker.content_info().is_none() {
            let metadata = ContentMetadata::from_response(&resp.info);
            self.worker.set_content_info(metadata.clone())?;
            self.send(FetchEvent::ContentInfo(metadata))?;
        }

        // A 200 full-body reply starts at byte 0 of the resource no matter
        // what range was asked for; the prefix must be discarded before any
        // byte is cached or forwarded. A 206 must start where we asked.
        let skip = match resp.info.content_range.as_deref() {
            None => range.start,
            Some(raw) => match content_range_start(raw) {
                Some(start) if start == range.start => 0,
                Some(start) => {
                    return Err(CacheError::Net(NetError::http(format!(
                        "misaligned Content-Range: response starts at {start}, requested {}",
                        range.start
                    ))));
                }
                None => 0,
            },
        };

        self.worker.start_writing();
        let result = self.stream_remote(range, resp.stream, skip).await;
        self.worker.finish_writing();
        result
    }

    async fn stream_remote(
        &self,
        range: Range<u64>,
        mut stream: mediacache_net::ByteStream,
        mut skip: u64,
    ) -> CacheResult<()> {
        let mut buf = BytesMut::new();
        // Next byte offset to write/deliver.
        let mut offset = range.start;

        loop {
            let pending = offset + buf.len() as u64;
            if pending >= range.end {
                break;
            }

            tokio::select! {
                biased;

                () = self.cancel.cancelled() => {
                    debug!(url = %self.url, offset, "remote fetch cancelled");
                    return Err(CacheError::Cancelled);
                }

                next = stream.next() => {
                    let Some(next) = next else { break };
                    let mut chunk = next.map_err(CacheError::Net)?;

                    // Body bytes before the requested start.
                    if skip > 0 {
                        if (chunk.len() as u64) <= skip {
                            skip -= chunk.len() as u64;
                            continue;
                        }
                        chunk = chunk.slice(skip as usize..);
                        skip = 0;
                    }
                    if chunk.is_empty() {
                        continue;
                    }

                    // Clamp to the requested span; servers ignoring the Range
                    // header reply with more than we asked for.
                    let want = (range.end - pending) as usize;
                    buf.extend_from_slice(&chunk[..chunk.len().min(want)]);

                    if buf.len() >= self.buffer_threshold {
                        self.deliver(&mut buf, &mut offset)?;
                    }
                }
            }
        }

        // Flush whatever is left regardless of size.
        self.deliver(&mut buf, &mut offset)?;

        if offset < range.end {
            return Err(CacheError::Net(NetError::http(format!(
                "short response body: got {} of {} bytes",
                offset - range.start,
                range.end - range.start
            ))));
        }
        Ok(())
    }

    /// Write the buffered bytes into the cache and forward them downstream.
    fn deliver(&self, buf: &mut BytesMut, offset: &mut u64) -> CacheResult<()> {
        if buf.is_empty() {
            return Ok(());
        }
        let bytes = buf.split().freeze();
        if self.caching_enabled {
            self.worker.cache_data(*offset, &bytes)?;
        }
        self.send(FetchEvent::Data {
            offset: *offset,
            bytes: bytes.clone(),
            is_local: false,
        })?;
        *offset += bytes.len() as u64;
        Ok(())
    }

    /// A dropped receiver means the request went away; treat as cancellation.
    fn send(&self, event: FetchEvent) -> CacheResult<()> {
        self.events.send(event).map_err(|_| CacheError::Cancelled)
    }
}
