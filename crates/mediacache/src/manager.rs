#![forbid(unsafe_code)]

//! Top-level entry point: asset URL wrapping, loader lookup, and cache
//! maintenance (size accounting, deletion, importing local files).

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::Arc,
};

use mediacache_events::{CacheEvent, EventBus};
use mediacache_net::HttpClient;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use url::Url;

use crate::{
    config::{sidecar_path, CacheConfiguration, ContentMetadata},
    downloader::ActiveDownloads,
    error::{CacheError, CacheResult},
    loader::{DataRequest, Loader, RequestHandle},
    options::CacheOptions,
};

/// Scheme prefix distinguishing cache-routed asset URLs from plain ones.
pub const ASSET_URL_PREFIX: &str = "mediacache:";

/// Owns the loaders for every resource being streamed and the cache
/// directory they share.
pub struct LoaderManager {
    options: CacheOptions,
    client: HttpClient,
    bus: EventBus,
    active: Arc<ActiveDownloads>,
    loaders: Mutex<HashMap<String, Arc<Loader>>>,
}

impl LoaderManager {
    /// # Errors
    ///
    /// [`CacheError::Setup`] when the cache directory cannot be created.
    pub fn new(options: CacheOptions) -> CacheResult<Self> {
        std::fs::create_dir_all(&options.cache_dir).map_err(|e| {
            CacheError::Setup(format!("create {}: {e}", options.cache_dir.display()))
        })?;
        let client = HttpClient::new(&options.net);
        let bus = EventBus::new(options.event_channel_capacity);
        info!(cache_dir = %options.cache_dir.display(), "cache manager ready");
        Ok(Self {
            options,
            client,
            bus,
            active: ActiveDownloads::new(),
            loaders: Mutex::new(HashMap::new()),
        })
    }

    /// Wrap a resource URL into an asset URL that routes through the cache.
    /// `file:` URLs pass through untouched — local files need no caching.
    #[must_use]
    pub fn asset_url(&self, url: &Url) -> Url {
        if url.scheme() == "file" {
            return url.clone();
        }
        // A scheme prefix on a valid URL string reparses cleanly.
        Url::parse(&format!("{ASSET_URL_PREFIX}{url}"))
            .unwrap_or_else(|_| url.clone())
    }

    /// Recover the original resource URL from an asset URL.
    pub fn resource_url(&self, asset_url: &Url) -> CacheResult<Url> {
        let raw = asset_url
            .as_str()
            .strip_prefix(ASSET_URL_PREFIX)
            .ok_or_else(|| CacheError::InvalidAssetUrl(asset_url.to_string()))?;
        Url::parse(raw).map_err(|_| CacheError::InvalidAssetUrl(asset_url.to_string()))
    }

    /// Submit a byte-range request for an asset URL.
    pub fn load(&self, asset_url: &Url, request: DataRequest) -> CacheResult<RequestHandle> {
        let url = self.resource_url(asset_url)?;
        Ok(self.loader(&url)?.request(request))
    }

    /// Fetch the whole resource into the cache (a 2-byte probe, then the
    /// rest). The returned handle observes progress like any other request.
    pub fn download_all(&self, asset_url: &Url) -> CacheResult<RequestHandle> {
        self.load(asset_url, DataRequest::to_end(0))
    }

    /// Cancel one request by id. Returns whether it was still in flight.
    pub fn cancel(&self, asset_url: &Url, request_id: u64) -> CacheResult<bool> {
        let url = self.resource_url(asset_url)?;
        Ok(self
            .loaders
            .lock()
            .get(url.as_str())
            .is_some_and(|loader| loader.cancel_request(request_id)))
    }

    /// Cancel every request for a resource and drop its loader.
    pub fn cancel_loader(&self, asset_url: &Url) -> CacheResult<()> {
        let url = self.resource_url(asset_url)?;
        if let Some(loader) = self.loaders.lock().remove(url.as_str()) {
            loader.cancel_all();
        }
        Ok(())
    }

    /// Subscribe to cache progress and completion events.
    #[must_use]
    pub fn events(&self) -> broadcast::Receiver<CacheEvent> {
        self.bus.subscribe()
    }

    /// Cache payload path for `url` under the current options.
    #[must_use]
    pub fn cache_file_path(&self, url: &Url) -> PathBuf {
        self.options.cache_file_path(url)
    }

    /// Total bytes of cached payloads on disk (metadata sidecars excluded).
    pub fn total_cache_size(&self) -> CacheResult<u64> {
        let mut total = 0;
        for entry in std::fs::read_dir(&self.options.cache_dir)? {
            let entry = entry?;
            if is_payload_name(&entry.file_name().to_string_lossy()) {
                total += entry.metadata()?.len();
            }
        }
        Ok(total)
    }

    /// Delete every cached resource that is not currently downloading.
    ///
    /// # Errors
    ///
    /// [`CacheError::Busy`] when at least one resource was skipped because a
    /// download holds it; everything else has still been deleted.
    pub fn delete_all_caches(&self) -> CacheResult<()> {
        let busy_files: HashMap<PathBuf, String> = self
            .active
            .active_urls()
            .into_iter()
            .filter_map(|raw| {
                let url = Url::parse(&raw).ok()?;
                Some((self.options.cache_file_path(&url), raw))
            })
            .collect();
        let mut first_busy: Option<String> = None;

        for entry in std::fs::read_dir(&self.options.cache_dir)? {
            let entry = entry?;
            let path = entry.path();
            if !is_payload_name(&entry.file_name().to_string_lossy()) {
                continue;
            }
            if let Some(url) = busy_files.get(&path) {
                warn!(%url, path = %path.display(), "skipping busy cache file");
                first_busy.get_or_insert_with(|| url.clone());
                continue;
            }
            remove_if_exists(&path)?;
            remove_if_exists(&sidecar_path(&path))?;
        }
        self.loaders
            .lock()
            .retain(|url, _| self.active.is_active(url));

        match first_busy {
            Some(url) => Err(CacheError::Busy { url }),
            None => Ok(()),
        }
    }

    /// Delete one resource's cache file and metadata.
    pub fn delete_cache(&self, url: &Url) -> CacheResult<()> {
        if self.active.is_active(url.as_str()) {
            return Err(CacheError::Busy {
                url: url.to_string(),
            });
        }
        self.loaders.lock().remove(url.as_str());

        let path = self.options.cache_file_path(url);
        debug!(%url, path = %path.display(), "deleting cache");
        remove_if_exists(&path)?;
        remove_if_exists(&sidecar_path(&path))?;
        Ok(())
    }

    /// Install a local file as the complete cached copy of `url`. Replaces
    /// any partial cache for that resource.
    pub fn import_file(&self, url: &Url, source: &Path) -> CacheResult<()> {
        if self.active.is_active(url.as_str()) {
            return Err(CacheError::Busy {
                url: url.to_string(),
            });
        }
        self.loaders.lock().remove(url.as_str());

        let path = self.options.cache_file_path(url);
        remove_if_exists(&path)?;
        remove_if_exists(&sidecar_path(&path))?;

        let size = std::fs::copy(source, &path)?;

        let mut config =
            CacheConfiguration::load(&path, url.to_string(), self.options.save_interval);
        config.set_content_info(ContentMetadata::for_import(mime_for_path(source), size));
        config.add_fragment(0..size);
        config.save_now()?;
        info!(%url, size, "imported local file into cache");
        Ok(())
    }
}

impl std::fmt::Debug for LoaderManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoaderManager")
            .field("cache_dir", &self.options.cache_dir)
            .finish_non_exhaustive()
    }
}

impl LoaderManager {
    fn loader(&self, url: &Url) -> CacheResult<Arc<Loader>> {
        let mut loaders = self.loaders.lock();
        // Idle loaders hold nothing worth keeping; their state is on disk.
        loaders.retain(|key, loader| key.as_str() == url.as_str() || loader.pending_count() > 0);
        if let Some(loader) = loaders.get(url.as_str()) {
            return Ok(Arc::clone(loader));
        }
        let loader = Loader::open(
            url.clone(),
            self.client.clone(),
            Arc::clone(&self.active),
            self.bus.clone(),
            self.options.clone(),
        )?;
        loaders.insert(url.as_str().to_string(), Arc::clone(&loader));
        Ok(loader)
    }
}

/// Payload files are everything that is not a metadata sidecar or an
/// in-progress sidecar temp file.
fn is_payload_name(name: &str) -> bool {
    !name.ends_with(".metadata") && !name.ends_with(".metadata.tmp")
}

fn remove_if_exists(path: &Path) -> CacheResult<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// MIME type for an imported file, from its extension.
fn mime_for_path(path: &Path) -> String {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "mp4" | "m4v" | "mov" => "video/mp4",
        "webm" => "video/webm",
        "mp3" => "audio/mpeg",
        "m4a" => "audio/mp4",
        "wav" => "audio/wav",
        "flac" => "audio/flac",
        "ogg" | "oga" => "audio/ogg",
        _ => "application/octet-stream",
    }
    .to_string()
}
