#![forbid(unsafe_code)]

use std::{path::PathBuf, sync::Arc, time::Duration};

use mediacache_net::NetOptions;
use sha2::{Digest, Sha256};
use url::Url;

/// Maps a resource URL to its cache file name inside the cache directory.
pub type NamingRule = Arc<dyn Fn(&Url) -> String + Send + Sync>;

/// Default cache file naming rule: truncated SHA-256 of the URL string, plus
/// the URL's path extension when it has one.
#[must_use]
pub fn default_naming_rule(url: &Url) -> String {
    let mut hasher = Sha256::new();
    hasher.update(url.as_str().as_bytes());
    let digest = hasher.finalize();
    let name = hex::encode(&digest[..16]);

    match path_extension(url) {
        Some(ext) => format!("{name}.{ext}"),
        None => name,
    }
}

fn path_extension(url: &Url) -> Option<String> {
    let last = url.path_segments()?.next_back()?;
    let (stem, ext) = last.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

/// Configuration for the cache layer.
#[derive(Clone)]
pub struct CacheOptions {
    /// Directory holding cache payload files and their metadata sidecars.
    pub cache_dir: PathBuf,
    /// Minimum interval between `Updated` events for one resource.
    /// Completion always notifies regardless.
    pub notify_interval: Duration,
    /// Minimum interval between metadata sidecar writes (save debouncing).
    pub save_interval: Duration,
    /// Maximum size of one local-read action; larger cached runs are split.
    pub package_size: u64,
    /// Network chunks below this size are buffered before write/forward.
    pub buffer_threshold: usize,
    /// Event bus channel capacity.
    pub event_channel_capacity: usize,
    /// Network configuration.
    pub net: NetOptions,
    /// Cache file naming rule.
    pub naming_rule: NamingRule,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            cache_dir: std::env::temp_dir().join("mediacache"),
            notify_interval: Duration::from_millis(100),
            save_interval: Duration::from_secs(1),
            package_size: 512 * 1024,
            buffer_threshold: 10 * 1024,
            event_channel_capacity: 16,
            net: NetOptions::default(),
            naming_rule: Arc::new(default_naming_rule),
        }
    }
}

impl CacheOptions {
    /// Create options rooted at the given cache directory.
    pub fn new<P: Into<PathBuf>>(cache_dir: P) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_notify_interval(mut self, interval: Duration) -> Self {
        self.notify_interval = interval;
        self
    }

    #[must_use]
    pub fn with_save_interval(mut self, interval: Duration) -> Self {
        self.save_interval = interval;
        self
    }

    #[must_use]
    pub fn with_package_size(mut self, size: u64) -> Self {
        self.package_size = size.max(1);
        self
    }

    #[must_use]
    pub fn with_net(mut self, net: NetOptions) -> Self {
        self.net = net;
        self
    }

    /// Replace the cache file naming rule.
    #[must_use]
    pub fn with_naming_rule(mut self, rule: NamingRule) -> Self {
        self.naming_rule = rule;
        self
    }

    /// Cache payload path for `url` under this configuration.
    #[must_use]
    pub fn cache_file_path(&self, url: &Url) -> PathBuf {
        self.cache_dir.join((self.naming_rule)(url))
    }
}

impl std::fmt::Debug for CacheOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheOptions")
            .field("cache_dir", &self.cache_dir)
            .field("notify_interval", &self.notify_interval)
            .field("save_interval", &self.save_interval)
            .field("package_size", &self.package_size)
            .field("buffer_threshold", &self.buffer_threshold)
            .field("net", &self.net)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn naming_rule_is_stable_and_keeps_extension() {
        let url = Url::parse("https://example.com/videos/clip.MP4?tok=1").unwrap();
        let a = default_naming_rule(&url);
        let b = default_naming_rule(&url);
        assert_eq!(a, b);
        assert!(a.ends_with(".mp4"));
    }

    #[test]
    fn naming_rule_differs_per_url() {
        let a = default_naming_rule(&Url::parse("https://example.com/a.mp4").unwrap());
        let b = default_naming_rule(&Url::parse("https://example.com/b.mp4").unwrap());
        assert_ne!(a, b);
    }

    #[test]
    fn naming_rule_without_extension() {
        let url = Url::parse("https://example.com/stream").unwrap();
        let name = default_naming_rule(&url);
        assert!(!name.contains('.'));
    }

    #[test]
    fn custom_naming_rule_is_applied() {
        let opts = CacheOptions::new("/tmp/cache")
            .with_naming_rule(Arc::new(|_url: &Url| "fixed.bin".to_string()));
        let url = Url::parse("https://example.com/a.mp4").unwrap();
        assert_eq!(
            opts.cache_file_path(&url),
            PathBuf::from("/tmp/cache/fixed.bin")
        );
    }
}
