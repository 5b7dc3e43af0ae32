#![forbid(unsafe_code)]

use std::{collections::HashMap, time::Duration};

/// Case-preserving request header map.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Headers {
    inner: HashMap<String, String>,
}

impl Headers {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: HashMap::new(),
        }
    }

    pub fn insert<K: Into<String>, V: Into<String>>(&mut self, key: K, value: V) {
        self.inner.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.inner.get(key).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.inner.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

/// Byte range for an HTTP `Range` header. `end` is inclusive, per RFC 7233.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RangeSpec {
    pub start: u64,
    pub end: Option<u64>,
}

impl RangeSpec {
    #[must_use]
    pub fn new(start: u64, end: Option<u64>) -> Self {
        Self { start, end }
    }

    #[must_use]
    pub fn from_start(start: u64) -> Self {
        Self { start, end: None }
    }

    /// Half-open `[start, end)` to an inclusive wire range.
    #[must_use]
    pub fn from_range(range: &std::ops::Range<u64>) -> Self {
        Self {
            start: range.start,
            end: Some(range.end.saturating_sub(1)),
        }
    }

    #[must_use]
    pub fn to_header_value(&self) -> String {
        match self.end {
            Some(end) => format!("bytes={}-{}", self.start, end),
            None => format!("bytes={}-", self.start),
        }
    }
}

/// Network client options.
#[derive(Clone, Debug)]
pub struct NetOptions {
    /// Applied to request setup; streaming bodies are not bounded.
    pub request_timeout: Duration,
    /// Max idle connections per host. 0 disables pooling.
    pub pool_max_idle_per_host: usize,
}

impl Default for NetOptions {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            pool_max_idle_per_host: 0,
        }
    }
}

/// Response header fields the cache layer consumes.
///
/// Raw header values are carried as-is; parsing the `Content-Range` total into
/// a content length is the cache layer's concern.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ResponseInfo {
    pub status: u16,
    /// `Content-Type` value, if present.
    pub mime_type: Option<String>,
    /// Raw `Content-Range` value, e.g. `bytes 0-1/4096`.
    pub content_range: Option<String>,
    /// `Content-Length` of this response body (not the full resource).
    pub content_length: Option<u64>,
    /// Whether the server advertised `Accept-Ranges: bytes`.
    pub accept_ranges: bool,
}
