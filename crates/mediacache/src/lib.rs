#![forbid(unsafe_code)]

//! Fragment-tracked disk cache and streaming loader for progressive media
//! playback.
//!
//! A player hands a plain URL to [`LoaderManager::asset_url`] and opens the
//! returned asset URL; byte-range loading requests submitted through
//! [`LoaderManager::load`] are split into local reads (already-cached bytes)
//! and ranged remote fetches, with every downloaded byte written into a
//! growing cache file whose fragment map survives restarts.
//!
//! ```ignore
//! let manager = LoaderManager::new(CacheOptions::default())?;
//! let asset = manager.asset_url(&url);
//! let mut handle = manager.load(&asset, DataRequest::new(0, 4096))?;
//! while let Some(event) = handle.recv().await {
//!     match event {
//!         LoadEvent::Data { bytes, .. } => feed_player(bytes),
//!         LoadEvent::Finished(result) => break,
//!         _ => {}
//!     }
//! }
//! ```

mod config;
mod downloader;
mod error;
mod executor;
mod loader;
mod manager;
mod options;
mod planner;
mod worker;

pub use config::{CacheConfiguration, ContentMetadata};
pub use downloader::{ActiveDownloads, Downloader};
pub use error::{CacheError, CacheResult};
pub use executor::FetchEvent;
pub use loader::{DataRequest, LoadEvent, Loader, RequestHandle};
pub use manager::{ASSET_URL_PREFIX, LoaderManager};
pub use mediacache_events::{CacheEvent, CacheSnapshot, EventBus};
pub use mediacache_net::{HttpClient, NetOptions};
pub use options::{CacheOptions, NamingRule, default_naming_rule};
pub use planner::{ActionKind, CacheAction, plan_actions};
pub use worker::CacheFileWorker;
