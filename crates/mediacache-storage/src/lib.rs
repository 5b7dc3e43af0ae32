#![forbid(unsafe_code)]

//! `mediacache-storage`
//!
//! Storage primitives for mediacache:
//! - [`FragmentStore`]: sorted, merged byte ranges already cached for a resource
//! - [`RandomAccessFile`]: lock-guarded positional reads/writes on the cache file

mod error;
mod file;
mod fragments;

pub use error::{StorageError, StorageResult};
pub use file::RandomAccessFile;
pub use fragments::FragmentStore;
