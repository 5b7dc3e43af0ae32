#![forbid(unsafe_code)]

//! Broadcast event bus for mediacache.
//!
//! Replaces the per-cache notification center of a delegate-based design:
//! components publish [`CacheEvent`]s to a shared [`EventBus`]; any number of
//! observers subscribe independently.

mod bus;
mod event;

pub use bus::EventBus;
pub use event::{CacheEvent, CacheSnapshot};
