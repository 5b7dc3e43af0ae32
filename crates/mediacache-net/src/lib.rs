#![forbid(unsafe_code)]

//! Ranged HTTP client for the mediacache streaming cache.
//!
//! The cache layer issues exactly one ranged GET per remote action; this crate
//! wraps `reqwest` behind that single operation and exposes the response
//! header fields the cache needs ([`ResponseInfo`]).

mod client;
mod error;
mod types;

use std::pin::Pin;

use bytes::Bytes;
use futures::Stream;

pub use crate::{
    client::{HttpClient, RangeResponse},
    error::{NetError, NetResult},
    types::{Headers, NetOptions, RangeSpec, ResponseInfo},
};

/// Streaming response body.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, NetError>> + Send>>;
