#![forbid(unsafe_code)]

//! HTTP transport layer for the xget chunked downloader.
//!
//! Exposes a thin ranged-GET client over reqwest plus the wire-level types
//! and error taxonomy the fetch engine builds on. Status validation is left
//! to callers: the metadata probe and segment sources interpret non-2xx
//! responses differently.

pub mod client;
pub mod error;
pub mod timeout;
pub mod types;

use std::pin::Pin;

use bytes::Bytes;
use futures::Stream;

pub use client::{HttpClient, RangedResponse};
pub use error::{NetError, NetResult};
pub use timeout::IdleTimeout;
pub use types::{Headers, NetOptions, RangeSpec};

/// Boxed byte stream produced by a ranged request.
pub type ByteStream = Pin<Box<dyn Stream<Item = NetResult<Bytes>> + Send>>;
