//! Construction options.

use std::time::Duration;

use xget_net::{Headers, NetOptions};

use crate::{
    assembly::DEFAULT_CAPACITY,
    error::{XgetError, XgetResult},
    hash::HashAlgo,
};

/// Retry count standing in for "retry forever".
pub const RETRIES_INFINITE: u32 = u32::MAX;

/// Everything configurable about a fetch.
///
/// ```
/// use xget::Options;
///
/// let opts = Options::default()
///     .with_chunks(8)
///     .with_retries(3)
///     .with_hash("sha256")
///     .with_start(1024);
/// ```
#[derive(Debug, Clone)]
pub struct Options {
    /// Target parallelism; the planner may use fewer.
    pub chunks: usize,
    /// Per-segment and probe retry cap. [`RETRIES_INFINITE`] retries forever.
    pub retries: u32,
    /// Per-request inactivity timeout.
    pub timeout: Duration,
    /// Initial byte offset.
    pub start: u64,
    /// Cap on bytes consumed after `start`.
    pub size: Option<u64>,
    /// Digest algorithm name; `None` disables the hasher tap.
    pub hash: Option<String>,
    /// Enable the reassembly buffer. Off, segments hand chunks to the
    /// consumer directly with no read-ahead overlap.
    pub cache: bool,
    /// Reassembly buffer capacity in bytes.
    pub cache_size: u64,
    /// Re-queue overflow tails at the back of the admit queue.
    pub reallocate: bool,
    /// Suppress the oversized-capacity warning.
    pub nowarn: bool,
    /// Begin probing at construction.
    pub auto: bool,
    /// Extra request headers sent with every request.
    pub headers: Option<Headers>,
    /// Transport knobs (connect timeout, redirect cap, connection pool).
    pub net: NetOptions,
    /// Event bus channel capacity.
    pub event_channel_capacity: usize,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            chunks: 5,
            retries: 5,
            timeout: Duration::from_secs(10),
            start: 0,
            size: None,
            hash: None,
            cache: true,
            cache_size: DEFAULT_CAPACITY,
            reallocate: false,
            nowarn: false,
            auto: true,
            headers: None,
            net: NetOptions::default(),
            event_channel_capacity: 16,
        }
    }
}

impl Options {
    pub fn with_chunks(mut self, chunks: usize) -> Self {
        self.chunks = chunks;
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_start(mut self, start: u64) -> Self {
        self.start = start;
        self
    }

    pub fn with_size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }

    pub fn with_hash(mut self, algo: impl Into<String>) -> Self {
        self.hash = Some(algo.into());
        self
    }

    pub fn with_cache(mut self, cache: bool) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_cache_size(mut self, bytes: u64) -> Self {
        self.cache_size = bytes;
        self
    }

    pub fn with_reallocate(mut self, reallocate: bool) -> Self {
        self.reallocate = reallocate;
        self
    }

    pub fn with_nowarn(mut self, nowarn: bool) -> Self {
        self.nowarn = nowarn;
        self
    }

    pub fn with_auto(mut self, auto: bool) -> Self {
        self.auto = auto;
        self
    }

    pub fn with_headers(mut self, headers: Headers) -> Self {
        self.headers = Some(headers);
        self
    }

    pub fn with_net(mut self, net: NetOptions) -> Self {
        self.net = net;
        self
    }

    /// Validate values that have no sensible interpretation.
    ///
    /// The hash name is checked separately at construction so the error can
    /// name the algorithm.
    pub(crate) fn validate(&self) -> XgetResult<()> {
        if self.chunks == 0 {
            return Err(XgetError::InvalidOption("chunks"));
        }
        if self.timeout.is_zero() {
            return Err(XgetError::InvalidOption("timeout"));
        }
        if self.cache && self.cache_size == 0 {
            return Err(XgetError::InvalidOption("cache_size"));
        }
        Ok(())
    }

    pub(crate) fn hash_algo(&self) -> XgetResult<Option<HashAlgo>> {
        self.hash.as_deref().map(HashAlgo::parse).transpose()
    }
}
