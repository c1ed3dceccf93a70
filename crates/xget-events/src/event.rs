#![forbid(unsafe_code)]

/// One retry, either of the metadata probe or of a single segment.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrySnapshot {
    /// Segment index; `None` for probe retries.
    pub index: Option<usize>,
    /// True when this is a probe (meta) retry.
    pub meta: bool,
    /// Retries consumed so far, this one included.
    pub retry_count: u32,
    /// Configured retry cap.
    pub max_retries: u32,
    /// Bytes already delivered by the segment before the failure.
    pub bytes_read: u64,
    /// Segment size when known.
    pub total_bytes: Option<u64>,
    /// The error that triggered the retry.
    pub error: String,
}

/// Lifecycle events emitted by a fetch instance.
///
/// Ordering is guaranteed: `Loaded` before `StoreReady`, `StoreReady` before
/// any data flows, `End`/`Error` terminal.
#[derive(Debug, Clone, PartialEq)]
pub enum XgetEvent {
    /// Metadata probe succeeded; middleware has not run yet.
    Loaded {
        total_size: Option<u64>,
        start: u64,
        chunkable: bool,
        chunks: usize,
    },
    /// All `with` middlewares have populated the store.
    StoreReady,
    /// A probe or segment retry happened.
    Retry(RetrySnapshot),
    /// All segments drained and the digest finalized.
    End,
    /// Terminal failure.
    Error { error: String },
}

impl From<RetrySnapshot> for XgetEvent {
    fn from(r: RetrySnapshot) -> Self {
        Self::Retry(r)
    }
}
