use thiserror::Error;
use xget_net::NetError;

pub type XgetResult<T> = Result<T, XgetError>;

/// Where a middleware-originated error came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrSource {
    /// A `use` transformer factory or its transform.
    Transform,
    /// A `with` middleware.
    With,
}

impl ErrSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Transform => "transform",
            Self::With => "with",
        }
    }
}

/// Blame annotation extracted from middleware-originated errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrContext<'a> {
    /// Registration tag of the offending middleware.
    pub tag: &'a str,
    /// Which registry it came from.
    pub source: ErrSource,
}

/// Boxed user-code error.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Error taxonomy for the fetch engine.
#[derive(Debug, Error)]
pub enum XgetError {
    /// Transport failure outside any retry scope.
    #[error(transparent)]
    Net(#[from] NetError),

    /// A segment exhausted its retry budget.
    #[error("segment {index} exhausted retries: {source}")]
    SegmentExhausted {
        index: usize,
        #[source]
        source: NetError,
    },

    /// The metadata probe exhausted its retry budget.
    #[error("metadata probe failed: {source}")]
    MetaExhausted {
        #[source]
        source: NetError,
    },

    /// Caller-supplied start offset is past the end of the resource.
    #[error("start offset {start} exceeds total size {total_size}")]
    RangeExceeded { start: u64, total_size: u64 },

    /// A transformer factory failed or its transform errored mid-stream.
    #[error("transformer {tag:?} failed: {source}")]
    Transform {
        tag: String,
        #[source]
        source: BoxError,
    },

    /// A `with` middleware failed while populating the store.
    #[error("middleware {tag:?} failed: {source}")]
    Middleware {
        tag: String,
        #[source]
        source: BoxError,
    },

    /// Construction-time option validation failure.
    #[error("invalid option {0:?}")]
    InvalidOption(&'static str),

    /// Requested digest algorithm is not available.
    #[error("unsupported hash algorithm {0:?}")]
    HashUnsupported(String),

    /// The downstream sink failed while piping.
    #[error("sink write error: {0}")]
    Sink(#[source] std::io::Error),

    /// Middleware registration attempted after the probe completed.
    #[error("instance already loaded")]
    AlreadyLoaded,

    /// The instance was destroyed before completion.
    #[error("destroyed")]
    Destroyed,

    /// Supplied URL did not parse.
    #[error("invalid url: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

impl XgetError {
    /// Extract the `{tag, source}` annotation carried by errors that
    /// originated in user middleware, for blame attribution.
    pub fn err_context(&self) -> Option<ErrContext<'_>> {
        match self {
            Self::Transform { tag, .. } => Some(ErrContext {
                tag,
                source: ErrSource::Transform,
            }),
            Self::Middleware { tag, .. } => Some(ErrContext {
                tag,
                source: ErrSource::With,
            }),
            _ => None,
        }
    }

    /// The raw cause behind a middleware-originated error, if any.
    pub fn raw(&self) -> Option<&(dyn std::error::Error + Send + Sync)> {
        match self {
            Self::Transform { source, .. } | Self::Middleware { source, .. } => {
                Some(source.as_ref())
            }
            _ => None,
        }
    }
}
