#![forbid(unsafe_code)]

//! Chunked HTTP content retriever.
//!
//! Given a URL, xget probes the origin for byte-range support, opens N
//! parallel ranged connections over disjoint segments, and reassembles the
//! bytes in their original order into a single pull-based output stream,
//! optionally digesting the reassembled content on the way out. Each
//! segment connection transparently resumes across transport failures.
//!
//! # Example
//!
//! ```ignore
//! use futures::StreamExt;
//! use xget::{xget, Options};
//!
//! let mut fetch = xget(
//!     "https://example.com/large.bin",
//!     Options::default().with_chunks(8).with_hash("sha256"),
//! )?;
//! let mut out = Vec::new();
//! while let Some(chunk) = fetch.next().await {
//!     out.extend_from_slice(&chunk?);
//! }
//! let digest = fetch.hash_snapshot_hex();
//! ```

pub mod assembly;
pub mod error;
pub mod fetch;
pub mod hash;
pub mod options;
pub mod pipeline;
pub mod plan;
pub mod probe;
mod source;
pub mod store;

pub use assembly::{AssemblyPool, PoolConfig, PoolMetrics, DEFAULT_CAPACITY};
pub use error::{BoxError, ErrContext, ErrSource, XgetError, XgetResult};
pub use fetch::{xget, Lifecycle, Xget};
pub use hash::{HashAlgo, HasherTap};
pub use options::{Options, RETRIES_INFINITE};
pub use pipeline::{map_transform, SegmentMeta, Transform, TransformFactory};
pub use plan::ByteRange;
pub use probe::{HeadInfo, LoadData};
pub use store::Store;

// The transport types show up in public signatures.
pub use xget_events::{EventBus, RetrySnapshot, XgetEvent};
pub use xget_net::{Headers, NetError, NetOptions};
