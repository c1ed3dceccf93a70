//! Range math and segment planning.
//!
//! Splits the probed resource into contiguous, non-overlapping byte ranges,
//! one per parallel connection, and decides how many connections a given
//! resource actually merits.

use xget_net::RangeSpec;

/// Resources smaller than this are never split.
const MIN_SPLIT_SIZE: u64 = 5;
/// Chunk count used when the resource is smaller than the configured count.
const SMALL_RESOURCE_CHUNKS: usize = 5;

/// One segment's byte interval, inclusive on both ends.
///
/// `max: None` means the end is unknown; only legal for a single-segment
/// plan over a resource whose total size the origin did not report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub min: u64,
    pub max: Option<u64>,
}

impl ByteRange {
    pub fn new(min: u64, max: Option<u64>) -> Self {
        if let Some(max) = max {
            debug_assert!(max >= min);
        }
        Self { min, max }
    }

    /// Number of bytes covered, when the end is known.
    pub fn size(&self) -> Option<u64> {
        self.max.map(|max| max - self.min + 1)
    }

    /// The range to request when `delivered` bytes have already arrived.
    pub fn resume_spec(&self, delivered: u64) -> RangeSpec {
        RangeSpec::new(self.min + delivered, self.max)
    }
}

/// Decide how many chunks to actually use.
///
/// Servers that ignore ranges get one connection. Tiny resources are not
/// worth splitting at all; resources smaller than the configured count are
/// clamped to a fixed small parallelism instead of one-byte segments.
pub fn effective_chunks(size: Option<u64>, configured: usize, accepts_ranges: bool) -> usize {
    if !accepts_ranges {
        return 1;
    }
    let Some(size) = size else {
        // Unknown total: nothing to divide.
        return 1;
    };
    if size < configured as u64 {
        if size < MIN_SPLIT_SIZE {
            1
        } else {
            SMALL_RESOURCE_CHUNKS
        }
    } else {
        configured
    }
}

/// Build the range plan for `size` bytes starting at absolute offset `start`.
///
/// Every chunk but the last gets `size / chunks` bytes; the last absorbs the
/// remainder. `size: None` produces a single open-ended range.
///
/// Returns an empty plan for zero-size input: the caller terminates with an
/// empty body and no segments.
pub fn plan_ranges(start: u64, size: Option<u64>, chunks: usize) -> Vec<ByteRange> {
    let Some(size) = size else {
        return vec![ByteRange::new(start, None)];
    };
    if size == 0 {
        return Vec::new();
    }

    let chunks = chunks.max(1) as u64;
    let quotient = size / chunks;

    let mut out = Vec::with_capacity(chunks as usize);
    let mut offset = start;
    for i in 0..chunks {
        let len = if i == chunks - 1 {
            // Last chunk absorbs the remainder.
            size - quotient * (chunks - 1)
        } else {
            quotient
        };
        out.push(ByteRange::new(offset, Some(offset + len - 1)));
        offset += len;
    }
    out
}
