//! Metadata probe.
//!
//! One ranged GET (`bytes=0-`) answers both questions the planner needs:
//! does the origin honor byte ranges, and how big is the resource. The body
//! is never consumed; segments open their own connections.

use tracing::{debug, warn};
use url::Url;
use xget_events::{EventBus, RetrySnapshot};
use xget_net::{Headers, HttpClient, NetError, RangeSpec};

use crate::{
    error::{XgetError, XgetResult},
    plan::{effective_chunks, plan_ranges, ByteRange},
    source::retry_delay,
};

/// What the probe learned from the origin.
#[derive(Debug, Clone)]
pub struct ProbeOutcome {
    pub accepts_ranges: bool,
    pub total_size: Option<u64>,
    pub headers: Headers,
}

/// Probe summary handed to the head handler before planning.
#[derive(Debug, Clone)]
pub struct HeadInfo {
    /// Configured chunk count (not yet clamped by the planner).
    pub chunks: usize,
    pub headers: Headers,
    pub total_size: Option<u64>,
    pub accepts_ranges: bool,
}

/// Probe interceptor; a `Some(offset)` return overrides the configured
/// start offset.
pub type HeadHandler = Box<dyn Fn(&HeadInfo) -> Option<u64> + Send + Sync>;

/// The full result of probing and planning.
#[derive(Debug, Clone)]
pub struct LoadData {
    pub url: Url,
    /// Byte offset fetching begins at.
    pub start: u64,
    /// Total resource size as reported by the origin.
    pub total_size: Option<u64>,
    /// Bytes this fetch will deliver (`total_size - start`, capped by the
    /// `size` option).
    pub size: Option<u64>,
    /// True iff the origin honors ranges and the total size is known.
    pub chunkable: bool,
    pub headers: Headers,
    pub plan: Vec<ByteRange>,
}

/// Total length from a `Content-Range` value (`bytes 0-1023/12345`,
/// `bytes */12345`); `*` totals are unknown.
fn parse_content_range_total(value: &str) -> Option<u64> {
    let (_, total) = value.split_once('/')?;
    let total = total.trim();
    if total == "*" {
        return None;
    }
    total.parse::<u64>().ok()
}

fn parse_outcome(status: u16, headers: Headers) -> ProbeOutcome {
    let content_range_total = headers
        .get("content-range")
        .and_then(parse_content_range_total);

    let total_size = headers
        .get("content-length")
        .and_then(|v| v.trim().parse::<u64>().ok())
        .or(content_range_total);

    // 416 is an authoritative "no usable range here", even when the
    // rejection leaks the total length.
    let accepts_ranges = status != 416
        && (headers
            .get("accept-ranges")
            .is_some_and(|v| v.eq_ignore_ascii_case("bytes"))
            || headers.get("content-range").is_some());

    ProbeOutcome {
        accepts_ranges,
        total_size,
        headers,
    }
}

async fn probe_once(
    client: &HttpClient,
    url: &Url,
    headers: Option<&Headers>,
) -> Result<ProbeOutcome, NetError> {
    let resp = client
        .get_range(url.clone(), RangeSpec::from_start(0), headers)
        .await?;

    if resp.status == 416 {
        // Still a successful probe: the server just refuses ranges.
        return Ok(parse_outcome(416, resp.headers));
    }
    if !resp.is_success() {
        return Err(resp.into_status_error());
    }
    // Dropping the body aborts the connection; segments reconnect.
    Ok(parse_outcome(resp.status, resp.headers))
}

/// Probe with the meta-retry loop.
///
/// 403 is never retried; every other failure is retried up to `max_retries`
/// times, each retry announced on the bus with the meta flag set.
pub(crate) async fn probe_with_retry(
    client: &HttpClient,
    url: &Url,
    headers: Option<&Headers>,
    max_retries: u32,
    bus: &EventBus,
) -> XgetResult<ProbeOutcome> {
    let mut attempt: u32 = 0;
    loop {
        match probe_once(client, url, headers).await {
            Ok(outcome) => {
                debug!(
                    accepts_ranges = outcome.accepts_ranges,
                    total_size = ?outcome.total_size,
                    "probe complete"
                );
                return Ok(outcome);
            }
            Err(e) => {
                attempt += 1;
                if e.is_forbidden() || attempt > max_retries {
                    return Err(XgetError::MetaExhausted { source: e });
                }
                warn!(attempt, max_retries, error = %e, "probe failed, retrying");
                bus.publish(RetrySnapshot {
                    index: None,
                    meta: true,
                    retry_count: attempt,
                    max_retries,
                    bytes_read: 0,
                    total_bytes: None,
                    error: e.to_string(),
                });
                tokio::time::sleep(retry_delay(attempt)).await;
            }
        }
    }
}

/// Turn a probe outcome into the final load data: apply the head handler's
/// offset override, validate the start offset, cap the size, and plan.
pub(crate) fn build_load_data(
    url: Url,
    outcome: ProbeOutcome,
    configured_start: u64,
    size_cap: Option<u64>,
    configured_chunks: usize,
    head_override: Option<u64>,
) -> XgetResult<LoadData> {
    let ProbeOutcome {
        accepts_ranges,
        total_size,
        headers,
    } = outcome;

    let chunkable = accepts_ranges && total_size.is_some();

    let mut start = head_override.unwrap_or(configured_start);
    if !accepts_ranges {
        // Without ranges the origin always serves from byte zero.
        start = 0;
    }

    let mut size = match total_size {
        Some(total) => {
            if start > total {
                return Err(XgetError::RangeExceeded {
                    start,
                    total_size: total,
                });
            }
            Some(total - start)
        }
        None => None,
    };
    if let Some(cap) = size_cap {
        size = Some(size.map_or(cap, |s| s.min(cap)));
    }

    let chunks = effective_chunks(size, configured_chunks, chunkable);
    let plan = plan_ranges(start, size, chunks);

    Ok(LoadData {
        url,
        start,
        total_size,
        size,
        chunkable,
        headers,
        plan,
    })
}
