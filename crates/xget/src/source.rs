//! Resilient segment source.
//!
//! One restartable byte producer per segment. A recoverable transport
//! failure — connect error, stalled body, 5xx or throttling status,
//! premature EOF on a finite range — re-issues the ranged GET offset by
//! the bytes already delivered, so the consumer sees one seamless sequence
//! with no gap or duplication. Failures a replay cannot change
//! (authoritative HTTP statuses, per [`NetError::is_retryable`]) exhaust
//! the segment immediately.

use std::time::Duration;

use bytes::Bytes;
use futures::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};
use url::Url;
use xget_events::{EventBus, RetrySnapshot};
use xget_net::{Headers, HttpClient, NetError};

use crate::{error::XgetError, plan::ByteRange};

const RETRY_BASE_DELAY: Duration = Duration::from_millis(100);
const RETRY_MAX_DELAY: Duration = Duration::from_secs(2);

/// Exponential backoff for attempt N (1-based), capped.
pub(crate) fn retry_delay(attempt: u32) -> Duration {
    if attempt <= 1 {
        return RETRY_BASE_DELAY;
    }
    let exp = RETRY_BASE_DELAY.saturating_mul(2u32.saturating_pow(attempt - 1));
    exp.min(RETRY_MAX_DELAY)
}

/// Static description of one segment.
#[derive(Debug, Clone)]
pub(crate) struct SegmentConfig {
    pub index: usize,
    pub range: ByteRange,
    pub max_retries: u32,
    /// Whether the origin honors ranges. Without them a restart replays the
    /// whole body, so resumption is useless and retries are capped at 1.
    pub accepts_ranges: bool,
}

impl SegmentConfig {
    fn retry_cap(&self) -> u32 {
        if self.accepts_ranges {
            self.max_retries
        } else {
            self.max_retries.min(1)
        }
    }
}

/// The restartable byte sequence for one segment.
///
/// Yields the segment's bytes in order; terminates silently on
/// cancellation; yields a single `SegmentExhausted` when the retry budget
/// runs out or the failure is one no replay can fix.
pub(crate) fn segment_stream(
    client: HttpClient,
    url: Url,
    headers: Option<Headers>,
    cfg: SegmentConfig,
    bus: EventBus,
    cancel: CancellationToken,
) -> impl Stream<Item = Result<Bytes, XgetError>> + Send {
    async_stream::stream! {
        let size = cfg.range.size();
        let retry_cap = cfg.retry_cap();
        let mut delivered: u64 = 0;
        let mut retry_count: u32 = 0;

        loop {
            let spec = cfg.range.resume_spec(delivered);
            trace!(
                index = cfg.index,
                range = %spec.to_header_value(),
                retry_count,
                "segment request"
            );

            let connected = tokio::select! {
                biased;
                () = cancel.cancelled() => return,
                r = client.get_range(url.clone(), spec, headers.as_ref()) => r,
            };

            let failure: NetError = match connected {
                Ok(resp) if resp.is_success() => {
                    let mut body = resp.body;
                    let mut failed: Option<NetError> = None;

                    loop {
                        let next = tokio::select! {
                            biased;
                            () = cancel.cancelled() => return,
                            n = body.next() => n,
                        };
                        match next {
                            Some(Ok(mut chunk)) => {
                                if chunk.is_empty() {
                                    continue;
                                }
                                if let Some(total) = size {
                                    // An over-generous origin must not push a
                                    // segment past its range.
                                    let remaining = total - delivered;
                                    if chunk.len() as u64 > remaining {
                                        chunk.truncate(remaining as usize);
                                    }
                                }
                                delivered += chunk.len() as u64;
                                yield Ok(chunk);
                                if Some(delivered) == size {
                                    break;
                                }
                            }
                            Some(Err(e)) => {
                                failed = Some(e);
                                break;
                            }
                            None => break,
                        }
                    }

                    match failed {
                        Some(e) => e,
                        None => {
                            match size {
                                Some(total) if delivered < total => NetError::Transport(
                                    format!("connection closed at byte {delivered} of {total}"),
                                ),
                                _ => {
                                    debug!(index = cfg.index, delivered, "segment complete");
                                    return;
                                }
                            }
                        }
                    }
                }
                Ok(resp) => resp.into_status_error(),
                Err(e) => e,
            };

            if retry_count >= retry_cap || !failure.is_retryable() {
                warn!(index = cfg.index, retry_count, error = %failure, "segment failed terminally");
                yield Err(XgetError::SegmentExhausted {
                    index: cfg.index,
                    source: failure,
                });
                return;
            }

            retry_count += 1;
            warn!(
                index = cfg.index,
                retry_count,
                bytes_read = delivered,
                error = %failure,
                "segment failed, resuming"
            );
            bus.publish(RetrySnapshot {
                index: Some(cfg.index),
                meta: false,
                retry_count,
                max_retries: retry_cap,
                bytes_read: delivered,
                total_bytes: size,
                error: failure.to_string(),
            });

            tokio::select! {
                biased;
                () = cancel.cancelled() => return,
                () = tokio::time::sleep(retry_delay(retry_count)) => {}
            }
        }
    }
}
