use reqwest::Error as ReqwestError;
use thiserror::Error;

pub type NetResult<T> = Result<T, NetError>;

/// Transport-level error taxonomy for xget-net.
#[derive(Debug, Error, Clone)]
pub enum NetError {
    /// Request could not be sent or its body failed mid-flight.
    #[error("transport error: {0}")]
    Transport(String),

    /// No bytes arrived within the configured inactivity window.
    #[error("request timed out")]
    Timeout,

    /// The origin answered with a non-success status.
    #[error("HTTP {status} {status_text}")]
    HttpStatus { status: u16, status_text: String },

    /// The request was aborted by cancellation.
    #[error("cancelled")]
    Cancelled,
}

impl NetError {
    pub fn status(status: u16, status_text: impl Into<String>) -> Self {
        Self::HttpStatus {
            status,
            status_text: status_text.into(),
        }
    }

    /// Whether a retry could plausibly succeed.
    ///
    /// 403 is an authoritative refusal and 4xx in general will not change on
    /// a replay; connection-level failures, timeouts, 5xx, and throttling
    /// responses are worth retrying.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(_) | Self::Timeout => true,
            Self::HttpStatus { status, .. } => {
                *status >= 500 || *status == 429 || *status == 408
            }
            Self::Cancelled => false,
        }
    }

    /// True for responses the caller must treat as final (never retried).
    #[must_use]
    pub fn is_forbidden(&self) -> bool {
        matches!(self, Self::HttpStatus { status: 403, .. })
    }
}

impl From<ReqwestError> for NetError {
    fn from(e: ReqwestError) -> Self {
        if e.is_timeout() {
            return Self::Timeout;
        }
        // Alternate formatting keeps the full cause chain
        // ("error sending request ...: connection refused").
        Self::Transport(format!("{e:#}"))
    }
}
