//! In-process origin for integration tests.
//!
//! Serves one configurable body with optional range support, optional
//! length reporting, per-request logging, and injectable mid-body faults
//! keyed on the exact `Range` header value.

#![allow(dead_code)]

use std::{
    io,
    sync::{Arc, Mutex},
    time::Duration,
};

use axum::{
    body::Body,
    extract::{Request, State},
    http::StatusCode,
    response::Response,
    routing::get,
    Router,
};
use bytes::Bytes;
use tokio::net::TcpListener;

/// A mid-body connection drop, armed `times` times, for requests whose
/// `Range` header equals `match_range`.
#[derive(Debug, Clone)]
pub struct Fault {
    pub match_range: String,
    pub after_bytes: usize,
    pub times: u32,
}

/// An error status returned instead of the payload, armed `times` times.
#[derive(Debug, Clone)]
pub struct StatusFault {
    pub match_range: String,
    pub status: u16,
    pub times: u32,
}

pub struct ServerConfig {
    pub body: Vec<u8>,
    pub accept_ranges: bool,
    pub send_length: bool,
    pub faults: Vec<Fault>,
    pub status_faults: Vec<StatusFault>,
    /// Hold every response this long before answering.
    pub response_delay: Option<Duration>,
}

impl ServerConfig {
    pub fn ranged(body: Vec<u8>) -> Self {
        Self {
            body,
            accept_ranges: true,
            send_length: true,
            faults: Vec::new(),
            status_faults: Vec::new(),
            response_delay: None,
        }
    }

    pub fn plain(body: Vec<u8>) -> Self {
        Self {
            body,
            accept_ranges: false,
            send_length: true,
            faults: Vec::new(),
            status_faults: Vec::new(),
            response_delay: None,
        }
    }

    pub fn with_fault(mut self, fault: Fault) -> Self {
        self.faults.push(fault);
        self
    }

    pub fn with_status_fault(mut self, fault: StatusFault) -> Self {
        self.status_faults.push(fault);
        self
    }

    pub fn without_length(mut self) -> Self {
        self.send_length = false;
        self
    }

    pub fn with_response_delay(mut self, delay: Duration) -> Self {
        self.response_delay = Some(delay);
        self
    }
}

struct ServerState {
    config: ServerConfig,
    faults: Mutex<Vec<Fault>>,
    status_faults: Mutex<Vec<StatusFault>>,
    requests: Mutex<Vec<String>>,
}

pub struct FixtureServer {
    state: Arc<ServerState>,
    base: String,
}

impl FixtureServer {
    pub async fn spawn(config: ServerConfig) -> Self {
        let faults = Mutex::new(config.faults.clone());
        let status_faults = Mutex::new(config.status_faults.clone());
        let state = Arc::new(ServerState {
            config,
            faults,
            status_faults,
            requests: Mutex::new(Vec::new()),
        });

        let app = Router::new()
            .route("/data", get(data_endpoint))
            .route("/forbidden", get(|| async { StatusCode::FORBIDDEN }))
            .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            state,
            base: format!("http://127.0.0.1:{}", addr.port()),
        }
    }

    pub fn data_url(&self) -> String {
        format!("{}/data", self.base)
    }

    pub fn forbidden_url(&self) -> String {
        format!("{}/forbidden", self.base)
    }

    /// `Range` header of every request served so far, `<none>` when absent.
    pub fn requests(&self) -> Vec<String> {
        self.state.requests.lock().unwrap().clone()
    }
}

fn parse_range(header: &str, len: usize) -> Option<(usize, usize)> {
    let spec = header.strip_prefix("bytes=")?;
    let (start, end) = spec.split_once('-')?;
    let start: usize = start.parse().ok()?;
    let end: usize = if end.is_empty() {
        len.checked_sub(1)?
    } else {
        end.parse().ok()?
    };
    (start < len && start <= end).then(|| (start, end.min(len - 1)))
}

fn take_fault(state: &ServerState, range_header: &str) -> Option<Fault> {
    let mut faults = state.faults.lock().unwrap();
    let fault = faults
        .iter_mut()
        .find(|f| f.match_range == range_header && f.times > 0)?;
    fault.times -= 1;
    Some(fault.clone())
}

fn take_status_fault(state: &ServerState, range_header: &str) -> Option<u16> {
    let mut faults = state.status_faults.lock().unwrap();
    let fault = faults
        .iter_mut()
        .find(|f| f.match_range == range_header && f.times > 0)?;
    fault.times -= 1;
    Some(fault.status)
}

fn body_for(state: &ServerState, slice: &[u8], range_header: &str) -> Body {
    match take_fault(state, range_header) {
        Some(fault) => {
            let head = Bytes::copy_from_slice(&slice[..fault.after_bytes.min(slice.len())]);
            let stream = futures::stream::iter(vec![
                Ok::<Bytes, io::Error>(head),
                Err(io::Error::new(io::ErrorKind::ConnectionReset, "injected fault")),
            ]);
            Body::from_stream(stream)
        }
        None => Body::from(Bytes::copy_from_slice(slice)),
    }
}

async fn data_endpoint(
    State(state): State<Arc<ServerState>>,
    request: Request,
) -> Result<Response, StatusCode> {
    let range_header = request
        .headers()
        .get("Range")
        .and_then(|h| h.to_str().ok())
        .map(str::to_string);

    state
        .requests
        .lock()
        .unwrap()
        .push(range_header.clone().unwrap_or_else(|| "<none>".into()));

    if let Some(delay) = state.config.response_delay {
        tokio::time::sleep(delay).await;
    }

    if let Some(status) = take_status_fault(&state, range_header.as_deref().unwrap_or_default()) {
        return Err(StatusCode::from_u16(status).unwrap());
    }

    let body = &state.config.body;
    let range = range_header
        .as_deref()
        .filter(|_| state.config.accept_ranges)
        .map(|h| parse_range(h, body.len()).ok_or(StatusCode::RANGE_NOT_SATISFIABLE))
        .transpose()?;

    match range {
        Some((start, end)) => {
            let mut resp = Response::builder()
                .status(StatusCode::PARTIAL_CONTENT)
                .header("Accept-Ranges", "bytes")
                .header(
                    "Content-Range",
                    format!("bytes {}-{}/{}", start, end, body.len()),
                );
            if state.config.send_length {
                resp = resp.header("Content-Length", (end - start + 1).to_string());
            }
            Ok(resp
                .body(body_for(
                    &state,
                    &body[start..=end],
                    range_header.as_deref().unwrap_or_default(),
                ))
                .unwrap())
        }
        None => {
            // Range ignored or absent: plain 200 with the full body. Length
            // is withheld by streaming when configured off.
            let mut resp = Response::builder().status(StatusCode::OK);
            if state.config.send_length {
                resp = resp.header("Content-Length", body.len().to_string());
            }
            let payload = if state.config.send_length {
                Body::from(Bytes::copy_from_slice(body))
            } else {
                let chunks: Vec<Result<Bytes, io::Error>> = body
                    .chunks(4096)
                    .map(|c| Ok(Bytes::copy_from_slice(c)))
                    .collect();
                Body::from_stream(futures::stream::iter(chunks))
            };
            Ok(resp.body(payload).unwrap())
        }
    }
}

/// Deterministic pseudo-random body.
pub fn test_body(len: usize) -> Vec<u8> {
    let mut state: u32 = 0x2545_f491;
    (0..len)
        .map(|_| {
            state = state.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
            (state >> 24) as u8
        })
        .collect()
}
