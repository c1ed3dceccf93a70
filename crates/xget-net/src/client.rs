use bytes::Bytes;
use futures::TryStreamExt;
use reqwest::{redirect::Policy, Client};
use tracing::trace;
use url::Url;

use crate::{
    error::{NetError, NetResult},
    timeout::IdleTimeout,
    types::{Headers, NetOptions, RangeSpec},
    ByteStream,
};

/// A ranged GET response before any status validation.
///
/// Callers decide how to treat the status: the metadata probe keeps 416
/// around to learn lengths from unsatisfiable ranges, while segment sources
/// convert any non-2xx into a transport error.
pub struct RangedResponse {
    pub status: u16,
    pub status_text: String,
    pub headers: Headers,
    pub body: ByteStream,
}

impl RangedResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Consume the response as a status error, discarding the body.
    pub fn into_status_error(self) -> NetError {
        NetError::status(self.status, self.status_text)
    }
}

/// Thin reqwest wrapper issuing ranged GETs.
#[derive(Clone, Debug)]
pub struct HttpClient {
    inner: Client,
    options: NetOptions,
}

impl HttpClient {
    pub fn new(options: NetOptions) -> NetResult<Self> {
        let inner = Client::builder()
            .connect_timeout(options.connect_timeout)
            .redirect(Policy::limited(options.max_redirects))
            .pool_max_idle_per_host(options.pool_max_idle_per_host)
            .build()
            .map_err(NetError::from)?;
        Ok(Self { inner, options })
    }

    pub fn options(&self) -> &NetOptions {
        &self.options
    }

    /// Issue `GET url` with `Range: <range>` and the given extra headers.
    ///
    /// The returned body stream carries the inactivity timeout: a gap longer
    /// than `NetOptions::idle_timeout` between chunks yields
    /// `NetError::Timeout` and ends the stream.
    pub async fn get_range(
        &self,
        url: Url,
        range: RangeSpec,
        headers: Option<&Headers>,
    ) -> NetResult<RangedResponse> {
        let mut req = self
            .inner
            .get(url.clone())
            .header("Range", range.to_header_value());
        if let Some(headers) = headers {
            for (k, v) in headers.iter() {
                req = req.header(k, v);
            }
        }

        trace!(%url, range = %range.to_header_value(), "issuing ranged GET");

        // Waiting for response headers counts against the inactivity window.
        let resp = tokio::time::timeout(self.options.idle_timeout, req.send())
            .await
            .map_err(|_| NetError::Timeout)?
            .map_err(NetError::from)?;

        let status = resp.status();
        let mut out = Headers::new();
        for (name, value) in resp.headers().iter() {
            if let Ok(v) = value.to_str() {
                out.insert(name.as_str(), v);
            }
        }

        let body = resp.bytes_stream().map_err(NetError::from);
        let body: ByteStream =
            Box::pin(IdleTimeout::new(Box::pin(body), self.options.idle_timeout));

        Ok(RangedResponse {
            status: status.as_u16(),
            status_text: status
                .canonical_reason()
                .unwrap_or("Unknown Status")
                .to_string(),
            headers: out,
            body,
        })
    }

    /// Collect a full ranged response body. Non-2xx is an error here.
    pub async fn get_range_bytes(
        &self,
        url: Url,
        range: RangeSpec,
        headers: Option<&Headers>,
    ) -> NetResult<Bytes> {
        let resp = self.get_range(url, range, headers).await?;
        if !resp.is_success() {
            return Err(resp.into_status_error());
        }
        let mut body = resp.body;
        let mut collected = Vec::new();
        use futures::StreamExt;
        while let Some(chunk) = body.next().await {
            collected.extend_from_slice(&chunk?);
        }
        Ok(Bytes::from(collected))
    }
}
