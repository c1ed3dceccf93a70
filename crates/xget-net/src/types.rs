use std::collections::HashMap;
use std::time::Duration;

/// Case-insensitive response/request header map.
///
/// Keys are stored lowercased so `content-length` and `Content-Length` hit
/// the same entry regardless of what the origin sent.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Headers {
    inner: HashMap<String, String>,
}

impl Headers {
    pub fn new() -> Self {
        Self {
            inner: HashMap::new(),
        }
    }

    pub fn insert(&mut self, key: impl AsRef<str>, value: impl Into<String>) {
        self.inner
            .insert(key.as_ref().to_ascii_lowercase(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.inner
            .get(&key.to_ascii_lowercase())
            .map(|s| s.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.inner.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }
}

impl From<HashMap<String, String>> for Headers {
    fn from(map: HashMap<String, String>) -> Self {
        let mut h = Self::new();
        for (k, v) in map {
            h.insert(k, v);
        }
        h
    }
}

/// An HTTP byte range. `end: None` requests everything from `start` onward.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RangeSpec {
    pub start: u64,
    pub end: Option<u64>,
}

impl RangeSpec {
    pub fn new(start: u64, end: Option<u64>) -> Self {
        Self { start, end }
    }

    pub fn from_start(start: u64) -> Self {
        Self { start, end: None }
    }

    /// `Range` header value: `bytes=start-end`, upper bound omitted when open.
    pub fn to_header_value(&self) -> String {
        match self.end {
            Some(end) => format!("bytes={}-{}", self.start, end),
            None => format!("bytes={}-", self.start),
        }
    }
}

/// Transport configuration.
#[derive(Clone, Debug)]
pub struct NetOptions {
    /// Connect timeout for establishing each connection.
    pub connect_timeout: Duration,
    /// Inactivity timeout: a request whose body produces no bytes for this
    /// long is considered failed.
    pub idle_timeout: Duration,
    /// Redirect-following cap.
    pub max_redirects: usize,
    /// Idle pooled connections kept per host.
    pub pool_max_idle_per_host: usize,
}

impl Default for NetOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(15),
            idle_timeout: Duration::from_secs(10),
            max_redirects: 10,
            pool_max_idle_per_host: 8,
        }
    }
}
