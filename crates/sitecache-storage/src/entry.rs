//! Request descriptors and captured responses
//!
//! A cache entry is the pair `(RequestDescriptor, CapturedResponse)`. Entries
//! are written whole and replaced whole; nothing mutates a stored entry.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use http::StatusCode;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use url::Url;

use crate::error::StorageError;

/// An intercepted request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestDescriptor {
    /// Upper-cased HTTP method
    pub method: String,
    /// Absolute URL, fragment stripped
    pub url: Url,
    /// Request headers with lower-cased names
    pub headers: Vec<(String, String)>,
    /// Whether the request is a top-level navigation
    pub navigate: bool,
    /// Request body; only forwarded for pass-through requests, never stored
    pub body: Bytes,
}

impl RequestDescriptor {
    /// Create a descriptor for an arbitrary method
    pub fn new(method: &str, mut url: Url) -> Self {
        url.set_fragment(None);
        Self {
            method: method.to_ascii_uppercase(),
            url,
            headers: Vec::new(),
            navigate: false,
            body: Bytes::new(),
        }
    }

    /// Create a GET descriptor
    pub fn get(url: Url) -> Self {
        Self::new("GET", url)
    }

    /// Add a header, replacing any previous value with the same name
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        let name = name.to_ascii_lowercase();
        self.headers.retain(|(n, _)| *n != name);
        self.headers.push((name, value.to_string()));
        self
    }

    pub fn without_header(mut self, name: &str) -> Self {
        self.headers.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
        self
    }

    pub fn with_navigate(mut self, navigate: bool) -> Self {
        self.navigate = navigate;
        self
    }

    pub fn with_body(mut self, body: Bytes) -> Self {
        self.body = body;
        self
    }

    /// Look up a header value (case-insensitive)
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// The `Accept` header, if any
    pub fn accept(&self) -> Option<&str> {
        self.header("accept")
    }

    pub fn path(&self) -> &str {
        self.url.path()
    }

    /// Storage key: hex SHA-256 of `"<METHOD> <url>"`
    pub fn cache_key(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.method.as_bytes());
        hasher.update(b" ");
        hasher.update(self.url.as_str().as_bytes());
        hex::encode(hasher.finalize())
    }
}

/// A response captured from the network or read back from a generation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
    /// When the response was written to a generation (`None` for live responses)
    pub stored_at: Option<DateTime<Utc>>,
}

impl CapturedResponse {
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: body.into(),
            stored_at: None,
        }
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers
            .push((name.to_ascii_lowercase(), value.to_string()));
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// True for any 2xx status
    pub fn is_ok(&self) -> bool {
        StatusCode::from_u16(self.status)
            .map(|s| s.is_success())
            .unwrap_or(false)
    }

    /// Whether the response may be stored: 2xx, but never a partial response
    pub fn is_cacheable(&self) -> bool {
        self.is_ok() && self.status != StatusCode::PARTIAL_CONTENT.as_u16()
    }
}

/// Persisted metadata for one entry; the body is stored next to it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct EntryMeta {
    pub method: String,
    pub url: String,
    #[serde(default)]
    pub request_headers: Vec<(String, String)>,
    pub status: u16,
    #[serde(default)]
    pub headers: Vec<(String, String)>,
    pub stored_at: DateTime<Utc>,
}

impl EntryMeta {
    pub(crate) fn capture(request: &RequestDescriptor, response: &CapturedResponse) -> Self {
        Self {
            method: request.method.clone(),
            url: request.url.to_string(),
            request_headers: request.headers.clone(),
            status: response.status,
            headers: response.headers.clone(),
            stored_at: Utc::now(),
        }
    }

    pub(crate) fn request(&self) -> Result<RequestDescriptor, StorageError> {
        let url = Url::parse(&self.url)
            .map_err(|e| StorageError::Corrupt(format!("Stored URL {}: {}", self.url, e)))?;
        let mut request = RequestDescriptor::new(&self.method, url);
        request.headers = self.request_headers.clone();
        Ok(request)
    }

    /// Whether the stored response was negotiated for different request
    /// headers than `request` carries, per the response's `Vary` header
    pub(crate) fn varies_from(&self, request: &RequestDescriptor) -> bool {
        let Some(vary) = self
            .headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case("vary"))
            .map(|(_, v)| v.as_str())
        else {
            return false;
        };

        vary.split(',').map(str::trim).filter(|n| !n.is_empty()).any(|name| {
            if name == "*" {
                return true;
            }
            let stored = self
                .request_headers
                .iter()
                .find(|(n, _)| n.eq_ignore_ascii_case(name))
                .map(|(_, v)| v.as_str());
            stored != request.header(name)
        })
    }

    pub(crate) fn into_response(self, body: Bytes) -> CapturedResponse {
        CapturedResponse {
            status: self.status,
            headers: self.headers,
            body,
            stored_at: Some(self.stored_at),
        }
    }
}
