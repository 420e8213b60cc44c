//! Download and transfer requests.

use std::collections::BTreeMap;
use std::fmt;

/// Header carrying the conditional timestamp.
pub const IF_MODIFIED_SINCE: &str = "if-modified-since";

/// Default transfer priority, between 0.0 (lowest) and 1.0 (highest).
pub const DEFAULT_PRIORITY: f32 = 0.5;

/// A desired download. Transient; never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadRequest {
    /// Asset url.
    pub url: String,
    /// Transfer priority, clamped to `0.0..=1.0`.
    pub priority: f32,
    /// Expected body size in bytes, if known.
    pub expected_size: Option<u64>,
}

impl DownloadRequest {
    /// Creates a request with default priority and unknown size.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            priority: DEFAULT_PRIORITY,
            expected_size: None,
        }
    }

    /// Sets the priority.
    pub fn with_priority(mut self, priority: f32) -> Self {
        self.priority = priority.clamp(0.0, 1.0);
        self
    }

    /// Sets the expected body size.
    pub fn with_expected_size(mut self, bytes: u64) -> Self {
        self.expected_size = Some(bytes);
        self
    }
}

/// A request as handed to the transfer session.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferRequest {
    /// HTTP method.
    pub method: String,
    /// Target url.
    pub url: String,
    /// Headers, keyed by lowercase name.
    pub headers: BTreeMap<String, String>,
    /// Whether expensive networks may be used.
    pub allows_expensive_network_access: bool,
    /// Whether constrained networks may be used.
    pub allows_constrained_network_access: bool,
    /// Transfer priority.
    pub priority: f32,
    /// Upload size hint.
    pub expected_bytes_to_send: u64,
    /// Download size hint; `None` means unknown.
    pub expected_bytes_to_receive: Option<u64>,
}

impl TransferRequest {
    /// Creates a GET request with no headers.
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: "GET".into(),
            url: url.into(),
            headers: BTreeMap::new(),
            allows_expensive_network_access: true,
            allows_constrained_network_access: false,
            priority: DEFAULT_PRIORITY,
            expected_bytes_to_send: 0,
            expected_bytes_to_receive: None,
        }
    }

    /// Sets a header; names are case-insensitive.
    pub fn set_header(&mut self, name: &str, value: impl Into<String>) {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
    }

    /// Returns a header value; names are case-insensitive.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Returns the conditional timestamp header, if any.
    pub fn if_modified_since(&self) -> Option<&str> {
        self.header(IF_MODIFIED_SINCE)
    }

    /// Returns the key identifying equivalent requests.
    pub fn key(&self) -> RequestKey {
        RequestKey {
            method: self.method.to_ascii_uppercase(),
            url: self.url.clone(),
            if_modified_since: self.if_modified_since().map(str::to_string),
        }
    }
}

/// Normalized request identity: method, url and the headers that affect
/// caching.
///
/// Two requests with equal keys would fetch the same thing, so only one may
/// be in flight.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestKey {
    method: String,
    url: String,
    if_modified_since: Option<String>,
}

impl RequestKey {
    /// Returns the url.
    pub fn url(&self) -> &str {
        &self.url
    }
}

impl fmt::Display for RequestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.url)?;
        if let Some(since) = &self.if_modified_since {
            write!(f, " (since {since})")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_ignore_non_caching_headers() {
        let mut a = TransferRequest::get("https://pbs.example/a.png");
        a.set_header("Accept", "image/*");
        a.priority = 1.0;
        let b = TransferRequest::get("https://pbs.example/a.png");
        assert_eq!(a.key(), b.key());
    }

    #[test]
    fn conditional_header_changes_key() {
        let mut a = TransferRequest::get("https://pbs.example/a.png");
        a.set_header("If-Modified-Since", "Sun, 06 Nov 1994 08:49:37 GMT");
        let b = TransferRequest::get("https://pbs.example/a.png");

        assert_eq!(a.if_modified_since(), Some("Sun, 06 Nov 1994 08:49:37 GMT"));
        assert_ne!(a.key(), b.key());
        assert!(a.key().to_string().contains("since"));
    }

    #[test]
    fn priority_is_clamped() {
        let request = DownloadRequest::new("https://a").with_priority(4.0);
        assert_eq!(request.priority, 1.0);
        assert_eq!(request.expected_size, None);
    }
}
