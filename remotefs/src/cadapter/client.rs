//! Transport abstraction: one GET, optionally ranged, per call.
//!
//! Adapters (HTTP, local directory, in-memory) implement [`Transport`]; the
//! request scheduler is the only caller and owns retry and status mapping.

use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;
use thiserror::Error;

/// Inclusive byte range, rendered as `Range: bytes=<start>-<end>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ByteRange {
    pub start: u64,
    pub end_inclusive: u64,
}

impl ByteRange {
    /// Range covering `len` bytes starting at `start`. `len` must be non-zero.
    pub fn new(start: u64, len: u64) -> Self {
        debug_assert!(len > 0, "empty byte range");
        Self {
            start,
            end_inclusive: start + len.max(1) - 1,
        }
    }

    pub fn len(&self) -> u64 {
        self.end_inclusive - self.start + 1
    }

    pub fn is_empty(&self) -> bool {
        self.end_inclusive < self.start
    }

    pub fn header_value(&self) -> String {
        format!("bytes={}-{}", self.start, self.end_inclusive)
    }

    /// Parse a single-range `bytes=a-b` header value.
    pub fn parse_header(value: &str) -> Option<Self> {
        let spec = value.trim().strip_prefix("bytes=")?;
        let (start, end) = spec.split_once('-')?;
        let start = start.trim().parse().ok()?;
        let end = end.trim().parse().ok()?;
        (end >= start).then_some(Self {
            start,
            end_inclusive: end,
        })
    }
}

impl fmt::Display for ByteRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end_inclusive)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportRequest {
    pub url: String,
    pub range: Option<ByteRange>,
    /// Opaque credential sent as `Authorization: Bearer <token>`.
    pub bearer: Option<String>,
}

impl TransportRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            range: None,
            bearer: None,
        }
    }

    pub fn with_range(self, range: ByteRange) -> Self {
        Self {
            range: Some(range),
            ..self
        }
    }

    pub fn with_bearer(self, token: Option<String>) -> Self {
        Self {
            bearer: token,
            ..self
        }
    }
}

#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl TransportResponse {
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Total object size from `Content-Range: bytes a-b/total`, if declared.
    pub fn content_range_total(&self) -> Option<u64> {
        let value = self.header("content-range")?;
        let (_, total) = value.rsplit_once('/')?;
        total.trim().parse().ok()
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("timed out: {0}")]
    Timeout(String),
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("interrupted: {0}")]
    Interrupted(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl TransportError {
    pub fn is_retryable(&self) -> bool {
        !matches!(self, TransportError::InvalidRequest(_))
    }
}

/// A network (or network-like) GET primitive.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn get(&self, request: TransportRequest) -> Result<TransportResponse, TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_header_is_inclusive() {
        let r = ByteRange::new(5_000_000, 5_000_000);
        assert_eq!(r.header_value(), "bytes=5000000-9999999");
        assert_eq!(r.len(), 5_000_000);
        assert_eq!(ByteRange::parse_header("bytes=5000000-9999999"), Some(r));
        assert_eq!(ByteRange::parse_header("bytes=9-3"), None);
        assert_eq!(ByteRange::parse_header("items=0-3"), None);
    }

    #[test]
    fn content_range_total_is_parsed_case_insensitively() {
        let resp = TransportResponse::new(206, vec![0u8])
            .with_header("Content-Range", "bytes 0-0/12000000");
        assert_eq!(resp.content_range_total(), Some(12_000_000));
        assert!(resp.is_success());

        let resp = TransportResponse::new(206, vec![0u8]).with_header("content-range", "bytes 0-0/*");
        assert_eq!(resp.content_range_total(), None);
    }

    #[test]
    fn only_malformed_requests_are_final() {
        assert!(TransportError::Timeout("t".into()).is_retryable());
        assert!(TransportError::Connect("c".into()).is_retryable());
        assert!(!TransportError::InvalidRequest("bad url".into()).is_retryable());
    }
}
