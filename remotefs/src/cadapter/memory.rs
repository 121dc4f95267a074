//! In-memory transport for local development and tests.
//!
//! Objects are keyed by exact URL. Range handling can be switched off to mimic
//! servers that ignore `Range`, faults can be queued per URL, and every request
//! is logged so callers can assert on network activity.

use crate::cadapter::client::{Transport, TransportError, TransportRequest, TransportResponse};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};

/// A failure injected in place of a real response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    Status(u16),
    Timeout,
    Connect,
}

#[derive(Default)]
pub struct MemoryTransport {
    objects: Mutex<HashMap<String, Bytes>>,
    faults: Mutex<HashMap<String, VecDeque<Fault>>>,
    log: Mutex<Vec<TransportRequest>>,
    ignore_ranges: AtomicBool,
    required_bearer: Mutex<Option<String>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, url: impl Into<String>, body: impl Into<Bytes>) {
        self.objects.lock().insert(url.into(), body.into());
    }

    pub fn remove(&self, url: &str) {
        self.objects.lock().remove(url);
    }

    /// When set, ranged requests are answered with the whole object.
    pub fn set_ignore_ranges(&self, ignore: bool) {
        self.ignore_ranges.store(ignore, Ordering::SeqCst);
    }

    /// Reject requests without this bearer token with `401`.
    pub fn require_bearer(&self, token: Option<String>) {
        *self.required_bearer.lock() = token;
    }

    /// Fail the next `times` requests for `url` with `fault`.
    pub fn fail_next(&self, url: impl Into<String>, fault: Fault, times: usize) {
        let mut faults = self.faults.lock();
        let queue = faults.entry(url.into()).or_default();
        queue.extend(std::iter::repeat_n(fault, times));
    }

    pub fn requests(&self) -> Vec<TransportRequest> {
        self.log.lock().clone()
    }

    pub fn request_count(&self) -> usize {
        self.log.lock().len()
    }

    pub fn hits(&self, url: &str) -> usize {
        self.log.lock().iter().filter(|r| r.url == url).count()
    }

    pub fn clear_log(&self) {
        self.log.lock().clear();
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn get(&self, request: TransportRequest) -> Result<TransportResponse, TransportError> {
        self.log.lock().push(request.clone());

        let fault = self
            .faults
            .lock()
            .get_mut(&request.url)
            .and_then(VecDeque::pop_front);
        match fault {
            Some(Fault::Status(code)) => return Ok(TransportResponse::new(code, Vec::new())),
            Some(Fault::Timeout) => return Err(TransportError::Timeout(request.url)),
            Some(Fault::Connect) => return Err(TransportError::Connect(request.url)),
            None => {}
        }

        if let Some(required) = self.required_bearer.lock().as_ref()
            && request.bearer.as_ref() != Some(required)
        {
            return Ok(TransportResponse::new(401, Vec::new()));
        }

        let Some(body) = self.objects.lock().get(&request.url).cloned() else {
            return Ok(TransportResponse::new(404, Vec::new()));
        };
        let size = body.len() as u64;
        match request.range {
            Some(range) if !self.ignore_ranges.load(Ordering::SeqCst) => {
                if range.start >= size {
                    return Ok(TransportResponse::new(416, Vec::new()));
                }
                let end = range.end_inclusive.min(size - 1);
                let part = body.slice(range.start as usize..=end as usize);
                Ok(TransportResponse::new(206, part).with_header(
                    "Content-Range",
                    format!("bytes {}-{}/{}", range.start, end, size),
                ))
            }
            _ => Ok(TransportResponse::new(200, body)
                .with_header("Content-Length", size.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cadapter::client::ByteRange;

    #[tokio::test]
    async fn ranges_faults_and_log() {
        let t = MemoryTransport::new();
        t.insert("mem://obj", &b"abcdefgh"[..]);

        let ranged = TransportRequest::get("mem://obj").with_range(ByteRange::new(2, 3));
        let resp = t.get(ranged.clone()).await.unwrap();
        assert_eq!(resp.status, 206);
        assert_eq!(&resp.body[..], b"cde");

        t.set_ignore_ranges(true);
        let resp = t.get(ranged.clone()).await.unwrap();
        assert_eq!(resp.status, 200);
        assert_eq!(&resp.body[..], b"abcdefgh");

        t.fail_next("mem://obj", Fault::Timeout, 1);
        assert!(matches!(
            t.get(ranged.clone()).await,
            Err(TransportError::Timeout(_))
        ));
        assert_eq!(t.get(ranged).await.unwrap().status, 200);

        assert_eq!(t.get(TransportRequest::get("mem://none")).await.unwrap().status, 404);
        assert_eq!(t.hits("mem://obj"), 4);
        assert_eq!(t.request_count(), 5);
    }

    #[tokio::test]
    async fn bearer_requirement() {
        let t = MemoryTransport::new();
        t.insert("mem://secret", &b"x"[..]);
        t.require_bearer(Some("tok-1".into()));
        let resp = t.get(TransportRequest::get("mem://secret")).await.unwrap();
        assert_eq!(resp.status, 401);
        let resp = t
            .get(TransportRequest::get("mem://secret").with_bearer(Some("tok-1".into())))
            .await
            .unwrap();
        assert_eq!(resp.status, 200);
    }
}
