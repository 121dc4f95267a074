//! One network operation and its state machine.
//!
//! ```text
//! INIT --admit--> PROCESSING --ok--> FINISHED
//!                   |   ^
//!         transient |   | next tick
//!                   v   |
//!                   RETRY        (budget exhausted / final error) --> FAILED
//! ```

use crate::cadapter::{Transport, TransportError, TransportRequest, TransportResponse};
use crate::vfs::error::RemoteError;
use futures::future::BoxFuture;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

pub type RequestId = u64;

/// What the scheduler hands to a completion callback.
pub type RequestOutcome = Result<TransportResponse, RemoteError>;

pub type CompletionCallback = Box<dyn FnOnce(RequestId, RequestOutcome) + Send + 'static>;

static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    ListingFetch,
    ChunkDownload,
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestKind::ListingFetch => f.write_str("listing"),
            RequestKind::ChunkDownload => f.write_str("chunk"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    Init,
    Processing,
    Retry,
    Finished,
    Failed,
}

impl RequestState {
    pub fn is_terminal(self) -> bool {
        matches!(self, RequestState::Finished | RequestState::Failed)
    }
}

pub struct Request {
    id: RequestId,
    kind: RequestKind,
    /// Logical path the request works for; used in errors and logs.
    label: String,
    transport: Arc<dyn Transport>,
    wire: TransportRequest,
    state: RequestState,
    retry_count: u32,
    retry_budget: Option<u32>,
    attempts: u32,
    in_flight: Option<BoxFuture<'static, Result<TransportResponse, TransportError>>>,
    outcome: Option<RequestOutcome>,
    callback: Option<CompletionCallback>,
    admitted_tick: Option<u64>,
    created: Instant,
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("label", &self.label)
            .field("url", &self.wire.url)
            .field("range", &self.wire.range)
            .field("state", &self.state)
            .field("retry_count", &self.retry_count)
            .finish()
    }
}

impl Request {
    pub fn new(
        kind: RequestKind,
        label: impl Into<String>,
        transport: Arc<dyn Transport>,
        wire: TransportRequest,
    ) -> Self {
        Self {
            id: NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed),
            kind,
            label: label.into(),
            transport,
            wire,
            state: RequestState::Init,
            retry_count: 0,
            retry_budget: None,
            attempts: 0,
            in_flight: None,
            outcome: None,
            callback: None,
            admitted_tick: None,
            created: Instant::now(),
        }
    }

    /// Override the scheduler-wide retry budget for this request only.
    pub fn with_retry_budget(self, budget: u32) -> Self {
        Self {
            retry_budget: Some(budget),
            ..self
        }
    }

    /// Install the completion callback. A later call wraps the earlier one so
    /// both run, earlier first, with the same outcome.
    pub fn on_complete<F>(mut self, f: F) -> Self
    where
        F: FnOnce(RequestId, RequestOutcome) + Send + 'static,
    {
        self.callback = Some(match self.callback.take() {
            None => Box::new(f),
            Some(prev) => Box::new(move |id, outcome: RequestOutcome| {
                prev(id, outcome.clone());
                f(id, outcome);
            }),
        });
        self
    }

    pub fn id(&self) -> RequestId {
        self.id
    }

    pub fn kind(&self) -> RequestKind {
        self.kind
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn state(&self) -> RequestState {
        self.state
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn wire(&self) -> &TransportRequest {
        &self.wire
    }

    pub(crate) fn admit(&mut self, tick: u64) {
        debug_assert_eq!(self.state, RequestState::Init);
        self.state = RequestState::Processing;
        self.admitted_tick = Some(tick);
    }

    pub(crate) fn admitted_in(&self, tick: u64) -> bool {
        self.admitted_tick == Some(tick)
    }

    /// Drive the request one step. I/O futures are polled, never awaited: a
    /// pending transfer simply stays in flight until a later tick.
    pub(crate) fn advance(&mut self, cx: &mut Context<'_>, default_budget: u32) {
        match self.state {
            RequestState::Retry => {
                self.state = RequestState::Processing;
            }
            RequestState::Processing => {}
            _ => return,
        }

        let fut = self.in_flight.get_or_insert_with(|| {
            self.attempts += 1;
            debug!(
                id = self.id,
                kind = %self.kind,
                url = %self.wire.url,
                range = ?self.wire.range,
                attempt = self.attempts,
                "starting transfer"
            );
            let transport = Arc::clone(&self.transport);
            let wire = self.wire.clone();
            Box::pin(async move { transport.get(wire).await })
        });

        if let Poll::Ready(result) = fut.as_mut().poll(cx) {
            self.in_flight = None;
            self.settle(result, self.retry_budget.unwrap_or(default_budget));
        }
    }

    fn settle(&mut self, result: Result<TransportResponse, TransportError>, budget: u32) {
        let err = match result {
            Ok(resp) if resp.is_success() => {
                debug!(
                    id = self.id,
                    kind = %self.kind,
                    status = resp.status,
                    len = resp.body.len(),
                    elapsed_ms = saturating_millis(self.created.elapsed()),
                    "request finished"
                );
                self.state = RequestState::Finished;
                self.outcome = Some(Ok(resp));
                return;
            }
            Ok(resp) => RemoteError::from_status(resp.status, self.label.as_str()),
            Err(e) => RemoteError::Transport {
                path: self.label.as_str().into(),
                status: None,
                retryable: e.is_retryable(),
                message: e.to_string(),
            },
        };

        if err.is_retryable() && self.retry_count < budget {
            self.retry_count += 1;
            warn!(
                id = self.id,
                kind = %self.kind,
                retry = self.retry_count,
                budget,
                error = %err,
                "transient failure, retrying"
            );
            self.state = RequestState::Retry;
        } else {
            warn!(id = self.id, kind = %self.kind, error = %err, "request failed");
            self.state = RequestState::Failed;
            self.outcome = Some(Err(err));
        }
    }

    /// Run the completion callback, consuming the request.
    pub(crate) fn finalize(mut self) {
        let outcome = self.outcome.take().unwrap_or(Err(RemoteError::Abandoned));
        if let Some(cb) = self.callback.take() {
            cb(self.id, outcome);
        }
    }
}

fn saturating_millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cadapter::memory::{Fault, MemoryTransport};
    use futures::task::noop_waker_ref;
    use parking_lot::Mutex;

    fn cx() -> Context<'static> {
        Context::from_waker(noop_waker_ref())
    }

    #[test]
    fn transient_failure_moves_to_retry_then_processing() {
        let t = Arc::new(MemoryTransport::new());
        t.insert("mem://a", &b"hello"[..]);
        t.fail_next("mem://a", Fault::Status(503), 1);
        let mut req = Request::new(
            RequestKind::ListingFetch,
            "/data",
            t.clone(),
            TransportRequest::get("mem://a"),
        );
        req.admit(1);
        let mut cx = cx();

        req.advance(&mut cx, 3);
        assert_eq!(req.state(), RequestState::Retry);
        assert_eq!(req.retry_count(), 1);

        req.advance(&mut cx, 3);
        assert_eq!(req.state(), RequestState::Finished);
        assert_eq!(req.attempts(), 2);
    }

    #[test]
    fn final_status_fails_without_retry() {
        let t = Arc::new(MemoryTransport::new());
        let mut req = Request::new(
            RequestKind::ChunkDownload,
            "/data/missing",
            t.clone(),
            TransportRequest::get("mem://missing"),
        );
        req.admit(1);
        req.advance(&mut cx(), 3);
        assert_eq!(req.state(), RequestState::Failed);
        assert_eq!(req.retry_count(), 0);

        let seen = Arc::new(Mutex::new(None));
        let sink = seen.clone();
        req.on_complete(move |_, outcome| *sink.lock() = Some(outcome))
            .finalize();
        assert!(matches!(
            seen.lock().take(),
            Some(Err(RemoteError::NotFound { .. }))
        ));
    }

    #[test]
    fn chained_callbacks_both_run() {
        let t = Arc::new(MemoryTransport::new());
        t.insert("mem://a", &b"x"[..]);
        let order = Arc::new(Mutex::new(Vec::new()));
        let (o1, o2) = (order.clone(), order.clone());
        let mut req = Request::new(
            RequestKind::ListingFetch,
            "/data",
            t,
            TransportRequest::get("mem://a"),
        )
        .on_complete(move |_, _| o1.lock().push(1))
        .on_complete(move |_, _| o2.lock().push(2));
        req.admit(1);
        req.advance(&mut cx(), 0);
        req.finalize();
        assert_eq!(*order.lock(), vec![1, 2]);
    }

    #[test]
    fn elapsed_millis_saturate() {
        assert_eq!(saturating_millis(Duration::from_millis(1500)), 1500);
        assert_eq!(saturating_millis(Duration::MAX), u64::MAX);
    }
}
