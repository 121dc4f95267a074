use super::request::{Request, RequestId, RequestOutcome};
use crate::vfs::error::RemoteError;
use futures::future::poll_fn;
use futures::task::noop_waker_ref;
use parking_lot::Mutex;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::runtime::{Handle, Runtime};
use tokio::sync::oneshot::{self, error::TryRecvError};
use tokio::task::JoinHandle;
use tracing::{debug, trace};

pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(10);
pub const DEFAULT_RETRY_BUDGET: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Period of the driving timer, and the sleep between busy-wait checks.
    pub tick_interval: Duration,
    /// Retries allowed after the first attempt of a request.
    pub retry_budget: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval: DEFAULT_TICK_INTERVAL,
            retry_budget: DEFAULT_RETRY_BUDGET,
        }
    }
}

impl SchedulerConfig {
    pub fn tick_interval(self, tick_interval: Duration) -> Self {
        Self {
            tick_interval,
            ..self
        }
    }

    pub fn retry_budget(self, retry_budget: u32) -> Self {
        Self {
            retry_budget,
            ..self
        }
    }
}

struct Shared {
    config: SchedulerConfig,
    /// Newly submitted requests; submitters only ever touch this lock.
    pending: Mutex<Vec<Request>>,
    /// Requests being driven; only a tick touches this lock.
    active: Mutex<Vec<Request>>,
    ticks: AtomicU64,
    handle: Handle,
    /// Private current-thread runtime of a cooperative scheduler. Its I/O
    /// driver only turns inside [`RequestScheduler::tick`].
    owned: Option<Runtime>,
    timer_running: AtomicBool,
}

impl Drop for Shared {
    fn drop(&mut self) {
        // the last handle may go away on an async thread, where a blocking
        // shutdown would panic
        if let Some(rt) = self.owned.take() {
            rt.shutdown_background();
        }
    }
}

/// Cooperative driver for every in-flight [`Request`].
///
/// With a tokio runtime available a timer task ticks the scheduler while work
/// exists. Without one, the scheduler owns a private current-thread runtime
/// and waiters drive it themselves by ticking, sleeping one period and
/// checking again.
#[derive(Clone)]
pub struct RequestScheduler {
    shared: Arc<Shared>,
}

impl RequestScheduler {
    /// Timer-driven when called inside a tokio runtime, cooperative otherwise.
    pub fn new(config: SchedulerConfig) -> io::Result<Self> {
        match Handle::try_current() {
            Ok(handle) => Ok(Self::with_runtime(config, handle)),
            Err(_) => Self::cooperative(config),
        }
    }

    pub fn with_runtime(config: SchedulerConfig, runtime: Handle) -> Self {
        Self::build(config, runtime, None)
    }

    /// No timer: requests only advance when someone calls [`tick`](Self::tick).
    ///
    /// Must not be ticked from inside another tokio runtime.
    pub fn cooperative(config: SchedulerConfig) -> io::Result<Self> {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .thread_name("remotefs-io")
            .build()?;
        Ok(Self::build(config, rt.handle().clone(), Some(rt)))
    }

    fn build(config: SchedulerConfig, handle: Handle, owned: Option<Runtime>) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                pending: Mutex::new(Vec::new()),
                active: Mutex::new(Vec::new()),
                ticks: AtomicU64::new(0),
                handle,
                owned,
                timer_running: AtomicBool::new(false),
            }),
        }
    }

    pub fn config(&self) -> SchedulerConfig {
        self.shared.config
    }

    pub fn is_timer_driven(&self) -> bool {
        self.shared.owned.is_none()
    }

    /// Run blocking work (local file I/O) on the pool of the runtime behind
    /// this scheduler. The handle can be awaited from any executor.
    pub fn spawn_blocking<F, R>(&self, f: F) -> JoinHandle<R>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        self.shared.handle.spawn_blocking(f)
    }

    pub fn timer_running(&self) -> bool {
        self.shared.timer_running.load(Ordering::Acquire)
    }

    pub fn pending_len(&self) -> usize {
        self.shared.pending.lock().len()
    }

    pub fn active_len(&self) -> usize {
        self.shared.active.lock().len()
    }

    pub fn is_idle(&self) -> bool {
        self.shared.pending.lock().is_empty() && self.shared.active.lock().is_empty()
    }

    pub fn ticks(&self) -> u64 {
        self.shared.ticks.load(Ordering::Acquire)
    }

    /// Queue a request whose completion callback is already installed.
    pub fn enqueue(&self, request: Request) -> RequestId {
        let id = request.id();
        trace!(id, kind = %request.kind(), label = request.label(), "request queued");
        self.shared.pending.lock().push(request);
        self.ensure_timer();
        id
    }

    /// Queue a request and get a handle resolved by its completion callback.
    pub fn submit(&self, request: Request) -> RequestHandle {
        let (tx, rx) = oneshot::channel();
        let request = request.on_complete(move |_, outcome| {
            // the waiter may have gone away; the result is then discarded
            let _ = tx.send(outcome);
        });
        let id = self.enqueue(request);
        RequestHandle {
            id,
            rx,
            scheduler: self.clone(),
        }
    }

    /// One scheduler pass: admit pending requests, advance live ones, then
    /// run callbacks of those that reached a terminal state. Safe to call
    /// from inside a completion callback. Returns `true` while work remains.
    pub fn tick(&self) -> bool {
        let tick = self.shared.ticks.fetch_add(1, Ordering::AcqRel) + 1;
        let budget = self.shared.config.retry_budget;

        let done = {
            let mut active = self.shared.active.lock();

            let admitted = std::mem::take(&mut *self.shared.pending.lock());
            for mut req in admitted {
                req.admit(tick);
                active.push(req);
            }

            match &self.shared.owned {
                // one pass of the private runtime turns its I/O driver and
                // runs tasks spawned by transports before requests are polled
                Some(rt) => rt.block_on(async {
                    tokio::task::yield_now().await;
                    advance_all(&mut active, tick, budget);
                }),
                None => {
                    let _guard = self.shared.handle.enter();
                    advance_all(&mut active, tick, budget);
                }
            }

            let (done, live): (Vec<_>, Vec<_>) = std::mem::take(&mut *active)
                .into_iter()
                .partition(|r| r.state().is_terminal());
            *active = live;
            done
        };

        if !done.is_empty() {
            trace!(tick, finished = done.len(), "finalizing requests");
        }
        // callbacks run without holding any scheduler lock
        for req in done {
            req.finalize();
        }
        !self.is_idle()
    }

    fn ensure_timer(&self) {
        if !self.is_timer_driven() {
            return;
        }
        if self
            .shared
            .timer_running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            debug!("scheduler timer started");
            self.shared.handle.spawn(self.clone().run_timer());
        }
    }

    async fn run_timer(self) {
        let mut interval = tokio::time::interval(self.shared.config.tick_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            if self.tick() {
                continue;
            }
            self.shared.timer_running.store(false, Ordering::Release);
            // a submit racing with the idle check may have seen the timer as running
            if self.is_idle()
                || self
                    .shared
                    .timer_running
                    .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                    .is_err()
            {
                break;
            }
        }
        debug!(ticks = self.ticks(), "scheduler timer stopped");
    }
}

fn advance_all(active: &mut [Request], tick: u64, budget: u32) {
    let mut cx = Context::from_waker(noop_waker_ref());
    for req in active.iter_mut() {
        if !req.admitted_in(tick) {
            req.advance(&mut cx, budget);
        }
    }
}

/// Completion signal for one submitted request.
pub struct RequestHandle {
    id: RequestId,
    rx: oneshot::Receiver<RequestOutcome>,
    scheduler: RequestScheduler,
}

impl RequestHandle {
    pub fn id(&self) -> RequestId {
        self.id
    }

    /// Resolve once the request is terminal.
    ///
    /// Timer-driven schedulers just await the callback's signal. Cooperative
    /// ones are ticked from here, sleeping one period between checks; that
    /// path blocks the calling thread and is meant for hosts without a runtime.
    pub async fn wait(self) -> RequestOutcome {
        let RequestHandle {
            mut rx, scheduler, ..
        } = self;
        if scheduler.is_timer_driven() {
            return rx.await.unwrap_or(Err(RemoteError::Abandoned));
        }
        poll_fn(move |cx| {
            if let Some(outcome) = try_take(&mut rx) {
                return Poll::Ready(outcome);
            }
            scheduler.tick();
            if let Some(outcome) = try_take(&mut rx) {
                return Poll::Ready(outcome);
            }
            std::thread::sleep(scheduler.config().tick_interval);
            cx.waker().wake_by_ref();
            Poll::Pending
        })
        .await
    }

    /// Busy-wait until terminal, ticking whenever no timer is doing so.
    ///
    /// Must not be called from a thread that runs the scheduler's runtime.
    pub fn wait_blocking(mut self) -> RequestOutcome {
        loop {
            if let Some(outcome) = try_take(&mut self.rx) {
                return outcome;
            }
            if !self.scheduler.timer_running() {
                self.scheduler.tick();
                if let Some(outcome) = try_take(&mut self.rx) {
                    return outcome;
                }
            }
            std::thread::sleep(self.scheduler.config().tick_interval);
        }
    }
}

fn try_take(rx: &mut oneshot::Receiver<RequestOutcome>) -> Option<RequestOutcome> {
    match rx.try_recv() {
        Ok(outcome) => Some(outcome),
        Err(TryRecvError::Empty) => None,
        Err(TryRecvError::Closed) => Some(Err(RemoteError::Abandoned)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cadapter::localfs::LocalDirTransport;
    use crate::cadapter::memory::{Fault, MemoryTransport};
    use crate::cadapter::{ByteRange, Transport, TransportRequest};
    use crate::sched::request::RequestKind;

    fn fast() -> SchedulerConfig {
        SchedulerConfig::default().tick_interval(Duration::from_millis(1))
    }

    fn listing(t: &Arc<MemoryTransport>, url: &str) -> Request {
        let transport: Arc<dyn Transport> = t.clone();
        Request::new(
            RequestKind::ListingFetch,
            url,
            transport,
            TransportRequest::get(url),
        )
    }

    #[test]
    fn retries_twice_then_finishes_with_one_callback() {
        let t = Arc::new(MemoryTransport::new());
        t.insert("mem://idx", &b"{}"[..]);
        t.fail_next("mem://idx", Fault::Timeout, 1);
        t.fail_next("mem://idx", Fault::Status(502), 1);

        let sched = RequestScheduler::cooperative(fast().retry_budget(3)).unwrap();
        let calls = Arc::new(Mutex::new(Vec::new()));
        let sink = calls.clone();
        sched.enqueue(
            listing(&t, "mem://idx").on_complete(move |_, outcome| sink.lock().push(outcome)),
        );

        let mut guard = 0;
        while sched.tick() {
            guard += 1;
            assert!(guard < 50, "scheduler never drained");
        }
        let calls = calls.lock();
        assert_eq!(calls.len(), 1);
        let resp = calls[0].as_ref().unwrap();
        assert_eq!(&resp.body[..], b"{}");
        assert_eq!(t.hits("mem://idx"), 3);
    }

    #[test]
    fn exhausted_budget_fails() {
        let t = Arc::new(MemoryTransport::new());
        t.fail_next("mem://idx", Fault::Status(500), 10);
        let sched = RequestScheduler::cooperative(fast().retry_budget(2)).unwrap();
        let handle = sched.submit(listing(&t, "mem://idx"));
        let outcome = handle.wait_blocking();
        assert!(matches!(
            outcome,
            Err(RemoteError::Transport {
                status: Some(500),
                retryable: true,
                ..
            })
        ));
        // first attempt plus two retries
        assert_eq!(t.hits("mem://idx"), 3);
        assert!(sched.is_idle());
    }

    #[test]
    fn admission_tick_does_no_io() {
        let t = Arc::new(MemoryTransport::new());
        t.insert("mem://idx", &b"{}"[..]);
        let sched = RequestScheduler::cooperative(fast()).unwrap();
        sched.enqueue(listing(&t, "mem://idx"));
        assert_eq!(sched.pending_len(), 1);

        sched.tick();
        assert_eq!(sched.pending_len(), 0);
        assert_eq!(sched.active_len(), 1);
        assert_eq!(t.request_count(), 0);

        assert!(!sched.tick());
        assert_eq!(t.request_count(), 1);
    }

    #[test]
    fn callbacks_follow_terminal_order() {
        let t = Arc::new(MemoryTransport::new());
        t.insert("mem://a", &b"a"[..]);
        t.insert("mem://b", &b"b"[..]);
        // a needs one retry, so b terminates first
        t.fail_next("mem://a", Fault::Connect, 1);

        let sched = RequestScheduler::cooperative(fast()).unwrap();
        let order = Arc::new(Mutex::new(Vec::new()));
        for url in ["mem://a", "mem://b"] {
            let sink = order.clone();
            sched.enqueue(listing(&t, url).on_complete(move |_, _| sink.lock().push(url)));
        }
        while sched.tick() {}
        assert_eq!(*order.lock(), vec!["mem://b", "mem://a"]);
    }

    #[test]
    fn callback_may_submit_and_tick() {
        let t = Arc::new(MemoryTransport::new());
        t.insert("mem://a", &b"a"[..]);
        t.insert("mem://b", &b"b"[..]);
        let sched = RequestScheduler::cooperative(fast()).unwrap();

        let inner = sched.clone();
        let follow_up = listing(&t, "mem://b");
        let seen = Arc::new(Mutex::new(None));
        let sink = seen.clone();
        sched.enqueue(listing(&t, "mem://a").on_complete(move |_, _| {
            let handle = inner.submit(follow_up);
            // nested tick from inside a completion callback
            inner.tick();
            *sink.lock() = Some(handle.wait_blocking());
        }));
        while sched.tick() {}
        let outcome = seen.lock().take().unwrap();
        assert_eq!(&outcome.unwrap().body[..], b"b");
    }

    #[test]
    fn cooperative_async_wait() {
        let t = Arc::new(MemoryTransport::new());
        t.insert("mem://a", &b"payload"[..]);
        t.fail_next("mem://a", Fault::Status(503), 2);
        let sched = RequestScheduler::cooperative(fast()).unwrap();
        let handle = sched.submit(listing(&t, "mem://a"));
        let outcome = futures::executor::block_on(handle.wait());
        assert_eq!(&outcome.unwrap().body[..], b"payload");
    }

    #[test]
    fn cooperative_scheduler_drives_tokio_fs_transport() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("a.bin"), b"0123456789").unwrap();
        let local = LocalDirTransport::new(tmp.path());
        let url = format!("{}/a.bin", local.root_location());
        let transport: Arc<dyn Transport> = Arc::new(local);

        let sched = RequestScheduler::cooperative(fast()).unwrap();
        assert!(!sched.is_timer_driven());
        let wire = TransportRequest::get(&url).with_range(ByteRange::new(2, 4));
        let request = Request::new(RequestKind::ChunkDownload, "a.bin", transport.clone(), wire);
        let outcome = futures::executor::block_on(sched.submit(request).wait());
        assert_eq!(&outcome.unwrap().body[..], b"2345");

        let request = Request::new(
            RequestKind::ListingFetch,
            "a.bin",
            transport,
            TransportRequest::get(&url),
        );
        let outcome = sched.submit(request).wait_blocking();
        assert_eq!(&outcome.unwrap().body[..], b"0123456789");
        assert!(sched.is_idle());
        assert!(!sched.timer_running());
    }

    #[test]
    fn blocking_work_runs_without_ambient_runtime() {
        let sched = RequestScheduler::cooperative(fast()).unwrap();
        let got = futures::executor::block_on(sched.spawn_blocking(|| 6 * 7)).unwrap();
        assert_eq!(got, 42);
    }

    #[tokio::test]
    async fn timer_drives_requests_and_stops_when_idle() {
        let t = Arc::new(MemoryTransport::new());
        t.insert("mem://a", &b"a"[..]);
        t.fail_next("mem://a", Fault::Status(503), 2);
        let sched = RequestScheduler::new(fast()).unwrap();
        assert!(sched.is_timer_driven());

        let outcome = sched.submit(listing(&t, "mem://a")).wait().await;
        assert_eq!(&outcome.unwrap().body[..], b"a");

        let mut waited = 0;
        while sched.timer_running() {
            tokio::time::sleep(Duration::from_millis(2)).await;
            waited += 1;
            assert!(waited < 500, "timer kept running while idle");
        }
        assert!(sched.is_idle());

        // a later submission restarts the timer
        let outcome = sched.submit(listing(&t, "mem://a")).wait().await;
        assert!(outcome.is_ok());
    }
}
