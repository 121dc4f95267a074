//! Request scheduling (sched)
//!
//! Every network operation is a [`Request`] driven through
//! `INIT -> PROCESSING -> (RETRY ->) FINISHED | FAILED` by the
//! [`RequestScheduler`]. Ticks come from a tokio timer task when a runtime is
//! available. Otherwise the scheduler keeps a private current-thread runtime
//! for transport I/O and busy-waiting callers tick it.
//!
//! Submodules:
//! - `request`: the request state machine, retry classification and callbacks
//! - `scheduler`: pending/active collections, the tick, the timer and handles
pub mod request;
pub mod scheduler;

pub use request::{Request, RequestId, RequestKind, RequestOutcome, RequestState};
pub use scheduler::{RequestHandle, RequestScheduler, SchedulerConfig};
