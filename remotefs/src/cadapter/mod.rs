//! Transport adapters (cAdapter)
//!
//! Submodules:
//! - `client`: the `Transport` trait plus request/response/range types
//! - `http`: reqwest-backed HTTP(S) transport
//! - `localfs`: serves `file://` locations from a local directory
//! - `memory`: in-memory objects with fault injection, for tests and demos
//!
//! Retry and status mapping live in the request scheduler, not here: an
//! adapter reports exactly what one GET produced.
pub mod client;
pub mod http;
pub mod localfs;
pub mod memory;

pub use client::{ByteRange, Transport, TransportError, TransportRequest, TransportResponse};
