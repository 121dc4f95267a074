//! Chunk cache (chuck)
//!
//! Responsibilities:
//! - Split remote objects into fixed-size chunks and name their local artifacts.
//! - Track which chunks of each object are cached, verifying artifact sizes.
//! - Download missing chunks through the request scheduler and fall back to a
//!   whole-object artifact when the transport ignores byte ranges.
//!
//! Submodules:
//! - `chunk`: chunk layout math and artifact naming
//! - `util`: splitting a read range into per-chunk spans
//! - `store`: the chunk store, file identities and per-object chunk state
pub mod chunk;
pub mod store;
pub mod util;

pub use chunk::{ChunkLayout, DEFAULT_CHUNK_SIZE, chunk_artifact_path};
pub use store::{ChunkState, ChunkStore, FileIdentity};
