//! VFS layer (virtual filesystem)
//!
//! Responsibilities:
//! - Present mounted remote sources as one read-only tree of normalized paths.
//! - Cache directory listings per path and evict them when credentials rotate.
//! - Open files as seekable streams backed by the chunk store.
//!
//! Submodules:
//! - `cache`: path-keyed listing cache with validity tokens
//! - `config`: filesystem configuration
//! - `error`: the crate error type
//! - `fs`: shared cache context, mount table and filesystem root
//! - `lister`: per-mount listing and path resolution
//! - `stream`: seekable read streams and their blocking adapter
pub mod cache;
pub mod config;
pub mod error;
pub mod fs;
pub mod lister;
pub mod stream;

pub use cache::{CachedListing, PathCache};
pub use config::RemoteFsConfig;
pub use error::{PathHint, RemoteError, Result};
pub use fs::{CacheContext, Listing, RemoteFs};
pub use lister::DirectoryLister;
pub use stream::{BlockingReadStream, RemoteReadStream};
