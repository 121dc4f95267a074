//! Remote sources
//!
//! A source knows how to turn a directory location into a listing request,
//! how to parse the reply into [`DirectoryEntry`] values, and how to address a
//! file (or a byte range of it) for download. It never performs I/O itself:
//! the requests it builds go through the scheduler on the source's transport.
//!
//! Submodules:
//! - `http`: static HTTP trees described by per-directory index files
//! - `cloud`: cloud storage providers reached with a bearer credential
//! - `index`: generation of index files for a local tree
pub mod cloud;
pub mod http;
pub mod index;

use crate::cadapter::{ByteRange, Transport, TransportRequest};
use crate::meta::DirectoryEntry;
use crate::vfs::error::Result;
use std::sync::Arc;

/// Credential capability implemented by every provider that authenticates.
pub trait AccessTokenSource: Send + Sync {
    /// The token requests are currently sent with, if any.
    fn current_access_token(&self) -> Option<String>;
}

/// Whether a child name reported by a server can become one path component.
/// Empty names, `.`, `..` and names with a separator are rejected.
pub fn is_valid_child_name(name: &str) -> bool {
    !name.is_empty() && name != "." && name != ".." && !name.contains('/')
}

pub trait RemoteSource: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &str;

    fn transport(&self) -> Arc<dyn Transport>;

    /// Location of the namespace root directory.
    fn root_location(&self) -> String;

    fn listing_request(&self, location: &str) -> TransportRequest;

    /// Parse a listing body for `dir`, preserving the server's order.
    fn parse_listing(&self, dir: &DirectoryEntry, body: &[u8]) -> Result<Vec<DirectoryEntry>>;

    /// Request for a file identified by [`DirectoryEntry::remote_key`].
    fn download_request(&self, remote_key: &str, range: Option<ByteRange>) -> TransportRequest;

    fn credentials(&self) -> Option<&dyn AccessTokenSource> {
        None
    }
}

pub use cloud::{CloudSource, StorageFile, StorageProvider};
pub use http::HttpIndexSource;
