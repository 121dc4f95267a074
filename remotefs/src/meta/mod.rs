//! Entry metadata
//!
//! Submodules:
//! - `path`: normalized logical paths and cache-location mapping
//! - `entry`: directory entries as reported by remote listings, list filters
pub mod entry;
pub mod path;

pub use entry::{DirectoryEntry, ListMode};
pub use path::RemotePath;
