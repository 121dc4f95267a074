//! Generate index files for a local tree so any static file server can host it.

use super::http::{DirectoryIndex, IndexValue};
use std::fs;
use std::io;
use std::path::Path;
use tracing::debug;

/// Index of one directory: regular files map to their size, directories to
/// an empty object. Entries are sorted by name; `index_file` itself is skipped.
pub fn build_index(dir: &Path, index_file: &str) -> io::Result<serde_json::Map<String, serde_json::Value>> {
    let mut children = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if name == index_file {
            continue;
        }
        let ft = entry.file_type()?;
        let value = if ft.is_dir() {
            IndexValue::Directory(DirectoryIndex::default())
        } else if ft.is_file() {
            IndexValue::Size(entry.metadata()?.len())
        } else {
            continue;
        };
        children.push((name, value));
    }
    children.sort_by(|a, b| a.0.cmp(&b.0));

    children
        .into_iter()
        .map(|(name, value)| {
            serde_json::to_value(value)
                .map(|v| (name, v))
                .map_err(io::Error::other)
        })
        .collect()
}

/// Write `index_file` into `root` and every directory below it. Returns the
/// number of index files written.
pub fn write_index_tree(root: &Path, index_file: &str) -> io::Result<usize> {
    let index = build_index(root, index_file)?;
    let body = serde_json::to_vec_pretty(&index).map_err(io::Error::other)?;
    fs::write(root.join(index_file), body)?;
    debug!(dir = %root.display(), entries = index.len(), "index written");

    let mut written = 1;
    for entry in fs::read_dir(root)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            written += write_index_tree(&entry.path(), index_file)?;
        }
    }
    Ok(written)
}
