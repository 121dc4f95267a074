//! Chunk layout and artifact naming.
//!
//! A remote object of `total` bytes is split into `ceil(total / chunk_size)`
//! chunks; every chunk but the last is exactly `chunk_size` bytes. Chunk `i`
//! is cached at `<prefix>.<NNN>` with `NNN = i + 1`, zero-padded to at least
//! three digits; a whole-object artifact lives at `<prefix>` itself.

use crate::cadapter::ByteRange;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

pub const DEFAULT_CHUNK_SIZE: u64 = 5 * 1024 * 1024; // 5 MiB

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkLayout {
    pub chunk_size: u64,
}

impl Default for ChunkLayout {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

impl ChunkLayout {
    pub fn new(chunk_size: u64) -> Self {
        debug_assert!(chunk_size > 0, "chunk size must be positive");
        Self {
            chunk_size: chunk_size.max(1),
        }
    }

    pub fn num_chunks(&self, total: u64) -> u64 {
        total.div_ceil(self.chunk_size)
    }

    #[inline]
    pub fn chunk_index_of(&self, offset: u64) -> u64 {
        offset / self.chunk_size
    }

    #[inline]
    pub fn within_chunk_offset(&self, offset: u64) -> u64 {
        offset % self.chunk_size
    }

    #[inline]
    pub fn chunk_start(&self, index: u64) -> u64 {
        index * self.chunk_size
    }

    /// Length of chunk `index`; the final chunk holds the remainder.
    pub fn chunk_len(&self, index: u64, total: u64) -> u64 {
        let start = self.chunk_start(index);
        if start >= total {
            return 0;
        }
        (total - start).min(self.chunk_size)
    }

    /// Byte range of chunk `index`, `None` past the end of the object.
    pub fn chunk_range(&self, index: u64, total: u64) -> Option<ByteRange> {
        let len = self.chunk_len(index, total);
        (len > 0).then(|| ByteRange::new(self.chunk_start(index), len))
    }
}

/// `<prefix>.<NNN>`, 1-based.
pub fn chunk_artifact_path(prefix: &Path, index: u64) -> PathBuf {
    let mut name = OsString::from(prefix.as_os_str());
    name.push(format!(".{:03}", index + 1));
    PathBuf::from(name)
}
