//! Seekable read stream over the chunk store.

use super::error::{RemoteError, Result};
use super::fs::CacheContext;
use crate::chuck::FileIdentity;
use std::io::{self, SeekFrom};
use std::sync::Arc;
use tracing::trace;

/// Cursor over one remote object. Reads pull missing chunks on demand;
/// dropping the stream does not cancel downloads it started.
pub struct RemoteReadStream {
    ctx: Arc<CacheContext>,
    file: FileIdentity,
    pos: u64,
    eos: bool,
    err: Option<RemoteError>,
}

impl std::fmt::Debug for RemoteReadStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteReadStream")
            .field("file", &self.file)
            .field("pos", &self.pos)
            .field("eos", &self.eos)
            .field("err", &self.err)
            .finish_non_exhaustive()
    }
}

impl RemoteReadStream {
    /// Zero-length objects are materialized here and never reach the network.
    pub fn open(ctx: Arc<CacheContext>, file: FileIdentity) -> Result<Self> {
        ctx.chunk_store().open(&file)?;
        Ok(Self {
            ctx,
            file,
            pos: 0,
            eos: false,
            err: None,
        })
    }

    pub fn identity(&self) -> &FileIdentity {
        &self.file
    }

    pub fn pos(&self) -> u64 {
        self.pos
    }

    pub fn size(&self) -> u64 {
        self.file.total_size
    }

    pub fn eos(&self) -> bool {
        self.eos
    }

    /// Error of the last failed read, kept until [`clear_err`](Self::clear_err).
    pub fn err(&self) -> Option<&RemoteError> {
        self.err.as_ref()
    }

    pub fn clear_err(&mut self) {
        self.err = None;
    }

    /// Read into `buf`, clamped at `size()`. Returns fewer bytes than asked
    /// for at the end of the object or when a later chunk could not be fetched.
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let size = self.size();
        if self.pos >= size {
            self.eos = true;
            return Ok(0);
        }
        let bytes = match self
            .ctx
            .chunk_store()
            .read(&self.file, self.pos, buf.len())
            .await
        {
            Ok(bytes) => bytes,
            Err(e) => {
                self.err = Some(e.clone());
                return Err(e);
            }
        };
        let n = bytes.len();
        buf[..n].copy_from_slice(&bytes);
        self.pos += n as u64;
        if self.pos >= size {
            self.eos = true;
        }
        trace!(file = %self.file.display_name, n, pos = self.pos, "stream read");
        Ok(n)
    }

    /// Move the cursor; targets outside `[0, size]` are rejected.
    pub fn seek(&mut self, target: SeekFrom) -> Result<u64> {
        let size = self.size();
        let absolute: i128 = match target {
            SeekFrom::Start(off) => off as i128,
            SeekFrom::Current(delta) => self.pos as i128 + delta as i128,
            SeekFrom::End(delta) => size as i128 + delta as i128,
        };
        if absolute < 0 || absolute > size as i128 {
            return Err(RemoteError::InvalidSeek {
                target: absolute,
                size,
            });
        }
        self.pos = absolute as u64;
        self.eos = false;
        Ok(self.pos)
    }

    /// Adapter for synchronous callers, implementing [`io::Read`] and [`io::Seek`].
    pub fn blocking(self) -> BlockingReadStream {
        BlockingReadStream { inner: self }
    }
}

/// Blocks the calling thread on every read. With a timer-driven scheduler it
/// must not be used from a thread that runs that scheduler's runtime.
pub struct BlockingReadStream {
    inner: RemoteReadStream,
}

impl BlockingReadStream {
    pub fn get_ref(&self) -> &RemoteReadStream {
        &self.inner
    }

    pub fn into_inner(self) -> RemoteReadStream {
        self.inner
    }
}

impl io::Read for BlockingReadStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        futures::executor::block_on(self.inner.read(buf)).map_err(io::Error::from)
    }
}

impl io::Seek for BlockingReadStream {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.inner.seek(pos).map_err(io::Error::from)
    }
}
