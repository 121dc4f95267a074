//! Chunk cache for remote objects, backed by local files.
//!
//! Each [`FileIdentity`] has a [`ChunkState`]: either a presence table over
//! its chunks, or `SingleFile` once the whole object is cached as one
//! artifact. Servers that ignore `Range` push a file into `SingleFile` the
//! first time any chunk of it is requested.

use super::chunk::{ChunkLayout, chunk_artifact_path};
use super::util::{ChunkSpan, split_read_range};
use crate::sched::{Request, RequestKind, RequestScheduler};
use crate::source::RemoteSource;
use crate::vfs::error::{RemoteError, Result};
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::io::{self, ErrorKind, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info, trace, warn};

/// A remote object as the chunk cache sees it.
#[derive(Clone)]
pub struct FileIdentity {
    /// Key the source downloads the object by (URL or provider id).
    pub remote_id: String,
    pub display_name: String,
    /// Local artifact prefix, `<cache_root><logical path>`.
    pub cache_path_prefix: PathBuf,
    pub total_size: u64,
    pub source: Arc<dyn RemoteSource>,
}

impl fmt::Debug for FileIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileIdentity")
            .field("remote_id", &self.remote_id)
            .field("display_name", &self.display_name)
            .field("cache_path_prefix", &self.cache_path_prefix)
            .field("total_size", &self.total_size)
            .field("source", &self.source.name())
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkState {
    SingleFile,
    Chunked { chunk_size: u64, presence: Vec<bool> },
}

impl ChunkState {
    fn empty(layout: ChunkLayout, total: u64) -> Self {
        ChunkState::Chunked {
            chunk_size: layout.chunk_size,
            presence: vec![false; layout.num_chunks(total) as usize],
        }
    }

    pub fn is_single_file(&self) -> bool {
        matches!(self, ChunkState::SingleFile)
    }

    pub fn is_present(&self, index: u64) -> bool {
        match self {
            ChunkState::SingleFile => true,
            ChunkState::Chunked { presence, .. } => {
                presence.get(index as usize).copied().unwrap_or(false)
            }
        }
    }

    pub fn present_count(&self) -> usize {
        match self {
            ChunkState::SingleFile => 0,
            ChunkState::Chunked { presence, .. } => presence.iter().filter(|p| **p).count(),
        }
    }
}

struct Slot {
    total: u64,
    state: Arc<Mutex<ChunkState>>,
}

pub struct ChunkStore {
    layout: ChunkLayout,
    scheduler: RequestScheduler,
    slots: Mutex<HashMap<PathBuf, Slot>>,
}

impl ChunkStore {
    pub fn new(layout: ChunkLayout, scheduler: RequestScheduler) -> Self {
        Self {
            layout,
            scheduler,
            slots: Mutex::new(HashMap::new()),
        }
    }

    pub fn layout(&self) -> ChunkLayout {
        self.layout
    }

    pub fn num_chunks(&self, file: &FileIdentity) -> u64 {
        self.layout.num_chunks(file.total_size)
    }

    /// Load (or build from local storage) the state of `file`. Zero-length
    /// objects are materialized here and never touch the network.
    pub fn open(&self, file: &FileIdentity) -> Result<()> {
        self.slot(file).map(|_| ())
    }

    /// Snapshot of the current state.
    pub fn state(&self, file: &FileIdentity) -> Result<ChunkState> {
        Ok(self.slot(file)?.lock().clone())
    }

    fn slot(&self, file: &FileIdentity) -> Result<Arc<Mutex<ChunkState>>> {
        let mut slots = self.slots.lock();
        if let Some(slot) = slots.get(&file.cache_path_prefix)
            && slot.total == file.total_size
        {
            return Ok(Arc::clone(&slot.state));
        }
        let state = Arc::new(Mutex::new(self.scan(file)?));
        slots.insert(
            file.cache_path_prefix.clone(),
            Slot {
                total: file.total_size,
                state: Arc::clone(&state),
            },
        );
        Ok(state)
    }

    /// Rebuild the state from what is already on disk.
    fn scan(&self, file: &FileIdentity) -> Result<ChunkState> {
        let prefix = &file.cache_path_prefix;
        let total = file.total_size;
        if let Some(dir) = prefix.parent() {
            fs::create_dir_all(dir).map_err(|e| RemoteError::io(path_hint(dir), e))?;
        }

        if total == 0 {
            if artifact_len(prefix) != Some(0) {
                fs::File::create(prefix).map_err(|e| RemoteError::io(path_hint(prefix), e))?;
            }
            trace!(file = %file.display_name, "zero-length object materialized");
            return Ok(ChunkState::SingleFile);
        }
        if artifact_len(prefix) == Some(total) {
            debug!(file = %file.display_name, "whole object already cached");
            return Ok(ChunkState::SingleFile);
        }

        let mut state = ChunkState::empty(self.layout, total);
        if let ChunkState::Chunked { presence, .. } = &mut state {
            for (i, present) in presence.iter_mut().enumerate() {
                let idx = i as u64;
                let path = chunk_artifact_path(prefix, idx);
                match artifact_len(&path) {
                    Some(len) if len == self.layout.chunk_len(idx, total) => *present = true,
                    Some(len) => {
                        warn!(path = %path.display(), len, "removing stale chunk artifact");
                        remove_quietly(&path);
                    }
                    None => {}
                }
            }
        }
        debug!(
            file = %file.display_name,
            present = state.present_count(),
            chunks = self.num_chunks(file),
            "chunk state loaded"
        );
        Ok(state)
    }

    /// Make chunk `chunk_index` of `file` available locally.
    pub async fn ensure(&self, file: &FileIdentity, chunk_index: u64) -> Result<()> {
        let total = file.total_size;
        let num_chunks = self.layout.num_chunks(total);
        if chunk_index >= num_chunks {
            return Err(RemoteError::ChunkOutOfRange {
                index: chunk_index,
                num_chunks,
            });
        }
        let slot = self.slot(file)?;
        if self.is_ready(file, &slot, chunk_index) {
            return Ok(());
        }

        let Some(range) = self.layout.chunk_range(chunk_index, total) else {
            return Err(RemoteError::ChunkOutOfRange {
                index: chunk_index,
                num_chunks,
            });
        };
        debug!(
            file = %file.display_name,
            chunk = chunk_index + 1,
            of = num_chunks,
            range = %range,
            "downloading chunk"
        );
        let request = Request::new(
            RequestKind::ChunkDownload,
            file.display_name.clone(),
            file.source.transport(),
            file.source.download_request(&file.remote_id, Some(range)),
        );
        let response = self.scheduler.submit(request).wait().await?;
        self.persist(file, &slot, chunk_index, response.body).await
    }

    /// Presence check with artifact verification. Artifacts whose size no
    /// longer matches are treated as corrupt and dropped.
    fn is_ready(&self, file: &FileIdentity, slot: &Mutex<ChunkState>, chunk_index: u64) -> bool {
        let prefix = &file.cache_path_prefix;
        let total = file.total_size;
        let mut st = slot.lock();
        match &mut *st {
            ChunkState::SingleFile => {
                if artifact_len(prefix) == Some(total) {
                    return true;
                }
                let err = RemoteError::Corrupt {
                    path: path_hint(prefix),
                    detail: format!("expected {total} bytes"),
                };
                warn!(error = %err, "cached object damaged, falling back to chunks");
                *st = ChunkState::empty(self.layout, total);
                false
            }
            ChunkState::Chunked { presence, .. } => {
                let idx = chunk_index as usize;
                if !presence[idx] {
                    return false;
                }
                let path = chunk_artifact_path(prefix, chunk_index);
                let expected = self.layout.chunk_len(chunk_index, total);
                if artifact_len(&path) == Some(expected) {
                    return true;
                }
                let err = RemoteError::Corrupt {
                    path: path_hint(&path),
                    detail: format!("expected {expected} bytes"),
                };
                warn!(error = %err, "redownloading chunk");
                presence[idx] = false;
                remove_quietly(&path);
                false
            }
        }
    }

    /// Store a download. Artifact writes never run under the slot lock; the
    /// state is re-checked once the bytes are on disk.
    async fn persist(
        &self,
        file: &FileIdentity,
        slot: &Mutex<ChunkState>,
        chunk_index: u64,
        body: Bytes,
    ) -> Result<()> {
        let prefix = &file.cache_path_prefix;
        let total = file.total_size;
        let expected_chunk = self.layout.chunk_len(chunk_index, total);
        let got = body.len() as u64;

        if got == expected_chunk {
            if slot.lock().is_single_file() {
                debug!(file = %file.display_name, chunk = chunk_index, "object already cached whole, dropping chunk");
                return Ok(());
            }
            let path = chunk_artifact_path(prefix, chunk_index);
            self.write_artifact(&path, body).await?;
            let late = match &mut *slot.lock() {
                ChunkState::SingleFile => true,
                ChunkState::Chunked { presence, .. } => {
                    presence[chunk_index as usize] = true;
                    false
                }
            };
            if late {
                debug!(path = %path.display(), "object already cached whole, dropping chunk");
                remove_quietly(&path);
            }
            return Ok(());
        }

        if got == total {
            if slot.lock().is_single_file() {
                debug!(file = %file.display_name, "duplicate whole-object response dropped");
                return Ok(());
            }
            self.write_artifact(prefix, body).await?;
            let mut st = slot.lock();
            if st.is_single_file() {
                // a racing whole-object write landed first; the rename replaced it with equal bytes
                debug!(file = %file.display_name, "duplicate whole-object response dropped");
                return Ok(());
            }
            for idx in 0..self.layout.num_chunks(total) {
                remove_quietly(&chunk_artifact_path(prefix, idx));
            }
            *st = ChunkState::SingleFile;
            info!(
                file = %file.display_name,
                size = total,
                "range not honored by transport, cached whole object"
            );
            return Ok(());
        }

        Err(RemoteError::UnexpectedLength {
            got,
            expected_chunk,
            expected_total: total,
        })
    }

    /// Read up to `len` bytes at `pos`, clamped to the object size. A failure
    /// after some bytes were read yields the bytes read so far.
    pub async fn read(&self, file: &FileIdentity, pos: u64, len: usize) -> Result<Vec<u8>> {
        let total = file.total_size;
        if len == 0 || pos >= total {
            return Ok(Vec::new());
        }
        let want = (len as u64).min(total - pos) as usize;
        let slot = self.slot(file)?;

        let single = slot.lock().is_single_file();
        if single && self.is_ready(file, &slot, 0) {
            let prefix = &file.cache_path_prefix;
            return self
                .read_artifact(prefix, pos, want)
                .await
                .map_err(|e| RemoteError::io(path_hint(prefix), e));
        }

        let mut out = Vec::with_capacity(want);
        for span in split_read_range(self.layout, total, pos, want) {
            let step = match self.ensure(file, span.chunk_index).await {
                Ok(()) => self.read_span(file, &slot, span).await,
                Err(e) => Err(e),
            };
            let bytes = match step {
                Ok(bytes) => bytes,
                Err(e) if out.is_empty() => return Err(e),
                Err(e) => {
                    warn!(file = %file.display_name, read = out.len(), want, error = %e, "short read");
                    break;
                }
            };
            let short = bytes.len() < span.len;
            out.extend_from_slice(&bytes);
            if short {
                warn!(file = %file.display_name, read = out.len(), want, "artifact shorter than expected");
                break;
            }
        }
        Ok(out)
    }

    async fn read_span(
        &self,
        file: &FileIdentity,
        slot: &Mutex<ChunkState>,
        span: ChunkSpan,
    ) -> Result<Vec<u8>> {
        let prefix = &file.cache_path_prefix;
        let chunked = !slot.lock().is_single_file();
        if chunked {
            let path = chunk_artifact_path(prefix, span.chunk_index);
            match self.read_artifact(&path, span.offset_in_chunk, span.len).await {
                Ok(bytes) => return Ok(bytes),
                // folded into the whole-object artifact in the meantime
                Err(e) if e.kind() == ErrorKind::NotFound && slot.lock().is_single_file() => {}
                Err(e) => return Err(RemoteError::io(path_hint(&path), e)),
            }
        }
        let offset = self.layout.chunk_start(span.chunk_index) + span.offset_in_chunk;
        self.read_artifact(prefix, offset, span.len)
            .await
            .map_err(|e| RemoteError::io(path_hint(prefix), e))
    }

    /// Artifact writes run on the scheduler's blocking pool, off the thread
    /// that ticks requests.
    async fn write_artifact(&self, path: &Path, data: Bytes) -> Result<()> {
        let target = path.to_path_buf();
        self.scheduler
            .spawn_blocking(move || write_artifact(&target, &data))
            .await
            .unwrap_or_else(|e| Err(io::Error::other(e)))
            .map_err(|e| RemoteError::io(path_hint(path), e))
    }

    async fn read_artifact(&self, path: &Path, offset: u64, len: usize) -> io::Result<Vec<u8>> {
        let source = path.to_path_buf();
        self.scheduler
            .spawn_blocking(move || read_at(&source, offset, len))
            .await
            .unwrap_or_else(|e| Err(io::Error::other(e)))
    }
}

fn path_hint(path: &Path) -> crate::vfs::error::PathHint {
    path.display().to_string().into()
}

fn artifact_len(path: &Path) -> Option<u64> {
    fs::metadata(path)
        .ok()
        .filter(|m| m.is_file())
        .map(|m| m.len())
}

fn remove_quietly(path: &Path) {
    if let Err(e) = fs::remove_file(path)
        && e.kind() != ErrorKind::NotFound
    {
        warn!(path = %path.display(), error = %e, "failed to remove cache artifact");
    }
}

static TMP_SEQ: AtomicU64 = AtomicU64::new(0);

/// Write via a temporary sibling and rename, so concurrent writers of the same
/// range replace each other whole.
fn write_artifact(path: &Path, data: &[u8]) -> io::Result<()> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)?;
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(format!(
        ".part-{}-{}",
        std::process::id(),
        TMP_SEQ.fetch_add(1, Ordering::Relaxed)
    ));
    let tmp = PathBuf::from(tmp);
    if let Err(e) = fs::write(&tmp, data).and_then(|_| fs::rename(&tmp, path)) {
        remove_quietly(&tmp);
        return Err(e);
    }
    Ok(())
}

fn read_at(path: &Path, offset: u64, len: usize) -> io::Result<Vec<u8>> {
    let mut f = fs::File::open(path)?;
    f.seek(SeekFrom::Start(offset))?;
    let mut buf = Vec::with_capacity(len);
    f.take(len as u64).read_to_end(&mut buf)?;
    Ok(buf)
}
