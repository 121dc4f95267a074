//! 文件系统根：持有共享的 CacheContext 与挂载表，按最长前缀把路径分派到各个 DirectoryLister。

use super::cache::PathCache;
use super::config::RemoteFsConfig;
use super::error::{RemoteError, Result};
use super::lister::DirectoryLister;
use super::stream::RemoteReadStream;
use crate::cadapter::ByteRange;
use crate::chuck::{ChunkStore, FileIdentity};
use crate::meta::{DirectoryEntry, ListMode, RemotePath};
use crate::sched::{Request, RequestKind, RequestScheduler};
use crate::source::RemoteSource;
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Process-wide cache state shared by every lister and stream of one
/// [`RemoteFs`].
pub struct CacheContext {
    config: RemoteFsConfig,
    scheduler: RequestScheduler,
    path_cache: PathCache,
    chunk_store: ChunkStore,
}

impl CacheContext {
    /// Timer-driven scheduler when built inside a tokio runtime.
    pub fn new(config: RemoteFsConfig) -> Result<Self> {
        let scheduler = RequestScheduler::new(config.scheduler)
            .map_err(|e| RemoteError::io("<scheduler runtime>", e))?;
        Ok(Self::with_scheduler(config, scheduler))
    }

    /// Waiters tick the scheduler themselves; no ambient runtime needed.
    pub fn cooperative(config: RemoteFsConfig) -> Result<Self> {
        let scheduler = RequestScheduler::cooperative(config.scheduler)
            .map_err(|e| RemoteError::io("<scheduler runtime>", e))?;
        Ok(Self::with_scheduler(config, scheduler))
    }

    pub fn with_scheduler(config: RemoteFsConfig, scheduler: RequestScheduler) -> Self {
        Self {
            path_cache: PathCache::new(config.authenticated_namespace.clone()),
            chunk_store: ChunkStore::new(config.layout, scheduler.clone()),
            scheduler,
            config,
        }
    }

    pub fn config(&self) -> &RemoteFsConfig {
        &self.config
    }

    pub fn scheduler(&self) -> &RequestScheduler {
        &self.scheduler
    }

    pub fn path_cache(&self) -> &PathCache {
        &self.path_cache
    }

    pub fn chunk_store(&self) -> &ChunkStore {
        &self.chunk_store
    }
}

/// Result of [`RemoteFs::children`]. A failed listing is empty and invalid.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Listing {
    pub entries: Vec<DirectoryEntry>,
    pub valid: bool,
}

impl Listing {
    fn invalid() -> Self {
        Self::default()
    }
}

pub struct RemoteFs {
    ctx: Arc<CacheContext>,
    /// Longest namespace first.
    mounts: RwLock<Vec<Arc<DirectoryLister>>>,
}

impl RemoteFs {
    pub fn new(config: RemoteFsConfig) -> Result<Self> {
        Ok(Self::with_context(Arc::new(CacheContext::new(config)?)))
    }

    pub fn with_context(ctx: Arc<CacheContext>) -> Self {
        Self {
            ctx,
            mounts: RwLock::new(Vec::new()),
        }
    }

    pub fn context(&self) -> &Arc<CacheContext> {
        &self.ctx
    }

    /// Mount `source` at `namespace`, replacing any earlier mount there.
    pub fn mount(&self, namespace: &str, source: Arc<dyn RemoteSource>) -> Arc<DirectoryLister> {
        let namespace = RemotePath::new(namespace);
        info!(namespace = %namespace, source = source.name(), root = %source.root_location(), "mounted");
        let lister = Arc::new(DirectoryLister::new(
            Arc::clone(&self.ctx),
            namespace.clone(),
            source,
        ));
        let mut mounts = self.mounts.write();
        mounts.retain(|m| m.namespace() != &namespace);
        mounts.push(Arc::clone(&lister));
        mounts.sort_by_key(|m| std::cmp::Reverse(m.namespace().as_str().len()));
        lister
    }

    /// Root entries of the mounts directly below `/`, displayed as `[name]`.
    pub fn namespace_roots(&self) -> Vec<DirectoryEntry> {
        let mut roots: Vec<DirectoryEntry> = self
            .mounts
            .read()
            .iter()
            .filter(|m| m.namespace().parent().is_some_and(|p| p.is_root()))
            .map(|m| m.root_entry())
            .collect();
        roots.sort_by(|a, b| a.path.cmp(&b.path));
        roots
    }

    /// Mount owning `path`, by longest namespace prefix.
    pub fn lister_for(&self, path: &RemotePath) -> Result<Arc<DirectoryLister>> {
        self.mounts
            .read()
            .iter()
            .find(|m| path.starts_with(m.namespace()))
            .cloned()
            .ok_or_else(|| RemoteError::NoSource {
                path: path.as_str().into(),
            })
    }

    pub async fn list(&self, path: &str) -> Result<Vec<DirectoryEntry>> {
        let path = RemotePath::new(path);
        match self.lister_for(&path) {
            Ok(lister) => lister.list(&path).await,
            Err(_) if path.is_root() => Ok(self.namespace_roots()),
            Err(e) => Err(e),
        }
    }

    /// Filtered children of `path`. Never fails: errors are logged and an
    /// invalid, empty listing is returned instead.
    pub async fn children(&self, path: &str, mode: ListMode, include_hidden: bool) -> Listing {
        match self.list(path).await {
            Ok(entries) => Listing {
                entries: entries
                    .into_iter()
                    .filter(|e| mode.accepts(e) && (include_hidden || !e.is_hidden()))
                    .collect(),
                valid: true,
            },
            Err(e) => {
                warn!(path, error = %e, "listing unavailable");
                Listing::invalid()
            }
        }
    }

    pub async fn stat(&self, path: &str) -> Result<DirectoryEntry> {
        let path = RemotePath::new(path);
        match self.lister_for(&path) {
            Ok(lister) => lister.stat(&path).await,
            Err(_) if path.is_root() => Ok(DirectoryEntry::directory(RemotePath::root(), "")),
            Err(e) => Err(e),
        }
    }

    /// Open a file for reading. Files listed without a size are probed first.
    pub async fn open(&self, path: &str) -> Result<RemoteReadStream> {
        let path = RemotePath::new(path);
        let lister = self.lister_for(&path)?;
        let entry = lister.stat(&path).await?;
        if entry.is_directory {
            return Err(RemoteError::IsADirectory {
                path: path.as_str().into(),
            });
        }
        let source = lister.source();
        let total_size = match entry.size {
            Some(size) => size,
            None => self.probe_length(&source, &entry).await?,
        };
        let file = FileIdentity {
            remote_id: entry.remote_key().to_string(),
            display_name: entry.display_name.clone(),
            cache_path_prefix: entry.path.under(&self.ctx.config().cache_root),
            total_size,
            source,
        };
        debug!(file = ?file, "opening stream");
        RemoteReadStream::open(Arc::clone(&self.ctx), file)
    }

    /// Authoritative length from a one-byte range request.
    async fn probe_length(&self, source: &Arc<dyn RemoteSource>, entry: &DirectoryEntry) -> Result<u64> {
        let request = Request::new(
            RequestKind::ChunkDownload,
            entry.path.as_str(),
            source.transport(),
            source.download_request(entry.remote_key(), Some(ByteRange::new(0, 1))),
        );
        match self.ctx.scheduler().submit(request).wait().await {
            Ok(resp) => {
                if let Some(total) = resp.content_range_total() {
                    return Ok(total);
                }
                // range ignored: the body is the whole object
                if resp.status == 200 {
                    return Ok(resp.body.len() as u64);
                }
                Err(RemoteError::UnknownLength {
                    path: entry.path.as_str().into(),
                })
            }
            // nothing satisfiable at offset 0
            Err(RemoteError::Transport {
                status: Some(416), ..
            }) => Ok(0),
            Err(e) => Err(e),
        }
    }

    /// Credential rotation for the configured authenticated namespace.
    /// Returns the number of listings evicted, `None` if the token is unchanged.
    pub fn invalidate(&self, token: &str) -> Option<usize> {
        self.ctx.path_cache().invalidate(token)
    }

    /// Poll every mount that carries credentials and evict its listings when
    /// its token changed. Returns the total number of listings evicted.
    pub fn refresh_credentials(&self) -> usize {
        let mounts: Vec<_> = self.mounts.read().iter().cloned().collect();
        let mut evicted = 0;
        for lister in mounts {
            let source = lister.source();
            let Some(token) = source.credentials().and_then(|c| c.current_access_token()) else {
                continue;
            };
            if let Some(n) = self
                .ctx
                .path_cache()
                .invalidate_namespace(lister.namespace(), &token)
            {
                evicted += n;
            }
        }
        evicted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cadapter::memory::{Fault, MemoryTransport};
    use crate::source::cloud::tests::FakeProvider;
    use crate::source::{CloudSource, HttpIndexSource};
    use std::io::Read;
    use std::time::Duration;

    struct Fixture {
        tmp: tempfile::TempDir,
        fs: RemoteFs,
        data: Arc<MemoryTransport>,
        cloud: Arc<MemoryTransport>,
        provider: Arc<FakeProvider>,
    }

    fn fixture() -> Fixture {
        let tmp = tempfile::tempdir().unwrap();
        let config = RemoteFsConfig::new(tmp.path())
            .chunk_size(4)
            .tick_interval(Duration::from_millis(1));
        let fs = RemoteFs::with_context(Arc::new(CacheContext::cooperative(config).unwrap()));

        let data = Arc::new(MemoryTransport::new());
        data.insert(
            "mem://host/data/index.json",
            br#"{"games": {}, "notes.txt": 11, ".hidden": 1, "unsized": null}"#.to_vec(),
        );
        data.insert("mem://host/data/games/index.json", b"{}".to_vec());
        data.insert("mem://host/data/notes.txt", b"hello world".to_vec());
        data.insert("mem://host/data/unsized", b"0123456789".to_vec());
        fs.mount(
            "/data",
            Arc::new(HttpIndexSource::new("mem://host/data", data.clone())),
        );

        let cloud = Arc::new(MemoryTransport::new());
        cloud.require_bearer(Some("tok-1".to_string()));
        cloud.insert(
            "mem://api/list/",
            br#"[{"id": "f1", "name": "slot1.sav", "path": "/slot1.sav", "is_directory": false, "size": 6}]"#
                .to_vec(),
        );
        cloud.insert("mem://api/content/f1", b"saved!".to_vec());
        let provider = Arc::new(FakeProvider::new("mem://api", "tok-1"));
        fs.mount(
            "/cloud",
            Arc::new(CloudSource::new(provider.clone(), cloud.clone())),
        );

        Fixture {
            tmp,
            fs,
            data,
            cloud,
            provider,
        }
    }

    fn block_on<F: std::future::Future>(f: F) -> F::Output {
        futures::executor::block_on(f)
    }

    fn names(entries: &[DirectoryEntry]) -> Vec<&str> {
        entries.iter().map(|e| e.display_name.as_str()).collect()
    }

    #[test]
    fn root_lists_namespace_roots() {
        let fx = fixture();
        let roots = block_on(fx.fs.list("/")).unwrap();
        assert_eq!(names(&roots), ["[cloud]", "[data]"]);
        assert!(roots.iter().all(|e| e.is_directory));
        assert!(block_on(fx.fs.stat("/")).unwrap().is_directory);
        assert!(matches!(
            block_on(fx.fs.list("/nowhere")).unwrap_err(),
            RemoteError::NoSource { .. }
        ));
    }

    #[test]
    fn list_twice_fetches_once() {
        let fx = fixture();
        block_on(fx.fs.list("/data")).unwrap();
        block_on(fx.fs.list("/data/")).unwrap();
        assert_eq!(fx.data.request_count(), 1);
    }

    #[test]
    fn children_filters_and_hides() {
        let fx = fixture();
        let all = block_on(fx.fs.children("/data", ListMode::All, false));
        assert!(all.valid);
        assert_eq!(names(&all.entries), ["games", "notes.txt", "unsized"]);

        let hidden = block_on(fx.fs.children("/data", ListMode::FilesOnly, true));
        assert_eq!(names(&hidden.entries), ["notes.txt", ".hidden", "unsized"]);

        let dirs = block_on(fx.fs.children("/data", ListMode::DirectoriesOnly, false));
        assert_eq!(names(&dirs.entries), ["games"]);
        assert_eq!(fx.data.request_count(), 1);
    }

    #[test]
    fn failed_listing_yields_invalid_empty_children() {
        let fx = fixture();
        fx.data
            .fail_next("mem://host/data/index.json", Fault::Status(500), 10);
        let listing = block_on(fx.fs.children("/data", ListMode::All, true));
        assert_eq!(listing, Listing::default());
        assert!(!listing.valid);
        // first attempt plus the default three retries
        assert_eq!(fx.data.request_count(), 4);
    }

    #[test]
    fn open_reads_through_chunks() {
        let fx = fixture();
        let stream = block_on(fx.fs.open("/data/notes.txt")).unwrap();
        assert_eq!(stream.size(), 11);
        let mut text = String::new();
        stream.blocking().read_to_string(&mut text).unwrap();
        assert_eq!(text, "hello world");
        assert!(fx.tmp.path().join("data/notes.txt.003").exists());
    }

    #[test]
    fn unsized_files_are_probed() {
        let fx = fixture();
        let stream = block_on(fx.fs.open("/data/unsized")).unwrap();
        assert_eq!(stream.size(), 10);
        let probe = fx.data.requests().pop().unwrap();
        assert_eq!(probe.range.unwrap().header_value(), "bytes=0-0");

        fx.data.set_ignore_ranges(true);
        fx.data.insert(
            "mem://host/data/index.json",
            br#"{"other": "x"}"#.to_vec(),
        );
        fx.fs.context().path_cache().mark_invalid(RemotePath::new("/data"));
        fx.data.insert("mem://host/data/other", b"abc".to_vec());
        assert_eq!(block_on(fx.fs.open("/data/other")).unwrap().size(), 3);
    }

    #[test]
    fn open_rejects_directories() {
        let fx = fixture();
        assert!(matches!(
            block_on(fx.fs.open("/data/games")).unwrap_err(),
            RemoteError::IsADirectory { .. }
        ));
        assert!(matches!(
            block_on(fx.fs.open("/data/missing")).unwrap_err(),
            RemoteError::NotFound { .. }
        ));
    }

    #[test]
    fn cloud_requests_carry_rotating_credentials() {
        let fx = fixture();
        assert_eq!(fx.fs.refresh_credentials(), 0);

        let entries = block_on(fx.fs.list("/cloud")).unwrap();
        assert_eq!(names(&entries), ["slot1.sav"]);
        let stream = block_on(fx.fs.open("/cloud/slot1.sav")).unwrap();
        let mut buf = Vec::new();
        stream.blocking().read_to_end(&mut buf).unwrap();
        assert_eq!(buf, b"saved!");
        assert!(
            fx.cloud
                .requests()
                .iter()
                .all(|r| r.bearer.as_deref() == Some("tok-1"))
        );

        // unchanged token keeps the cache
        assert_eq!(fx.fs.refresh_credentials(), 0);
        block_on(fx.fs.list("/cloud")).unwrap();
        assert_eq!(fx.cloud.hits("mem://api/list/"), 1);

        fx.provider.rotate("tok-2");
        fx.cloud.require_bearer(Some("tok-2".to_string()));
        assert_eq!(fx.fs.refresh_credentials(), 1);
        block_on(fx.fs.list("/cloud")).unwrap();
        assert_eq!(fx.cloud.hits("mem://api/list/"), 2);
        assert_eq!(
            fx.cloud.requests().last().unwrap().bearer.as_deref(),
            Some("tok-2")
        );
    }

    #[test]
    fn invalidate_evicts_authenticated_namespace_only() {
        let fx = fixture();
        block_on(fx.fs.list("/cloud")).unwrap();
        block_on(fx.fs.list("/data")).unwrap();

        assert_eq!(fx.fs.invalidate("session-a"), Some(1));
        assert_eq!(fx.fs.invalidate("session-a"), None);
        block_on(fx.fs.list("/data")).unwrap();
        assert_eq!(fx.data.request_count(), 1);
        block_on(fx.fs.list("/cloud")).unwrap();
        assert_eq!(fx.cloud.hits("mem://api/list/"), 2);
    }

    #[test]
    fn longest_prefix_wins() {
        let fx = fixture();
        let extra = Arc::new(MemoryTransport::new());
        fx.fs.mount(
            "/data/extra",
            Arc::new(HttpIndexSource::new("mem://mirror", extra)),
        );
        let lister = fx.fs.lister_for(&RemotePath::new("/data/extra/x")).unwrap();
        assert_eq!(lister.namespace().as_str(), "/data/extra");
        let lister = fx.fs.lister_for(&RemotePath::new("/data/extras")).unwrap();
        assert_eq!(lister.namespace().as_str(), "/data");
        // nested mounts are not namespace roots
        assert_eq!(fx.fs.namespace_roots().len(), 2);
    }
}
