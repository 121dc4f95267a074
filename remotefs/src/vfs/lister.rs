//! Directory listing through the shared [`PathCache`](super::cache::PathCache).

use super::error::{RemoteError, Result};
use super::fs::CacheContext;
use crate::meta::{DirectoryEntry, RemotePath};
use crate::sched::{Request, RequestKind};
use crate::source::RemoteSource;
use std::sync::Arc;
use tracing::{debug, warn};

/// Lists one mounted namespace backed by one [`RemoteSource`].
pub struct DirectoryLister {
    ctx: Arc<CacheContext>,
    source: Arc<dyn RemoteSource>,
    namespace: RemotePath,
}

impl DirectoryLister {
    pub fn new(ctx: Arc<CacheContext>, namespace: RemotePath, source: Arc<dyn RemoteSource>) -> Self {
        Self {
            ctx,
            source,
            namespace,
        }
    }

    pub fn namespace(&self) -> &RemotePath {
        &self.namespace
    }

    pub fn source(&self) -> Arc<dyn RemoteSource> {
        Arc::clone(&self.source)
    }

    pub fn root_entry(&self) -> DirectoryEntry {
        DirectoryEntry::namespace_root(self.namespace.clone(), self.source.root_location())
    }

    /// Children of `path` in server order. A valid cached listing is returned
    /// without any network activity.
    pub async fn list(&self, path: &RemotePath) -> Result<Vec<DirectoryEntry>> {
        if let Some(hit) = self.ctx.path_cache().get(path) {
            debug!(path = %path, "listing cache hit");
            return Ok(hit);
        }
        let dir = self.stat(path).await?;
        if !dir.is_directory {
            return Err(RemoteError::NotADirectory {
                path: path.as_str().into(),
            });
        }
        self.list_entry(&dir).await
    }

    /// Resolve `path` by listing each ancestor in turn, starting from the
    /// namespace root. Every listing on the way is cached.
    pub async fn stat(&self, path: &RemotePath) -> Result<DirectoryEntry> {
        let Some(components) = path.components_after(&self.namespace) else {
            return Err(RemoteError::NoSource {
                path: path.as_str().into(),
            });
        };
        let mut current = self.root_entry();
        for name in components {
            if !current.is_directory {
                return Err(RemoteError::NotADirectory {
                    path: current.path.as_str().into(),
                });
            }
            let children = self.list_entry(&current).await?;
            current = children
                .into_iter()
                .find(|child| child.path.file_name() == name)
                .ok_or_else(|| RemoteError::NotFound {
                    path: path.as_str().into(),
                })?;
        }
        Ok(current)
    }

    async fn list_entry(&self, dir: &DirectoryEntry) -> Result<Vec<DirectoryEntry>> {
        match self.ctx.path_cache().get(&dir.path) {
            Some(hit) => Ok(hit),
            None => self.fetch(dir).await,
        }
    }

    /// One listing request; the outcome is recorded as valid or invalid.
    async fn fetch(&self, dir: &DirectoryEntry) -> Result<Vec<DirectoryEntry>> {
        debug!(path = %dir.path, location = %dir.location, source = self.source.name(), "fetching listing");
        let request = Request::new(
            RequestKind::ListingFetch,
            dir.path.as_str(),
            self.source.transport(),
            self.source.listing_request(&dir.location),
        );
        let outcome = self.ctx.scheduler().submit(request).wait().await;
        let parsed = outcome.and_then(|resp| self.source.parse_listing(dir, &resp.body));
        let cache = self.ctx.path_cache();
        match parsed {
            Ok(entries) => {
                cache.store(dir.path.clone(), entries.clone());
                Ok(entries)
            }
            Err(e) => {
                warn!(path = %dir.path, error = %e, "listing failed");
                cache.mark_invalid(dir.path.clone());
                Err(e)
            }
        }
    }
}
