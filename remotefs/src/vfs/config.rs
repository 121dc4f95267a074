use crate::chuck::ChunkLayout;
use crate::meta::RemotePath;
use crate::sched::SchedulerConfig;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_DATA_NAMESPACE: &str = "/data";
pub const DEFAULT_AUTHENTICATED_NAMESPACE: &str = "/cloud";

#[derive(Debug, Clone)]
pub struct RemoteFsConfig {
    /// Root under which `<cache_root><path>` artifacts are stored.
    pub cache_root: PathBuf,
    /// Must exceed the largest object served by a source that ignores
    /// `Range`, otherwise reads on it fetch whole objects.
    pub layout: ChunkLayout,
    pub scheduler: SchedulerConfig,
    /// Listings evicted by `invalidate(token)`.
    pub authenticated_namespace: RemotePath,
}

fn default_cache_root() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("remotefs")
}

impl Default for RemoteFsConfig {
    fn default() -> Self {
        Self {
            cache_root: default_cache_root(),
            layout: ChunkLayout::default(),
            scheduler: SchedulerConfig::default(),
            authenticated_namespace: RemotePath::new(DEFAULT_AUTHENTICATED_NAMESPACE),
        }
    }
}

impl RemoteFsConfig {
    pub fn new(cache_root: impl Into<PathBuf>) -> Self {
        Self {
            cache_root: cache_root.into(),
            ..Default::default()
        }
    }

    pub fn cache_root(self, cache_root: impl Into<PathBuf>) -> Self {
        Self {
            cache_root: cache_root.into(),
            ..self
        }
    }

    pub fn chunk_size(self, chunk_size: u64) -> Self {
        Self {
            layout: ChunkLayout::new(chunk_size),
            ..self
        }
    }

    pub fn tick_interval(self, tick_interval: Duration) -> Self {
        Self {
            scheduler: self.scheduler.tick_interval(tick_interval),
            ..self
        }
    }

    pub fn retry_budget(self, retry_budget: u32) -> Self {
        Self {
            scheduler: self.scheduler.retry_budget(retry_budget),
            ..self
        }
    }

    pub fn authenticated_namespace(self, namespace: &str) -> Self {
        Self {
            authenticated_namespace: RemotePath::new(namespace),
            ..self
        }
    }
}
