//! Path-keyed listing cache.
//!
//! A path is `Valid` only after a successful fetch; a failed fetch leaves it
//! `Invalid`, which is distinct from never having been fetched (`Absent`).

use crate::meta::{DirectoryEntry, RemotePath};
use parking_lot::Mutex;
use std::collections::HashMap;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CachedListing {
    Absent,
    Invalid,
    Valid(Vec<DirectoryEntry>),
}

impl CachedListing {
    pub fn is_valid(&self) -> bool {
        matches!(self, CachedListing::Valid(_))
    }
}

enum Slot {
    Invalid,
    Valid(Vec<DirectoryEntry>),
}

pub struct PathCache {
    authenticated_namespace: RemotePath,
    listings: Mutex<HashMap<RemotePath, Slot>>,
    /// Last-seen validity token per namespace.
    tokens: Mutex<HashMap<RemotePath, String>>,
}

impl PathCache {
    pub fn new(authenticated_namespace: RemotePath) -> Self {
        Self {
            authenticated_namespace,
            listings: Mutex::new(HashMap::new()),
            tokens: Mutex::new(HashMap::new()),
        }
    }

    pub fn authenticated_namespace(&self) -> &RemotePath {
        &self.authenticated_namespace
    }

    /// Cached children of `path`, only when the listing is valid. Entries are
    /// copies; the cached ones are never handed out.
    pub fn get(&self, path: &RemotePath) -> Option<Vec<DirectoryEntry>> {
        match self.listings.lock().get(path) {
            Some(Slot::Valid(entries)) => Some(entries.clone()),
            _ => None,
        }
    }

    pub fn state(&self, path: &RemotePath) -> CachedListing {
        match self.listings.lock().get(path) {
            None => CachedListing::Absent,
            Some(Slot::Invalid) => CachedListing::Invalid,
            Some(Slot::Valid(entries)) => CachedListing::Valid(entries.clone()),
        }
    }

    pub fn store(&self, path: RemotePath, entries: Vec<DirectoryEntry>) {
        debug!(path = %path, children = entries.len(), "listing cached");
        self.listings.lock().insert(path, Slot::Valid(entries));
    }

    pub fn mark_invalid(&self, path: RemotePath) {
        self.listings.lock().insert(path, Slot::Invalid);
    }

    pub fn len(&self) -> usize {
        self.listings.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.listings.lock().is_empty()
    }

    /// Credential rotation for the authenticated namespace.
    pub fn invalidate(&self, token: &str) -> Option<usize> {
        let namespace = self.authenticated_namespace.clone();
        self.invalidate_namespace(&namespace, token)
    }

    /// Evict every listing under `namespace` if `token` differs from the last
    /// one seen for it. Returns the number evicted, `None` when unchanged. A
    /// namespace without a recorded token counts as changed.
    pub fn invalidate_namespace(&self, namespace: &RemotePath, token: &str) -> Option<usize> {
        {
            let mut tokens = self.tokens.lock();
            if tokens.get(namespace).is_some_and(|seen| seen == token) {
                return None;
            }
            tokens.insert(namespace.clone(), token.to_string());
        }
        let mut listings = self.listings.lock();
        let before = listings.len();
        listings.retain(|path, _| !path.starts_with(namespace));
        let evicted = before - listings.len();
        info!(namespace = %namespace, evicted, "credentials rotated, listings evicted");
        Some(evicted)
    }
}
