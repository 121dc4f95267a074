//! Cloud storage providers.
//!
//! Provider specifics (API shape, OAuth) stay behind [`StorageProvider`]; this
//! module only attaches the provider's current token to every request and
//! maps its file records onto directory entries. Directories are addressed by
//! provider path, files by provider id.

use super::{AccessTokenSource, RemoteSource, is_valid_child_name};
use crate::cadapter::{ByteRange, Transport, TransportRequest};
use crate::meta::DirectoryEntry;
use crate::vfs::error::{RemoteError, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

/// A file or folder as a provider reports it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageFile {
    pub id: String,
    pub name: String,
    /// Provider-side path, used to list folders.
    pub path: String,
    pub is_directory: bool,
    #[serde(default)]
    pub size: Option<u64>,
}

pub trait StorageProvider: AccessTokenSource {
    fn name(&self) -> &str;

    /// Provider path of the storage root.
    fn root_path(&self) -> String;

    /// Unauthenticated request listing `remote_path`; the token is added later.
    fn list_directory_request(&self, remote_path: &str) -> TransportRequest;

    fn parse_directory(&self, body: &[u8]) -> std::result::Result<Vec<StorageFile>, String>;

    fn download_request(&self, file_id: &str) -> TransportRequest;
}

pub struct CloudSource<P> {
    provider: Arc<P>,
    transport: Arc<dyn Transport>,
}

impl<P: StorageProvider> CloudSource<P> {
    pub fn new(provider: Arc<P>, transport: Arc<dyn Transport>) -> Self {
        Self {
            provider,
            transport,
        }
    }

    pub fn provider(&self) -> &Arc<P> {
        &self.provider
    }
}

impl<P: StorageProvider + 'static> RemoteSource for CloudSource<P> {
    fn name(&self) -> &str {
        self.provider.name()
    }

    fn transport(&self) -> Arc<dyn Transport> {
        Arc::clone(&self.transport)
    }

    fn root_location(&self) -> String {
        self.provider.root_path()
    }

    fn listing_request(&self, location: &str) -> TransportRequest {
        self.provider
            .list_directory_request(location)
            .with_bearer(self.provider.current_access_token())
    }

    fn parse_listing(&self, dir: &DirectoryEntry, body: &[u8]) -> Result<Vec<DirectoryEntry>> {
        let files =
            self.provider
                .parse_directory(body)
                .map_err(|detail| RemoteError::MalformedListing {
                    path: dir.path.as_str().into(),
                    detail,
                })?;
        Ok(files
            .into_iter()
            .filter(|f| {
                let ok = is_valid_child_name(&f.name);
                if !ok {
                    warn!(dir = %dir.path, name = %f.name, "skipping invalid child name");
                }
                ok
            })
            .map(|f| {
                let path = dir.path.join(&f.name);
                if f.is_directory {
                    DirectoryEntry::directory(path, f.path).with_remote_id(f.id)
                } else {
                    DirectoryEntry::file(path, f.size, f.path).with_remote_id(f.id)
                }
            })
            .collect())
    }

    fn download_request(&self, remote_key: &str, range: Option<ByteRange>) -> TransportRequest {
        let req = self
            .provider
            .download_request(remote_key)
            .with_bearer(self.provider.current_access_token());
        match range {
            Some(range) => req.with_range(range),
            None => req,
        }
    }

    fn credentials(&self) -> Option<&dyn AccessTokenSource> {
        Some(self.provider.as_ref())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::cadapter::memory::MemoryTransport;
    use crate::meta::RemotePath;
    use parking_lot::Mutex;

    /// Provider with a JSON array listing API, used across the crate's tests.
    pub(crate) struct FakeProvider {
        pub api: String,
        pub token: Mutex<Option<String>>,
    }

    impl FakeProvider {
        pub(crate) fn new(api: &str, token: &str) -> Self {
            Self {
                api: api.to_string(),
                token: Mutex::new(Some(token.to_string())),
            }
        }

        pub(crate) fn rotate(&self, token: &str) {
            *self.token.lock() = Some(token.to_string());
        }
    }

    impl AccessTokenSource for FakeProvider {
        fn current_access_token(&self) -> Option<String> {
            self.token.lock().clone()
        }
    }

    impl StorageProvider for FakeProvider {
        fn name(&self) -> &str {
            "fake-cloud"
        }

        fn root_path(&self) -> String {
            "/".to_string()
        }

        fn list_directory_request(&self, remote_path: &str) -> TransportRequest {
            TransportRequest::get(format!("{}/list{}", self.api, remote_path))
        }

        fn parse_directory(&self, body: &[u8]) -> std::result::Result<Vec<StorageFile>, String> {
            serde_json::from_slice(body).map_err(|e| e.to_string())
        }

        fn download_request(&self, file_id: &str) -> TransportRequest {
            TransportRequest::get(format!("{}/content/{file_id}", self.api))
        }
    }

    #[test]
    fn bearer_is_attached_and_ids_are_kept() {
        let provider = Arc::new(FakeProvider::new("mem://api", "tok-1"));
        let source = CloudSource::new(provider.clone(), Arc::new(MemoryTransport::new()));

        let req = source.listing_request("/saves");
        assert_eq!(req.url, "mem://api/list/saves");
        assert_eq!(req.bearer.as_deref(), Some("tok-1"));

        let dir = DirectoryEntry::namespace_root(RemotePath::new("/cloud"), source.root_location());
        let body = br#"[
            {"id": "f1", "name": "slot1.sav", "path": "/slot1.sav", "is_directory": false, "size": 42},
            {"id": "d1", "name": "shots", "path": "/shots", "is_directory": true},
            {"id": "up", "name": "..", "path": "/..", "is_directory": true},
            {"id": "here", "name": ".", "path": "/", "is_directory": true},
            {"id": "nested", "name": "a/b", "path": "/a/b", "is_directory": false, "size": 1}
        ]"#;
        let entries = source.parse_listing(&dir, body).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].path.as_str(), "/cloud/slot1.sav");
        assert_eq!(entries[0].remote_key(), "f1");
        assert_eq!(entries[0].size, Some(42));
        assert!(entries[1].is_directory);
        assert_eq!(entries[1].location, "/shots");

        provider.rotate("tok-2");
        let req = source.download_request("f1", Some(ByteRange::new(0, 4)));
        assert_eq!(req.url, "mem://api/content/f1");
        assert_eq!(req.bearer.as_deref(), Some("tok-2"));
        assert_eq!(
            source.credentials().and_then(|c| c.current_access_token()),
            Some("tok-2".to_string())
        );
    }
}
