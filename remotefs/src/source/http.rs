//! Static HTTP trees.
//!
//! Every directory serves an index file mapping child names to either an
//! integer (a file and its size) or an object (a subdirectory). A directory
//! object may carry `baseUrl` to relocate that subtree, e.g. onto another host.

use super::{RemoteSource, is_valid_child_name};
use crate::cadapter::{ByteRange, Transport, TransportRequest};
use crate::meta::DirectoryEntry;
use crate::vfs::error::{RemoteError, Result};
use percent_encoding::{AsciiSet, CONTROLS, utf8_percent_encode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{trace, warn};

pub const DEFAULT_INDEX_FILE: &str = "index.json";

/// Bytes escaped when a child name becomes one URL path segment.
const PATH_SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'/')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'[')
    .add(b'\\')
    .add(b']')
    .add(b'^')
    .add(b'`')
    .add(b'{')
    .add(b'|')
    .add(b'}');

/// Percent-encode `name` so it addresses exactly one path segment.
pub fn encode_path_segment(name: &str) -> String {
    utf8_percent_encode(name, PATH_SEGMENT).to_string()
}

/// Value of one child in an index file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum IndexValue {
    Size(u64),
    Directory(DirectoryIndex),
    /// Anything else: a file whose size is not known up front.
    Unknown(serde_json::Value),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DirectoryIndex {
    #[serde(rename = "baseUrl", default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

/// Parse an index body into `(name, value)` pairs in document order.
pub fn parse_index(body: &[u8]) -> std::result::Result<Vec<(String, IndexValue)>, String> {
    let map: serde_json::Map<String, serde_json::Value> =
        serde_json::from_slice(body).map_err(|e| e.to_string())?;
    map.into_iter()
        .map(|(name, value)| {
            serde_json::from_value(value)
                .map(|v| (name.clone(), v))
                .map_err(|e| format!("{name}: {e}"))
        })
        .collect()
}

pub struct HttpIndexSource {
    name: String,
    root: String,
    index_file: String,
    transport: Arc<dyn Transport>,
}

impl HttpIndexSource {
    pub fn new(root_location: impl Into<String>, transport: Arc<dyn Transport>) -> Self {
        let root = root_location.into().trim_end_matches('/').to_string();
        Self {
            name: "http".to_string(),
            root,
            index_file: DEFAULT_INDEX_FILE.to_string(),
            transport,
        }
    }

    pub fn with_index_file(self, index_file: impl Into<String>) -> Self {
        Self {
            index_file: index_file.into(),
            ..self
        }
    }

    pub fn with_name(self, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..self
        }
    }

    pub fn index_url(&self, location: &str) -> String {
        format!("{}/{}", location.trim_end_matches('/'), self.index_file)
    }
}

impl RemoteSource for HttpIndexSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn transport(&self) -> Arc<dyn Transport> {
        Arc::clone(&self.transport)
    }

    fn root_location(&self) -> String {
        self.root.clone()
    }

    fn listing_request(&self, location: &str) -> TransportRequest {
        TransportRequest::get(self.index_url(location))
    }

    fn parse_listing(&self, dir: &DirectoryEntry, body: &[u8]) -> Result<Vec<DirectoryEntry>> {
        let children = parse_index(body).map_err(|detail| RemoteError::MalformedListing {
            path: dir.path.as_str().into(),
            detail,
        })?;
        let parent = dir.location.trim_end_matches('/');

        let mut out = Vec::with_capacity(children.len());
        for (name, value) in children {
            if !is_valid_child_name(&name) {
                warn!(dir = %dir.path, name = %name, "skipping invalid child name");
                continue;
            }
            let path = dir.path.join(&name);
            let derived = format!("{parent}/{}", encode_path_segment(&name));
            let entry = match value {
                IndexValue::Size(size) => DirectoryEntry::file(path, Some(size), derived),
                IndexValue::Directory(DirectoryIndex { base_url: Some(url) }) => {
                    trace!(dir = %dir.path, name = %name, url = %url, "directory relocated");
                    DirectoryEntry::directory(path, derived).with_location_override(url)
                }
                IndexValue::Directory(DirectoryIndex { base_url: None }) => {
                    DirectoryEntry::directory(path, derived)
                }
                IndexValue::Unknown(_) => DirectoryEntry::file(path, None, derived),
            };
            out.push(entry);
        }
        Ok(out)
    }

    fn download_request(&self, remote_key: &str, range: Option<ByteRange>) -> TransportRequest {
        let req = TransportRequest::get(remote_key);
        match range {
            Some(range) => req.with_range(range),
            None => req,
        }
    }
}
