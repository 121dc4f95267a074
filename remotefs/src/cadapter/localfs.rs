//! 本地目录传输：把 `file://` 位置映射到本地目录，支持 Range 读取。
//!
//! Serves a local mirror of a remote tree so the cache can be exercised
//! without a network. Ranged requests answer `206` with `Content-Range`, plain
//! requests answer `200` with the whole file.

use crate::cadapter::client::{Transport, TransportError, TransportRequest, TransportResponse};
use async_trait::async_trait;
use percent_encoding::percent_decode_str;
use std::io::{ErrorKind, SeekFrom};
use std::path::{Component, Path, PathBuf};
use tokio::{
    fs,
    io::{AsyncReadExt, AsyncSeekExt},
};

pub const FILE_SCHEME: &str = "file://";

pub struct LocalDirTransport {
    root: PathBuf,
}

impl LocalDirTransport {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// Location of the served root, usable as a source root location.
    pub fn root_location(&self) -> String {
        format!("{FILE_SCHEME}{}", self.root.display())
    }

    fn path_for(&self, url: &str) -> Result<PathBuf, TransportError> {
        let raw = url.strip_prefix(FILE_SCHEME).unwrap_or(url);
        let path = Path::new(raw);
        let rel = path.strip_prefix(&self.root).unwrap_or(path);
        // never escape the served root
        let mut out = self.root.clone();
        let escapes = || TransportError::InvalidRequest(format!("path escapes served root: {url}"));
        for comp in rel.components() {
            match comp {
                Component::Normal(c) => {
                    // child locations carry percent-encoded names
                    let name = percent_decode_str(&c.to_string_lossy())
                        .decode_utf8()
                        .map_err(|e| TransportError::InvalidRequest(format!("{url}: {e}")))?
                        .into_owned();
                    if name == ".." || name.contains('/') {
                        return Err(escapes());
                    }
                    out.push(name);
                }
                Component::RootDir | Component::CurDir => {}
                Component::ParentDir | Component::Prefix(_) => return Err(escapes()),
            }
        }
        Ok(out)
    }
}

#[async_trait]
impl Transport for LocalDirTransport {
    async fn get(&self, request: TransportRequest) -> Result<TransportResponse, TransportError> {
        let path = self.path_for(&request.url)?;
        let mut f = match fs::File::open(&path).await {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Ok(TransportResponse::new(404, Vec::new()));
            }
            Err(e) if e.kind() == ErrorKind::PermissionDenied => {
                return Ok(TransportResponse::new(403, Vec::new()));
            }
            Err(e) => return Err(TransportError::Interrupted(e.to_string())),
        };
        let size = f
            .metadata()
            .await
            .map_err(|e| TransportError::Interrupted(e.to_string()))?
            .len();

        let Some(range) = request.range else {
            let mut buf = Vec::with_capacity(size as usize);
            f.read_to_end(&mut buf)
                .await
                .map_err(|e| TransportError::Interrupted(e.to_string()))?;
            return Ok(TransportResponse::new(200, buf)
                .with_header("Content-Length", size.to_string()));
        };

        if range.start >= size {
            return Ok(TransportResponse::new(416, Vec::new())
                .with_header("Content-Range", format!("bytes */{size}")));
        }
        let end = range.end_inclusive.min(size - 1);
        let len = end - range.start + 1;
        f.seek(SeekFrom::Start(range.start))
            .await
            .map_err(|e| TransportError::Interrupted(e.to_string()))?;
        let mut buf = vec![0u8; len as usize];
        f.read_exact(&mut buf)
            .await
            .map_err(|e| TransportError::Interrupted(e.to_string()))?;
        Ok(TransportResponse::new(206, buf)
            .with_header("Content-Range", format!("bytes {}-{}/{}", range.start, end, size))
            .with_header("Content-Length", len.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cadapter::client::ByteRange;

    #[tokio::test]
    async fn serves_whole_files_and_ranges() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(tmp.path().join("games")).unwrap();
        std::fs::write(tmp.path().join("games/a.bin"), b"0123456789").unwrap();
        let t = LocalDirTransport::new(tmp.path());

        let url = format!("{}/games/a.bin", t.root_location());
        let resp = t.get(TransportRequest::get(&url)).await.unwrap();
        assert_eq!(resp.status, 200);
        assert_eq!(&resp.body[..], b"0123456789");

        let resp = t
            .get(TransportRequest::get(&url).with_range(ByteRange::new(8, 5)))
            .await
            .unwrap();
        assert_eq!(resp.status, 206);
        assert_eq!(&resp.body[..], b"89");
        assert_eq!(resp.content_range_total(), Some(10));

        let resp = t
            .get(TransportRequest::get(&url).with_range(ByteRange::new(10, 1)))
            .await
            .unwrap();
        assert_eq!(resp.status, 416);
    }

    #[tokio::test]
    async fn decodes_escaped_names() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(tmp.path().join("my dir")).unwrap();
        std::fs::write(tmp.path().join("my dir/save#1.dat"), b"abc").unwrap();
        let t = LocalDirTransport::new(tmp.path());

        let url = format!("{}/my%20dir/save%231.dat", t.root_location());
        let resp = t.get(TransportRequest::get(&url)).await.unwrap();
        assert_eq!(resp.status, 200);
        assert_eq!(&resp.body[..], b"abc");

        let err = t
            .get(TransportRequest::get(format!("{}/%2E%2E/x", t.root_location())))
            .await
            .unwrap_err();
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn missing_files_and_escapes() {
        let tmp = tempfile::tempdir().unwrap();
        let t = LocalDirTransport::new(tmp.path());
        let resp = t
            .get(TransportRequest::get(format!("{}/nope", t.root_location())))
            .await
            .unwrap();
        assert_eq!(resp.status, 404);

        let err = t
            .get(TransportRequest::get("file:///../etc/passwd"))
            .await
            .unwrap_err();
        assert!(!err.is_retryable());
    }
}
