//! 规范化路径：合并重复的分隔符，去掉末尾的 `/`（根目录除外）。

use std::fmt;
use std::path::{Path, PathBuf};

/// Slash-separated logical path in normalized form.
///
/// Equality is exact string equality after normalization, so `"/data//a/"`
/// and `"/data/a"` name the same entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RemotePath(String);

impl RemotePath {
    pub fn new(raw: &str) -> Self {
        Self(normalize(raw))
    }

    pub fn root() -> Self {
        Self("/".to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0 == "/"
    }

    /// Last component; empty for the root.
    pub fn file_name(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or_default()
    }

    pub fn parent(&self) -> Option<RemotePath> {
        if self.is_root() {
            return None;
        }
        match self.0.rfind('/') {
            Some(0) => Some(Self::root()),
            Some(idx) => Some(Self(self.0[..idx].to_string())),
            None => None,
        }
    }

    pub fn join(&self, name: &str) -> RemotePath {
        if self.is_root() {
            Self::new(&format!("/{name}"))
        } else {
            Self::new(&format!("{}/{name}", self.0))
        }
    }

    /// True when `self` equals `prefix` or lies below it on a component boundary.
    pub fn starts_with(&self, prefix: &RemotePath) -> bool {
        if prefix.is_root() || self == prefix {
            return true;
        }
        self.0
            .strip_prefix(prefix.as_str())
            .is_some_and(|rest| rest.starts_with('/'))
    }

    /// Components of `self` below `prefix`, or `None` when not under it.
    pub fn components_after<'a>(&'a self, prefix: &RemotePath) -> Option<Vec<&'a str>> {
        if !self.starts_with(prefix) {
            return None;
        }
        let rest = &self.0[prefix.as_str().len().min(self.0.len())..];
        Some(rest.split('/').filter(|c| !c.is_empty()).collect())
    }

    /// Local cache location `<cache_root><path>`.
    pub fn under(&self, cache_root: &Path) -> PathBuf {
        let mut out = cache_root.to_path_buf();
        for comp in self.0.split('/').filter(|c| !c.is_empty()) {
            out.push(comp);
        }
        out
    }
}

fn normalize(raw: &str) -> String {
    let parts: Vec<&str> = raw.split('/').filter(|s| !s.is_empty()).collect();
    if parts.is_empty() {
        return "/".into();
    }
    let mut out = String::with_capacity(raw.len() + 1);
    for p in parts {
        out.push('/');
        out.push_str(p);
    }
    out
}

impl fmt::Display for RemotePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RemotePath {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl AsRef<str> for RemotePath {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
