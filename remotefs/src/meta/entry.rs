use super::path::RemotePath;
use std::fmt;

/// One child of a remote directory.
///
/// Listings hand these out by value; the cached copies are never exposed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryEntry {
    pub path: RemotePath,
    pub display_name: String,
    pub is_directory: bool,
    /// `None` when the source did not report a size.
    pub size: Option<u64>,
    /// Provider object id, for sources that address files by id.
    pub remote_id: Option<String>,
    /// Location that replaced the derived `parent + "/" + name`, if any.
    pub remote_location_override: Option<String>,
    /// Resolved location used for listing (directories) or download (files).
    pub location: String,
}

impl DirectoryEntry {
    pub fn file(path: RemotePath, size: Option<u64>, location: impl Into<String>) -> Self {
        Self {
            display_name: path.file_name().to_string(),
            path,
            is_directory: false,
            size,
            remote_id: None,
            remote_location_override: None,
            location: location.into(),
        }
    }

    pub fn directory(path: RemotePath, location: impl Into<String>) -> Self {
        Self {
            display_name: path.file_name().to_string(),
            path,
            is_directory: true,
            size: None,
            remote_id: None,
            remote_location_override: None,
            location: location.into(),
        }
    }

    /// Root of a mounted namespace, displayed as `[name]`.
    pub fn namespace_root(path: RemotePath, location: impl Into<String>) -> Self {
        let mut entry = Self::directory(path, location);
        entry.display_name = format!("[{}]", entry.path.file_name());
        entry
    }

    pub fn with_remote_id(self, id: impl Into<String>) -> Self {
        Self {
            remote_id: Some(id.into()),
            ..self
        }
    }

    pub fn with_location_override(self, location: impl Into<String>) -> Self {
        let location = location.into();
        Self {
            remote_location_override: Some(location.clone()),
            location,
            ..self
        }
    }

    pub fn is_hidden(&self) -> bool {
        self.path.file_name().starts_with('.')
    }

    /// Key the source uses to download this file: its id, else its location.
    pub fn remote_key(&self) -> &str {
        self.remote_id.as_deref().unwrap_or(&self.location)
    }
}

impl fmt::Display for DirectoryEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.is_directory, self.size) {
            (true, _) => write!(f, "d {:>12} {}", "-", self.display_name),
            (false, Some(size)) => write!(f, "f {size:>12} {}", self.display_name),
            (false, None) => write!(f, "f {:>12} {}", "?", self.display_name),
        }
    }
}

/// Which children a listing should return.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ListMode {
    #[default]
    All,
    FilesOnly,
    DirectoriesOnly,
}

impl ListMode {
    pub fn accepts(self, entry: &DirectoryEntry) -> bool {
        match self {
            ListMode::All => true,
            ListMode::FilesOnly => !entry.is_directory,
            ListMode::DirectoriesOnly => entry.is_directory,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn namespace_root_display_name() {
        let root = DirectoryEntry::namespace_root(RemotePath::new("/data"), "https://host/data");
        assert_eq!(root.display_name, "[data]");
        assert!(root.is_directory);
    }

    #[test]
    fn override_replaces_location_and_is_recorded() {
        let dir = DirectoryEntry::directory(RemotePath::new("/data/x"), "https://a/data/x")
            .with_location_override("https://mirror/x");
        assert_eq!(dir.location, "https://mirror/x");
        assert_eq!(dir.remote_location_override.as_deref(), Some("https://mirror/x"));
    }

    #[test]
    fn list_mode_and_hidden() {
        let f = DirectoryEntry::file(RemotePath::new("/d/.hidden"), Some(1), "u");
        let d = DirectoryEntry::directory(RemotePath::new("/d/sub"), "u");
        assert!(ListMode::FilesOnly.accepts(&f) && !ListMode::FilesOnly.accepts(&d));
        assert!(ListMode::DirectoriesOnly.accepts(&d) && !ListMode::DirectoriesOnly.accepts(&f));
        assert!(f.is_hidden() && !d.is_hidden());
        assert_eq!(f.remote_key(), "u");
        assert_eq!(f.clone().with_remote_id("id-7").remote_key(), "id-7");
    }
}
