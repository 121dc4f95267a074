//! Error surface shared by listings, the chunk store and read streams.
//!
//! Transport-level failures are folded into [`RemoteError`] by the request
//! scheduler; everything above it only ever sees this type.

use std::fmt;
use std::io::{self, ErrorKind};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathHint(Option<String>);

impl PathHint {
    pub fn none() -> Self {
        Self(None)
    }

    pub fn some(path: impl Into<String>) -> Self {
        Self(Some(path.into()))
    }

    pub fn as_str(&self) -> Option<&str> {
        self.0.as_deref()
    }
}

impl fmt::Display for PathHint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Some(path) if !path.is_empty() => write!(f, ": {path}"),
            _ => Ok(()),
        }
    }
}

impl From<String> for PathHint {
    fn from(value: String) -> Self {
        Self::some(value)
    }
}

impl From<&str> for PathHint {
    fn from(value: &str) -> Self {
        Self::some(value)
    }
}

#[derive(Error, Debug, Clone)]
pub enum RemoteError {
    #[error("transport error{path}: {message}")]
    Transport {
        path: PathHint,
        status: Option<u16>,
        retryable: bool,
        message: String,
    },

    #[error("not found{path}")]
    NotFound { path: PathHint },

    #[error("unauthorized{path}")]
    Unauthorized { path: PathHint },

    #[error(
        "unexpected length: got {got} bytes, expected {expected_chunk} (chunk) or {expected_total} (whole object)"
    )]
    UnexpectedLength {
        got: u64,
        expected_chunk: u64,
        expected_total: u64,
    },

    #[error("corrupt cache artifact{path}: {detail}")]
    Corrupt { path: PathHint, detail: String },

    #[error("malformed listing{path}: {detail}")]
    MalformedListing { path: PathHint, detail: String },

    #[error("not a directory{path}")]
    NotADirectory { path: PathHint },

    #[error("is a directory{path}")]
    IsADirectory { path: PathHint },

    #[error("no remote source mounted{path}")]
    NoSource { path: PathHint },

    #[error("chunk index {index} out of range ({num_chunks} chunks)")]
    ChunkOutOfRange { index: u64, num_chunks: u64 },

    #[error("invalid seek to {target} (stream size {size})")]
    InvalidSeek { target: i128, size: u64 },

    #[error("object length unknown{path}")]
    UnknownLength { path: PathHint },

    #[error("request dropped before completion")]
    Abandoned,

    #[error("local cache i/o{path}: {source}")]
    Io {
        path: PathHint,
        #[source]
        source: Arc<io::Error>,
    },
}

pub type Result<T, E = RemoteError> = std::result::Result<T, E>;

impl RemoteError {
    pub fn io(path: impl Into<PathHint>, source: io::Error) -> Self {
        RemoteError::Io {
            path: path.into(),
            source: Arc::new(source),
        }
    }

    /// Map a non-2xx status onto the error taxonomy.
    pub fn from_status(status: u16, path: impl Into<PathHint>) -> Self {
        let path = path.into();
        match status {
            401 | 403 => RemoteError::Unauthorized { path },
            404 | 410 => RemoteError::NotFound { path },
            _ => RemoteError::Transport {
                path,
                status: Some(status),
                // request timeout and rate limiting are transient like 5xx
                retryable: status >= 500 || status == 408 || status == 429,
                message: format!("http status {status}"),
            },
        }
    }

    /// Only transport failures flagged as transient are ever retried.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RemoteError::Transport {
                retryable: true,
                ..
            }
        )
    }
}

impl From<RemoteError> for io::Error {
    fn from(err: RemoteError) -> Self {
        let kind = match &err {
            RemoteError::NotFound { .. } => ErrorKind::NotFound,
            RemoteError::Unauthorized { .. } => ErrorKind::PermissionDenied,
            RemoteError::Transport { retryable: true, .. } => ErrorKind::TimedOut,
            RemoteError::Transport { .. } => ErrorKind::ConnectionAborted,
            RemoteError::InvalidSeek { .. } | RemoteError::ChunkOutOfRange { .. } => {
                ErrorKind::InvalidInput
            }
            RemoteError::NotADirectory { .. } => ErrorKind::NotADirectory,
            RemoteError::IsADirectory { .. } => ErrorKind::IsADirectory,
            RemoteError::UnexpectedLength { .. }
            | RemoteError::Corrupt { .. }
            | RemoteError::MalformedListing { .. } => ErrorKind::InvalidData,
            RemoteError::Io { source, .. } => source.kind(),
            _ => ErrorKind::Other,
        };
        io::Error::new(kind, err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        assert!(matches!(
            RemoteError::from_status(404, "/data/a"),
            RemoteError::NotFound { .. }
        ));
        assert!(matches!(
            RemoteError::from_status(403, "/cloud"),
            RemoteError::Unauthorized { .. }
        ));
        assert!(RemoteError::from_status(503, "/x").is_retryable());
        assert!(RemoteError::from_status(429, "/x").is_retryable());
        assert!(!RemoteError::from_status(400, "/x").is_retryable());
        assert!(!RemoteError::from_status(404, "/x").is_retryable());
    }

    #[test]
    fn display_includes_path_hint() {
        let err = RemoteError::NotFound {
            path: PathHint::some("/data/missing.bin"),
        };
        assert_eq!(err.to_string(), "not found: /data/missing.bin");
        let err = RemoteError::NotFound {
            path: PathHint::none(),
        };
        assert_eq!(err.to_string(), "not found");
    }

    #[test]
    fn io_error_kind_mapping() {
        let err: io::Error = RemoteError::InvalidSeek { target: -1, size: 4 }.into();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
        let err: io::Error = RemoteError::from_status(502, "/x").into();
        assert_eq!(err.kind(), ErrorKind::TimedOut);
    }
}
