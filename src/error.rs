/// Error taxonomy shared by every component of the engine.
///
/// Each variant maps onto a stable kind tag (printed by the CLI) and a
/// process exit code, so callers can distinguish "no index yet" from a
/// corrupted one without string matching.
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Serialize, Serializer};
use thiserror::Error;

use crate::embedder::EmbedderError;
use crate::indexer::core::IndexStats;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid {field}: {message}")]
    BadRequest { field: String, message: String },

    #[error("query is empty")]
    EmptyQuery,

    #[error("invalid pattern `{pattern}`: {message}")]
    BadPattern { pattern: String, message: String },

    #[error("{what} not found: {}", path.display())]
    NotFound { path: PathBuf, what: &'static str },

    #[error("index is locked by another process: {}", path.display())]
    IndexBusy { path: PathBuf },

    #[error("index corrupted at {}: {message}", path.display())]
    IndexCorrupted { path: PathBuf, message: String },

    #[error("index incompatible at {}: {message}", path.display())]
    IndexIncompatible { path: PathBuf, message: String },

    #[error("embedding failed: {0}")]
    Embed(#[from] EmbedderError),

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("deadline exceeded")]
    Timeout { stats: Option<Box<IndexStats>> },

    #[error("internal error: {0}")]
    Internal(String),
}

/// Stable, user-visible error categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    BadRequest,
    NotFound,
    IndexBusy,
    IndexCorrupted,
    IndexIncompatible,
    EmbedFailure,
    IoFailure,
    Timeout,
    Internal,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::BadRequest => "BadRequest",
            ErrorKind::NotFound => "NotFound",
            ErrorKind::IndexBusy => "IndexBusy",
            ErrorKind::IndexCorrupted => "IndexCorrupted",
            ErrorKind::IndexIncompatible => "IndexIncompatible",
            ErrorKind::EmbedFailure => "EmbedFailure",
            ErrorKind::IoFailure => "IOFailure",
            ErrorKind::Timeout => "Timeout",
            ErrorKind::Internal => "Internal",
        }
    }
}

impl Serialize for ErrorKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::BadRequest { .. } | Error::EmptyQuery | Error::BadPattern { .. } => {
                ErrorKind::BadRequest
            }
            Error::NotFound { .. } => ErrorKind::NotFound,
            Error::IndexBusy { .. } => ErrorKind::IndexBusy,
            Error::IndexCorrupted { .. } => ErrorKind::IndexCorrupted,
            Error::IndexIncompatible { .. } => ErrorKind::IndexIncompatible,
            Error::Embed(_) => ErrorKind::EmbedFailure,
            Error::Io { .. } => ErrorKind::IoFailure,
            Error::Timeout { .. } => ErrorKind::Timeout,
            Error::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Exit code used by the CLI for this error.
    pub fn exit_code(&self) -> i32 {
        match self.kind() {
            ErrorKind::BadRequest => 2,
            ErrorKind::NotFound => 3,
            ErrorKind::IndexBusy => 4,
            ErrorKind::IndexCorrupted | ErrorKind::IndexIncompatible => 5,
            _ => 1,
        }
    }

    pub fn bad_request(field: impl Into<String>, message: impl Into<String>) -> Self {
        Error::BadRequest {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    pub fn corrupted(path: impl AsRef<Path>, message: impl Into<String>) -> Self {
        Error::IndexCorrupted {
            path: path.as_ref().to_path_buf(),
            message: message.into(),
        }
    }

    pub fn incompatible(path: impl AsRef<Path>, message: impl Into<String>) -> Self {
        Error::IndexIncompatible {
            path: path.as_ref().to_path_buf(),
            message: message.into(),
        }
    }
}
