//! Error types for the highlight engine
//!
//! Per-item failures (a bad rule, an unreadable file, a failed drift write)
//! are logged and skipped where they happen; everything that reaches a
//! caller goes through [`Error`].

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Storage error: {0}")]
    Storage(String),

    /// The index has not been built yet; callers may fall back to a full scan.
    #[error("Highlight index is not available yet")]
    IndexUnavailable,

    #[error("Annotation {id} not found in {file}")]
    AnnotationNotFound { file: String, id: String },

    #[error("Comment {id} not found on annotation {annotation}")]
    CommentNotFound { annotation: String, id: String },

    #[error("Invalid highlight rule '{name}': {reason}")]
    InvalidRule { name: String, reason: String },

    #[error("Watch error: {0}")]
    Watch(String),
}

impl From<walkdir::Error> for Error {
    fn from(err: walkdir::Error) -> Self {
        Error::Storage(format!("failed to walk corpus: {err}"))
    }
}

impl From<notify::Error> for Error {
    fn from(err: notify::Error) -> Self {
        Error::Watch(err.to_string())
    }
}
