//! Error types for adapter operations.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for adapter operations.
pub type AdapterResult<T> = Result<T, AdapterError>;

/// Errors that can occur during adapter operations.
#[derive(Debug, Error)]
pub enum AdapterError {
    /// An I/O error occurred while reading or writing a file.
    #[error("I/O error on {path}: {source}")]
    Io {
        /// The path that was being accessed.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// The file contents are not valid UTF-8 text.
    #[error("file is not valid UTF-8: {path}")]
    NotUtf8 {
        /// The path that was being read.
        path: PathBuf,
    },
}

impl AdapterError {
    /// Creates an I/O error for the given path.
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Creates a not-UTF-8 error for the given path.
    pub fn not_utf8(path: impl Into<PathBuf>) -> Self {
        Self::NotUtf8 { path: path.into() }
    }
}
