//! Error types for value sources.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Result alias for value source operations.
pub type SourceResult<T> = std::result::Result<T, SourceError>;

/// Errors raised by value sources and their backends.
#[derive(Debug, Error)]
pub enum SourceError {
    /// No value exists for the key.
    #[error("value not present")]
    NotPresent {
        /// Requested key.
        key: String,
    },
    /// The backend lacks the requested capability.
    #[error("operation not implemented")]
    NotImplemented {
        /// Operation that is unsupported.
        operation: &'static str,
    },
    /// Reading a backing file failed.
    #[error("failed to read source file")]
    Io {
        /// File being read.
        path: PathBuf,
        /// Underlying I/O error.
        source: io::Error,
    },
    /// A backing document did not decode into a flat key/value table.
    #[error("failed to decode source document")]
    Decode {
        /// Document being decoded.
        path: PathBuf,
        /// Underlying reader error.
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    /// Registering a file-system watch failed.
    #[error("failed to watch source file")]
    Watch {
        /// Path being watched.
        path: PathBuf,
        /// Underlying watcher error.
        source: notify::Error,
    },
    /// A remote backend call failed.
    #[error("remote backend operation failed")]
    Remote {
        /// Operation identifier.
        operation: &'static str,
        /// Underlying backend error.
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl SourceError {
    /// Whether the error reports a missing key.
    #[must_use]
    pub const fn is_not_present(&self) -> bool {
        matches!(self, Self::NotPresent { .. })
    }

    /// Whether the error reports an unsupported capability.
    #[must_use]
    pub const fn is_not_implemented(&self) -> bool {
        matches!(self, Self::NotImplemented { .. })
    }

    pub(crate) fn not_present(key: &str) -> Self {
        Self::NotPresent {
            key: key.to_string(),
        }
    }
}
