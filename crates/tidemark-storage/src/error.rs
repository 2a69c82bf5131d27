//! Error types for the storage layer.

use std::path::PathBuf;
use thiserror::Error;

/// Storage layer error types
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("file not found: {0}")]
    NotFound(PathBuf),

    #[error("corrupt file {path}: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StorageError {
    pub(crate) fn corrupt(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Corrupt {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// True when the underlying file simply does not exist.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound(_) => true,
            Self::Io(e) => e.kind() == std::io::ErrorKind::NotFound,
            Self::Corrupt { .. } => false,
        }
    }
}

/// Result type alias for storage operations
pub type Result<T> = std::result::Result<T, StorageError>;
