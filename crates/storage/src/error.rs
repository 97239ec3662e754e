//! Storage error types.

use thiserror::Error;

/// Storage operation errors.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("no chunk {nchunk} in {path} ({nchunks} chunks)")]
    NoSuchChunk {
        path: String,
        nchunk: u64,
        nchunks: u64,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("codec error: {0}")]
    Codec(String),

    #[error("invalid container format: {0}")]
    Format(String),

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error(transparent)]
    Core(#[from] tessera_core::Error),
}

impl StorageError {
    /// Map an I/O error to `NotFound` when the entry does not exist.
    pub(crate) fn from_io(err: std::io::Error, what: impl std::fmt::Display) -> Self {
        if err.kind() == std::io::ErrorKind::NotFound {
            StorageError::NotFound(what.to_string())
        } else {
            StorageError::Io(err)
        }
    }

    pub(crate) fn join(err: tokio::task::JoinError) -> Self {
        StorageError::Io(std::io::Error::other(format!("spawn_blocking failed: {err}")))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_) | Self::NoSuchChunk { .. })
    }
}

/// Result type for storage operations.
pub type StorageResult<T> = std::result::Result<T, StorageError>;
