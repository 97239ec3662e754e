//! Error types for the core domain.

use thiserror::Error;

/// Core domain error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid dataset path: {0}")]
    InvalidPath(String),

    #[error("invalid slice: {0}")]
    InvalidSlice(String),

    #[error("unsupported slice step {0}: only step 1 is supported")]
    UnsupportedStep(String),

    #[error("index {index} out of bounds for dimension {dim} of length {len}")]
    IndexOutOfBounds { index: i64, dim: usize, len: u64 },

    #[error("too many indices: {given} selectors for {ndim} dimensions")]
    TooManyIndices { given: usize, ndim: usize },

    #[error("unknown dtype: {0}")]
    UnknownDtype(String),

    #[error("invalid shape: {0}")]
    InvalidShape(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl Error {
    /// Whether the error was caused by caller input rather than local state.
    pub fn is_bad_request(&self) -> bool {
        !matches!(self, Self::Serialization(_))
    }
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;
