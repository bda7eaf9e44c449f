//! Adapter error types.

use thiserror::Error;

/// Errors that can occur in the storage adapter.
#[derive(Debug, Error)]
pub enum DfsError {
    /// Storage error.
    #[error("storage error: {0}")]
    Store(#[from] gitkv_store::StorageError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A stream or channel was used after it was closed.
    #[error("{0} is closed")]
    ClosedStream(String),
}

impl DfsError {
    /// Returns true if the error reports a missing pack file.
    pub fn is_not_found(&self) -> bool {
        match self {
            DfsError::Store(e) => e.is_not_found(),
            DfsError::Io(e) => e.kind() == std::io::ErrorKind::NotFound,
            DfsError::ClosedStream(_) => false,
        }
    }
}

impl From<DfsError> for std::io::Error {
    fn from(err: DfsError) -> Self {
        match err {
            DfsError::Store(e) => e.into(),
            DfsError::Io(e) => e,
            closed @ DfsError::ClosedStream(_) => std::io::Error::other(closed),
        }
    }
}
