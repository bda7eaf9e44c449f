//! Storage error types.

use thiserror::Error;

/// Errors raised by a [`Session`](crate::Session) implementation.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The store could not be reached or refused the connection.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The store rejected the statement (unknown table, bad column, type mismatch).
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    /// Row data could not be encoded or decoded by the session.
    #[error("row codec error: {0}")]
    Codec(String),

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that can occur during reference and pack storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Communication with the backing store failed.
    #[error("store communication failed: {0}")]
    Transport(#[from] SessionError),

    /// A required file was not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// The stored data violates an invariant that should be impossible.
    #[error("inconsistent store state: {0}")]
    Inconsistent(String),

    /// The caller supplied invalid input. Raised before any store access.
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl StorageError {
    /// Returns true if this error reports a missing file.
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound(_))
    }

    /// Returns true if this error came from the store client.
    pub fn is_transport(&self) -> bool {
        matches!(self, StorageError::Transport(_))
    }

    /// Returns true if this error reports corrupted or impossible stored state.
    pub fn is_inconsistent(&self) -> bool {
        matches!(self, StorageError::Inconsistent(_))
    }

    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        StorageError::InvalidInput(message.into())
    }

    pub(crate) fn inconsistent(message: impl Into<String>) -> Self {
        StorageError::Inconsistent(message.into())
    }
}

impl From<StorageError> for std::io::Error {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(name) => {
                std::io::Error::new(std::io::ErrorKind::NotFound, name)
            }
            StorageError::InvalidInput(message) => {
                std::io::Error::new(std::io::ErrorKind::InvalidInput, message)
            }
            other => std::io::Error::other(other),
        }
    }
}

/// A specialized Result type for session operations.
pub type SessionResult<T> = std::result::Result<T, SessionError>;
