//! Error types for resource storage.
//!
//! Storage handlers translate their native failures into this vocabulary at
//! their boundary. Callers match on [`StorageError::NotFound`] and
//! [`StorageError::Conflict`] to drive HTTP semantics; everything a backend
//! cannot classify is passed through as a [`BackendError`].

// Error enum variant fields are self-documenting via their #[error(...)] messages
#![allow(missing_docs)]

use thiserror::Error;

/// The primary error type for all storage operations.
#[derive(Error, Debug)]
pub enum StorageError {
    /// A conditional write or delete found no document with the target id.
    #[error("not found")]
    NotFound,

    /// A conditional write found the document but its entity tag changed, or
    /// an insert collided with an existing id.
    #[error("conflict")]
    Conflict,

    /// The query uses a construct the storage handler cannot translate.
    #[error("not implemented")]
    NotImplemented,

    /// The execution context was cancelled or its deadline passed.
    #[error(transparent)]
    Context(#[from] ContextError),

    /// Backend-specific errors
    #[error(transparent)]
    Backend(#[from] BackendError),
}

impl StorageError {
    /// Returns `true` for [`StorageError::NotFound`].
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound)
    }

    /// Returns `true` for [`StorageError::Conflict`].
    pub fn is_conflict(&self) -> bool {
        matches!(self, StorageError::Conflict)
    }
}

/// Signals raised by an execution [`Context`](crate::context::Context).
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextError {
    /// The context was cancelled through its handle.
    #[error("context cancelled")]
    Cancelled,

    /// The context deadline passed.
    #[error("context deadline exceeded")]
    DeadlineExceeded,
}

/// Errors originating from the database backend.
#[derive(Error, Debug)]
pub enum BackendError {
    /// The backend is currently unavailable.
    #[error("backend unavailable: {backend_name}: {message}")]
    Unavailable {
        backend_name: String,
        message: String,
    },

    /// Connection to the backend failed.
    #[error("connection failed to {backend_name}: {message}")]
    ConnectionFailed {
        backend_name: String,
        message: String,
    },

    /// Internal backend error.
    #[error("internal error in {backend_name}: {message}")]
    Internal {
        backend_name: String,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Serialization/deserialization error.
    #[error("serialization error: {message}")]
    SerializationError { message: String },
}

/// A bulk clear that failed part way through.
///
/// Some documents may already be gone when the error is raised, so the
/// number actually removed travels with the error.
#[derive(Error, Debug)]
#[error("clear failed after removing {removed} item(s): {source}")]
pub struct ClearError {
    /// Number of items removed before the failure.
    pub removed: u64,
    /// The failure itself.
    #[source]
    pub source: StorageError,
}

impl ClearError {
    /// Wraps an error that occurred after `removed` items were deleted.
    pub fn new(removed: u64, source: impl Into<StorageError>) -> Self {
        Self {
            removed,
            source: source.into(),
        }
    }
}

impl From<StorageError> for ClearError {
    fn from(source: StorageError) -> Self {
        Self { removed: 0, source }
    }
}

impl From<ContextError> for ClearError {
    fn from(err: ContextError) -> Self {
        Self::from(StorageError::from(err))
    }
}

/// Result type alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Backend(BackendError::SerializationError {
            message: err.to_string(),
        })
    }
}
