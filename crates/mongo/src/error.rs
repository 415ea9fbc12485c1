//! Translation of MongoDB driver failures into the storage error vocabulary.

use mongodb::error::{Error as DriverError, ErrorKind, WriteFailure};
use strata_resource::error::{BackendError, StorageError};

pub(crate) const BACKEND_NAME: &str = "mongodb";

/// Server error code for a unique index violation.
pub(crate) const DUPLICATE_KEY_CODE: i32 = 11000;

/// Returns `true` if `err` carries a duplicate key write error.
///
/// Single-document writes report it as a write error, `insert_many` as one of
/// its indexed write errors.
pub(crate) fn is_duplicate_key(err: &DriverError) -> bool {
    match err.kind.as_ref() {
        ErrorKind::Write(WriteFailure::WriteError(write_error)) => {
            has_duplicate_key_code([write_error.code])
        }
        ErrorKind::InsertMany(failure) => failure
            .write_errors
            .as_ref()
            .is_some_and(|errors| has_duplicate_key_code(errors.iter().map(|e| e.code))),
        _ => false,
    }
}

fn has_duplicate_key_code(codes: impl IntoIterator<Item = i32>) -> bool {
    codes.into_iter().any(|code| code == DUPLICATE_KEY_CODE)
}

/// Wraps an unclassified driver error.
pub(crate) fn driver_error(err: DriverError) -> StorageError {
    StorageError::Backend(BackendError::Internal {
        backend_name: BACKEND_NAME.to_string(),
        message: err.to_string(),
        source: Some(Box::new(err)),
    })
}

pub(crate) fn serialization_error(message: String) -> StorageError {
    StorageError::Backend(BackendError::SerializationError { message })
}
