//! Persistence layer for rollcalld
//!
//! Provides:
//! - Course sessions and attendance records (compare-and-set on version)
//! - Leave applications with their approval history
//! - Verification windows (at most one unexpired window per session)
//! - Audit log (append-only)

mod audit;
mod sqlite;
mod traits;

pub use audit::*;
pub use sqlite::*;
pub use traits::*;

use rollcall_util::AttendanceError;
use thiserror::Error;

/// Store errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    /// Compare-and-set lost: the row changed since it was read
    #[error("Version conflict: {0}")]
    Conflict(String),

    /// Uniqueness or check constraint rejected the write
    #[error("Constraint violated: {0}")]
    Constraint(String),

    #[error("Active application exists: {0}")]
    ActiveApplication(String),

    #[error("Verification window still open: {0}")]
    WindowActive(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        match &e {
            rusqlite::Error::SqliteFailure(err, _)
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                StoreError::Constraint(e.to_string())
            }
            _ => StoreError::Database(e.to_string()),
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

impl From<StoreError> for AttendanceError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(what) => AttendanceError::not_found(what),
            StoreError::Conflict(what) => AttendanceError::conflict(what),
            StoreError::ActiveApplication(what) => AttendanceError::duplicate_application(what),
            StoreError::WindowActive(what) => AttendanceError::window_already_active(what),
            StoreError::Constraint(what) => AttendanceError::conflict(what),
            other => AttendanceError::store(other.to_string()),
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;
    use rollcall_util::ErrorKind;

    #[test]
    fn store_errors_keep_their_meaning() {
        let err: AttendanceError = StoreError::Conflict("record r1".into()).into();
        assert_eq!(err.kind(), ErrorKind::Conflict);

        let err: AttendanceError = StoreError::WindowActive("cs101".into()).into();
        assert_eq!(err.kind(), ErrorKind::WindowAlreadyActive);

        let err: AttendanceError = StoreError::Database("disk I/O error".into()).into();
        assert_eq!(err.kind(), ErrorKind::Store);
    }
}
