use hype_core::StoreError;
use rusqlite::ffi;
use thiserror::Error;

/// Errors produced by the SQLite layer.
#[derive(Error, Debug)]
pub enum DbError {
    /// SQLite error.
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Generic I/O error (e.g. creating the database directory).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Migration failure.
    #[error("Migration error: {0}")]
    Migration(String),

    /// A stored value could not be decoded.
    #[error("Corrupt row: {0}")]
    Corrupt(String),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, DbError>;

impl From<DbError> for StoreError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::Sqlite(rusqlite::Error::SqliteFailure(e, msg))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                if e.extended_code == ffi::SQLITE_CONSTRAINT_FOREIGNKEY {
                    StoreError::NotFound
                } else {
                    StoreError::Conflict(msg.unwrap_or_else(|| e.to_string()))
                }
            }
            other => StoreError::Backend(other.to_string()),
        }
    }
}
