//! Store Error Types
//!
//! One error type for every storage backend, the transaction executor and the
//! transfer engine.

use thiserror::Error;

/// Ledger store error types
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    // === Lookup Errors ===
    #[error("{resource} not found: {id}")]
    NotFound { resource: &'static str, id: i64 },

    // === Validation Errors ===
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    // === Storage Errors ===
    #[error("Foreign key violation: {0}")]
    ForeignKeyViolation(String),

    #[error("Lock timeout on {resource} {id}")]
    LockTimeout { resource: &'static str, id: i64 },

    #[error("Database error: {0}")]
    Database(String),

    /// The unit of work failed and the rollback issued for it failed as well.
    #[error("Transaction error: {error}, rollback error: {rollback_error}")]
    Rollback {
        error: Box<StoreError>,
        rollback_error: Box<StoreError>,
    },
}

impl StoreError {
    pub fn not_found(resource: &'static str, id: i64) -> Self {
        StoreError::NotFound { resource, id }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }

    /// Get the error code for API responses
    pub fn code(&self) -> &'static str {
        match self {
            StoreError::NotFound { .. } => "NOT_FOUND",
            StoreError::InvalidInput(_) => "INVALID_INPUT",
            StoreError::ForeignKeyViolation(_) => "FOREIGN_KEY_VIOLATION",
            StoreError::LockTimeout { .. } => "LOCK_TIMEOUT",
            StoreError::Database(_) => "DATABASE_ERROR",
            StoreError::Rollback { .. } => "ROLLBACK_FAILED",
        }
    }

    /// Get HTTP status code suggestion
    ///
    /// Only lookups and rejected input are client errors; every storage
    /// failure is reported as a generic server failure.
    pub fn http_status(&self) -> u16 {
        match self {
            StoreError::NotFound { .. } => 404,
            StoreError::InvalidInput(_) => 400,
            StoreError::ForeignKeyViolation(_)
            | StoreError::LockTimeout { .. }
            | StoreError::Database(_)
            | StoreError::Rollback { .. } => 500,
        }
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        if let Some(db_err) = e.as_database_error()
            && db_err.is_foreign_key_violation()
        {
            return StoreError::ForeignKeyViolation(db_err.message().to_string());
        }
        StoreError::Database(e.to_string())
    }
}
