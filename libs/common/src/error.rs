//! Custom error types for the common library
//!
//! This module defines the storage error type shared by every store
//! implementation in the workspace.

use sqlx::Error as SqlxError;
use thiserror::Error;

/// Custom error type for database operations
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// Error occurred during database connection
    #[error("Database connection error: {0}")]
    Connection(#[source] SqlxError),

    /// Error occurred during database query execution
    #[error("Database query error: {0}")]
    Query(#[source] SqlxError),

    /// Error occurred during database migration
    #[error("Database migration error: {0}")]
    Migration(String),

    /// Configuration error
    #[error("Database configuration error: {0}")]
    Configuration(String),

    /// Failure reported by a non-SQL backend (Redis, in-process stores)
    #[error("Storage backend error: {0}")]
    Backend(String),

    /// A unique constraint rejected the write; carries the constraint name
    #[error("Unique constraint violated: {0}")]
    UniqueViolation(String),
}

impl DatabaseError {
    /// Classify a failed query, separating unique-constraint violations
    pub fn query(error: SqlxError) -> Self {
        match error.as_database_error() {
            Some(db) if db.is_unique_violation() => {
                DatabaseError::UniqueViolation(db.constraint().unwrap_or_default().to_string())
            }
            _ => DatabaseError::Query(error),
        }
    }
}

impl From<redis::RedisError> for DatabaseError {
    fn from(e: redis::RedisError) -> Self {
        DatabaseError::Backend(e.to_string())
    }
}

/// Type alias for Result with DatabaseError
pub type DatabaseResult<T> = Result<T, DatabaseError>;
