//! Error types for the ledger

use thiserror::Error;

/// Result type for ledger operations
pub type Result<T> = std::result::Result<T, Error>;

/// Ledger errors
#[derive(Error, Debug)]
pub enum Error {
    /// Database error (sqlx)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Insert collided with an existing primary or unique key
    #[error("Duplicate key in {table}: {key}")]
    DuplicateKey {
        /// Table name
        table: &'static str,
        /// Offending key
        key: String,
    },

    /// Table does not exist (dropped and not yet restored)
    #[error("Table {0} doesn't exist")]
    TableMissing(&'static str),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// Backup command failed or returned an unusable answer
    #[error("Backup error: {0}")]
    Backup(String),

    /// Restore command failed
    #[error("Restore error: {0}")]
    Restore(String),

    /// Invariant violation (row counts, unexpected rows, etc.)
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether this error is a duplicate-key rejection from either backend
    pub fn is_duplicate_key(&self) -> bool {
        match self {
            Error::DuplicateKey { .. } => true,
            Error::Database(sqlx::Error::Database(db)) => db.is_unique_violation(),
            _ => false,
        }
    }
}
