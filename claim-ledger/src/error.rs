//! Error types for the claim ledger

use std::time::Duration;
use thiserror::Error;

/// Result type for ledger operations
pub type Result<T> = std::result::Result<T, Error>;

/// Ledger errors
#[derive(Error, Debug)]
pub enum Error {
    /// The ledger lock could not be taken in time
    #[error("Lock not acquired within {0:?}")]
    LockTimeout(Duration),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Ledger document could not be parsed
    #[error("Corrupt ledger: {0}")]
    Corrupt(String),

    /// CSV export error
    #[error("Export error: {0}")]
    Export(String),

    /// Invariant violation (total/receipt mismatch, etc.)
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<csv::Error> for Error {
    fn from(err: csv::Error) -> Self {
        Error::Export(err.to_string())
    }
}
