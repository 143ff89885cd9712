//! Store Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.

use derive_more::{Display, Error};

/// A store error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for store operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// A unique index rejected the write.
    #[display("duplicate key for index {_0} in collection {_1}")]
    DuplicateKey(#[error(not(source))] String, #[error(not(source))] String),
    /// Another writer committed changes the session depends on; retry the
    /// whole unit of work.
    #[display("write conflict in collection {_0}")]
    WriteConflict(#[error(not(source))] String),
    /// The session was never started, or has already been committed/aborted.
    #[display("unknown session: {_0}")]
    UnknownSession(#[error(not(source))] u64),
    /// Document is not shaped the way the operation requires.
    #[display("invalid document: {_0}")]
    InvalidDocument(#[error(not(source))] &'static str),
    /// Mutation cannot be applied to the matched document.
    #[display("invalid mutation on field {_0}: {_1}")]
    InvalidMutation(#[error(not(source))] String, #[error(not(source))] &'static str),
    /// Collection, index or field name the backend cannot represent safely.
    #[display("invalid name: {_0}")]
    InvalidName(#[error(not(source))] String),
    /// Underlying database error.
    #[display("database error")]
    Database,
    /// Database migration error.
    #[display("database migration error")]
    Migration,
    /// Stored data could not be (de)serialized.
    #[display("invalid stored data: {_0}")]
    InvalidData(#[error(not(source))] &'static str),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::WriteConflict(_) | Self::Database)
    }
}
