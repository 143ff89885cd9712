//! Repository Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction. Store and cache failures keep the
//! originating error as a child frame.

use crate::validation::Violations;
use derive_more::{Display, Error};
use versa_store::error::ErrorKind as StoreErrorKind;

/// A repository error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for repository operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
/// A record that does not exist (or did not match) is never an error: it is
/// reported as `None`, `false` or an empty result.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// The payload or stored document broke the validation rules; nothing was
    /// written.
    #[display("validation failed: {_0}")]
    Validation(#[error(not(source))] Violations),
    /// A concurrent writer invalidated the transaction; retry the whole unit
    /// of work.
    #[display("write conflict")]
    Conflict,
    /// A unique index rejected the write.
    #[display("duplicate key for index {_0}")]
    Duplicate(#[error(not(source))] String),
    /// The document store failed.
    #[display("store operation failed")]
    Store,
    /// The cache backend failed.
    #[display("cache operation failed")]
    Cache,
    /// A payload or stored document does not have the shape of the model.
    #[display("invalid data: {_0}")]
    InvalidData(#[error(not(source))] String),
    /// Repository settings were rejected at construction.
    #[display("invalid repository configuration: {_0}")]
    Config(#[error(not(source))] String),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Conflict | Self::Cache)
    }

    /// Convert a store error into a repository error, preserving the store
    /// crate's `Exn` frame as a child in its own error tree.
    #[track_caller]
    pub fn store(err: versa_store::error::Error) -> Error {
        let kind = match &*err {
            StoreErrorKind::WriteConflict(_) => Self::Conflict,
            StoreErrorKind::DuplicateKey(index, _) => Self::Duplicate(index.clone()),
            StoreErrorKind::InvalidMutation(path, reason) => Self::InvalidData(format!("{path}: {reason}")),
            _ => Self::Store,
        };
        err.raise(kind)
    }

    /// Convert a cache error into a repository error, keeping it as a child.
    #[track_caller]
    pub fn cache(err: versa_cache::error::Error) -> Error {
        err.raise(Self::Cache)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validation::Violation;

    #[test]
    fn test_store_errors_are_classified() {
        let conflict = ErrorKind::store(exn::Exn::from(StoreErrorKind::WriteConflict("users".into())));
        assert!(matches!(&*conflict, ErrorKind::Conflict));
        assert!(conflict.is_retryable());
        let duplicate = ErrorKind::store(exn::Exn::from(StoreErrorKind::DuplicateKey("email_1".into(), "users".into())));
        assert!(matches!(&*duplicate, ErrorKind::Duplicate(index) if index == "email_1"));
        let database = ErrorKind::store(exn::Exn::from(StoreErrorKind::Database));
        assert!(matches!(&*database, ErrorKind::Store));
        assert!(!database.is_retryable());
    }

    #[test]
    fn test_validation_display() {
        let violations = Violations::from(vec![Violation::new("name", "is required")]);
        assert_eq!(ErrorKind::Validation(violations).to_string(), "validation failed: name: is required");
    }
}
