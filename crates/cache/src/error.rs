//! Cache Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.

use derive_more::{Display, Error};

/// A cache error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for cache operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// The cache backend could not be reached or refused the operation.
    #[display("cache backend unavailable: {_0}")]
    Unavailable(#[error(not(source))] String),
    /// A value could not be encoded for the cache.
    #[display("invalid cache data")]
    InvalidData,
    /// Namespace or key the cache cannot address unambiguously.
    #[display("invalid cache key: {_0}")]
    InvalidKey(#[error(not(source))] String),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable() {
        assert!(ErrorKind::Unavailable("down".into()).is_retryable());
        assert!(!ErrorKind::InvalidData.is_retryable());
        assert_eq!(ErrorKind::InvalidKey("a:b".into()).to_string(), "invalid cache key: a:b");
    }
}
