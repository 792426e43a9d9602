//! Error types for orgstore

use std::io;

use thiserror::Error;

/// Result type alias for orgstore operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for data-access operations
///
/// Absence by id is never an error: lookups return `Option::None`.
#[derive(Debug, Error)]
pub enum Error {
    /// Argument outside its domain (page number, page size, config values)
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The underlying store call failed; the cause is kept as the source
    #[error("store failure: {0}")]
    Store(#[from] StoreError),

    /// I/O error while reading a fixture or config file
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Malformed seed fixture or configuration document
    #[error("parse error: {0}")]
    Parse(String),
}

/// Failures reported by a store implementation
#[derive(Debug, Error)]
pub enum StoreError {
    /// Store has been closed, no further calls are served
    #[error("store is closed")]
    Closed,

    /// A write would break a foreign key or uniqueness rule
    #[error("constraint violation: {0}")]
    Constraint(String),

    /// Opaque backend fault (connectivity, driver error)
    #[error(transparent)]
    Backend(Box<dyn std::error::Error + Send + Sync>),
}

impl Error {
    /// Shorthand for [`Error::InvalidArgument`]
    pub fn invalid(message: impl Into<String>) -> Self {
        Error::InvalidArgument(message.into())
    }

    /// True when the error came from the store rather than the caller
    pub fn is_store_failure(&self) -> bool {
        matches!(self, Error::Store(_))
    }
}

impl StoreError {
    /// Wrap an arbitrary backend error
    pub fn backend<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        StoreError::Backend(Box::new(err))
    }
}

impl From<nom::Err<nom::error::Error<&str>>> for Error {
    fn from(err: nom::Err<nom::error::Error<&str>>) -> Self {
        Error::Parse(format!("{:?}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_store_failure_keeps_cause() {
        let cause = io::Error::new(io::ErrorKind::ConnectionReset, "connection reset");
        let err: Error = StoreError::backend(cause).into();

        assert!(err.is_store_failure());
        assert_eq!(err.to_string(), "store failure: connection reset");

        let source = err.source().unwrap();
        assert_eq!(source.to_string(), "connection reset");
    }

    #[test]
    fn test_invalid_argument_display() {
        let err = Error::invalid("page size must be at least 1");
        assert!(!err.is_store_failure());
        assert_eq!(err.to_string(), "invalid argument: page size must be at least 1");
    }

    #[test]
    fn test_constraint_display() {
        let err: Error = StoreError::Constraint("order 3 references missing user 9".into()).into();
        assert_eq!(
            err.to_string(),
            "store failure: constraint violation: order 3 references missing user 9"
        );
    }
}
