//! Catalog Error Types
//!
//! Errors are `exn` trees: the leaf is the driver error, the kinds stacked on
//! top say what the caller was doing.

use derive_more::{Display, Error};

/// A catalog error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for catalog operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// Connecting, querying or committing failed.
    #[display("database error")]
    Database,
    #[display("database migration error")]
    Migration,
    /// A stored value could not be mapped onto the catalog model.
    #[display("invalid catalog data: {_0}")]
    InvalidData(#[error(not(source))] &'static str),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    ///
    /// A failed statement rolls back its transaction, so repeating a whole
    /// reconciliation phase is always safe.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Database)
    }
}
