//! Import Error Types
//!
//! Only failures that end a run live here. A single artifact that can't be
//! downloaded is a [`FetchFailure`](crate::FetchFailure) value instead: it is
//! recorded in the ledger and the run carries on.

use derive_more::{Display, Error};
use std::path::PathBuf;

/// An import error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for import operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Classifies the origin of a fatal pipeline failure.
///
/// ### Startup Errors
/// - [`ErrorKind::Setup`]
///
/// ### Run Errors
/// - [`ErrorKind::Catalog`] - paging the catalog failed; a half-paged
///   catalog is not trusted, so the run stops.
/// - [`ErrorKind::Ledger`]
/// - [`ErrorKind::Storage`]
/// - [`ErrorKind::Reconcile`] - one of the reconciliation phases failed and
///   was rolled back; artifacts already downloaded are kept.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// A collaborator could not be constructed from configuration.
    #[display("pipeline setup failed")]
    Setup,
    #[display("catalog query failed")]
    Catalog,
    /// The failure ledger could not be read or persisted.
    #[display("failure ledger unavailable: {}", _0.display())]
    Ledger(#[error(not(source))] PathBuf),
    /// The artifact tree could not be scanned or cleared.
    #[display("artifact storage failed")]
    Storage,
    #[display("reconciliation failed")]
    Reconcile,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    ///
    /// Every phase is idempotent, so re-running the pipeline after a storage
    /// hiccup is safe; nothing else is expected to heal by itself.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Storage)
    }
}
