//! Budgeted import of catalog artifacts, and reconciliation of the catalog
//! mirror against what was actually downloaded.
//!
//! The primary entry point is [`Pipeline`], which pages committed batches out
//! of the catalog newest first ([`import`]), downloads each artifact until a
//! [`Budget`] runs out, records every failed download in the
//! [`FailureLedger`] and finally runs [`reconcile`] so that a committed batch
//! survives in the catalog if and only if its artifact is on disk.

mod budget;
pub mod error;
mod fetch;
mod http;
mod import;
mod ledger;
mod pipeline;
mod readiness;
mod reconcile;

pub use crate::budget::{Budget, Limit};
pub use crate::fetch::{ArtifactSource, FetchFailure, FetchOutcome, Fetcher, SourceHandle};
pub use crate::http::HttpSource;
pub use crate::import::{ImportEvent, ImportOptions, ImportSummary, StopReason, Tally, import};
pub use crate::ledger::FailureLedger;
pub use crate::pipeline::{Pipeline, PipelineReport, Settings};
pub use crate::readiness::{Readiness, SeedMarker, SeedState};
pub use crate::reconcile::{ReconcileReport, reconcile};
