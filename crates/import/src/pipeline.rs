use crate::budget::Budget;
use crate::error::{ErrorKind, Result};
use crate::fetch::{Fetcher, SourceHandle};
use crate::http::HttpSource;
use crate::import::{ImportEvent, ImportOptions, ImportSummary, StopReason, import};
use crate::ledger::FailureLedger;
use crate::readiness::SeedMarker;
use crate::reconcile::{ReconcileReport, reconcile};
use exn::{OptionExt, ResultExt};
use futures::StreamExt;
use seedbed_catalog::{Database, Repository};
use seedbed_config::Config;
use seedbed_storage::ArtifactStore;
use seedbed_storage::backend::LocalBackend;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

/// Everything a pipeline needs to know that isn't a collaborator.
#[derive(Debug, Clone)]
pub struct Settings {
    pub max_bytes: u64,
    pub max_count: u64,
    pub import: ImportOptions,
    pub ledger_path: PathBuf,
    /// Import on top of existing artifacts instead of emptying the store first.
    pub keep_existing: bool,
}

impl From<&Config> for Settings {
    fn from(config: &Config) -> Self {
        Self {
            max_bytes: config.limits.max_bytes.bytes(),
            max_count: config.limits.max_count,
            import: ImportOptions::from(config),
            ledger_path: config.ledger_path(),
            keep_existing: config.import.keep_existing,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineReport {
    pub import: ImportSummary,
    /// `None` when the import was cancelled and reconciliation skipped.
    pub reconcile: Option<ReconcileReport>,
}

/// Import followed by reconciliation, wired from one [`Config`].
pub struct Pipeline {
    db: Database,
    fetcher: Fetcher,
    settings: Settings,
    dry_run: bool,
    marker: Option<SeedMarker>,
}

impl Pipeline {
    pub fn new(db: Database, source: SourceHandle, store: ArtifactStore, settings: Settings) -> Self {
        Self { db, fetcher: Fetcher::new(source, store), settings, dry_run: false, marker: None }
    }

    /// Connect to the catalog, open the artifact store under the data image
    /// and build the HTTP source.
    #[instrument(skip_all)]
    pub async fn from_config(config: &Config) -> Result<Self> {
        let db = Database::connect(&config.database).await.or_raise(|| ErrorKind::Catalog)?;
        let backend = LocalBackend::new("bin", config.bin_path()).or_raise(|| ErrorKind::Setup)?;
        let store = ArtifactStore::new(Arc::new(backend), config.import.extension.clone());
        let source = HttpSource::from_config(config)?;
        Ok(Self::new(db, Arc::new(source), store, Settings::from(config)))
    }

    /// Report what reconciliation would delete without deleting it.
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn keep_existing(mut self, keep_existing: bool) -> Self {
        self.settings.keep_existing = keep_existing;
        self
    }

    /// Mark the seed state as ready once a full run has reconciled.
    pub fn with_marker(mut self, marker: SeedMarker) -> Self {
        self.marker = Some(marker);
        self
    }

    fn catalog(&self) -> Repository {
        Repository::new(self.db.pool().clone(), self.dry_run)
    }

    /// Run the import loop, then reconcile unless the import was cancelled.
    ///
    /// The artifact store is emptied first unless `keep_existing` is set, so
    /// the caps bound the whole image and not only this run's downloads.
    #[instrument(skip_all)]
    pub async fn run(&self, cancel: CancellationToken) -> Result<PipelineReport> {
        if !self.settings.keep_existing {
            self.clean().await?;
        }
        let catalog = self.catalog();
        let mut ledger = FailureLedger::load(&self.settings.ledger_path).await?;
        let budget = Budget::new(self.settings.max_bytes, self.settings.max_count);

        let mut summary = None;
        {
            let events = import(&catalog, &self.fetcher, &mut ledger, budget, self.settings.import, cancel);
            let mut events = std::pin::pin!(events);
            while let Some(event) = events.next().await {
                if let ImportEvent::Complete(done) = event? {
                    summary = Some(done);
                }
            }
        }
        let summary = summary.ok_or_raise(|| ErrorKind::Catalog)?;

        if summary.stopped == StopReason::Cancelled {
            tracing::warn!("import cancelled; skipping reconciliation");
            return Ok(PipelineReport { import: summary, reconcile: None });
        }
        let report = reconcile(&catalog, self.fetcher.store(), &mut ledger).await?;
        if let Some(marker) = &self.marker {
            marker.mark_seeded();
        }
        Ok(PipelineReport { import: summary, reconcile: Some(report) })
    }

    /// Reconcile against whatever is currently on disk.
    #[instrument(skip_all)]
    pub async fn reconcile_only(&self) -> Result<ReconcileReport> {
        let mut ledger = FailureLedger::load(&self.settings.ledger_path).await?;
        reconcile(&self.catalog(), self.fetcher.store(), &mut ledger).await
    }

    /// Delete every artifact.
    pub async fn clean(&self) -> Result<()> {
        self.fetcher.store().purge().await.or_raise(|| ErrorKind::Storage)
    }

    pub async fn close(&self) {
        self.db.close().await;
    }
}
