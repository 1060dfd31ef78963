//! Reconciler.
//!
//! Brings the catalog mirror back in line with the artifact tree in three
//! phases, each its own transaction and each a no-op when there is nothing to
//! do:
//!
//! 1. delete every batch recorded in the failure ledger;
//! 2. delete every committed batch with no artifact on disk;
//! 3. delete every batch that isn't committed.
//!
//! Once all three have succeeded the ledger file is deleted, which is what
//! lets a previously failing identifier be tried again in a later cycle.

use crate::error::{ErrorKind, Result};
use crate::ledger::FailureLedger;
use exn::ResultExt;
use seedbed_catalog::{Removal, Repository};
use seedbed_storage::ArtifactStore;
use tracing::instrument;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Artifacts found on disk.
    pub artifacts: usize,
    pub ledgered: Removal,
    pub orphaned: Removal,
    pub uncommitted: Removal,
}

impl ReconcileReport {
    pub fn total(&self) -> Removal {
        let mut total = self.ledgered;
        total += self.orphaned;
        total += self.uncommitted;
        total
    }
}

#[instrument(skip_all, fields(dry_run = catalog.is_dry_run()))]
pub async fn reconcile(catalog: &Repository, store: &ArtifactStore, ledger: &mut FailureLedger) -> Result<ReconcileReport> {
    let artifacts = store.downloaded_ids().await.or_raise(|| ErrorKind::Storage)?;
    tracing::info!(artifacts = artifacts.len(), ledgered = ledger.len(), "reconciling catalog");

    let ledgered = catalog.delete_batches(ledger.ids()).await.or_raise(|| ErrorKind::Reconcile)?;
    tracing::info!(%ledgered, "removed ledgered batches");

    let orphaned = catalog.delete_committed_except(&artifacts).await.or_raise(|| ErrorKind::Reconcile)?;
    tracing::info!(%orphaned, "removed committed batches without an artifact");

    let uncommitted = catalog.delete_uncommitted().await.or_raise(|| ErrorKind::Reconcile)?;
    tracing::info!(%uncommitted, "removed uncommitted batches");

    if catalog.is_dry_run() {
        tracing::info!(path = %ledger.path().display(), "dry run; keeping failure ledger");
    } else {
        ledger.discard().await?;
    }
    Ok(ReconcileReport { artifacts: artifacts.len(), ledgered, orphaned, uncommitted })
}

#[cfg(test)]
mod tests {
    use super::*;
    use seedbed_catalog::{BatchStatus, CatalogEntry, Database};
    use seedbed_storage::backend::MockBackend;
    use std::sync::Arc;
    use time::UtcDateTime;
    use uuid::Uuid;

    fn id(n: u128) -> Uuid {
        Uuid::from_u128(n)
    }

    fn artifact(n: u128) -> (String, &'static str) {
        (format!("{}/{}.zip", ArtifactStore::shard(&id(n)), id(n).hyphenated()), "PK")
    }

    async fn catalog(entries: &[(u128, BatchStatus)]) -> (Database, Repository) {
        let db = Database::connect_in_memory().await.unwrap();
        let repo = Repository::from(&db);
        let created_on = UtcDateTime::from_unix_timestamp(1_700_000_000).unwrap();
        for (n, status) in entries {
            repo.insert_batch(&CatalogEntry::new(id(*n), created_on, *status)).await.unwrap();
            repo.insert_read_user(&id(*n), "someone").await.unwrap();
        }
        (db, repo)
    }

    #[tokio::test]
    async fn test_three_phases() {
        let (_db, repo) = catalog(&[
            (1, BatchStatus::Committed),
            (2, BatchStatus::Committed),
            (3, BatchStatus::Committed),
            (4, BatchStatus::Processing),
        ])
        .await;
        let store = ArtifactStore::new(Arc::new(MockBackend::with_files([artifact(1), artifact(2)])), "zip");
        let dir = tempfile::tempdir().unwrap();
        let mut ledger = FailureLedger::load(dir.path().join("invalid.json")).await.unwrap();
        ledger.record(id(2)).await.unwrap();

        let report = reconcile(&repo, &store, &mut ledger).await.unwrap();
        assert_eq!(report.artifacts, 2);
        assert_eq!(report.ledgered, Removal { batches: 1, rows: 1 });
        assert_eq!(report.orphaned, Removal { batches: 1, rows: 1 });
        assert_eq!(report.uncommitted, Removal { batches: 1, rows: 1 });
        assert_eq!(report.total().batches, 3);
        assert_eq!(repo.list_ids().await.unwrap(), vec![id(1)]);
        assert!(!ledger.path().exists());
        assert!(ledger.is_empty());
    }

    #[tokio::test]
    async fn test_second_pass_removes_nothing() {
        let (_db, repo) = catalog(&[(1, BatchStatus::Committed), (2, BatchStatus::Failed), (3, BatchStatus::Committed)]).await;
        let store = ArtifactStore::new(Arc::new(MockBackend::with_files([artifact(3)])), "zip");
        let dir = tempfile::tempdir().unwrap();
        let mut ledger = FailureLedger::load(dir.path().join("invalid.json")).await.unwrap();
        ledger.record(id(1)).await.unwrap();

        assert_eq!(reconcile(&repo, &store, &mut ledger).await.unwrap().total().batches, 2);
        let second = reconcile(&repo, &store, &mut ledger).await.unwrap();
        assert!(second.total().is_empty());
        assert_eq!(repo.list_ids().await.unwrap(), vec![id(3)]);
    }

    #[tokio::test]
    async fn test_no_artifacts_removes_every_committed_batch() {
        let (_db, repo) = catalog(&[(1, BatchStatus::Committed), (2, BatchStatus::Committed)]).await;
        let store = ArtifactStore::new(Arc::new(MockBackend::default()), "zip");
        let dir = tempfile::tempdir().unwrap();
        let mut ledger = FailureLedger::load(dir.path().join("invalid.json")).await.unwrap();
        let report = reconcile(&repo, &store, &mut ledger).await.unwrap();
        assert_eq!(report.orphaned.batches, 2);
        assert_eq!(repo.count_batches().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_dry_run_keeps_everything() {
        let (db, _) = catalog(&[(1, BatchStatus::Committed), (2, BatchStatus::Submitted)]).await;
        let dry = Repository::new(db.pool().clone(), true);
        let store = ArtifactStore::new(Arc::new(MockBackend::default()), "zip");
        let dir = tempfile::tempdir().unwrap();
        let mut ledger = FailureLedger::load(dir.path().join("invalid.json")).await.unwrap();
        ledger.record(id(1)).await.unwrap();

        let report = reconcile(&dry, &store, &mut ledger).await.unwrap();
        assert_eq!(report.ledgered.batches, 1);
        assert_eq!(report.uncommitted.batches, 1);
        assert_eq!(dry.count_batches().await.unwrap(), 2);
        assert!(ledger.path().exists());
    }
}
