//! Durable record of identifiers that could not be downloaded.
//!
//! The ledger file is a JSON array of hyphenated identifiers in ascending
//! order. It is rewritten in full, through a scratch file and a rename, every
//! time an identifier is added, so the file on disk is never half-written and
//! never lags behind a logged failure.

use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use std::collections::BTreeSet;
use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::instrument;
use uuid::Uuid;

#[derive(Debug)]
pub struct FailureLedger {
    path: PathBuf,
    ids: BTreeSet<Uuid>,
}

impl FailureLedger {
    /// Read the ledger at `path`. A missing file is an empty ledger.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let ids = match tokio::fs::read(&path).await {
            Ok(data) => serde_json::from_slice(&data).or_raise(|| ErrorKind::Ledger(path.clone()))?,
            Err(e) if e.kind() == IoErrorKind::NotFound => BTreeSet::new(),
            Err(e) => return Err(e).or_raise(|| ErrorKind::Ledger(path)),
        };
        tracing::debug!(entries = ids.len(), "loaded failure ledger");
        Ok(Self { path, ids })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn contains(&self, id: &Uuid) -> bool {
        self.ids.contains(id)
    }

    /// Identifiers in ascending order.
    pub fn ids(&self) -> &BTreeSet<Uuid> {
        &self.ids
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Add `id` and persist the ledger before returning.
    ///
    /// Returns `false` (and writes nothing) if `id` was already recorded.
    pub async fn record(&mut self, id: Uuid) -> Result<bool> {
        if !self.ids.insert(id) {
            return Ok(false);
        }
        self.flush().await?;
        Ok(true)
    }

    /// Rewrite the backing file from memory.
    pub async fn flush(&self) -> Result<()> {
        let error = || ErrorKind::Ledger(self.path.clone());
        let data = serde_json::to_vec_pretty(&self.ids).or_raise(error)?;
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await.or_raise(error)?;
        }
        let scratch = self.scratch_path();
        let mut file = tokio::fs::File::create(&scratch).await.or_raise(error)?;
        file.write_all(&data).await.or_raise(error)?;
        file.sync_all().await.or_raise(error)?;
        drop(file);
        tokio::fs::rename(&scratch, &self.path).await.or_raise(error)
    }

    /// Forget every identifier and delete the backing file. A file that is
    /// already gone is fine.
    pub async fn discard(&mut self) -> Result<()> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => tracing::info!(path = %self.path.display(), "deleted failure ledger"),
            Err(e) if e.kind() == IoErrorKind::NotFound => {},
            Err(e) => return Err(e).or_raise(|| ErrorKind::Ledger(self.path.clone())),
        }
        self.ids.clear();
        Ok(())
    }

    fn scratch_path(&self) -> PathBuf {
        let mut name = self.path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}
