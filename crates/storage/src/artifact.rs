//! Sharded artifact layout.
//!
//! Every artifact lives at `<SHARD>/<id>.<ext>`, where `SHARD` is the most
//! significant byte of the identifier as two uppercase hex digits. That caps
//! the fan-out of any one directory at 256 shards.
//!
//! Writes go to `<SHARD>/<id>.<ext>.partial` and are renamed into place once
//! the stream has been fully drained, so a correctly named artifact is always
//! a complete one.

use crate::BackendHandle;
use crate::backend::ByteStream;
use crate::error::{ErrorKind, Result};
use futures::TryStreamExt;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::instrument;
use uuid::Uuid;

const PARTIAL_SUFFIX: &str = "partial";

#[derive(Clone)]
pub struct ArtifactStore {
    backend: BackendHandle,
    extension: String,
}

impl ArtifactStore {
    pub fn new(backend: BackendHandle, extension: impl Into<String>) -> Self {
        Self { backend, extension: extension.into() }
    }

    pub fn backend(&self) -> &BackendHandle {
        &self.backend
    }

    /// Shard directory name for an identifier.
    ///
    /// ```
    /// use seedbed_storage::ArtifactStore;
    /// use uuid::Uuid;
    ///
    /// let id = Uuid::parse_str("3f2504e0-4f89-11d3-9a0c-0305e82c3301").unwrap();
    /// assert_eq!(ArtifactStore::shard(&id), "3F");
    /// ```
    pub fn shard(id: &Uuid) -> String {
        format!("{:02X}", id.as_bytes()[0])
    }

    /// Relative path of the artifact for `id`.
    pub fn artifact_path(&self, id: &Uuid) -> PathBuf {
        PathBuf::from(Self::shard(id)).join(format!("{}.{}", id.hyphenated(), self.extension))
    }

    fn partial_path(&self, id: &Uuid) -> PathBuf {
        PathBuf::from(Self::shard(id)).join(format!("{}.{}.{PARTIAL_SUFFIX}", id.hyphenated(), self.extension))
    }

    /// Identifier of the artifact stored at `path`, if `path` is exactly where
    /// that artifact belongs.
    pub fn parse_artifact_path(&self, path: &Path) -> Option<Uuid> {
        let name = path.file_name()?.to_str()?;
        let stem = name.strip_suffix(&self.extension)?.strip_suffix('.')?;
        // Only the hyphenated form is ever written.
        if stem.len() != 36 {
            return None;
        }
        let id = Uuid::try_parse(stem).ok()?;
        (self.artifact_path(&id) == path).then_some(id)
    }

    /// Stream an artifact into place, returning its size.
    ///
    /// On any failure the scratch file is removed (best effort) and no
    /// artifact is left at the final path by this call.
    #[instrument(skip_all, fields(id = %id))]
    pub async fn put(&self, id: &Uuid, stream: ByteStream) -> Result<u64> {
        let partial = self.partial_path(id);
        let written = match self.backend.write_stream(&partial, stream).await {
            Ok(written) => written,
            Err(e) => {
                self.discard(&partial).await;
                return Err(e);
            },
        };
        if let Err(e) = self.backend.rename(&partial, &self.artifact_path(id)).await {
            self.discard(&partial).await;
            return Err(e);
        }
        Ok(written)
    }

    async fn discard(&self, path: &Path) {
        match self.backend.delete(path).await {
            Ok(()) => {},
            Err(e) if matches!(&*e, ErrorKind::NotFound(_)) => {},
            Err(e) => tracing::warn!(path = %path.display(), error = ?e, "could not remove partial artifact"),
        }
    }

    /// Delete the artifact for `id`, returning whether there was one.
    pub async fn remove(&self, id: &Uuid) -> Result<bool> {
        match self.backend.delete(&self.artifact_path(id)).await {
            Ok(()) => Ok(true),
            Err(e) if matches!(&*e, ErrorKind::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub async fn contains(&self, id: &Uuid) -> Result<bool> {
        self.backend.exists(&self.artifact_path(id)).await
    }

    /// Scan the whole tree once and collect the identifiers of every complete
    /// artifact. Partial downloads and foreign files are ignored.
    #[instrument(skip(self))]
    pub async fn downloaded_ids(&self) -> Result<HashSet<Uuid>> {
        self.backend
            .list_stream(None)
            .try_fold(HashSet::new(), |mut ids, info| async move {
                if let Some(id) = self.parse_artifact_path(&info.path) {
                    ids.insert(id);
                }
                Ok(ids)
            })
            .await
    }

    /// Delete every file in the store.
    pub async fn purge(&self) -> Result<()> {
        tracing::info!(backend = self.backend.name(), "purging artifact store");
        self.backend.clear().await
    }
}
