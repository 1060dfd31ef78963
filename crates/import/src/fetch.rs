//! Content Fetcher.
//!
//! A [`Fetcher`] pairs a remote [`ArtifactSource`] with the local
//! [`ArtifactStore`]. Every way a single download can go wrong is folded
//! into one [`FetchFailure`] value so that the caller can match on the
//! outcome rather than propagate it.

use async_trait::async_trait;
use derive_more::Display;
use seedbed_storage::{ArtifactStore, ByteStream};
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

/// Why one artifact could not be downloaded.
#[derive(Debug, Display, Clone, PartialEq, Eq)]
pub enum FetchFailure {
    /// The request never produced a response.
    #[display("transport error: {_0}")]
    Transport(String),
    /// The remote service answered with a non-success status.
    #[display("remote returned status {_0}")]
    Status(u16),
    /// The body stream broke, or the artifact could not be written.
    #[display("stream error: {_0}")]
    Stream(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// Bytes written to the artifact store.
    Success(u64),
    Failure(FetchFailure),
}

/// Where artifacts are downloaded from.
#[async_trait]
pub trait ArtifactSource: Send + Sync {
    /// Name of the source (used for logging only).
    fn name(&self) -> &str;

    /// Open the artifact body for `id`.
    async fn download(&self, id: &Uuid) -> Result<ByteStream, FetchFailure>;
}

pub type SourceHandle = Arc<dyn ArtifactSource>;

#[derive(Clone)]
pub struct Fetcher {
    source: SourceHandle,
    store: ArtifactStore,
}

impl Fetcher {
    pub fn new(source: SourceHandle, store: ArtifactStore) -> Self {
        Self { source, store }
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    /// Download one artifact into the store.
    ///
    /// The artifact only appears under its final name once the whole body has
    /// been written, so a failure never leaves anything that looks complete.
    /// A failure also removes any copy left by an earlier run: a failed id is
    /// ledgered and purged from the catalog, and its artifact goes with it.
    #[instrument(skip(self), fields(source = self.source.name()))]
    pub async fn fetch(&self, id: &Uuid) -> FetchOutcome {
        let failure = match self.source.download(id).await {
            Ok(body) => match self.store.put(id, body).await {
                Ok(bytes) => return FetchOutcome::Success(bytes),
                Err(e) => FetchFailure::Stream(e.to_string()),
            },
            Err(failure) => failure,
        };
        match self.store.remove(id).await {
            Ok(true) => tracing::debug!("removed artifact from an earlier run"),
            Ok(false) => {},
            Err(e) => tracing::warn!(error = ?e, "could not remove artifact of failed download"),
        }
        FetchOutcome::Failure(failure)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use seedbed_storage::backend::MockBackend;

    struct Canned(Result<&'static [u8], FetchFailure>);

    #[async_trait]
    impl ArtifactSource for Canned {
        fn name(&self) -> &str {
            "canned"
        }

        async fn download(&self, _id: &Uuid) -> Result<ByteStream, FetchFailure> {
            match &self.0 {
                Ok(data) => Ok(Box::pin(futures::stream::iter(vec![Ok(Bytes::from_static(data))]))),
                Err(failure) => Err(failure.clone()),
            }
        }
    }

    fn fetcher(source: Canned, backend: MockBackend) -> (Arc<MockBackend>, Fetcher) {
        let backend = Arc::new(backend);
        let store = ArtifactStore::new(backend.clone(), "zip");
        (backend, Fetcher::new(Arc::new(source), store))
    }

    #[tokio::test]
    async fn test_success_reports_bytes_written() {
        let (_, fetcher) = fetcher(Canned(Ok(b"PK\x05\x06")), MockBackend::default());
        let id = Uuid::from_u128(7);
        assert_eq!(fetcher.fetch(&id).await, FetchOutcome::Success(4));
        assert!(fetcher.store().contains(&id).await.unwrap());
    }

    #[tokio::test]
    async fn test_remote_failure_writes_nothing() {
        let (backend, fetcher) = fetcher(Canned(Err(FetchFailure::Status(404))), MockBackend::default());
        let outcome = fetcher.fetch(&Uuid::from_u128(7)).await;
        assert_eq!(outcome, FetchOutcome::Failure(FetchFailure::Status(404)));
        assert!(backend.is_empty().await);
    }

    #[tokio::test]
    async fn test_failure_removes_earlier_artifact() {
        let id = Uuid::from_u128(7);
        let earlier = format!("00/{}.zip", id.hyphenated());
        let (backend, fetcher) = fetcher(
            Canned(Err(FetchFailure::Transport("connection reset".to_string()))),
            MockBackend::with_files([(earlier, "PK")]),
        );
        assert!(matches!(fetcher.fetch(&id).await, FetchOutcome::Failure(FetchFailure::Transport(_))));
        assert!(!fetcher.store().contains(&id).await.unwrap());
        assert!(backend.is_empty().await);
    }

    #[tokio::test]
    async fn test_disk_failure_is_a_stream_failure() {
        let id = Uuid::from_u128(7);
        let partial = format!("00/{}.zip.partial", id.hyphenated());
        let (backend, fetcher) = fetcher(Canned(Ok(b"PK")), MockBackend::default().failing_writes([partial]));
        let outcome = fetcher.fetch(&id).await;
        assert!(matches!(outcome, FetchOutcome::Failure(FetchFailure::Stream(_))));
        assert!(backend.is_empty().await);
    }
}
