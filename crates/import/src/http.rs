//! Remote artifact source over HTTP.

use crate::error::{ErrorKind, Result};
use crate::fetch::{ArtifactSource, FetchFailure};
use async_trait::async_trait;
use exn::ResultExt;
use futures::TryStreamExt;
use seedbed_config::Config;
use seedbed_storage::ByteStream;
use std::time::Duration;
use uuid::Uuid;

/// Downloads `GET {base_url}/batch/{id}/files`, the zipped contents of one
/// batch.
#[derive(Debug, Clone)]
pub struct HttpSource {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl HttpSource {
    /// `read_timeout` bounds the silence between two reads, not the whole
    /// download, so a large artifact on a slow link still completes.
    pub fn new(
        base_url: impl Into<String>,
        token: Option<String>,
        connect_timeout: Duration,
        read_timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(connect_timeout)
            .read_timeout(read_timeout)
            .build()
            .or_raise(|| ErrorKind::Setup)?;
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Ok(Self { client, base_url, token })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(&config.remote.base_url, config.remote.token.clone(), config.connect_timeout(), config.read_timeout())
    }

    pub fn url(&self, id: &Uuid) -> String {
        format!("{}/batch/{}/files", self.base_url, id.hyphenated())
    }
}

#[async_trait]
impl ArtifactSource for HttpSource {
    fn name(&self) -> &str {
        "http"
    }

    async fn download(&self, id: &Uuid) -> std::result::Result<ByteStream, FetchFailure> {
        let mut request = self.client.get(self.url(id));
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        let response = request.send().await.map_err(|e| FetchFailure::Transport(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchFailure::Status(status.as_u16()));
        }
        Ok(Box::pin(response.bytes_stream().map_err(std::io::Error::other)))
    }
}
