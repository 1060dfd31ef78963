//! In-memory storage backend for testing.

use super::{ByteStream, FileInfoStream};
use crate::StorageBackend;
use crate::error::{ErrorKind, Result};
use crate::models::FileInfo;
use crate::path::validate as validate_path;
use async_stream::stream;
use async_trait::async_trait;
use futures::StreamExt;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use time::UtcDateTime;
use tokio::sync::RwLock;

/// In-memory storage backend for testing.
///
/// Files are stored in a `HashMap` behind a [`RwLock`], so all trait methods
/// can operate on `&self`. Writes to paths registered with
/// [`failing_writes`](Self::failing_writes) fail with an I/O error, which lets
/// tests exercise disk-side failures without a real filesystem.
///
/// # Examples
///
/// ```
/// use seedbed_storage::backend::MockBackend;
/// use seedbed_storage::StorageBackend;
/// use std::path::Path;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let backend = MockBackend::with_files([("AB/abc.zip", b"PK..")]);
/// assert!(backend.exists(Path::new("AB/abc.zip")).await?);
/// # Ok(())
/// # }
/// ```
pub struct MockBackend {
    name: String,
    storage: RwLock<HashMap<PathBuf, (UtcDateTime, Vec<u8>)>>,
    failing: HashSet<PathBuf>,
}

impl MockBackend {
    /// Create a mock backend pre-populated with files.
    ///
    /// Panics if any path fails validation. If test setup is wrong, then the
    /// test should not pass.
    pub fn with_files(files: impl IntoIterator<Item = (impl Into<PathBuf>, impl Into<Vec<u8>>)>) -> Self {
        let now = UtcDateTime::now();
        let mut map = HashMap::new();
        for (path, data) in files {
            let path = path.into();
            let Ok(validated) = validate_path(&path) else {
                panic!("MockBackend::with_files: invalid path {}", path.display());
            };
            map.insert(validated, (now, data.into()));
        }
        Self {
            name: "mock".to_string(),
            storage: RwLock::new(map),
            failing: HashSet::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Make every write to the given paths fail.
    pub fn failing_writes(mut self, paths: impl IntoIterator<Item = impl Into<PathBuf>>) -> Self {
        self.failing.extend(paths.into_iter().map(Into::into));
        self
    }

    /// Contents of a file, if present.
    pub async fn contents(&self, path: impl AsRef<Path>) -> Option<Vec<u8>> {
        self.storage.read().await.get(path.as_ref()).map(|(_, data)| data.clone())
    }

    /// Number of files currently stored.
    pub async fn len(&self) -> usize {
        self.storage.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.storage.read().await.is_empty()
    }

    fn file_info(path: &Path, size: usize, inserted: UtcDateTime) -> FileInfo {
        FileInfo::new(path, size as u64, inserted)
    }
}
impl Default for MockBackend {
    fn default() -> Self {
        let files: [(&str, &str); 0] = [];
        Self::with_files(files)
    }
}

#[async_trait]
impl StorageBackend for MockBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn list_stream<'a>(&'a self, prefix: Option<&'a Path>) -> FileInfoStream<'a> {
        let validated_prefix = match prefix.map(validate_path).transpose() {
            Ok(pfx) => pfx,
            Err(e) => return Box::pin(futures::stream::once(async { Err(e) })),
        };
        Box::pin(stream! {
            // Snapshot under the read lock so it isn't held across yields.
            let matching: Vec<FileInfo> = {
                let storage = self.storage.read().await;
                storage
                    .iter()
                    .filter(|(path, _)| validated_prefix.as_ref().is_none_or(|pfx| path.starts_with(pfx)))
                    .map(|(path, (inserted, data))| Self::file_info(path, data.len(), *inserted))
                    .collect()
            };
            for info in matching {
                yield Ok(info);
            }
        })
    }

    async fn exists(&self, path: &Path) -> Result<bool> {
        let path = validate_path(path)?;
        Ok(self.storage.read().await.contains_key(&path))
    }

    async fn write_stream(&self, path: &Path, mut stream: ByteStream) -> Result<u64> {
        let path = validate_path(path)?;
        if self.failing.contains(&path) {
            exn::bail!(ErrorKind::Io(std::io::Error::other("injected write failure")));
        }
        // Truncate first, mirroring a create-or-truncate open on disk.
        self.storage.write().await.insert(path.clone(), (UtcDateTime::now(), Vec::new()));
        let mut buffer = Vec::new();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(ErrorKind::Source)?;
            buffer.extend_from_slice(&chunk);
            self.storage.write().await.insert(path.clone(), (UtcDateTime::now(), buffer.clone()));
        }
        Ok(buffer.len() as u64)
    }

    async fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        let from = validate_path(from)?;
        let to = validate_path(to)?;
        let mut storage = self.storage.write().await;
        let Some(entry) = storage.remove(&from) else {
            exn::bail!(ErrorKind::NotFound(from));
        };
        storage.insert(to, entry);
        Ok(())
    }

    async fn delete(&self, path: &Path) -> Result<()> {
        let path = validate_path(path)?;
        match self.storage.write().await.remove(&path) {
            Some(_) => Ok(()),
            None => exn::bail!(ErrorKind::NotFound(path)),
        }
    }

    async fn stat(&self, path: &Path) -> Result<FileInfo> {
        let path = validate_path(path)?;
        let storage = self.storage.read().await;
        let Some((inserted, data)) = storage.get(&path) else {
            exn::bail!(ErrorKind::NotFound(path));
        };
        Ok(Self::file_info(&path, data.len(), *inserted))
    }

    async fn clear(&self) -> Result<()> {
        self.storage.write().await.clear();
        Ok(())
    }
}
