//! Filesystem side of the data image.
//!
//! [`StorageBackend`] is a small async CRUD interface over a storage root;
//! [`ArtifactStore`] layers the sharded artifact layout on top of it.

mod artifact;
pub mod backend;
pub mod error;
mod models;
mod path;

pub use crate::artifact::ArtifactStore;
pub use crate::backend::{ByteStream, StorageBackend};
pub use crate::models::FileInfo;
pub use crate::path::validate as validate_path;
use std::sync::Arc;

pub type BackendHandle = Arc<dyn StorageBackend + Send + Sync>;
