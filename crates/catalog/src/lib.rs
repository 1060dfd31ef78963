//! Relational catalog mirror.
//!
//! The mirror is a local SQLite copy of the remote batch catalog. Only
//! committed batches are ever downloaded, and reconciliation deletes every
//! batch that has no artifact on disk, cascading through the relations that
//! hang off it (see [`Repository`]).

mod cascade;
mod db;
pub mod error;
mod models;
mod repo;

pub use crate::db::Database;
pub use crate::models::{BatchStatus, CatalogEntry, Cursor, PageEntry, Removal};
pub use crate::repo::Repository;
