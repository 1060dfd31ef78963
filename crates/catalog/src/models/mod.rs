mod batch;
mod status;

pub(crate) use self::batch::{BatchRow, PageRow, from_millis, to_millis};
pub use self::status::BatchStatus;
use std::fmt;
use std::ops::AddAssign;
use time::UtcDateTime;
use uuid::Uuid;

/// One batch of remote content mirrored in the catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
    pub id: Uuid,
    pub created_on: UtcDateTime,
    pub status: BatchStatus,
}

impl CatalogEntry {
    pub fn new(id: Uuid, created_on: UtcDateTime, status: BatchStatus) -> Self {
        Self { id, created_on, status }
    }

    pub fn committed(id: Uuid, created_on: UtcDateTime) -> Self {
        Self::new(id, created_on, BatchStatus::Committed)
    }
}

/// A single row of a catalog page: just enough to fetch the artifact and to
/// continue paging after it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageEntry {
    pub id: Uuid,
    pub created_on: UtcDateTime,
}

/// Keyset watermark: the sort key of the last entry observed.
///
/// Entries are ordered by `(created_on DESC, id DESC)`, which is a strict
/// total order because identifiers are unique.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cursor {
    pub created_on: UtcDateTime,
    pub id: Uuid,
}

impl From<&PageEntry> for Cursor {
    fn from(entry: &PageEntry) -> Self {
        Self { created_on: entry.created_on, id: entry.id }
    }
}

/// Rows removed (or, in dry-run mode, that would be removed) by a delete.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Removal {
    /// Rows removed from the `Batch` relation.
    pub batches: u64,
    /// Rows removed from dependent relations.
    pub rows: u64,
}

impl Removal {
    pub fn is_empty(&self) -> bool {
        self.batches == 0 && self.rows == 0
    }

    pub fn total(&self) -> u64 {
        self.batches + self.rows
    }
}

impl AddAssign for Removal {
    fn add_assign(&mut self, other: Self) {
        self.batches += other.batches;
        self.rows += other.rows;
    }
}

impl fmt::Display for Removal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} batches ({} dependent rows)", self.batches, self.rows)
    }
}
