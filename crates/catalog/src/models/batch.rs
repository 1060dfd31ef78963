use crate::error::{Error, ErrorKind, Result};
use crate::models::{BatchStatus, CatalogEntry, PageEntry};
use exn::ResultExt;
use time::UtcDateTime;
use uuid::Uuid;

const NANOS_PER_MILLI: i128 = 1_000_000;

/// `CreatedOn` is stored as Unix milliseconds; anything finer is truncated.
pub(crate) fn to_millis(at: UtcDateTime) -> Result<i64> {
    i64::try_from(at.unix_timestamp_nanos() / NANOS_PER_MILLI).or_raise(|| ErrorKind::InvalidData("creation date"))
}

pub(crate) fn from_millis(millis: i64) -> Result<UtcDateTime> {
    UtcDateTime::from_unix_timestamp_nanos(i128::from(millis) * NANOS_PER_MILLI)
        .or_raise(|| ErrorKind::InvalidData("creation date"))
}

fn parse_id(id: &str) -> Result<Uuid> {
    Uuid::try_parse(id).or_raise(|| ErrorKind::InvalidData("batch id"))
}

#[derive(sqlx::FromRow)]
pub(crate) struct PageRow {
    id: String,
    created_on: i64,
}
impl TryFrom<PageRow> for PageEntry {
    type Error = Error;
    fn try_from(row: PageRow) -> Result<Self> {
        Ok(Self {
            id: parse_id(&row.id)?,
            created_on: from_millis(row.created_on)?,
        })
    }
}

#[derive(sqlx::FromRow)]
pub(crate) struct BatchRow {
    pub id: String,
    pub created_on: i64,
    pub status: i64,
}
impl TryFrom<&CatalogEntry> for BatchRow {
    type Error = Error;
    fn try_from(entry: &CatalogEntry) -> Result<Self> {
        Ok(Self {
            id: entry.id.hyphenated().to_string(),
            created_on: to_millis(entry.created_on)?,
            status: entry.status.code(),
        })
    }
}
impl TryFrom<BatchRow> for CatalogEntry {
    type Error = Error;
    fn try_from(row: BatchRow) -> Result<Self> {
        Ok(Self {
            id: parse_id(&row.id)?,
            created_on: from_millis(row.created_on)?,
            status: BatchStatus::from(row.status),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_to_row() {
        let id = Uuid::parse_str("3F2504E0-4F89-11D3-9A0C-0305E82C3301").unwrap();
        let created_on = UtcDateTime::from_unix_timestamp_nanos(1_709_294_400_123_456_789).unwrap();
        let entry = CatalogEntry::committed(id, created_on);
        let row = BatchRow::try_from(&entry).unwrap();
        assert_eq!(row.id, "3f2504e0-4f89-11d3-9a0c-0305e82c3301");
        assert_eq!(row.created_on, 1_709_294_400_123);
        assert_eq!(row.status, 3);
    }

    #[test]
    fn test_row_to_entry() {
        let row = BatchRow {
            id: "3f2504e0-4f89-11d3-9a0c-0305e82c3301".to_string(),
            created_on: 1_709_294_400_123,
            status: 7,
        };
        let entry = CatalogEntry::try_from(row).unwrap();
        assert_eq!(entry.created_on, UtcDateTime::from_unix_timestamp_nanos(1_709_294_400_123_000_000).unwrap());
        assert_eq!(entry.status, BatchStatus::Other(7));
    }

    #[test]
    fn test_invalid_id() {
        let row = PageRow { id: "not-a-uuid".to_string(), created_on: 0 };
        let err = PageEntry::try_from(row).unwrap_err();
        assert!(matches!(&*err, ErrorKind::InvalidData("batch id")));
    }
}
