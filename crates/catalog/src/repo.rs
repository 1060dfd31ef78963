//! Catalog repository: keyset paging and cascade deletes.
//!
//! Deletes run inside a single transaction per call. In dry-run mode the same
//! statements run and the transaction is rolled back, so the reported counts
//! are exactly what a real run would remove.

use crate::Database;
use crate::cascade::{self, PLAN, Selection};
use crate::error::{ErrorKind, Result};
use crate::models::{BatchRow, BatchStatus, CatalogEntry, Cursor, PageEntry, PageRow, Removal, to_millis};
use exn::ResultExt;
use sqlx::{Sqlite, SqliteConnection, SqlitePool, Transaction};
use std::collections::HashSet;
use tracing::instrument;
use uuid::Uuid;

/// Identifiers pushed into the temporary retention table per statement.
const RETAIN_CHUNK: usize = 5_000;

fn key(id: &Uuid) -> String {
    id.hyphenated().to_string()
}

fn id_list<'a>(ids: impl IntoIterator<Item = &'a Uuid>) -> Result<String> {
    let ids: Vec<String> = ids.into_iter().map(key).collect();
    serde_json::to_string(&ids).or_raise(|| ErrorKind::InvalidData("identifier list"))
}

/// Repository over the `Batch` relation and everything that hangs off it.
#[derive(Debug, Clone)]
pub struct Repository {
    pool: SqlitePool,
    dry_run: bool,
}
impl From<&Database> for Repository {
    fn from(db: &Database) -> Self {
        Self { pool: db.pool().clone(), dry_run: false }
    }
}
impl Repository {
    pub fn new(pool: SqlitePool, dry_run: bool) -> Self {
        Self { pool, dry_run }
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    // =========================================================================
    // Paging
    // =========================================================================

    /// Fetch the next page of committed batches strictly after `cursor`.
    ///
    /// Pages are ordered by `(CreatedOn DESC, Id DESC)`. Identifiers in
    /// `exclude` are filtered inside the query, before `LIMIT` applies, so a
    /// page is only ever empty once the catalog is exhausted.
    #[instrument(skip(self, exclude), fields(dry_run = self.dry_run))]
    pub async fn next_page<'a>(
        &self,
        cursor: Option<&Cursor>,
        page_size: u32,
        exclude: impl IntoIterator<Item = &'a Uuid>,
    ) -> Result<Vec<PageEntry>> {
        let exclude = id_list(exclude)?;
        let rows: Vec<PageRow> = match cursor {
            None => sqlx::query_as(include_str!("../queries/first_page.sql"))
                .bind(BatchStatus::COMMITTED)
                .bind(exclude)
                .bind(i64::from(page_size))
                .fetch_all(&self.pool)
                .await
                .or_raise(|| ErrorKind::Database)?,
            Some(cursor) => sqlx::query_as(include_str!("../queries/next_page.sql"))
                .bind(BatchStatus::COMMITTED)
                .bind(exclude)
                .bind(i64::from(page_size))
                .bind(to_millis(cursor.created_on)?)
                .bind(key(&cursor.id))
                .fetch_all(&self.pool)
                .await
                .or_raise(|| ErrorKind::Database)?,
        };
        rows.into_iter().map(PageEntry::try_from).collect()
    }

    // =========================================================================
    // Insert
    // =========================================================================

    /// Insert a batch. The catalog is normally populated upstream; this exists
    /// for fixtures and seeding.
    pub async fn insert_batch(&self, entry: &CatalogEntry) -> Result<()> {
        let row = BatchRow::try_from(entry)?;
        sqlx::query(include_str!("../queries/insert_batch.sql"))
            .bind(row.id)
            .bind(row.status)
            .bind(row.created_on)
            .execute(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(())
    }

    /// Insert a file belonging to `batch`, returning its row identifier.
    pub async fn insert_file(&self, batch: &Uuid, name: &str, size: u64) -> Result<i64> {
        let size = i64::try_from(size).or_raise(|| ErrorKind::InvalidData("file size"))?;
        let result = sqlx::query(include_str!("../queries/insert_file.sql"))
            .bind(key(batch))
            .bind(name)
            .bind(size)
            .execute(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(result.last_insert_rowid())
    }

    pub async fn insert_file_attribute(&self, file: i64, name: &str, value: &str) -> Result<()> {
        sqlx::query(include_str!("../queries/insert_file_attribute.sql"))
            .bind(file)
            .bind(name)
            .bind(value)
            .execute(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(())
    }

    pub async fn insert_batch_attribute(&self, batch: &Uuid, name: &str, value: &str) -> Result<()> {
        sqlx::query(include_str!("../queries/insert_batch_attribute.sql"))
            .bind(key(batch))
            .bind(name)
            .bind(value)
            .execute(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(())
    }

    pub async fn insert_read_group(&self, batch: &Uuid, group: &str) -> Result<()> {
        sqlx::query(include_str!("../queries/insert_read_group.sql"))
            .bind(key(batch))
            .bind(group)
            .execute(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(())
    }

    pub async fn insert_read_user(&self, batch: &Uuid, user: &str) -> Result<()> {
        sqlx::query(include_str!("../queries/insert_read_user.sql"))
            .bind(key(batch))
            .bind(user)
            .execute(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(())
    }

    // =========================================================================
    // Get/Fetch
    // =========================================================================

    pub async fn get(&self, id: &Uuid) -> Result<Option<CatalogEntry>> {
        let row: Option<BatchRow> = sqlx::query_as(include_str!("../queries/get_batch.sql"))
            .bind(key(id))
            .fetch_optional(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        row.map(CatalogEntry::try_from).transpose()
    }

    /// Every batch regardless of status, in paging order.
    pub async fn list(&self) -> Result<Vec<CatalogEntry>> {
        let rows: Vec<BatchRow> = sqlx::query_as(include_str!("../queries/list_batches.sql"))
            .fetch_all(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        rows.into_iter().map(CatalogEntry::try_from).collect()
    }

    pub async fn list_ids(&self) -> Result<Vec<Uuid>> {
        Ok(self.list().await?.into_iter().map(|entry| entry.id).collect())
    }

    pub async fn count_batches(&self) -> Result<u64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM Batch")
            .fetch_one(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        u64::try_from(count).or_raise(|| ErrorKind::InvalidData("row count"))
    }

    /// Number of rows in dependent relations owned by `id`.
    pub async fn dependent_rows(&self, id: &Uuid) -> Result<u64> {
        let batches = Selection::One.sql();
        let mut total = 0;
        for dependent in PLAN {
            let (count,): (i64,) = sqlx::query_as(&dependent.count(&batches))
                .bind(key(id))
                .fetch_one(&self.pool)
                .await
                .or_raise(|| ErrorKind::Database)?;
            total += u64::try_from(count).or_raise(|| ErrorKind::InvalidData("row count"))?;
        }
        Ok(total)
    }

    // =========================================================================
    // Delete
    // =========================================================================

    /// Cascade-delete one batch. Deleting an absent batch removes nothing.
    pub async fn delete_batch(&self, id: &Uuid) -> Result<Removal> {
        self.delete_batches([id]).await
    }

    /// Cascade-delete every listed batch in one transaction.
    #[instrument(skip_all, fields(dry_run = self.dry_run))]
    pub async fn delete_batches<'a>(&self, ids: impl IntoIterator<Item = &'a Uuid>) -> Result<Removal> {
        let mut tx = self.begin().await?;
        let mut removal = Removal::default();
        for id in ids {
            let removed = cascade_delete(&mut *tx, Selection::One, Some(&key(id))).await?;
            tracing::debug!(id = %id, %removed, "deleted batch");
            removal += removed;
        }
        self.finish(tx).await?;
        Ok(removal)
    }

    /// Cascade-delete every committed batch whose identifier is not in
    /// `retained`.
    ///
    /// The retained identifiers are loaded into a connection-local temporary
    /// table in chunks and excluded in a single set-based statement per
    /// relation. An empty `retained` set removes every committed batch.
    #[instrument(skip_all, fields(retained = retained.len(), dry_run = self.dry_run))]
    pub async fn delete_committed_except(&self, retained: &HashSet<Uuid>) -> Result<Removal> {
        let ids: Vec<&Uuid> = retained.iter().collect();
        let mut tx = self.begin().await?;
        sqlx::query(include_str!("../queries/create_retained.sql"))
            .execute(&mut *tx)
            .await
            .or_raise(|| ErrorKind::Database)?;
        sqlx::query("DELETE FROM temp.retained")
            .execute(&mut *tx)
            .await
            .or_raise(|| ErrorKind::Database)?;
        for chunk in ids.chunks(RETAIN_CHUNK) {
            sqlx::query(include_str!("../queries/fill_retained.sql"))
                .bind(id_list(chunk.iter().copied())?)
                .execute(&mut *tx)
                .await
                .or_raise(|| ErrorKind::Database)?;
        }
        let removal = cascade_delete(&mut *tx, Selection::Orphaned, None).await?;
        sqlx::query("DROP TABLE temp.retained")
            .execute(&mut *tx)
            .await
            .or_raise(|| ErrorKind::Database)?;
        self.finish(tx).await?;
        Ok(removal)
    }

    /// Cascade-delete every batch that is not committed.
    #[instrument(skip_all, fields(dry_run = self.dry_run))]
    pub async fn delete_uncommitted(&self) -> Result<Removal> {
        let mut tx = self.begin().await?;
        let removal = cascade_delete(&mut *tx, Selection::Uncommitted, None).await?;
        self.finish(tx).await?;
        Ok(removal)
    }

    async fn begin(&self) -> Result<Transaction<'static, Sqlite>> {
        self.pool.begin().await.or_raise(|| ErrorKind::Database)
    }

    async fn finish(&self, tx: Transaction<'static, Sqlite>) -> Result<()> {
        if self.dry_run {
            tx.rollback().await.or_raise(|| ErrorKind::Database)
        } else {
            tx.commit().await.or_raise(|| ErrorKind::Database)
        }
    }
}

/// Delete the selected batches' dependent rows in plan order, then the
/// batches themselves.
async fn cascade_delete(conn: &mut SqliteConnection, selection: Selection, id: Option<&str>) -> Result<Removal> {
    let batches = selection.sql();
    let mut removal = Removal::default();
    for dependent in PLAN {
        let sql = dependent.delete(&batches);
        removal.rows += execute(conn, &sql, selection, id).await?;
    }
    removal.batches = execute(conn, &cascade::delete_parent(&batches), selection, id).await?;
    Ok(removal)
}

async fn execute(conn: &mut SqliteConnection, sql: &str, selection: Selection, id: Option<&str>) -> Result<u64> {
    let mut query = sqlx::query(sql);
    if selection.binds_id() {
        query = query.bind(id.unwrap_or_default());
    }
    let result = query.execute(&mut *conn).await.or_raise(|| ErrorKind::Database)?;
    Ok(result.rows_affected())
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::UtcDateTime;

    const DAY: i64 = 86_400;

    fn id(n: u128) -> Uuid {
        Uuid::from_u128(n)
    }

    fn day(n: i64) -> UtcDateTime {
        UtcDateTime::from_unix_timestamp(1_700_000_000 + n * DAY).unwrap()
    }

    async fn repo() -> Repository {
        let db = Database::connect_in_memory().await.unwrap();
        Repository::from(&db)
    }

    async fn seed(repo: &Repository, entry: CatalogEntry) {
        repo.insert_batch(&entry).await.unwrap();
        let file = repo.insert_file(&entry.id, "data.bin", 10).await.unwrap();
        repo.insert_file_attribute(file, "checksum", "abc").await.unwrap();
        repo.insert_file_attribute(file, "mime", "application/zip").await.unwrap();
        repo.insert_batch_attribute(&entry.id, "origin", "test").await.unwrap();
        repo.insert_read_group(&entry.id, "readers").await.unwrap();
        repo.insert_read_user(&entry.id, "alice").await.unwrap();
    }

    async fn traverse(repo: &Repository, page_size: u32, exclude: &HashSet<Uuid>) -> Vec<Uuid> {
        let mut cursor = None;
        let mut visited = Vec::new();
        loop {
            let page = repo.next_page(cursor.as_ref(), page_size, exclude).await.unwrap();
            let Some(last) = page.last() else { break };
            cursor = Some(Cursor::from(last));
            visited.extend(page.iter().map(|entry| entry.id));
        }
        visited
    }

    #[tokio::test]
    async fn test_first_page_ordering() {
        let repo = repo().await;
        repo.insert_batch(&CatalogEntry::committed(id(1), day(1))).await.unwrap();
        repo.insert_batch(&CatalogEntry::committed(id(2), day(3))).await.unwrap();
        repo.insert_batch(&CatalogEntry::committed(id(3), day(2))).await.unwrap();
        repo.insert_batch(&CatalogEntry::new(id(4), day(9), BatchStatus::Processing)).await.unwrap();
        let page = repo.next_page(None, 10, &HashSet::new()).await.unwrap();
        let ids: Vec<Uuid> = page.iter().map(|entry| entry.id).collect();
        assert_eq!(ids, vec![id(2), id(3), id(1)]);
        assert_eq!(page[0].created_on, day(3));
    }

    #[tokio::test]
    async fn test_equal_timestamps_break_ties_by_id_across_pages() {
        let repo = repo().await;
        for n in 1..=5 {
            repo.insert_batch(&CatalogEntry::committed(id(n), day(1))).await.unwrap();
        }
        // A high first byte must sort after a low one in descending order.
        let high = Uuid::parse_str("f0000000-0000-0000-0000-000000000000").unwrap();
        repo.insert_batch(&CatalogEntry::committed(high, day(1))).await.unwrap();
        let visited = traverse(&repo, 2, &HashSet::new()).await;
        assert_eq!(visited, vec![high, id(5), id(4), id(3), id(2), id(1)]);
    }

    #[tokio::test]
    async fn test_traversal_is_deterministic() {
        let repo = repo().await;
        for n in 1..=25u128 {
            repo.insert_batch(&CatalogEntry::committed(id(n * 7919), day((n % 4) as i64))).await.unwrap();
        }
        let first = traverse(&repo, 4, &HashSet::new()).await;
        let second = traverse(&repo, 4, &HashSet::new()).await;
        assert_eq!(first.len(), 25);
        assert_eq!(first, second);
        assert_eq!(first.iter().collect::<HashSet<_>>().len(), 25);
    }

    #[tokio::test]
    async fn test_excluded_ids_never_returned_and_pages_stay_full() {
        let repo = repo().await;
        for n in 1..=6 {
            repo.insert_batch(&CatalogEntry::committed(id(n), day(n as i64))).await.unwrap();
        }
        let exclude = HashSet::from([id(6), id(5)]);
        let page = repo.next_page(None, 2, &exclude).await.unwrap();
        let ids: Vec<Uuid> = page.iter().map(|entry| entry.id).collect();
        assert_eq!(ids, vec![id(4), id(3)]);
        assert_eq!(traverse(&repo, 2, &exclude).await, vec![id(4), id(3), id(2), id(1)]);
    }

    #[tokio::test]
    async fn test_empty_page_when_exhausted() {
        let repo = repo().await;
        repo.insert_batch(&CatalogEntry::committed(id(1), day(1))).await.unwrap();
        let page = repo.next_page(None, 10, &HashSet::new()).await.unwrap();
        let cursor = Cursor::from(&page[0]);
        assert!(repo.next_page(Some(&cursor), 10, &HashSet::new()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_batch_cascades() {
        let repo = repo().await;
        seed(&repo, CatalogEntry::committed(id(1), day(1))).await;
        seed(&repo, CatalogEntry::committed(id(2), day(2))).await;
        assert_eq!(repo.dependent_rows(&id(1)).await.unwrap(), 6);
        let removal = repo.delete_batch(&id(1)).await.unwrap();
        assert_eq!(removal, Removal { batches: 1, rows: 6 });
        assert!(repo.get(&id(1)).await.unwrap().is_none());
        assert_eq!(repo.dependent_rows(&id(1)).await.unwrap(), 0);
        assert_eq!(repo.dependent_rows(&id(2)).await.unwrap(), 6);
        // Absent rows are a no-op.
        assert!(repo.delete_batch(&id(1)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_batches() {
        let repo = repo().await;
        for n in 1..=3 {
            seed(&repo, CatalogEntry::committed(id(n), day(1))).await;
        }
        let removal = repo.delete_batches(&[id(1), id(3), id(99)]).await.unwrap();
        assert_eq!(removal, Removal { batches: 2, rows: 12 });
        assert_eq!(repo.list_ids().await.unwrap(), vec![id(2)]);
    }

    #[tokio::test]
    async fn test_delete_committed_except() {
        let repo = repo().await;
        seed(&repo, CatalogEntry::committed(id(1), day(1))).await;
        seed(&repo, CatalogEntry::committed(id(2), day(2))).await;
        seed(&repo, CatalogEntry::new(id(3), day(3), BatchStatus::Submitted)).await;
        let removal = repo.delete_committed_except(&HashSet::from([id(2), id(42)])).await.unwrap();
        assert_eq!(removal, Removal { batches: 1, rows: 6 });
        // Uncommitted batches belong to a later phase.
        assert_eq!(repo.list_ids().await.unwrap(), vec![id(3), id(2)]);
        // The temporary table doesn't leak between calls.
        assert!(repo.delete_committed_except(&HashSet::from([id(2)])).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_committed_except_nothing_retained() {
        let repo = repo().await;
        for n in 1..=3 {
            repo.insert_batch(&CatalogEntry::committed(id(n), day(1))).await.unwrap();
        }
        let removal = repo.delete_committed_except(&HashSet::new()).await.unwrap();
        assert_eq!(removal.batches, 3);
        assert_eq!(repo.count_batches().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_delete_committed_except_large_set() {
        let repo = repo().await;
        repo.insert_batch(&CatalogEntry::committed(id(1), day(1))).await.unwrap();
        repo.insert_batch(&CatalogEntry::committed(id(2), day(1))).await.unwrap();
        let retained: HashSet<Uuid> = (2..=(RETAIN_CHUNK as u128 * 2 + 10)).map(id).collect();
        let removal = repo.delete_committed_except(&retained).await.unwrap();
        assert_eq!(removal.batches, 1);
        assert_eq!(repo.list_ids().await.unwrap(), vec![id(2)]);
    }

    #[tokio::test]
    async fn test_delete_uncommitted() {
        let repo = repo().await;
        seed(&repo, CatalogEntry::committed(id(1), day(1))).await;
        seed(&repo, CatalogEntry::new(id(2), day(1), BatchStatus::Failed)).await;
        seed(&repo, CatalogEntry::new(id(3), day(1), BatchStatus::Other(0))).await;
        let removal = repo.delete_uncommitted().await.unwrap();
        assert_eq!(removal, Removal { batches: 2, rows: 12 });
        assert_eq!(repo.list_ids().await.unwrap(), vec![id(1)]);
        assert!(repo.delete_uncommitted().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_dry_run_counts_without_deleting() {
        let db = Database::connect_in_memory().await.unwrap();
        let repo = Repository::from(&db);
        seed(&repo, CatalogEntry::committed(id(1), day(1))).await;
        seed(&repo, CatalogEntry::new(id(2), day(1), BatchStatus::Processing)).await;
        let dry = Repository::new(db.pool().clone(), true);
        assert_eq!(dry.delete_uncommitted().await.unwrap(), Removal { batches: 1, rows: 6 });
        assert_eq!(dry.delete_committed_except(&HashSet::new()).await.unwrap().batches, 1);
        assert_eq!(dry.delete_batch(&id(1)).await.unwrap().batches, 1);
        assert_eq!(repo.count_batches().await.unwrap(), 2);
        assert_eq!(repo.dependent_rows(&id(2)).await.unwrap(), 6);
    }
}
