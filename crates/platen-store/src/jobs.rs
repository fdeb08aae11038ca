// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Persistent print job store backed by SQLite.
//
// The store holds job metadata only (never the document bytes); each row
// references its adopted file on disk by path. Rows survive process restarts
// and are soft-deleted rather than removed, so the agent keeps a full record
// of everything that passed through the drop folder.

use chrono::{DateTime, Utc};
use rusqlite::{Connection, params};
use std::path::PathBuf;
use tracing::{debug, info, instrument};

use platen_core::error::{PlatenError, Result};
use platen_core::types::{JobId, PageCount, PrintJob};

/// SQLite schema for the files table.
const CREATE_TABLE_SQL: &str = r#"
    CREATE TABLE IF NOT EXISTS files (
        id TEXT PRIMARY KEY,
        assetId TEXT,
        fileName TEXT NOT NULL,
        pages INTEGER NOT NULL,
        path TEXT NOT NULL,
        createdAt TEXT NOT NULL,
        printed INTEGER NOT NULL DEFAULT 0,
        synced INTEGER NOT NULL DEFAULT 0,
        deletedAt TEXT
    )
"#;

/// Columns in SELECT order; `row_to_print_job` depends on this order.
const JOB_COLUMNS: &str =
    "id, assetId, fileName, pages, path, createdAt, printed, synced, deletedAt";

/// Persistent job store backed by a SQLite database.
///
/// All methods are synchronous because `rusqlite` does not support async
/// natively. In an async context, wrap calls in `tokio::task::spawn_blocking`
/// or hold the store behind a mutex as the agent services do.
pub struct JobStore {
    /// The open SQLite connection.
    conn: Connection,
}

impl JobStore {
    /// Open (or create) the job database at the given path.
    ///
    /// Applies WAL journal mode and creates the `files` table if it does not
    /// exist.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn open(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref())
            .map_err(|e| PlatenError::Database(format!("open: {e}")))?;

        // WAL mode tolerates concurrent readers and unclean shutdowns better
        // than the default rollback journal.
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(|e| PlatenError::Database(format!("WAL pragma: {e}")))?;

        conn.execute_batch(CREATE_TABLE_SQL)
            .map_err(|e| PlatenError::Database(format!("create table: {e}")))?;

        info!("job store database opened");
        Ok(Self { conn })
    }

    /// Open an in-memory database (useful for tests).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| PlatenError::Database(format!("open in-memory: {e}")))?;

        conn.execute_batch(CREATE_TABLE_SQL)
            .map_err(|e| PlatenError::Database(format!("create table: {e}")))?;

        debug!("in-memory job store database opened");
        Ok(Self { conn })
    }

    /// Insert a new job row.
    ///
    /// The job's `id` and `created_at` must already be populated (they are
    /// set by `PrintJob::new`).
    #[instrument(skip(self, job), fields(job_id = %job.id))]
    pub fn insert(&self, job: &PrintJob) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO files (id, assetId, fileName, pages, path, createdAt,
                 printed, synced, deletedAt)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    job.id.to_string(),
                    job.asset_id,
                    job.file_name,
                    i64::from(job.pages),
                    job.path.to_string_lossy(),
                    job.created_at.to_rfc3339(),
                    job.printed,
                    job.synced,
                    job.deleted_at.map(|dt| dt.to_rfc3339()),
                ],
            )
            .map_err(|e| PlatenError::Database(format!("insert job: {e}")))?;

        info!(job_id = %job.id, file_name = %job.file_name, "job inserted into store");
        Ok(())
    }

    /// Retrieve a single job by its ID, soft-deleted rows included.
    ///
    /// Returns `None` if the row does not exist. Callers that must not act on
    /// deleted jobs check `deleted_at` themselves.
    #[instrument(skip(self), fields(job_id = %job_id))]
    pub fn get(&self, job_id: &JobId) -> Result<Option<PrintJob>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {JOB_COLUMNS} FROM files WHERE id = ?1"))
            .map_err(|e| PlatenError::Database(format!("prepare get: {e}")))?;

        let mut rows = stmt
            .query_map(params![job_id.to_string()], row_to_print_job)
            .map_err(|e| PlatenError::Database(format!("query get: {e}")))?;

        match rows.next() {
            Some(Ok(job)) => Ok(Some(job)),
            Some(Err(e)) => Err(PlatenError::Database(format!("row parse: {e}"))),
            None => Ok(None),
        }
    }

    /// Whether a live (not soft-deleted) row exists for this ID.
    ///
    /// Used by the ingestion rescan to recognise files it already adopted.
    pub fn exists_live(&self, job_id: &JobId) -> Result<bool> {
        let count: i64 = self
            .conn
            .query_row(
                "SELECT COUNT(*) FROM files WHERE id = ?1 AND deletedAt IS NULL",
                params![job_id.to_string()],
                |row| row.get(0),
            )
            .map_err(|e| PlatenError::Database(format!("query exists_live: {e}")))?;
        Ok(count > 0)
    }

    /// All live jobs not yet printed, oldest first (FIFO).
    #[instrument(skip(self))]
    pub fn unprinted(&self) -> Result<Vec<PrintJob>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {JOB_COLUMNS} FROM files
                 WHERE printed = 0 AND deletedAt IS NULL
                 ORDER BY createdAt ASC"
            ))
            .map_err(|e| PlatenError::Database(format!("prepare unprinted: {e}")))?;

        let jobs = stmt
            .query_map([], row_to_print_job)
            .map_err(|e| PlatenError::Database(format!("query unprinted: {e}")))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| PlatenError::Database(format!("collect rows: {e}")))?;

        debug!(count = jobs.len(), "retrieved unprinted jobs");
        Ok(jobs)
    }

    /// All live jobs that printed but have not been acknowledged upstream.
    #[instrument(skip(self))]
    pub fn printed_unsynced(&self) -> Result<Vec<PrintJob>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {JOB_COLUMNS} FROM files
                 WHERE printed = 1 AND synced = 0 AND deletedAt IS NULL
                 ORDER BY createdAt ASC"
            ))
            .map_err(|e| PlatenError::Database(format!("prepare printed_unsynced: {e}")))?;

        let jobs = stmt
            .query_map([], row_to_print_job)
            .map_err(|e| PlatenError::Database(format!("query printed_unsynced: {e}")))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| PlatenError::Database(format!("collect rows: {e}")))?;

        debug!(count = jobs.len(), "retrieved printed-but-unsynced jobs");
        Ok(jobs)
    }

    /// Mark a job printed and record which printer handled it.
    #[instrument(skip(self), fields(job_id = %job_id))]
    pub fn mark_printed(&self, job_id: &JobId, asset_id: &str) -> Result<()> {
        let rows = self
            .conn
            .execute(
                "UPDATE files SET printed = 1, assetId = ?1
                 WHERE id = ?2 AND deletedAt IS NULL",
                params![asset_id, job_id.to_string()],
            )
            .map_err(|e| PlatenError::Database(format!("mark printed: {e}")))?;

        if rows == 0 {
            return Err(PlatenError::NotFound(format!("job {job_id}")));
        }

        debug!(job_id = %job_id, asset_id, "job marked printed");
        Ok(())
    }

    /// Undo `mark_printed`, clearing the printer association.
    ///
    /// Compensation for a submission that failed after the row was flagged.
    #[instrument(skip(self), fields(job_id = %job_id))]
    pub fn revert_printed(&self, job_id: &JobId) -> Result<()> {
        let rows = self
            .conn
            .execute(
                "UPDATE files SET printed = 0, assetId = NULL WHERE id = ?1",
                params![job_id.to_string()],
            )
            .map_err(|e| PlatenError::Database(format!("revert printed: {e}")))?;

        if rows == 0 {
            return Err(PlatenError::NotFound(format!("job {job_id}")));
        }

        debug!(job_id = %job_id, "printed flag reverted");
        Ok(())
    }

    /// Mark a printed job as acknowledged upstream.
    #[instrument(skip(self), fields(job_id = %job_id))]
    pub fn mark_synced(&self, job_id: &JobId) -> Result<()> {
        let rows = self
            .conn
            .execute(
                "UPDATE files SET synced = 1 WHERE id = ?1 AND deletedAt IS NULL",
                params![job_id.to_string()],
            )
            .map_err(|e| PlatenError::Database(format!("mark synced: {e}")))?;

        if rows == 0 {
            return Err(PlatenError::NotFound(format!("job {job_id}")));
        }

        debug!(job_id = %job_id, "job marked synced");
        Ok(())
    }

    /// Soft-delete a job. The row remains in the table with `deletedAt` set.
    ///
    /// Returns `true` if a live row was deleted, `false` if the job was
    /// already deleted or never existed.
    #[instrument(skip(self), fields(job_id = %job_id))]
    pub fn soft_delete(&self, job_id: &JobId) -> Result<bool> {
        let rows = self
            .conn
            .execute(
                "UPDATE files SET deletedAt = ?1 WHERE id = ?2 AND deletedAt IS NULL",
                params![Utc::now().to_rfc3339(), job_id.to_string()],
            )
            .map_err(|e| PlatenError::Database(format!("soft delete: {e}")))?;

        if rows > 0 {
            info!(job_id = %job_id, "job soft-deleted");
        }
        Ok(rows > 0)
    }
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

/// Map a SQLite row to a `PrintJob`.
///
/// Column indices must match `JOB_COLUMNS`.
fn row_to_print_job(row: &rusqlite::Row<'_>) -> rusqlite::Result<PrintJob> {
    let id_str: String = row.get(0)?;
    let asset_id: Option<String> = row.get(1)?;
    let file_name: String = row.get(2)?;
    let pages: i64 = row.get(3)?;
    let path: String = row.get(4)?;
    let created_at_str: String = row.get(5)?;
    let printed: bool = row.get(6)?;
    let synced: bool = row.get(7)?;
    let deleted_at_str: Option<String> = row.get(8)?;

    // Surface a meaningful error for malformed stored values rather than
    // panicking.
    let uuid = uuid::Uuid::parse_str(&id_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })?;

    let created_at: DateTime<Utc> = DateTime::parse_from_rfc3339(&created_at_str)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Text, Box::new(e))
        })?;

    let deleted_at: Option<DateTime<Utc>> = match deleted_at_str {
        Some(s) => Some(
            DateTime::parse_from_rfc3339(&s)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|e| {
                    rusqlite::Error::FromSqlConversionFailure(
                        8,
                        rusqlite::types::Type::Text,
                        Box::new(e),
                    )
                })?,
        ),
        None => None,
    };

    Ok(PrintJob {
        id: JobId(uuid),
        asset_id,
        file_name,
        pages: PageCount::from(pages),
        path: PathBuf::from(path),
        created_at,
        printed,
        synced,
        deleted_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Helper: create a minimal test job.
    fn test_job() -> PrintJob {
        let id = JobId::new();
        PrintJob::new(
            id,
            "Quarterly Report.pdf".into(),
            PageCount::Known(4),
            PathBuf::from(format!("/var/spool/platen/{id}.pdf")),
        )
    }

    #[test]
    fn insert_and_retrieve_job() {
        let store = JobStore::open_in_memory().expect("open in-memory db");
        let job = test_job();
        store.insert(&job).expect("insert");

        let retrieved = store.get(&job.id).expect("get").expect("found");
        assert_eq!(retrieved.id, job.id);
        assert_eq!(retrieved.file_name, "Quarterly Report.pdf");
        assert_eq!(retrieved.pages, PageCount::Known(4));
        assert_eq!(retrieved.path, job.path);
        assert!(!retrieved.printed);
        assert!(!retrieved.synced);
        assert!(retrieved.asset_id.is_none());
        assert!(retrieved.deleted_at.is_none());
    }

    #[test]
    fn unreadable_page_count_survives_storage() {
        let store = JobStore::open_in_memory().expect("open in-memory db");
        let mut job = test_job();
        job.pages = PageCount::Unreadable;
        store.insert(&job).expect("insert");

        let retrieved = store.get(&job.id).expect("get").expect("found");
        assert_eq!(retrieved.pages, PageCount::Unreadable);
    }

    #[test]
    fn unprinted_is_fifo_and_excludes_printed() {
        let store = JobStore::open_in_memory().expect("open in-memory db");

        let mut first = test_job();
        first.created_at = Utc::now() - chrono::Duration::minutes(5);
        let second = test_job();
        store.insert(&first).expect("insert first");
        store.insert(&second).expect("insert second");

        store
            .mark_printed(&second.id, "printer-7")
            .expect("mark printed");

        let unprinted = store.unprinted().expect("unprinted");
        assert_eq!(unprinted.len(), 1);
        assert_eq!(unprinted[0].id, first.id);
    }

    #[test]
    fn mark_printed_records_asset() {
        let store = JobStore::open_in_memory().expect("open in-memory db");
        let job = test_job();
        store.insert(&job).expect("insert");

        store
            .mark_printed(&job.id, "printer-7")
            .expect("mark printed");

        let updated = store.get(&job.id).expect("get").expect("found");
        assert!(updated.printed);
        assert_eq!(updated.asset_id.as_deref(), Some("printer-7"));
    }

    #[test]
    fn revert_printed_clears_asset() {
        let store = JobStore::open_in_memory().expect("open in-memory db");
        let job = test_job();
        store.insert(&job).expect("insert");
        store
            .mark_printed(&job.id, "printer-7")
            .expect("mark printed");

        store.revert_printed(&job.id).expect("revert");

        let reverted = store.get(&job.id).expect("get").expect("found");
        assert!(!reverted.printed);
        assert!(reverted.asset_id.is_none());
    }

    #[test]
    fn printed_unsynced_drains_after_mark_synced() {
        let store = JobStore::open_in_memory().expect("open in-memory db");
        let job = test_job();
        store.insert(&job).expect("insert");
        store
            .mark_printed(&job.id, "printer-7")
            .expect("mark printed");

        let pending = store.printed_unsynced().expect("printed_unsynced");
        assert_eq!(pending.len(), 1);

        store.mark_synced(&job.id).expect("mark synced");

        let pending = store.printed_unsynced().expect("printed_unsynced");
        assert!(pending.is_empty());
    }

    #[test]
    fn soft_delete_hides_job_but_keeps_row() {
        let store = JobStore::open_in_memory().expect("open in-memory db");
        let job = test_job();
        store.insert(&job).expect("insert");

        assert!(store.soft_delete(&job.id).expect("first delete"));
        // Second delete is a no-op on an already-deleted row.
        assert!(!store.soft_delete(&job.id).expect("second delete"));

        assert!(!store.exists_live(&job.id).expect("exists_live"));
        assert!(store.unprinted().expect("unprinted").is_empty());

        // The row itself survives with its tombstone.
        let row = store.get(&job.id).expect("get").expect("row kept");
        assert!(row.deleted_at.is_some());
    }

    #[test]
    fn updates_miss_soft_deleted_rows() {
        let store = JobStore::open_in_memory().expect("open in-memory db");
        let job = test_job();
        store.insert(&job).expect("insert");
        store.soft_delete(&job.id).expect("delete");

        let result = store.mark_printed(&job.id, "printer-7");
        assert!(matches!(result, Err(PlatenError::NotFound(_))));
    }

    #[test]
    fn mark_printed_nonexistent_job_is_not_found() {
        let store = JobStore::open_in_memory().expect("open in-memory db");
        let result = store.mark_printed(&JobId::new(), "printer-7");
        assert!(matches!(result, Err(PlatenError::NotFound(_))));
    }

    #[test]
    fn jobs_survive_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db_path = dir.path().join("jobs.db");
        let job = test_job();

        {
            let store = JobStore::open(&db_path).expect("open");
            store.insert(&job).expect("insert");
        }

        let store = JobStore::open(&db_path).expect("reopen");
        let retrieved = store.get(&job.id).expect("get").expect("found");
        assert_eq!(retrieved.file_name, job.file_name);
    }
}
