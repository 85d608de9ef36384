//! SQLite storage implementation

use crate::frontier::{UrlSnapshot, UrlState};
use crate::storage::schema::initialize_schema;
use crate::storage::traits::{Storage, StorageError, StorageResult};
use crate::storage::{RunRecord, RunStatus};
use crate::Result;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;

/// SQLite storage backend
pub struct SqliteStorage {
    conn: Connection,
}

impl SqliteStorage {
    /// Opens or creates the database at `path` and applies the schema
    pub fn new(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            PRAGMA temp_store = MEMORY;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self { conn })
    }

    /// Creates an in-memory database (for testing)
    #[cfg(test)]
    pub fn new_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        initialize_schema(&conn)?;
        Ok(Self { conn })
    }
}

fn run_from_row(row: &Row<'_>) -> rusqlite::Result<RunRecord> {
    Ok(RunRecord {
        id: row.get(0)?,
        started_at: row.get(1)?,
        finished_at: row.get(2)?,
        config_hash: row.get(3)?,
        status: RunStatus::from_db_string(&row.get::<_, String>(4)?)
            .unwrap_or(RunStatus::Interrupted),
    })
}

/// Raw row, converted to a snapshot after the query so bad data can be
/// reported with the offending URL
struct UrlRow {
    url: String,
    domain: String,
    state: String,
    depth: u32,
    attempts: u32,
    last_attempt_at: Option<String>,
    last_error: Option<String>,
}

impl UrlRow {
    fn into_snapshot(self) -> StorageResult<UrlSnapshot> {
        let state = UrlState::from_db_string(&self.state).ok_or_else(|| {
            StorageError::CorruptRecord {
                url: self.url.clone(),
                reason: format!("unknown state '{}'", self.state),
            }
        })?;
        let last_attempt_at = self
            .last_attempt_at
            .as_deref()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc));

        Ok(UrlSnapshot {
            url: self.url,
            domain: self.domain,
            state,
            depth: self.depth,
            attempts: self.attempts,
            last_attempt_at,
            last_error: self.last_error,
        })
    }
}

impl Storage for SqliteStorage {
    // ===== Run Management =====

    fn create_run(&mut self, config_hash: &str) -> StorageResult<i64> {
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO runs (started_at, config_hash, status) VALUES (?1, ?2, ?3)",
            params![now, config_hash, RunStatus::Running.to_db_string()],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn get_run(&self, run_id: i64) -> StorageResult<RunRecord> {
        self.conn
            .query_row(
                "SELECT id, started_at, finished_at, config_hash, status FROM runs WHERE id = ?1",
                params![run_id],
                run_from_row,
            )
            .optional()?
            .ok_or(StorageError::RunNotFound(run_id))
    }

    fn get_latest_run(&self) -> StorageResult<Option<RunRecord>> {
        let run = self
            .conn
            .query_row(
                "SELECT id, started_at, finished_at, config_hash, status FROM runs ORDER BY id DESC LIMIT 1",
                [],
                run_from_row,
            )
            .optional()?;
        Ok(run)
    }

    fn finish_run(&mut self, run_id: i64, status: RunStatus) -> StorageResult<()> {
        let now = Utc::now().to_rfc3339();
        let updated = self.conn.execute(
            "UPDATE runs SET status = ?1, finished_at = ?2 WHERE id = ?3",
            params![status.to_db_string(), now, run_id],
        )?;
        if updated == 0 {
            return Err(StorageError::RunNotFound(run_id));
        }
        Ok(())
    }

    // ===== URL Checkpoints =====

    fn save_urls(&mut self, urls: &[UrlSnapshot], run_id: i64) -> StorageResult<usize> {
        let now = Utc::now().to_rfc3339();
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO urls (url, domain, state, depth, attempts, last_attempt_at, last_error, discovered_run, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                 ON CONFLICT(url) DO UPDATE SET
                    state = excluded.state,
                    depth = excluded.depth,
                    attempts = excluded.attempts,
                    last_attempt_at = excluded.last_attempt_at,
                    last_error = excluded.last_error,
                    updated_at = excluded.updated_at",
            )?;
            for snapshot in urls {
                stmt.execute(params![
                    snapshot.url,
                    snapshot.domain,
                    snapshot.state.to_db_string(),
                    snapshot.depth,
                    snapshot.attempts,
                    snapshot.last_attempt_at.map(|t| t.to_rfc3339()),
                    snapshot.last_error,
                    run_id,
                    now,
                ])?;
            }
        }
        tx.commit()?;
        Ok(urls.len())
    }

    fn load_urls(&self) -> StorageResult<Vec<UrlSnapshot>> {
        let mut stmt = self.conn.prepare(
            "SELECT url, domain, state, depth, attempts, last_attempt_at, last_error
             FROM urls ORDER BY id",
        )?;

        let rows = stmt
            .query_map([], |row| {
                Ok(UrlRow {
                    url: row.get(0)?,
                    domain: row.get(1)?,
                    state: row.get(2)?,
                    depth: row.get(3)?,
                    attempts: row.get(4)?,
                    last_attempt_at: row.get(5)?,
                    last_error: row.get(6)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        rows.into_iter().map(UrlRow::into_snapshot).collect()
    }

    fn clear_urls(&mut self) -> StorageResult<()> {
        self.conn.execute("DELETE FROM urls", [])?;
        Ok(())
    }

    // ===== Statistics =====

    fn count_urls_by_state(&self, state: UrlState) -> StorageResult<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM urls WHERE state = ?1",
            params![state.to_db_string()],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    fn count_total_urls(&self) -> StorageResult<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM urls", [], |row| row.get(0))?;
        Ok(count as u64)
    }
}
