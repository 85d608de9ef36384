//! Storage traits and error types

use crate::frontier::{UrlSnapshot, UrlState};
use crate::storage::{RunRecord, RunStatus};
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Run not found: {0}")]
    RunNotFound(i64),

    #[error("Corrupt record for {url}: {reason}")]
    CorruptRecord { url: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Checkpoint backend for the coordinator
///
/// The coordinator only ever writes whole URL snapshots; the in-memory
/// frontier stays authoritative while it runs.
pub trait Storage: Send {
    // ===== Run Management =====

    /// Creates a new run and returns its id
    fn create_run(&mut self, config_hash: &str) -> StorageResult<i64>;

    fn get_run(&self, run_id: i64) -> StorageResult<RunRecord>;

    /// Gets the most recent run
    fn get_latest_run(&self) -> StorageResult<Option<RunRecord>>;

    /// Sets the final status and finish timestamp of a run
    fn finish_run(&mut self, run_id: i64, status: RunStatus) -> StorageResult<()>;

    // ===== URL Checkpoints =====

    /// Upserts URL snapshots in a single transaction
    ///
    /// Returns the number of rows written.
    fn save_urls(&mut self, urls: &[UrlSnapshot], run_id: i64) -> StorageResult<usize>;

    /// Loads every stored URL in insertion order
    fn load_urls(&self) -> StorageResult<Vec<UrlSnapshot>>;

    /// Removes every stored URL
    fn clear_urls(&mut self) -> StorageResult<()>;

    // ===== Statistics =====

    fn count_urls_by_state(&self, state: UrlState) -> StorageResult<u64>;

    fn count_total_urls(&self) -> StorageResult<u64>;
}
