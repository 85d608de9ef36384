//! Driftnet: a fault-tolerant crawl coordinator
//!
//! This crate coordinates many independent fetch workers under a single URL
//! frontier. A single coordinator owns the frontier, the lease table and the
//! politeness gate; workers request tasks, fetch pages and report back, while
//! a liveness monitor reclaims leases from crashed or stalled workers.

pub mod config;
pub mod coordinator;
pub mod frontier;
pub mod lease;
pub mod output;
pub mod politeness;
pub mod storage;
pub mod url;
pub mod worker;

use thiserror::Error;

/// Main error type for driftnet operations
#[derive(Debug, Error)]
pub enum DriftnetError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Coordination error: {0}")]
    Coordination(#[from] CoordError),

    #[error("Frontier error: {0}")]
    Frontier(#[from] frontier::FrontierError),

    #[error("URL error: {0}")]
    UrlError(#[from] UrlError),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] ::url::ParseError),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Storage error: {0}")]
    StorageError(#[from] storage::StorageError),

    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("Coordinator returned HTTP {status}: {body}")]
    Remote { status: u16, body: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage error: {0}")]
    Storage(String),
}

/// Coordination protocol errors
///
/// Only `AlreadyLeased` indicates a bug; the others are recovered locally by
/// the dispatcher or the liveness monitor.
#[derive(Debug, Error)]
pub enum CoordError {
    #[error("Invalid URL {url}: {source}")]
    InvalidUrl { url: String, source: UrlError },

    #[error("Lease {0} has expired")]
    LeaseExpired(lease::LeaseId),

    #[error("Worker {0} was declared dead")]
    WorkerDead(lease::WorkerId),

    #[error("Stale report for lease {lease} (generation {generation})")]
    StaleReport { lease: lease::LeaseId, generation: u64 },

    #[error("URL {0} already has an active lease")]
    AlreadyLeased(String),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),
}

/// URL-specific errors
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum UrlError {
    #[error("Failed to parse URL: {0}")]
    Parse(String),

    #[error("Invalid URL scheme: {0}")]
    InvalidScheme(String),

    #[error("Missing host in URL")]
    MissingHost,

    #[error("Malformed URL: {0}")]
    Malformed(String),
}

/// Result type alias for driftnet operations
pub type Result<T> = std::result::Result<T, DriftnetError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Result type alias for URL operations
pub type UrlResult<T> = std::result::Result<T, UrlError>;

// Re-export commonly used types
pub use config::Config;
pub use coordinator::{CoordinationPolicy, Coordinator};
pub use frontier::{FrontierStore, UrlState};
pub use lease::{LeaseTable, WorkerStatus};
pub use politeness::PolitenessGate;
pub use url::{domain_of, normalize_url, CanonicalUrl};
