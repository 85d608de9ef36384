//! Wire types exchanged between workers, operators and the coordinator
//!
//! The same types are used in-process and as JSON bodies on the HTTP
//! control surface.

use crate::frontier::{FrontierCounts, UrlState};
use crate::lease::{LeaseId, LeaseToken, WorkerId, WorkerSnapshot, WorkerStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRequest {
    pub worker_id: WorkerId,
}

/// A leased crawl task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub lease: LeaseToken,
    pub url: String,
    pub depth: u32,
    /// Attempts already spent on this URL before this one
    pub attempt: u32,
    /// Time the worker has before the lease expires
    pub timeout_ms: u64,
}

/// Why no task was handed out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NoneAvailableReason {
    /// Nothing is waiting to be crawled
    FrontierEmpty,
    /// URLs are waiting but every domain holding them is rate limited or
    /// still waiting on robots.txt
    PolitenessBlocked { retry_after_ms: Option<u64> },
    /// The coordinator is draining and issues no new leases
    ShuttingDown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskResponse {
    Task(Task),
    NoneAvailable { reason: NoneAvailableReason },
}

/// Typed fetch failure reported by a worker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FetchFailure {
    Timeout,
    HttpError { status: u16 },
    ParseError { message: String },
    /// Terminal: the URL is failed without retry
    RobotsDenied,
    Network { message: String },
}

impl FetchFailure {
    /// Whether this failure ends the URL without retry
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::RobotsDenied)
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::HttpError { status: 429 })
    }

    /// Short description stored as the URL's last error
    pub fn describe(&self) -> String {
        match self {
            Self::Timeout => "timeout".to_string(),
            Self::HttpError { status } => format!("http {}", status),
            Self::ParseError { message } => format!("parse error: {}", message),
            Self::RobotsDenied => "robots denied".to_string(),
            Self::Network { message } => format!("network error: {}", message),
        }
    }
}

/// What happened to a task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum TaskOutcome {
    Success {
        status: u16,
        /// Blob store key of the fetched body
        content_ref: Option<String>,
    },
    Failure { failure: FetchFailure },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportRequest {
    pub worker_id: WorkerId,
    pub lease: LeaseToken,
    pub outcome: TaskOutcome,
    /// Links found on the page; ignored for failures
    #[serde(default)]
    pub discovered: Vec<String>,
}

/// Acknowledgement of a report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "ack", rename_all = "snake_case")]
pub enum ReportAck {
    Applied {
        /// State the URL ended up in
        state: UrlState,
        added: usize,
        duplicates: usize,
        rejected: usize,
    },
    /// The lease was already reclaimed; nothing was changed
    Stale,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatRequest {
    pub worker_id: WorkerId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatResponse {
    /// Status before this heartbeat; `None` for a new worker
    pub previous_status: Option<WorkerStatus>,
    pub draining: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenewRequest {
    pub worker_id: WorkerId,
    pub lease_id: LeaseId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum RenewResponse {
    Renewed { remaining_ms: u64 },
    Expired,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedRequest {
    pub urls: Vec<String>,
    #[serde(default)]
    pub depth: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectedUrl {
    pub url: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedResponse {
    pub inserted: usize,
    pub duplicates: usize,
    pub rejected: Vec<RejectedUrl>,
}

/// Lifetime counters kept by the coordinator
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counters {
    pub tasks_assigned: u64,
    pub tasks_completed: u64,
    pub tasks_failed: u64,
    pub retries_scheduled: u64,
    pub robots_denied: u64,
    pub stale_reports: u64,
    pub leases_expired: u64,
    pub urls_rejected: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerCounts {
    pub alive: usize,
    pub suspected: usize,
    pub dead: usize,
}

/// Finished URLs needed before the failure ratio counts toward health
pub const MIN_HEALTH_SAMPLE: u64 = 20;

/// Coarse health classification for operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Health {
    /// Nothing to crawl and nothing in flight
    Idle,
    Healthy,
    Degraded,
    /// Work is waiting but no worker is alive
    Critical,
}

impl Health {
    pub fn classify(frontier: &FrontierCounts, workers: &WorkerCounts) -> Self {
        let pending = frontier.discovered + frontier.queued;
        let in_flight = frontier.leased;
        let live = workers.alive + workers.suspected;
        let total = live + workers.dead;

        if pending == 0 && in_flight == 0 {
            return Self::Idle;
        }
        if live == 0 && pending > 0 {
            return Self::Critical;
        }
        let finished = frontier.done + frontier.failed;
        if finished >= MIN_HEALTH_SAMPLE && frontier.failed * 10 > finished {
            return Self::Degraded;
        }
        if workers.alive < total / 2 {
            return Self::Degraded;
        }
        Self::Healthy
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
            Self::Critical => "critical",
        }
    }
}

/// Snapshot of the coordinator for the status surface
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusReport {
    pub started_at: DateTime<Utc>,
    pub uptime_secs: u64,
    pub health: Health,
    pub draining: bool,
    /// No `Discovered` URLs and no active leases
    pub exhausted: bool,
    pub frontier: FrontierCounts,
    pub active_leases: usize,
    pub known_domains: usize,
    pub worker_counts: WorkerCounts,
    pub workers: Vec<WorkerSnapshot>,
    pub counters: Counters,
}
