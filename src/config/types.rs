use serde::Deserialize;

/// Main configuration structure for driftnet
///
/// Only `[user-agent]` is mandatory; every other section falls back to
/// defaults suitable for a single-host deployment.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    #[serde(default)]
    pub coordinator: CoordinatorConfig,
    #[serde(default)]
    pub robots: RobotsConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
    pub user_agent: UserAgentConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub seeds: SeedsConfig,
}

/// Coordinator behaviour: retry policy, lease timing and liveness
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CoordinatorConfig {
    /// Address the control surface listens on
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Failed attempts tolerated before a URL is terminally failed
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Default minimum time between dispatches to one domain (milliseconds)
    #[serde(default = "default_min_interval_ms")]
    pub min_interval_ms: u64,

    /// Maximum task execution time before a lease expires
    #[serde(default = "default_task_timeout_secs")]
    pub task_timeout_secs: u64,

    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,

    /// Silence after which a worker is declared dead
    #[serde(default = "default_heartbeat_timeout_secs")]
    pub heartbeat_timeout_secs: u64,

    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    /// How often dirty frontier records are flushed to the database
    #[serde(default = "default_checkpoint_interval_secs")]
    pub checkpoint_interval_secs: u64,

    /// Links discovered deeper than this are dropped
    #[serde(default)]
    pub max_depth: Option<u32>,

    /// Pause applied to a domain after it answers HTTP 429
    #[serde(default = "default_rate_limit_cooldown_secs")]
    pub rate_limit_cooldown_secs: u64,

    /// Consecutive failures on one domain that trigger an operator warning
    #[serde(default = "default_failure_spike_threshold")]
    pub failure_spike_threshold: u32,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            max_attempts: default_max_attempts(),
            min_interval_ms: default_min_interval_ms(),
            task_timeout_secs: default_task_timeout_secs(),
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
            heartbeat_timeout_secs: default_heartbeat_timeout_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            checkpoint_interval_secs: default_checkpoint_interval_secs(),
            max_depth: None,
            rate_limit_cooldown_secs: default_rate_limit_cooldown_secs(),
            failure_spike_threshold: default_failure_spike_threshold(),
        }
    }
}

/// Robots.txt handling
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RobotsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Age after which cached rules are refetched
    #[serde(default = "default_robots_ttl_hours")]
    pub ttl_hours: u64,
}

impl Default for RobotsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_hours: default_robots_ttl_hours(),
        }
    }
}

/// Worker process configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct WorkerConfig {
    /// Base URL of the coordinator's control surface
    #[serde(default = "default_coordinator_url")]
    pub coordinator_url: String,

    /// Worker id; generated from the host name and pid when absent
    #[serde(default)]
    pub worker_id: Option<String>,

    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,

    #[serde(default = "default_backoff_cap_ms")]
    pub backoff_cap_ms: u64,

    /// Timeout for a single page fetch
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Directory for fetched page bodies; kept in memory when absent
    #[serde(default)]
    pub blob_dir: Option<String>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            coordinator_url: default_coordinator_url(),
            worker_id: None,
            backoff_base_ms: default_backoff_base_ms(),
            backoff_cap_ms: default_backoff_cap_ms(),
            request_timeout_secs: default_request_timeout_secs(),
            blob_dir: None,
        }
    }
}

/// User agent identification configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct UserAgentConfig {
    /// Name of the crawler, also used as the robots.txt product token
    pub crawler_name: String,

    pub crawler_version: String,

    /// URL with information about the crawler
    pub contact_url: String,

    /// Email address for crawler-related contact
    pub contact_email: String,
}

impl UserAgentConfig {
    /// Full header value: `Name/Version (+ContactURL; ContactEmail)`
    pub fn header_value(&self) -> String {
        format!(
            "{}/{} (+{}; {})",
            self.crawler_name, self.crawler_version, self.contact_url, self.contact_email
        )
    }

    /// Token matched against robots.txt `User-agent` lines
    pub fn robots_token(&self) -> String {
        self.crawler_name.to_lowercase()
    }
}

/// Output configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct OutputConfig {
    /// Path to the SQLite checkpoint database
    #[serde(default = "default_database_path")]
    pub database_path: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
        }
    }
}

/// Seed URLs added to the frontier at depth 0 on start
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SeedsConfig {
    #[serde(default)]
    pub urls: Vec<String>,

    /// File with one URL per line; blank lines and `#` comments are skipped
    #[serde(default)]
    pub file: Option<String>,
}

fn default_listen_addr() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_max_attempts() -> u32 {
    3
}

fn default_min_interval_ms() -> u64 {
    2000
}

fn default_task_timeout_secs() -> u64 {
    120
}

fn default_heartbeat_interval_secs() -> u64 {
    30
}

fn default_heartbeat_timeout_secs() -> u64 {
    60
}

fn default_sweep_interval_secs() -> u64 {
    10
}

fn default_checkpoint_interval_secs() -> u64 {
    30
}

fn default_rate_limit_cooldown_secs() -> u64 {
    60
}

fn default_failure_spike_threshold() -> u32 {
    5
}

fn default_true() -> bool {
    true
}

fn default_robots_ttl_hours() -> u64 {
    24
}

fn default_coordinator_url() -> String {
    "http://127.0.0.1:8080".to_string()
}

fn default_backoff_base_ms() -> u64 {
    1000
}

fn default_backoff_cap_ms() -> u64 {
    30_000
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_database_path() -> String {
    "./driftnet.db".to_string()
}
