use crate::config::Config;
use std::time::Duration;

/// Retry, lease and liveness settings for the coordinator
///
/// Built once from the configuration and handed to the coordinator at
/// construction. `Default` matches the configuration defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordinationPolicy {
    /// Failed attempts tolerated before a URL is terminally `Failed`
    pub max_attempts: u32,
    /// Default spacing between dispatches to one domain
    pub min_interval: Duration,
    /// Lease lifetime; a lease not completed or renewed by then expires
    pub task_timeout: Duration,
    pub heartbeat_interval: Duration,
    pub heartbeat_timeout: Duration,
    pub sweep_interval: Duration,
    pub checkpoint_interval: Duration,
    /// Robots cache TTL; `None` disables robots handling
    pub robots_ttl: Option<Duration>,
    pub max_depth: Option<u32>,
    pub rate_limit_cooldown: Duration,
    pub failure_spike_threshold: u32,
}

impl Default for CoordinationPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            min_interval: Duration::from_secs(2),
            task_timeout: Duration::from_secs(120),
            heartbeat_interval: Duration::from_secs(30),
            heartbeat_timeout: Duration::from_secs(60),
            sweep_interval: Duration::from_secs(10),
            checkpoint_interval: Duration::from_secs(30),
            robots_ttl: Some(Duration::from_secs(24 * 3600)),
            max_depth: None,
            rate_limit_cooldown: Duration::from_secs(60),
            failure_spike_threshold: 5,
        }
    }
}

impl From<&Config> for CoordinationPolicy {
    fn from(config: &Config) -> Self {
        let c = &config.coordinator;
        Self {
            max_attempts: c.max_attempts,
            min_interval: Duration::from_millis(c.min_interval_ms),
            task_timeout: Duration::from_secs(c.task_timeout_secs),
            heartbeat_interval: Duration::from_secs(c.heartbeat_interval_secs),
            heartbeat_timeout: Duration::from_secs(c.heartbeat_timeout_secs),
            sweep_interval: Duration::from_secs(c.sweep_interval_secs),
            checkpoint_interval: Duration::from_secs(c.checkpoint_interval_secs),
            robots_ttl: config
                .robots
                .enabled
                .then(|| Duration::from_secs(config.robots.ttl_hours * 3600)),
            max_depth: c.max_depth,
            rate_limit_cooldown: Duration::from_secs(c.rate_limit_cooldown_secs),
            failure_spike_threshold: c.failure_spike_threshold,
        }
    }
}
