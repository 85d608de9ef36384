use crate::config::types::{
    Config, CoordinatorConfig, OutputConfig, RobotsConfig, SeedsConfig, UserAgentConfig,
    WorkerConfig,
};
use crate::url::normalize_url;
use crate::ConfigError;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_coordinator_config(&config.coordinator)?;
    validate_robots_config(&config.robots)?;
    validate_worker_config(&config.worker)?;
    validate_user_agent_config(&config.user_agent)?;
    validate_output_config(&config.output)?;
    validate_seeds(&config.seeds)?;
    Ok(())
}

/// Validates retry, lease and liveness timing
fn validate_coordinator_config(config: &CoordinatorConfig) -> Result<(), ConfigError> {
    if config.listen_addr.parse::<std::net::SocketAddr>().is_err() {
        return Err(ConfigError::Validation(format!(
            "listen_addr must be a socket address like 127.0.0.1:8080, got '{}'",
            config.listen_addr
        )));
    }

    if config.max_attempts < 1 {
        return Err(ConfigError::Validation(
            "max_attempts must be >= 1".to_string(),
        ));
    }

    for (name, value) in [
        ("task_timeout_secs", config.task_timeout_secs),
        ("heartbeat_interval_secs", config.heartbeat_interval_secs),
        ("sweep_interval_secs", config.sweep_interval_secs),
        ("checkpoint_interval_secs", config.checkpoint_interval_secs),
    ] {
        if value == 0 {
            return Err(ConfigError::Validation(format!("{} must be > 0", name)));
        }
    }

    if config.heartbeat_timeout_secs < 2 * config.heartbeat_interval_secs {
        return Err(ConfigError::Validation(format!(
            "heartbeat_timeout_secs ({}) must be at least twice heartbeat_interval_secs ({})",
            config.heartbeat_timeout_secs, config.heartbeat_interval_secs
        )));
    }

    Ok(())
}

fn validate_robots_config(config: &RobotsConfig) -> Result<(), ConfigError> {
    if config.enabled && config.ttl_hours == 0 {
        return Err(ConfigError::Validation(
            "robots ttl_hours must be > 0".to_string(),
        ));
    }
    Ok(())
}

/// Validates worker backoff and coordinator address
fn validate_worker_config(config: &WorkerConfig) -> Result<(), ConfigError> {
    let url = Url::parse(&config.coordinator_url)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid coordinator_url: {}", e)))?;
    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(ConfigError::InvalidUrl(format!(
            "coordinator_url must use http or https, got '{}'",
            config.coordinator_url
        )));
    }

    if config.backoff_base_ms == 0 {
        return Err(ConfigError::Validation(
            "backoff_base_ms must be > 0".to_string(),
        ));
    }

    if config.backoff_base_ms > config.backoff_cap_ms {
        return Err(ConfigError::Validation(format!(
            "backoff_base_ms ({}) must not exceed backoff_cap_ms ({})",
            config.backoff_base_ms, config.backoff_cap_ms
        )));
    }

    if config.request_timeout_secs == 0 {
        return Err(ConfigError::Validation(
            "request_timeout_secs must be > 0".to_string(),
        ));
    }

    if config.worker_id.as_deref().is_some_and(str::is_empty) {
        return Err(ConfigError::Validation(
            "worker_id cannot be empty".to_string(),
        ));
    }

    Ok(())
}

/// Validates user agent configuration
fn validate_user_agent_config(config: &UserAgentConfig) -> Result<(), ConfigError> {
    if config.crawler_name.is_empty() {
        return Err(ConfigError::Validation(
            "crawler_name cannot be empty".to_string(),
        ));
    }

    if !config
        .crawler_name
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-')
    {
        return Err(ConfigError::Validation(format!(
            "crawler_name must contain only alphanumeric characters and hyphens, got '{}'",
            config.crawler_name
        )));
    }

    Url::parse(&config.contact_url)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid contact_url: {}", e)))?;

    validate_email(&config.contact_email)?;

    Ok(())
}

fn validate_output_config(config: &OutputConfig) -> Result<(), ConfigError> {
    if config.database_path.is_empty() {
        return Err(ConfigError::Validation(
            "database_path cannot be empty".to_string(),
        ));
    }
    Ok(())
}

/// Seed URLs must survive normalization
fn validate_seeds(seeds: &SeedsConfig) -> Result<(), ConfigError> {
    for seed in &seeds.urls {
        normalize_url(seed)
            .map_err(|e| ConfigError::InvalidUrl(format!("Invalid seed URL '{}': {}", seed, e)))?;
    }

    if seeds.file.as_deref().is_some_and(str::is_empty) {
        return Err(ConfigError::Validation(
            "seeds file path cannot be empty".to_string(),
        ));
    }

    Ok(())
}

/// Basic email validation
fn validate_email(email: &str) -> Result<(), ConfigError> {
    if email.is_empty() {
        return Err(ConfigError::Validation(
            "contact_email cannot be empty".to_string(),
        ));
    }

    let Some((local, domain)) = email.split_once('@') else {
        return Err(ConfigError::Validation(format!(
            "Invalid email format: '{}'",
            email
        )));
    };

    if local.is_empty() || domain.is_empty() || domain.contains('@') {
        return Err(ConfigError::Validation(format!(
            "Invalid email format: '{}'",
            email
        )));
    }

    if !domain.contains('.') {
        return Err(ConfigError::Validation(format!(
            "Invalid email domain: '{}'",
            email
        )));
    }

    Ok(())
}
