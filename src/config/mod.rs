//! Configuration module for driftnet
//!
//! This module handles loading, parsing, and validating TOML configuration files.
//!
//! # Example
//!
//! ```no_run
//! use driftnet::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("driftnet.toml")).unwrap();
//! println!("Coordinator listens on {}", config.coordinator.listen_addr);
//! ```

mod parser;
mod types;
mod validation;

pub use types::{
    Config, CoordinatorConfig, OutputConfig, RobotsConfig, SeedsConfig, UserAgentConfig,
    WorkerConfig,
};

pub use parser::{
    compute_config_hash, load_config, load_config_with_hash, load_seed_urls, parse_config,
};
