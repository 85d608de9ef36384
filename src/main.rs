//! Driftnet main entry point
//!
//! This is the command-line interface for the driftnet crawl coordinator and
//! its fetch workers.

use anyhow::Context;
use clap::{Parser, Subcommand};
use driftnet::config::{load_config_with_hash, load_seed_urls, Config};
use driftnet::coordinator::{server, CoordinationPolicy, Coordinator, RobotsSettings};
use driftnet::lease::WorkerId;
use driftnet::output::{load_statistics, print_statistics, print_status};
use driftnet::politeness::HttpRobotsSource;
use driftnet::storage::open_storage;
use driftnet::worker::{
    build_http_client, build_robots_client, BlobStore, FsBlobStore, HttpCoordinatorClient, HttpPipeline, LogIndexer,
    MemoryBlobStore, Worker, WorkerSettings,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Driftnet: a fault-tolerant crawl coordinator
///
/// One coordinator owns the URL frontier and hands out leased tasks; any
/// number of workers fetch pages and report back. Workers may crash at any
/// time without losing or duplicating work.
#[derive(Parser, Debug)]
#[command(name = "driftnet")]
#[command(version = "1.0.0")]
#[command(about = "A fault-tolerant crawl coordinator", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(short, long, value_name = "CONFIG", default_value = "driftnet.toml")]
    config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose", global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the coordinator and its control surface
    Coordinator {
        /// Start a fresh crawl, ignoring previous state
        #[arg(long)]
        fresh: bool,
    },

    /// Run a fetch worker against a coordinator
    Worker {
        /// Exit once the coordinator reports an empty frontier
        #[arg(long)]
        exit_when_idle: bool,
    },

    /// Show the status of a running coordinator
    Status {
        /// Read statistics from the checkpoint database instead
        #[arg(long)]
        db: bool,
    },

    /// Add seed URLs to a running coordinator
    Seed {
        #[arg(required = true)]
        urls: Vec<String>,

        /// Depth assigned to the new URLs
        #[arg(long, default_value_t = 0)]
        depth: u32,
    },

    /// Validate the configuration and exit
    CheckConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, config_hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("Failed to load {}", cli.config.display()))?;
    tracing::debug!("Configuration loaded (hash: {})", config_hash);

    match cli.command {
        Command::Coordinator { fresh } => run_coordinator(config, &config_hash, fresh).await,
        Command::Worker { exit_when_idle } => run_worker(config, exit_when_idle).await,
        Command::Status { db } => handle_status(&config, db).await,
        Command::Seed { urls, depth } => handle_seed(&config, urls, depth).await,
        Command::CheckConfig => handle_check_config(&config),
    }
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("driftnet=info,warn"),
            1 => EnvFilter::new("driftnet=debug,info"),
            2 => EnvFilter::new("driftnet=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Runs the coordinator until interrupted, then drains and shuts down
async fn run_coordinator(config: Config, config_hash: &str, fresh: bool) -> anyhow::Result<()> {
    let policy = CoordinationPolicy::from(&config);

    let robots = if config.robots.enabled {
        let client = build_robots_client(&config.user_agent, Duration::from_secs(30))
            .context("Failed to build robots.txt client")?;
        Some(RobotsSettings::new(
            Arc::new(HttpRobotsSource::new(client)),
            config.user_agent.robots_token(),
        ))
    } else {
        None
    };

    let storage = open_storage(Path::new(&config.output.database_path))
        .with_context(|| format!("Failed to open {}", config.output.database_path))?;
    let coordinator = Coordinator::resume(policy, robots, Box::new(storage), config_hash, fresh)
        .context("Failed to restore coordinator state")?;

    let seeds = load_seed_urls(&config.seeds).context("Failed to load seed URLs")?;
    if !seeds.is_empty() {
        coordinator.seed(&seeds, 0).await;
    }

    let monitor = coordinator.spawn_monitor();
    let checkpointer = coordinator.spawn_checkpointer();

    let listener = TcpListener::bind(&config.coordinator.listen_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.coordinator.listen_addr))?;
    let token = coordinator.shutdown_token();
    let server = tokio::spawn(server::serve(coordinator.clone(), listener, async move {
        token.cancelled().await
    }));

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    tracing::info!("Interrupt received, draining in-flight leases (Ctrl-C again to stop now)");

    tokio::select! {
        _ = coordinator.drain(Duration::from_millis(500)) => {}
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!("Second interrupt, stopping without waiting for leases");
        }
    }

    coordinator
        .shutdown()
        .await
        .context("Failed to write final checkpoint")?;

    server.await??;
    monitor.await?;
    checkpointer.await?;

    tracing::info!("Coordinator stopped");
    Ok(())
}

/// Runs one worker until interrupted or until the coordinator drains
async fn run_worker(config: Config, exit_when_idle: bool) -> anyhow::Result<()> {
    let w = &config.worker;
    let timeout = Duration::from_secs(w.request_timeout_secs);

    let api = HttpCoordinatorClient::new(&w.coordinator_url, timeout)
        .context("Failed to build coordinator client")?;
    let client =
        build_http_client(&config.user_agent, timeout).context("Failed to build fetch client")?;
    let blobs: Arc<dyn BlobStore> = match &w.blob_dir {
        Some(dir) => Arc::new(FsBlobStore::new(dir)),
        None => Arc::new(MemoryBlobStore::new()),
    };

    let id = w.worker_id.clone().unwrap_or_else(generate_worker_id);
    let mut settings = WorkerSettings::new(WorkerId::new(id));
    settings.heartbeat_interval = Duration::from_secs(config.coordinator.heartbeat_interval_secs);
    settings.backoff_base = Duration::from_millis(w.backoff_base_ms);
    settings.backoff_cap = Duration::from_millis(w.backoff_cap_ms);
    settings.exit_when_idle = exit_when_idle;

    let shutdown = CancellationToken::new();
    let worker = Worker::new(
        settings,
        Arc::new(api),
        Arc::new(HttpPipeline::new(client, blobs)),
        Arc::new(LogIndexer),
        shutdown.clone(),
    );

    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupt received, finishing in-flight task");
            signal_token.cancel();
        }
    });

    let stats = worker.run().await;
    println!(
        "Worker finished: {} completed, {} failed, {} stale, {} indexed",
        stats.tasks_completed, stats.tasks_failed, stats.stale_reports, stats.pages_indexed
    );
    Ok(())
}

/// Worker id from the host name and process id
fn generate_worker_id() -> String {
    let host = std::env::var("HOSTNAME").unwrap_or_else(|_| "worker".to_string());
    format!("{}-{}", host, std::process::id())
}

/// Handles the `status` subcommand
async fn handle_status(config: &Config, db: bool) -> anyhow::Result<()> {
    if db {
        println!("Database: {}\n", config.output.database_path);
        let storage = open_storage(Path::new(&config.output.database_path))
            .with_context(|| format!("Failed to open {}", config.output.database_path))?;
        let stats = load_statistics(&storage)?;
        print_statistics(&stats);
        return Ok(());
    }

    let client = HttpCoordinatorClient::new(&config.worker.coordinator_url, Duration::from_secs(10))?;
    let report = client
        .status()
        .await
        .with_context(|| format!("Coordinator at {} is unreachable", config.worker.coordinator_url))?;
    print_status(&report);
    Ok(())
}

/// Handles the `seed` subcommand
async fn handle_seed(config: &Config, urls: Vec<String>, depth: u32) -> anyhow::Result<()> {
    let client = HttpCoordinatorClient::new(&config.worker.coordinator_url, Duration::from_secs(10))?;
    let response = client
        .seed(urls, depth)
        .await
        .context("Failed to submit seed URLs")?;

    println!("Inserted: {}", response.inserted);
    println!("Duplicates: {}", response.duplicates);
    println!("Rejected: {}", response.rejected.len());
    for rejected in &response.rejected {
        println!("  - {} ({})", rejected.url, rejected.reason);
    }
    Ok(())
}

/// Handles the `check-config` subcommand
fn handle_check_config(config: &Config) -> anyhow::Result<()> {
    let c = &config.coordinator;
    println!("=== Driftnet Configuration ===\n");

    println!("Coordinator:");
    println!("  Listen address: {}", c.listen_addr);
    println!("  Max attempts: {}", c.max_attempts);
    println!("  Min interval: {}ms", c.min_interval_ms);
    println!("  Task timeout: {}s", c.task_timeout_secs);
    println!(
        "  Heartbeat: every {}s, dead after {}s",
        c.heartbeat_interval_secs, c.heartbeat_timeout_secs
    );
    match c.max_depth {
        Some(depth) => println!("  Max depth: {}", depth),
        None => println!("  Max depth: unlimited"),
    }

    println!("\nRobots:");
    if config.robots.enabled {
        println!("  Enabled, refreshed every {}h", config.robots.ttl_hours);
    } else {
        println!("  Disabled");
    }

    println!("\nUser Agent:");
    println!("  {}", config.user_agent.header_value());

    println!("\nWorker:");
    println!("  Coordinator URL: {}", config.worker.coordinator_url);
    println!(
        "  Backoff: {}ms to {}ms",
        config.worker.backoff_base_ms, config.worker.backoff_cap_ms
    );

    println!("\nOutput:");
    println!("  Database: {}", config.output.database_path);

    let seeds = load_seed_urls(&config.seeds).context("Failed to load seed URLs")?;
    println!("\n✓ Configuration is valid");
    println!("✓ {} seed URLs", seeds.len());
    Ok(())
}
