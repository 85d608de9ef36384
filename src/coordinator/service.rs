//! Async coordinator service
//!
//! Wraps one `CoordinatorState` behind a tokio mutex. Every mutation of the
//! frontier, lease table and politeness gate goes through that lock; robots
//! fetches and checkpoint writes run outside it.

use crate::coordinator::policy::CoordinationPolicy;
use crate::coordinator::protocol::{
    HeartbeatResponse, RenewResponse, ReportAck, ReportRequest, SeedResponse, StatusReport,
    TaskResponse,
};
use crate::coordinator::state::{CoordinatorState, RobotsFetchRequest, SweepReport};
use crate::frontier::UrlSnapshot;
use crate::lease::{LeaseId, WorkerId, WorkerSnapshot};
use crate::politeness::{fetch_rules, RobotsRules, RobotsSource};
use crate::storage::{RunStatus, Storage};
use crate::{DriftnetError, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Where robots.txt comes from and which agent token to match
#[derive(Clone)]
pub struct RobotsSettings {
    pub source: Arc<dyn RobotsSource>,
    pub user_agent: String,
}

impl RobotsSettings {
    pub fn new(source: Arc<dyn RobotsSource>, user_agent: impl Into<String>) -> Self {
        Self {
            source,
            user_agent: user_agent.into(),
        }
    }
}

type SharedStorage = Arc<std::sync::Mutex<Box<dyn Storage>>>;

struct Checkpointer {
    storage: SharedStorage,
    run_id: i64,
}

/// The crawl coordinator
///
/// Cheap to clone; clones share the same state.
#[derive(Clone)]
pub struct Coordinator {
    state: Arc<Mutex<CoordinatorState>>,
    policy: Arc<CoordinationPolicy>,
    robots: Option<RobotsSettings>,
    checkpointer: Option<Arc<Checkpointer>>,
    shutdown: CancellationToken,
}

impl Coordinator {
    /// Creates an in-memory coordinator with no checkpointing
    ///
    /// Without a robots source, robots handling is disabled regardless of
    /// the policy.
    pub fn new(policy: CoordinationPolicy, robots: Option<RobotsSettings>) -> Self {
        let policy = effective_policy(policy, robots.is_some());
        let state = CoordinatorState::new(policy.clone());
        Self::from_parts(state, policy, robots, None)
    }

    /// Creates a coordinator backed by `storage`, resuming its frontier
    ///
    /// # Arguments
    ///
    /// * `config_hash` - Hash of the configuration, recorded on new runs
    /// * `fresh` - Discard stored URLs and start a new run
    pub fn resume(
        policy: CoordinationPolicy,
        robots: Option<RobotsSettings>,
        mut storage: Box<dyn Storage>,
        config_hash: &str,
        fresh: bool,
    ) -> Result<Self> {
        let run_id = if fresh {
            storage.clear_urls()?;
            tracing::info!("Starting fresh run");
            storage.create_run(config_hash)?
        } else {
            match storage.get_latest_run()? {
                Some(run) if run.status == RunStatus::Running => {
                    tracing::info!("Resuming interrupted run {}", run.id);
                    run.id
                }
                _ => {
                    tracing::info!("Starting new run");
                    storage.create_run(config_hash)?
                }
            }
        };

        let policy = effective_policy(policy, robots.is_some());
        let mut state = CoordinatorState::new(policy.clone());
        let restored = state.restore(storage.load_urls()?);
        if restored > 0 {
            let counts = state.frontier().counts();
            tracing::info!(
                "Restored {} URLs ({} done, {} failed, {} pending)",
                restored,
                counts.done,
                counts.failed,
                counts.discovered
            );
        }
        // Restored records are already on disk
        state.take_dirty();

        let checkpointer = Checkpointer {
            storage: Arc::new(std::sync::Mutex::new(storage)),
            run_id,
        };
        Ok(Self::from_parts(state, policy, robots, Some(checkpointer)))
    }

    fn from_parts(
        state: CoordinatorState,
        policy: CoordinationPolicy,
        robots: Option<RobotsSettings>,
        checkpointer: Option<Checkpointer>,
    ) -> Self {
        Self {
            state: Arc::new(Mutex::new(state)),
            policy: Arc::new(policy),
            robots,
            checkpointer: checkpointer.map(Arc::new),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn policy(&self) -> &CoordinationPolicy {
        &self.policy
    }

    /// Id of the checkpoint run, if backed by storage
    pub fn run_id(&self) -> Option<i64> {
        self.checkpointer.as_ref().map(|c| c.run_id)
    }

    /// Token cancelled once the coordinator has shut down
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub async fn request_task(&self, worker: &WorkerId) -> Result<TaskResponse> {
        let (response, fetches) = {
            let mut state = self.state.lock().await;
            let response = state.request_task(worker, Instant::now());
            (response, state.take_robots_requests())
        };
        self.spawn_robots_fetches(fetches);
        response
    }

    pub async fn report_result(&self, report: ReportRequest) -> Result<ReportAck> {
        self.state
            .lock()
            .await
            .report_result(report, Instant::now())
    }

    pub async fn heartbeat(&self, worker: &WorkerId) -> HeartbeatResponse {
        self.state.lock().await.heartbeat(worker, Instant::now())
    }

    pub async fn renew(&self, worker: &WorkerId, lease_id: LeaseId) -> RenewResponse {
        self.state.lock().await.renew(worker, lease_id, Instant::now())
    }

    pub async fn seed(&self, urls: &[String], depth: u32) -> SeedResponse {
        let response = self.state.lock().await.seed(urls, depth);
        tracing::info!(
            "Seeded {} URLs ({} duplicates, {} rejected)",
            response.inserted,
            response.duplicates,
            response.rejected.len()
        );
        response
    }

    pub async fn status(&self) -> StatusReport {
        self.state.lock().await.status(Instant::now())
    }

    pub async fn workers(&self) -> Vec<WorkerSnapshot> {
        self.status().await.workers
    }

    /// Runs one liveness sweep
    pub async fn sweep(&self) -> Result<SweepReport> {
        self.state.lock().await.sweep(Instant::now())
    }

    /// Verifies frontier and lease table agree
    pub async fn check_invariants(&self) -> std::result::Result<(), String> {
        self.state.lock().await.check_invariants()
    }

    /// Writes records changed since the last checkpoint
    ///
    /// Returns the number of rows written. Records whose write failed stay
    /// dirty for the next attempt.
    pub async fn checkpoint(&self) -> Result<usize> {
        let Some(checkpointer) = self.checkpointer.clone() else {
            return Ok(0);
        };
        let dirty = self.state.lock().await.take_dirty();
        if dirty.is_empty() {
            return Ok(0);
        }

        let storage = Arc::clone(&checkpointer.storage);
        let run_id = checkpointer.run_id;
        let (dirty, result) = tokio::task::spawn_blocking(move || {
            let result = save_snapshots(&storage, &dirty, run_id);
            (dirty, result)
        })
        .await?;

        match result {
            Ok(written) => {
                tracing::debug!("Checkpointed {} URLs", written);
                Ok(written)
            }
            Err(e) => {
                self.state.lock().await.mark_dirty(&dirty);
                Err(e)
            }
        }
    }

    /// Spawns the liveness monitor, sweeping every `sweep_interval`
    pub fn spawn_monitor(&self) -> JoinHandle<()> {
        let coordinator = self.clone();
        let period = self.policy.sweep_interval;
        tokio::spawn(async move {
            let mut ticker = time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = coordinator.shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = coordinator.sweep().await {
                            tracing::error!("Liveness sweep failed: {}", e);
                        }
                    }
                }
            }
            tracing::debug!("Liveness monitor stopped");
        })
    }

    /// Spawns the periodic checkpoint writer
    pub fn spawn_checkpointer(&self) -> JoinHandle<()> {
        let coordinator = self.clone();
        let period = self.policy.checkpoint_interval;
        tokio::spawn(async move {
            let mut ticker = time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = coordinator.shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = coordinator.checkpoint().await {
                            tracing::error!("Checkpoint failed: {}", e);
                        }
                    }
                }
            }
            tracing::debug!("Checkpoint writer stopped");
        })
    }

    /// Stops issuing leases and waits for in-flight leases to finish
    ///
    /// Leases end either by a report or by expiring in a sweep, so the
    /// liveness monitor must keep running while this waits.
    pub async fn drain(&self, poll: Duration) {
        self.state.lock().await.begin_drain();
        loop {
            let in_flight = self.state.lock().await.leases().len();
            if in_flight == 0 {
                break;
            }
            tracing::debug!("Waiting on {} in-flight lease(s)", in_flight);
            time::sleep(poll).await;
        }
        tracing::info!("All in-flight leases finished");
    }

    /// Writes a final checkpoint, closes the run and stops background tasks
    pub async fn shutdown(&self) -> Result<()> {
        let result = self.finish().await;
        self.shutdown.cancel();
        result
    }

    async fn finish(&self) -> Result<()> {
        self.checkpoint().await?;

        let Some(checkpointer) = self.checkpointer.clone() else {
            return Ok(());
        };
        let status = if self.state.lock().await.is_exhausted() {
            RunStatus::Completed
        } else {
            RunStatus::Interrupted
        };
        let storage = Arc::clone(&checkpointer.storage);
        let run_id = checkpointer.run_id;
        tokio::task::spawn_blocking(move || -> Result<()> {
            lock_storage(&storage)?.finish_run(run_id, status)?;
            Ok(())
        })
        .await??;

        tracing::info!("Run {} finished as {}", run_id, status.to_db_string());
        Ok(())
    }

    fn spawn_robots_fetches(&self, requests: Vec<RobotsFetchRequest>) {
        let Some(robots) = self.robots.clone() else {
            return;
        };
        for request in requests {
            let robots = robots.clone();
            let state = Arc::clone(&self.state);
            tokio::spawn(async move {
                tracing::debug!("Fetching robots.txt for {}", request.domain);
                let origin = request.origin.clone();
                let fetch = tokio::spawn(async move {
                    fetch_rules(robots.source.as_ref(), &origin, &robots.user_agent).await
                });
                // The domain stays blocked until rules are installed, so a
                // crashed fetch must still install something
                let rules = match fetch.await {
                    Ok(rules) => rules,
                    Err(e) => {
                        tracing::warn!(
                            "robots.txt fetch for {} failed: {}; allowing all",
                            request.domain,
                            e
                        );
                        RobotsRules::allow_all()
                    }
                };
                state
                    .lock()
                    .await
                    .install_robots(&request.domain, rules, Instant::now());
            });
        }
    }
}

/// Robots handling needs a source to fetch from
fn effective_policy(mut policy: CoordinationPolicy, has_robots_source: bool) -> CoordinationPolicy {
    if !has_robots_source {
        policy.robots_ttl = None;
    }
    policy
}

fn lock_storage(
    storage: &SharedStorage,
) -> Result<std::sync::MutexGuard<'_, Box<dyn Storage>>> {
    storage
        .lock()
        .map_err(|e| DriftnetError::Storage(format!("Storage lock poisoned: {}", e)))
}

fn save_snapshots(storage: &SharedStorage, urls: &[UrlSnapshot], run_id: i64) -> Result<usize> {
    Ok(lock_storage(storage)?.save_urls(urls, run_id)?)
}
