//! The worker loop: request, fetch, report, repeat
//!
//! Heartbeats run in their own task so a slow fetch never delays them.
//! Leases are renewed while a fetch is still running at half their lifetime.
//! Cancellation is checked between tasks only; an in-flight task is always
//! finished and reported before the loop exits.

use crate::coordinator::protocol::{
    FetchFailure, NoneAvailableReason, RenewResponse, ReportAck, ReportRequest, Task, TaskOutcome,
    TaskResponse,
};
use crate::frontier::UrlState;
use crate::lease::{WorkerId, WorkerStatus};
use crate::worker::backoff::Backoff;
use crate::worker::client::CoordinatorApi;
use crate::worker::fetcher::{FetchPipeline, FetchedPage};
use crate::worker::sinks::{IndexedPage, Indexer};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Worker tuning
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub id: WorkerId,
    pub heartbeat_interval: Duration,
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
    /// Exit once the coordinator reports an empty frontier
    pub exit_when_idle: bool,
}

impl WorkerSettings {
    pub fn new(id: WorkerId) -> Self {
        Self {
            id,
            heartbeat_interval: Duration::from_secs(30),
            backoff_base: Duration::from_secs(1),
            backoff_cap: Duration::from_secs(30),
            exit_when_idle: false,
        }
    }
}

/// What a worker did over its lifetime
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStats {
    pub tasks_completed: u64,
    pub tasks_failed: u64,
    pub stale_reports: u64,
    pub report_errors: u64,
    pub pages_indexed: u64,
}

pub struct Worker {
    settings: WorkerSettings,
    api: Arc<dyn CoordinatorApi>,
    pipeline: Arc<dyn FetchPipeline>,
    indexer: Arc<dyn Indexer>,
    shutdown: CancellationToken,
    stats: WorkerStats,
}

impl Worker {
    pub fn new(
        settings: WorkerSettings,
        api: Arc<dyn CoordinatorApi>,
        pipeline: Arc<dyn FetchPipeline>,
        indexer: Arc<dyn Indexer>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            settings,
            api,
            pipeline,
            indexer,
            shutdown,
            stats: WorkerStats::default(),
        }
    }

    pub fn id(&self) -> &WorkerId {
        &self.settings.id
    }

    /// Runs until cancelled, or until the coordinator drains
    pub async fn run(mut self) -> WorkerStats {
        tracing::info!("Worker {} starting", self.settings.id);

        let heartbeat_stop = self.shutdown.child_token();
        let heartbeat = self.spawn_heartbeat(heartbeat_stop.clone());
        let mut backoff = Backoff::new(self.settings.backoff_base, self.settings.backoff_cap);
        let mut rng = StdRng::from_entropy();

        while !self.shutdown.is_cancelled() {
            let hint = match self.api.request_task(&self.settings.id).await {
                Ok(TaskResponse::Task(task)) => {
                    backoff.reset();
                    self.process(task).await;
                    continue;
                }
                Ok(TaskResponse::NoneAvailable { reason }) => match reason {
                    NoneAvailableReason::ShuttingDown => {
                        tracing::info!("Coordinator is draining, worker {} exiting", self.settings.id);
                        break;
                    }
                    NoneAvailableReason::FrontierEmpty if self.settings.exit_when_idle => {
                        tracing::info!("Frontier empty, worker {} exiting", self.settings.id);
                        break;
                    }
                    NoneAvailableReason::FrontierEmpty => None,
                    NoneAvailableReason::PolitenessBlocked { retry_after_ms } => {
                        retry_after_ms.map(Duration::from_millis)
                    }
                },
                Err(e) => {
                    tracing::warn!("Task request failed: {}", e);
                    None
                }
            };

            let delay = backoff.next_delay_with_hint(&mut rng, hint);
            tracing::trace!("No task, sleeping {:?}", delay);
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = time::sleep(delay) => {}
            }
        }

        heartbeat_stop.cancel();
        if let Err(e) = heartbeat.await {
            tracing::warn!("Heartbeat task ended abnormally: {}", e);
        }
        tracing::info!(
            "Worker {} stopped: {} completed, {} failed, {} stale",
            self.settings.id,
            self.stats.tasks_completed,
            self.stats.tasks_failed,
            self.stats.stale_reports
        );
        self.stats
    }

    async fn process(&mut self, task: Task) {
        tracing::debug!("Fetching {} (attempt {})", task.url, task.attempt + 1);
        let result = self.fetch_with_renewal(&task).await;

        let (outcome, discovered, fetched) = match result {
            Ok(page) => (
                TaskOutcome::Success {
                    status: page.status,
                    content_ref: page.content_ref.clone(),
                },
                page.page.links.clone(),
                Some(page),
            ),
            Err(failure) => {
                tracing::debug!("Fetch of {} failed: {}", task.url, failure.describe());
                (TaskOutcome::Failure { failure }, Vec::new(), None)
            }
        };
        let succeeded = fetched.is_some();

        let report = ReportRequest {
            worker_id: self.settings.id.clone(),
            lease: task.lease,
            outcome,
            discovered,
        };

        match self.api.report_result(report).await {
            Ok(ReportAck::Applied { state, added, .. }) => {
                if succeeded {
                    self.stats.tasks_completed += 1;
                } else {
                    self.stats.tasks_failed += 1;
                }
                if let (UrlState::Done, Some(page)) = (state, fetched) {
                    tracing::debug!("{} done, {} new links", task.url, added);
                    self.index(&task.url, page).await;
                }
            }
            Ok(ReportAck::Stale) => {
                self.stats.stale_reports += 1;
                tracing::debug!("Report for {} was stale, discarding result", task.url);
            }
            Err(e) => {
                self.stats.report_errors += 1;
                tracing::warn!(
                    "Failed to report {}: {}; the lease will expire and be retried",
                    task.url,
                    e
                );
            }
        }
    }

    async fn fetch_with_renewal(&self, task: &Task) -> Result<FetchedPage, FetchFailure> {
        let renew_every = (Duration::from_millis(task.timeout_ms) / 2).max(Duration::from_millis(100));
        let mut ticker = time::interval_at(Instant::now() + renew_every, renew_every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let fetch = self.pipeline.fetch(&task.url);
        tokio::pin!(fetch);

        loop {
            tokio::select! {
                result = &mut fetch => return result,
                _ = ticker.tick() => {
                    match self.api.renew(&self.settings.id, task.lease.lease_id).await {
                        Ok(RenewResponse::Renewed { remaining_ms }) => {
                            tracing::debug!("Renewed {} for {} ms", task.lease.lease_id, remaining_ms);
                        }
                        Ok(RenewResponse::Expired) => {
                            tracing::warn!("Lease {} for {} expired mid-fetch", task.lease.lease_id, task.url);
                        }
                        Err(e) => tracing::warn!("Lease renewal failed: {}", e),
                    }
                }
            }
        }
    }

    async fn index(&mut self, url: &str, page: FetchedPage) {
        let Some(content_ref) = page.content_ref else {
            return;
        };
        let indexed = IndexedPage {
            url: url.to_string(),
            title: page.page.title,
            text: page.page.text,
            content_ref,
        };
        match self.indexer.index(indexed).await {
            Ok(()) => self.stats.pages_indexed += 1,
            Err(e) => tracing::warn!("Indexing {} failed: {}", url, e),
        }
    }

    fn spawn_heartbeat(&self, stop: CancellationToken) -> JoinHandle<()> {
        let api = Arc::clone(&self.api);
        let id = self.settings.id.clone();
        let period = self.settings.heartbeat_interval;
        tokio::spawn(async move {
            let mut ticker = time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = stop.cancelled() => break,
                    _ = ticker.tick() => {
                        match api.heartbeat(&id).await {
                            Ok(response) if response.previous_status == Some(WorkerStatus::Dead) => {
                                tracing::warn!("Coordinator had declared {} dead; its leases were reassigned", id);
                            }
                            Ok(_) => {}
                            Err(e) => tracing::warn!("Heartbeat failed: {}", e),
                        }
                    }
                }
            }
        })
    }
}
