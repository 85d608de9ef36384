//! Coordinator state: the single writer over frontier, leases and politeness
//!
//! Every operation here is synchronous, performs no I/O and takes `now`
//! explicitly. The async service wraps one `CoordinatorState` in a mutex,
//! which serializes dispatch decisions, reports and sweeps.

use crate::coordinator::policy::CoordinationPolicy;
use crate::coordinator::protocol::{
    Counters, FetchFailure, Health, HeartbeatResponse, NoneAvailableReason, RejectedUrl,
    RenewResponse, ReportAck, ReportRequest, SeedResponse, StatusReport, Task, TaskOutcome,
    TaskResponse, WorkerCounts,
};
use crate::frontier::{AddOutcome, FrontierStore, UrlId, UrlSnapshot, UrlState};
use crate::lease::{
    ExpiryReason, LeaseId, LeaseTable, WorkerId, WorkerRegistry, WorkerStatus,
};
use crate::politeness::{DomainOutcome, PolitenessGate, RobotsRules};
use crate::{CoordError, Result};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::time::Instant;
use url::Url;

/// A robots.txt fetch the service should run outside the lock
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RobotsFetchRequest {
    pub domain: String,
    pub origin: Url,
}

/// What one sweep did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Workers declared dead during this sweep
    pub newly_dead: Vec<WorkerId>,
    /// URLs returned to `Discovered`
    pub requeued: Vec<UrlId>,
    /// URLs whose expiry exhausted their attempts
    pub failed: Vec<UrlId>,
}

impl SweepReport {
    pub fn expired(&self) -> usize {
        self.requeued.len() + self.failed.len()
    }
}

/// Serialized coordination state
#[derive(Debug)]
pub struct CoordinatorState {
    policy: CoordinationPolicy,
    frontier: FrontierStore,
    leases: LeaseTable,
    workers: WorkerRegistry,
    gate: PolitenessGate,
    counters: Counters,
    draining: bool,
    exhaustion_reported: bool,
    robots_requests: Vec<RobotsFetchRequest>,
    started_at: DateTime<Utc>,
    started: Instant,
}

impl CoordinatorState {
    pub fn new(policy: CoordinationPolicy) -> Self {
        let mut gate = PolitenessGate::new(policy.min_interval)
            .with_rate_limit_cooldown(policy.rate_limit_cooldown)
            .with_failure_spike_threshold(policy.failure_spike_threshold);
        if let Some(ttl) = policy.robots_ttl {
            gate = gate.with_robots(ttl);
        }

        Self {
            frontier: FrontierStore::new(policy.max_attempts, policy.max_depth),
            leases: LeaseTable::new(policy.task_timeout),
            workers: WorkerRegistry::new(policy.heartbeat_interval, policy.heartbeat_timeout),
            gate,
            counters: Counters::default(),
            draining: false,
            exhaustion_reported: false,
            robots_requests: Vec::new(),
            started_at: Utc::now(),
            started: Instant::now(),
            policy,
        }
    }

    /// Hands the next dispatchable URL to `worker`
    ///
    /// Domain selection, the dispatch timestamp and the lease are decided in
    /// one call, so two requests can never both pass the gate for the same
    /// domain. URLs that robots rules forbid are failed on the spot and the
    /// search continues.
    pub fn request_task(&mut self, worker: &WorkerId, now: Instant) -> Result<TaskResponse> {
        self.touch_worker(worker, now);

        if self.draining {
            return Ok(TaskResponse::NoneAvailable {
                reason: NoneAvailableReason::ShuttingDown,
            });
        }

        loop {
            if self.frontier.eligible_len() == 0 {
                return Ok(TaskResponse::NoneAvailable {
                    reason: NoneAvailableReason::FrontierEmpty,
                });
            }

            let origins = self.eligible_origins();
            self.schedule_robots_fetches(&origins, now);
            let blocked = self
                .gate
                .blocked_domains(origins.keys().map(String::as_str), now);

            let Some(record) = self.frontier.next_eligible(&blocked) else {
                let retry_after = self
                    .gate
                    .next_ready_in(origins.keys().map(String::as_str), now)
                    .map(|d| d.as_millis() as u64);
                tracing::trace!(
                    "All {} eligible domains blocked for {}",
                    origins.len(),
                    worker
                );
                return Ok(TaskResponse::NoneAvailable {
                    reason: NoneAvailableReason::PolitenessBlocked {
                        retry_after_ms: retry_after,
                    },
                });
            };

            let id = record.id;
            let url = record.url.clone();
            let depth = record.depth;
            let attempt = record.attempts;

            if self.gate.is_disallowed(&url) {
                self.frontier
                    .mark_failed(id, &FetchFailure::RobotsDenied.describe())?;
                self.counters.robots_denied += 1;
                tracing::debug!("Robots disallows {}, marking failed", url);
                continue;
            }

            self.frontier.mark_queued(id)?;
            let lease = match self.leases.issue(id, worker.clone(), now) {
                Ok(lease) => lease,
                Err(e) => {
                    tracing::error!("Lease invariant violated for {}: {}", url, e);
                    self.frontier.unqueue(id)?;
                    return Err(CoordError::AlreadyLeased(url.to_string()).into());
                }
            };
            self.gate.record_dispatch(url.domain(), now);
            self.frontier.mark_leased(id, Utc::now())?;
            self.counters.tasks_assigned += 1;

            tracing::debug!(
                "Leased {} to {} ({}, generation {})",
                url,
                worker,
                lease.id,
                lease.generation
            );

            return Ok(TaskResponse::Task(Task {
                lease: lease.token(),
                url: url.to_string(),
                depth,
                attempt,
                timeout_ms: self.policy.task_timeout.as_millis() as u64,
            }));
        }
    }

    /// Applies a worker's report on a lease
    ///
    /// A report whose lease is gone, whose generation is old, or which comes
    /// from a worker other than the lease owner is discarded without touching
    /// the frontier or the lease table.
    pub fn report_result(&mut self, report: ReportRequest, now: Instant) -> Result<ReportAck> {
        self.touch_worker(&report.worker_id, now);

        let owned = self.leases.get(report.lease.lease_id).is_some_and(|lease| {
            lease.generation == report.lease.generation && lease.owner == report.worker_id
        });
        if !owned {
            return Ok(self.discard_stale(&report));
        }

        let lease = match self.leases.complete(report.lease) {
            Ok(lease) => lease,
            Err(CoordError::StaleReport { .. }) => return Ok(self.discard_stale(&report)),
            Err(e) => return Err(e.into()),
        };

        let id = lease.url;
        let (url, domain, depth) = match self.frontier.get(id) {
            Some(record) => (
                record.url.to_string(),
                record.domain().to_string(),
                record.depth,
            ),
            None => return Err(crate::frontier::FrontierError::UnknownUrl(id).into()),
        };

        let (mut added, mut duplicates, mut rejected) = (0, 0, 0);
        match report.outcome {
            TaskOutcome::Success { status, .. } => {
                self.frontier.mark_done(id)?;
                self.gate.record_outcome(&domain, DomainOutcome::Success, now);
                self.workers.record_completion(&report.worker_id, true);
                self.counters.tasks_completed += 1;
                tracing::debug!("Completed {} (HTTP {})", url, status);

                for link in &report.discovered {
                    match self.frontier.add(link, depth + 1) {
                        Ok(AddOutcome::Inserted(_)) => added += 1,
                        Ok(AddOutcome::Duplicate(_)) => duplicates += 1,
                        Ok(AddOutcome::BeyondMaxDepth) => rejected += 1,
                        Err(e) => {
                            rejected += 1;
                            self.counters.urls_rejected += 1;
                            tracing::trace!("Dropping discovered link: {}", e);
                        }
                    }
                }
            }
            TaskOutcome::Failure { failure } => {
                self.workers.record_completion(&report.worker_id, false);
                if failure.is_terminal() {
                    self.frontier.mark_failed(id, &failure.describe())?;
                    self.counters.robots_denied += 1;
                    self.counters.tasks_failed += 1;
                    tracing::debug!("{} denied by robots.txt", url);
                } else {
                    let state = self.frontier.record_attempt_failure(id, &failure.describe())?;
                    self.note_domain_failure(&domain, &failure, now);
                    if state == UrlState::Failed {
                        self.counters.tasks_failed += 1;
                        tracing::info!("Giving up on {} after {}", url, failure.describe());
                    } else {
                        self.counters.retries_scheduled += 1;
                        tracing::debug!("Retrying {} later: {}", url, failure.describe());
                    }
                }
            }
        }

        let state = self
            .frontier
            .get(id)
            .map(|r| r.state)
            .unwrap_or(UrlState::Failed);
        Ok(ReportAck::Applied {
            state,
            added,
            duplicates,
            rejected,
        })
    }

    /// Records a heartbeat from `worker`
    pub fn heartbeat(&mut self, worker: &WorkerId, now: Instant) -> HeartbeatResponse {
        let previous_status = self.touch_worker(worker, now);
        HeartbeatResponse {
            previous_status,
            draining: self.draining,
        }
    }

    /// Extends a lease held by `worker`
    pub fn renew(&mut self, worker: &WorkerId, lease_id: LeaseId, now: Instant) -> RenewResponse {
        self.touch_worker(worker, now);

        let owned = self
            .leases
            .get(lease_id)
            .is_some_and(|lease| &lease.owner == worker);
        if !owned {
            return RenewResponse::Expired;
        }

        match self.leases.renew(lease_id, now) {
            Ok(deadline) => RenewResponse::Renewed {
                remaining_ms: deadline.saturating_duration_since(now).as_millis() as u64,
            },
            Err(e) => {
                tracing::debug!("Renewal refused: {}", e);
                RenewResponse::Expired
            }
        }
    }

    /// Reclaims leases from dead workers and past their deadline
    ///
    /// Each reclaimed URL counts one attempt and returns to `Discovered`, or
    /// lands in `Failed` once its attempts are exhausted.
    pub fn sweep(&mut self, now: Instant) -> Result<SweepReport> {
        let mut report = SweepReport {
            newly_dead: self.workers.evaluate(now),
            ..SweepReport::default()
        };
        for worker in &report.newly_dead {
            tracing::warn!(
                "Worker {} missed heartbeats for over {:?}, reclaiming its {} lease(s)",
                worker,
                self.policy.heartbeat_timeout,
                self.leases.held_by(worker)
            );
        }

        let dead = self.workers.dead_workers();
        for expired in self.leases.sweep(now, &dead) {
            let lease = &expired.lease;
            let reason = match expired.reason {
                ExpiryReason::DeadlinePassed => CoordError::LeaseExpired(lease.id),
                ExpiryReason::WorkerDead => CoordError::WorkerDead(lease.owner.clone()),
            };
            let state = self
                .frontier
                .record_attempt_failure(lease.url, &reason.to_string())?;
            self.counters.leases_expired += 1;

            let url = self
                .frontier
                .get(lease.url)
                .map(|r| r.url.to_string())
                .unwrap_or_default();
            if state == UrlState::Failed {
                self.counters.tasks_failed += 1;
                report.failed.push(lease.url);
                tracing::warn!("{}: {} exhausted its attempts", reason, url);
            } else {
                report.requeued.push(lease.url);
                tracing::warn!("{}: requeued {}", reason, url);
            }
        }

        self.check_exhaustion();
        Ok(report)
    }

    /// Adds seed URLs at `depth`
    pub fn seed(&mut self, urls: &[String], depth: u32) -> SeedResponse {
        let mut response = SeedResponse::default();
        for raw in urls {
            match self.frontier.add(raw, depth) {
                Ok(AddOutcome::Inserted(_)) => response.inserted += 1,
                Ok(AddOutcome::Duplicate(_)) => response.duplicates += 1,
                Ok(AddOutcome::BeyondMaxDepth) => response.rejected.push(RejectedUrl {
                    url: raw.clone(),
                    reason: "beyond max depth".to_string(),
                }),
                Err(e) => {
                    self.counters.urls_rejected += 1;
                    response.rejected.push(RejectedUrl {
                        url: raw.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }
        if response.inserted > 0 {
            self.exhaustion_reported = false;
        }
        response
    }

    /// Builds a status snapshot
    pub fn status(&self, now: Instant) -> StatusReport {
        let frontier = self.frontier.counts();
        let worker_counts = WorkerCounts {
            alive: self.workers.count_by_status(WorkerStatus::Alive),
            suspected: self.workers.count_by_status(WorkerStatus::Suspected),
            dead: self.workers.count_by_status(WorkerStatus::Dead),
        };

        StatusReport {
            started_at: self.started_at,
            uptime_secs: now.saturating_duration_since(self.started).as_secs(),
            health: Health::classify(&frontier, &worker_counts),
            draining: self.draining,
            exhausted: self.is_exhausted(),
            frontier,
            active_leases: self.leases.len(),
            known_domains: self.gate.domain_count(),
            worker_counts,
            workers: self.workers.snapshots(now, |w| self.leases.held_by(w)),
            counters: self.counters,
        }
    }

    /// Stops issuing new leases
    pub fn begin_drain(&mut self) {
        if !self.draining {
            tracing::info!(
                "Draining: no new leases, waiting on {} in-flight task(s)",
                self.leases.len()
            );
        }
        self.draining = true;
    }

    pub fn is_draining(&self) -> bool {
        self.draining
    }

    /// Nothing left to dispatch and nothing in flight
    pub fn is_exhausted(&self) -> bool {
        self.frontier.eligible_len() == 0 && self.leases.is_empty()
    }

    /// Drains the robots fetches requested since the last call
    pub fn take_robots_requests(&mut self) -> Vec<RobotsFetchRequest> {
        std::mem::take(&mut self.robots_requests)
    }

    /// Installs fetched robots rules for `domain`
    pub fn install_robots(&mut self, domain: &str, rules: RobotsRules, now: Instant) {
        if let Some(delay) = rules.crawl_delay() {
            tracing::debug!("{} requests a crawl delay of {:?}", domain, delay);
        }
        self.gate.install_robots(domain, rules, now);
    }

    /// Re-inserts persisted URLs on startup; returns how many were restored
    pub fn restore(&mut self, snapshots: Vec<UrlSnapshot>) -> usize {
        let mut restored = 0;
        for snapshot in snapshots {
            let url = snapshot.url.clone();
            match self.frontier.restore(snapshot) {
                Ok(_) => restored += 1,
                Err(e) => tracing::warn!("Skipping stored URL {}: {}", url, e),
            }
        }
        restored
    }

    /// Records changed since the last checkpoint
    pub fn take_dirty(&mut self) -> Vec<UrlSnapshot> {
        self.frontier.take_dirty()
    }

    /// Re-marks records whose checkpoint write failed
    pub fn mark_dirty(&mut self, snapshots: &[UrlSnapshot]) {
        self.frontier.mark_dirty(snapshots);
    }

    pub fn policy(&self) -> &CoordinationPolicy {
        &self.policy
    }

    pub fn frontier(&self) -> &FrontierStore {
        &self.frontier
    }

    pub fn leases(&self) -> &LeaseTable {
        &self.leases
    }

    pub fn workers(&self) -> &WorkerRegistry {
        &self.workers
    }

    pub fn gate(&self) -> &PolitenessGate {
        &self.gate
    }

    pub fn counters(&self) -> &Counters {
        &self.counters
    }

    /// Verifies frontier and lease table agree
    ///
    /// Every active lease points at a `Leased` record, every `Leased` record
    /// has exactly one active lease, and nothing is left `Queued` between
    /// operations.
    pub fn check_invariants(&self) -> std::result::Result<(), String> {
        self.leases.check_invariants()?;

        for lease in self.leases.iter() {
            match self.frontier.get(lease.url) {
                Some(record) if record.state == UrlState::Leased => {}
                Some(record) => {
                    return Err(format!(
                        "{} holds {} but the URL is {}",
                        lease.id, record.url, record.state
                    ))
                }
                None => return Err(format!("{} points at unknown {}", lease.id, lease.url)),
            }
        }

        let counts = self.frontier.counts();
        if counts.leased as usize != self.leases.len() {
            return Err(format!(
                "{} leased URLs but {} active leases",
                counts.leased,
                self.leases.len()
            ));
        }
        if counts.queued != 0 {
            return Err(format!("{} URLs stuck in queued", counts.queued));
        }
        Ok(())
    }

    fn touch_worker(&mut self, worker: &WorkerId, now: Instant) -> Option<WorkerStatus> {
        let previous = self.workers.touch(worker, now);
        match previous {
            None => tracing::info!("Worker {} registered", worker),
            Some(WorkerStatus::Dead) => tracing::info!("Worker {} is back after being declared dead", worker),
            Some(_) => {}
        }
        previous
    }

    fn discard_stale(&mut self, report: &ReportRequest) -> ReportAck {
        self.counters.stale_reports += 1;
        tracing::debug!(
            "Discarding stale report from {} for {} (generation {})",
            report.worker_id,
            report.lease.lease_id,
            report.lease.generation
        );
        ReportAck::Stale
    }

    fn note_domain_failure(&mut self, domain: &str, failure: &FetchFailure, now: Instant) {
        let outcome = if failure.is_rate_limited() {
            DomainOutcome::RateLimited
        } else {
            DomainOutcome::TransientFailure
        };
        if outcome == DomainOutcome::RateLimited {
            tracing::info!(
                "{} is rate limiting us, pausing it for {:?}",
                domain,
                self.policy.rate_limit_cooldown
            );
        }
        if self.gate.record_outcome(domain, outcome, now) {
            tracing::warn!(
                "Failure spike on {}: {} consecutive failed fetches",
                domain,
                self.policy.failure_spike_threshold
            );
        }
    }

    /// One origin per domain that currently has eligible URLs
    fn eligible_origins(&self) -> HashMap<String, Url> {
        self.frontier
            .eligible_heads()
            .map(|record| {
                let mut origin = record.url.url().clone();
                origin.set_path("/");
                origin.set_query(None);
                (record.domain().to_string(), origin)
            })
            .collect()
    }

    fn schedule_robots_fetches(&mut self, origins: &HashMap<String, Url>, now: Instant) {
        for (domain, origin) in origins {
            if self.gate.needs_robots_fetch(domain, now) {
                self.gate.begin_robots_fetch(domain);
                self.robots_requests.push(RobotsFetchRequest {
                    domain: domain.clone(),
                    origin: origin.clone(),
                });
            }
        }
    }

    fn check_exhaustion(&mut self) {
        let exhausted = self.is_exhausted() && !self.frontier.is_empty();
        if exhausted && !self.exhaustion_reported {
            let counts = self.frontier.counts();
            tracing::warn!(
                "Frontier exhausted: {} done, {} failed, nothing left to dispatch",
                counts.done,
                counts.failed
            );
            self.exhaustion_reported = true;
        } else if !exhausted {
            self.exhaustion_reported = false;
        }
    }
}
