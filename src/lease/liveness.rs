//! Worker registry and liveness classification
//!
//! A worker is created on first contact and moves Alive -> Suspected -> Dead
//! as heartbeats go missing. Any contact from a worker revives it.

use crate::lease::WorkerId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;

/// Liveness of a worker as seen by the coordinator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerStatus {
    Alive,
    /// Missed at least one heartbeat interval
    Suspected,
    /// Silent for longer than the heartbeat timeout; its leases are reclaimed
    Dead,
}

impl fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Alive => "alive",
            Self::Suspected => "suspected",
            Self::Dead => "dead",
        };
        f.write_str(s)
    }
}

/// State tracked per worker
#[derive(Debug, Clone)]
pub struct WorkerRecord {
    pub id: WorkerId,
    pub status: WorkerStatus,
    pub last_contact: Instant,
    pub last_contact_at: DateTime<Utc>,
    pub first_seen_at: DateTime<Utc>,
    pub tasks_completed: u64,
    pub tasks_failed: u64,
}

/// Serializable view of a worker for status reports
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerSnapshot {
    pub id: WorkerId,
    pub status: WorkerStatus,
    pub last_contact_at: DateTime<Utc>,
    pub first_seen_at: DateTime<Utc>,
    pub seconds_since_contact: u64,
    pub held_leases: usize,
    pub tasks_completed: u64,
    pub tasks_failed: u64,
}

/// Registry of every worker that has contacted the coordinator
#[derive(Debug)]
pub struct WorkerRegistry {
    workers: HashMap<WorkerId, WorkerRecord>,
    heartbeat_interval: Duration,
    heartbeat_timeout: Duration,
}

impl WorkerRegistry {
    pub fn new(heartbeat_interval: Duration, heartbeat_timeout: Duration) -> Self {
        Self {
            workers: HashMap::new(),
            heartbeat_interval,
            heartbeat_timeout,
        }
    }

    /// Records contact from `worker`, creating or reviving it
    ///
    /// Returns the status the worker had before this contact, or `None` for
    /// a worker seen for the first time.
    pub fn touch(&mut self, worker: &WorkerId, now: Instant) -> Option<WorkerStatus> {
        let wall = Utc::now();
        match self.workers.get_mut(worker) {
            Some(record) => {
                let previous = record.status;
                record.status = WorkerStatus::Alive;
                record.last_contact = now;
                record.last_contact_at = wall;
                Some(previous)
            }
            None => {
                self.workers.insert(
                    worker.clone(),
                    WorkerRecord {
                        id: worker.clone(),
                        status: WorkerStatus::Alive,
                        last_contact: now,
                        last_contact_at: wall,
                        first_seen_at: wall,
                        tasks_completed: 0,
                        tasks_failed: 0,
                    },
                );
                None
            }
        }
    }

    /// Reclassifies every worker against `now`
    ///
    /// Returns the workers that became `Dead` during this call.
    pub fn evaluate(&mut self, now: Instant) -> Vec<WorkerId> {
        let mut newly_dead = Vec::new();
        for record in self.workers.values_mut() {
            let silent = now.saturating_duration_since(record.last_contact);
            let status = if silent > self.heartbeat_timeout {
                WorkerStatus::Dead
            } else if silent > self.heartbeat_interval {
                WorkerStatus::Suspected
            } else {
                WorkerStatus::Alive
            };

            if status == WorkerStatus::Dead && record.status != WorkerStatus::Dead {
                newly_dead.push(record.id.clone());
            }
            record.status = status;
        }
        newly_dead.sort();
        newly_dead
    }

    pub fn record_completion(&mut self, worker: &WorkerId, success: bool) {
        if let Some(record) = self.workers.get_mut(worker) {
            if success {
                record.tasks_completed += 1;
            } else {
                record.tasks_failed += 1;
            }
        }
    }

    pub fn status_of(&self, worker: &WorkerId) -> Option<WorkerStatus> {
        self.workers.get(worker).map(|r| r.status)
    }

    pub fn is_dead(&self, worker: &WorkerId) -> bool {
        self.status_of(worker) == Some(WorkerStatus::Dead)
    }

    pub fn dead_workers(&self) -> HashSet<WorkerId> {
        self.workers
            .values()
            .filter(|r| r.status == WorkerStatus::Dead)
            .map(|r| r.id.clone())
            .collect()
    }

    pub fn count_by_status(&self, status: WorkerStatus) -> usize {
        self.workers.values().filter(|r| r.status == status).count()
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Snapshots of all workers, sorted by id
    ///
    /// `held_leases` is supplied by the caller since the registry does not
    /// own the lease table.
    pub fn snapshots<F>(&self, now: Instant, held_leases: F) -> Vec<WorkerSnapshot>
    where
        F: Fn(&WorkerId) -> usize,
    {
        let mut snapshots: Vec<WorkerSnapshot> = self
            .workers
            .values()
            .map(|r| WorkerSnapshot {
                id: r.id.clone(),
                status: r.status,
                last_contact_at: r.last_contact_at,
                first_seen_at: r.first_seen_at,
                seconds_since_contact: now.saturating_duration_since(r.last_contact).as_secs(),
                held_leases: held_leases(&r.id),
                tasks_completed: r.tasks_completed,
                tasks_failed: r.tasks_failed,
            })
            .collect();
        snapshots.sort_by(|a, b| a.id.cmp(&b.id));
        snapshots
    }
}
