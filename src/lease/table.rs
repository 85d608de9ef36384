//! Lease table: outstanding task assignments
//!
//! Leases are stored in a table keyed by `LeaseId`, with a one-directional
//! `UrlId -> LeaseId` index enforcing at most one active lease per URL. A
//! per-URL generation counter is bumped on every issue, so a report carrying
//! an old generation can be recognised after the URL was swept and reissued.

use crate::frontier::UrlId;
use crate::CoordError;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;

/// Unique, never reused lease identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LeaseId(pub u64);

impl fmt::Display for LeaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "lease-{}", self.0)
    }
}

/// Worker identifier chosen by the worker itself
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkerId(pub String);

impl WorkerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What a worker presents when reporting on a lease
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LeaseToken {
    pub lease_id: LeaseId,
    pub generation: u64,
}

/// A single outstanding assignment of one URL to one worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    pub id: LeaseId,
    pub url: UrlId,
    pub owner: WorkerId,
    pub issued_at: Instant,
    pub deadline: Instant,
    pub generation: u64,
}

impl Lease {
    pub fn token(&self) -> LeaseToken {
        LeaseToken {
            lease_id: self.id,
            generation: self.generation,
        }
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.deadline
    }
}

/// Why the monitor reclaimed a lease
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpiryReason {
    DeadlinePassed,
    WorkerDead,
}

/// A lease removed by a sweep
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpiredLease {
    pub lease: Lease,
    pub reason: ExpiryReason,
}

/// Table of active leases
#[derive(Debug)]
pub struct LeaseTable {
    leases: HashMap<LeaseId, Lease>,
    by_url: HashMap<UrlId, LeaseId>,
    generations: HashMap<UrlId, u64>,
    next_id: u64,
    task_timeout: Duration,
}

impl LeaseTable {
    /// Creates an empty table whose leases last `task_timeout`
    pub fn new(task_timeout: Duration) -> Self {
        Self {
            leases: HashMap::new(),
            by_url: HashMap::new(),
            generations: HashMap::new(),
            next_id: 1,
            task_timeout,
        }
    }

    /// Issues a lease on `url` to `owner`
    ///
    /// Fails with `CoordError::AlreadyLeased` if the URL already has an
    /// active lease. A correctly serialized dispatcher never triggers this.
    pub fn issue(&mut self, url: UrlId, owner: WorkerId, now: Instant) -> Result<Lease, CoordError> {
        if self.by_url.contains_key(&url) {
            return Err(CoordError::AlreadyLeased(url.to_string()));
        }

        let generation = {
            let counter = self.generations.entry(url).or_insert(0);
            *counter += 1;
            *counter
        };
        let id = LeaseId(self.next_id);
        self.next_id += 1;

        let lease = Lease {
            id,
            url,
            owner,
            issued_at: now,
            deadline: now + self.task_timeout,
            generation,
        };
        self.by_url.insert(url, id);
        self.leases.insert(id, lease.clone());
        Ok(lease)
    }

    /// Extends a lease's deadline to `now + task_timeout`
    ///
    /// A lease that is gone or already past its deadline cannot be renewed;
    /// the latter is left for the next sweep to reclaim.
    pub fn renew(&mut self, lease_id: LeaseId, now: Instant) -> Result<Instant, CoordError> {
        match self.leases.get_mut(&lease_id) {
            Some(lease) if !lease.is_expired(now) => {
                lease.deadline = now + self.task_timeout;
                Ok(lease.deadline)
            }
            _ => Err(CoordError::LeaseExpired(lease_id)),
        }
    }

    /// Removes and returns the lease matching `token`
    ///
    /// A token whose lease is gone, or whose generation differs from the
    /// current entry, is stale and leaves the table untouched.
    pub fn complete(&mut self, token: LeaseToken) -> Result<Lease, CoordError> {
        let current = self
            .leases
            .get(&token.lease_id)
            .is_some_and(|lease| lease.generation == token.generation);
        if !current {
            return Err(CoordError::StaleReport {
                lease: token.lease_id,
                generation: token.generation,
            });
        }

        let lease = self
            .leases
            .remove(&token.lease_id)
            .ok_or(CoordError::StaleReport {
                lease: token.lease_id,
                generation: token.generation,
            })?;
        self.by_url.remove(&lease.url);
        Ok(lease)
    }

    /// Removes every lease past its deadline or owned by a dead worker
    ///
    /// Returned leases are ordered by id so callers requeue deterministically.
    pub fn sweep(&mut self, now: Instant, dead_workers: &HashSet<WorkerId>) -> Vec<ExpiredLease> {
        let mut expired: Vec<ExpiredLease> = self
            .leases
            .values()
            .filter_map(|lease| {
                if dead_workers.contains(&lease.owner) {
                    Some(ExpiredLease {
                        lease: lease.clone(),
                        reason: ExpiryReason::WorkerDead,
                    })
                } else if lease.is_expired(now) {
                    Some(ExpiredLease {
                        lease: lease.clone(),
                        reason: ExpiryReason::DeadlinePassed,
                    })
                } else {
                    None
                }
            })
            .collect();
        expired.sort_by_key(|e| e.lease.id);

        for entry in &expired {
            self.leases.remove(&entry.lease.id);
            self.by_url.remove(&entry.lease.url);
        }
        expired
    }

    pub fn get(&self, lease_id: LeaseId) -> Option<&Lease> {
        self.leases.get(&lease_id)
    }

    /// The active lease on `url`, if any
    pub fn active_for(&self, url: UrlId) -> Option<&Lease> {
        self.by_url.get(&url).and_then(|id| self.leases.get(id))
    }

    /// Current generation counter for `url` (0 if never leased)
    pub fn generation_of(&self, url: UrlId) -> u64 {
        self.generations.get(&url).copied().unwrap_or(0)
    }

    pub fn held_by(&self, owner: &WorkerId) -> usize {
        self.leases.values().filter(|l| &l.owner == owner).count()
    }

    pub fn len(&self) -> usize {
        self.leases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.leases.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Lease> {
        self.leases.values()
    }

    /// Earliest deadline among active leases
    pub fn next_deadline(&self) -> Option<Instant> {
        self.leases.values().map(|l| l.deadline).min()
    }

    /// Verifies the lease and URL indexes agree one to one
    pub fn check_invariants(&self) -> Result<(), String> {
        if self.leases.len() != self.by_url.len() {
            return Err(format!(
                "{} leases but {} URL index entries",
                self.leases.len(),
                self.by_url.len()
            ));
        }
        for (url, lease_id) in &self.by_url {
            match self.leases.get(lease_id) {
                Some(lease) if lease.url == *url => {}
                _ => return Err(format!("URL index for {} points at {}", url, lease_id)),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TIMEOUT: Duration = Duration::from_secs(120);

    fn create_test_table() -> LeaseTable {
        LeaseTable::new(TIMEOUT)
    }

    fn worker(id: &str) -> WorkerId {
        WorkerId::new(id)
    }

    #[test]
    fn test_issue_sets_deadline_and_generation() {
        let mut table = create_test_table();
        let now = Instant::now();

        let lease = table.issue(UrlId(7), worker("w1"), now).unwrap();

        assert_eq!(lease.deadline, now + TIMEOUT);
        assert_eq!(lease.generation, 1);
        assert_eq!(table.active_for(UrlId(7)).unwrap().id, lease.id);
    }

    #[test]
    fn test_second_issue_for_same_url_is_rejected() {
        let mut table = create_test_table();
        let now = Instant::now();
        table.issue(UrlId(1), worker("w1"), now).unwrap();

        let result = table.issue(UrlId(1), worker("w2"), now);
        assert!(matches!(result, Err(CoordError::AlreadyLeased(_))));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_complete_removes_lease() {
        let mut table = create_test_table();
        let lease = table.issue(UrlId(1), worker("w1"), Instant::now()).unwrap();

        let completed = table.complete(lease.token()).unwrap();
        assert_eq!(completed.id, lease.id);
        assert!(table.is_empty());
        assert!(table.active_for(UrlId(1)).is_none());
    }

    #[test]
    fn test_stale_token_is_rejected_without_mutation() {
        let mut table = create_test_table();
        let now = Instant::now();
        let first = table.issue(UrlId(1), worker("w1"), now).unwrap();

        let swept = table.sweep(now + TIMEOUT, &HashSet::new());
        assert_eq!(swept.len(), 1);

        let second = table.issue(UrlId(1), worker("w2"), now + TIMEOUT).unwrap();
        assert_eq!(second.generation, 2);

        let result = table.complete(first.token());
        assert!(matches!(result, Err(CoordError::StaleReport { .. })));
        assert_eq!(table.active_for(UrlId(1)), Some(&second));
    }

    #[test]
    fn test_wrong_generation_is_stale() {
        let mut table = create_test_table();
        let lease = table.issue(UrlId(1), worker("w1"), Instant::now()).unwrap();
        let forged = LeaseToken {
            lease_id: lease.id,
            generation: lease.generation + 1,
        };

        assert!(table.complete(forged).is_err());
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_renew_extends_deadline() {
        let mut table = create_test_table();
        let now = Instant::now();
        let lease = table.issue(UrlId(1), worker("w1"), now).unwrap();

        let later = now + Duration::from_secs(60);
        let deadline = table.renew(lease.id, later).unwrap();
        assert_eq!(deadline, later + TIMEOUT);
    }

    #[test]
    fn test_renew_after_deadline_is_expired() {
        let mut table = create_test_table();
        let now = Instant::now();
        let lease = table.issue(UrlId(1), worker("w1"), now).unwrap();

        let result = table.renew(lease.id, now + TIMEOUT);
        assert!(matches!(result, Err(CoordError::LeaseExpired(_))));
    }

    #[test]
    fn test_sweep_returns_only_expired() {
        let mut table = create_test_table();
        let now = Instant::now();
        table.issue(UrlId(1), worker("w1"), now).unwrap();
        table
            .issue(UrlId(2), worker("w1"), now + Duration::from_secs(30))
            .unwrap();

        let expired = table.sweep(now + TIMEOUT, &HashSet::new());
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].lease.url, UrlId(1));
        assert_eq!(expired[0].reason, ExpiryReason::DeadlinePassed);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_sweep_reclaims_dead_worker_leases_before_deadline() {
        let mut table = create_test_table();
        let now = Instant::now();
        table.issue(UrlId(1), worker("dead"), now).unwrap();
        table.issue(UrlId(2), worker("alive"), now).unwrap();

        let dead: HashSet<WorkerId> = [worker("dead")].into_iter().collect();
        let expired = table.sweep(now + Duration::from_secs(1), &dead);

        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].reason, ExpiryReason::WorkerDead);
        assert_eq!(table.held_by(&worker("alive")), 1);
        assert!(table.check_invariants().is_ok());
    }

    #[test]
    fn test_lease_ids_are_unique() {
        let mut table = create_test_table();
        let now = Instant::now();
        let a = table.issue(UrlId(1), worker("w"), now).unwrap();
        table.complete(a.token()).unwrap();
        let b = table.issue(UrlId(1), worker("w"), now).unwrap();
        assert_ne!(a.id, b.id);
    }
}
