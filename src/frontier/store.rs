//! In-memory frontier store
//!
//! Records live in an arena indexed by `UrlId`. The dedup index maps the
//! canonical string to its id and only ever grows. `Discovered` records are
//! additionally kept per domain in ordered sets keyed by `(depth, queue_seq)`,
//! which gives breadth-first selection with FIFO order inside a depth. Picking
//! the next URL compares only the head of each domain's set, so dispatch cost
//! grows with the number of domains, not the number of URLs.

use crate::frontier::record::{UrlId, UrlRecord, UrlState};
use crate::url::CanonicalUrl;
use crate::CoordError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use thiserror::Error;

/// Errors raised by frontier state transitions
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrontierError {
    #[error("Unknown URL id: {0}")]
    UnknownUrl(UrlId),

    #[error("Invalid state transition for {url}: {from} -> {to}")]
    InvalidTransition {
        url: String,
        from: UrlState,
        to: UrlState,
    },
}

/// Outcome of adding a URL to the frontier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    /// First time this canonical URL was seen
    Inserted(UrlId),
    /// Already known; only depth may have been refreshed
    Duplicate(UrlId),
    /// Deeper than the configured maximum depth; not recorded
    BeyondMaxDepth,
}

impl AddOutcome {
    pub fn is_inserted(&self) -> bool {
        matches!(self, Self::Inserted(_))
    }
}

/// Counts of records per state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrontierCounts {
    pub discovered: u64,
    pub queued: u64,
    pub leased: u64,
    pub done: u64,
    pub failed: u64,
    /// Size of the dedup set
    pub total: u64,
}

impl FrontierCounts {
    pub fn get(&self, state: UrlState) -> u64 {
        match state {
            UrlState::Discovered => self.discovered,
            UrlState::Queued => self.queued,
            UrlState::Leased => self.leased,
            UrlState::Done => self.done,
            UrlState::Failed => self.failed,
        }
    }
}

/// A persisted view of one record, used for checkpoints and resume
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlSnapshot {
    pub url: String,
    pub domain: String,
    pub state: UrlState,
    pub depth: u32,
    pub attempts: u32,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl From<&UrlRecord> for UrlSnapshot {
    fn from(record: &UrlRecord) -> Self {
        Self {
            url: record.url.as_str().to_string(),
            domain: record.domain().to_string(),
            state: record.state,
            depth: record.depth,
            attempts: record.attempts,
            last_attempt_at: record.last_attempt_at,
            last_error: record.last_error.clone(),
        }
    }
}

type EligibleKey = (u32, u64, UrlId);

/// The URL frontier: every URL ever seen and its crawl state
#[derive(Debug)]
pub struct FrontierStore {
    records: Vec<UrlRecord>,
    index: HashMap<String, UrlId>,
    eligible: HashMap<String, BTreeSet<EligibleKey>>,
    eligible_count: usize,
    next_seq: u64,
    max_attempts: u32,
    max_depth: Option<u32>,
    dirty: HashSet<UrlId>,
}

impl FrontierStore {
    /// Creates an empty frontier
    ///
    /// # Arguments
    ///
    /// * `max_attempts` - Failures/expiries tolerated before a URL is `Failed`
    /// * `max_depth` - Optional depth limit for newly added URLs
    pub fn new(max_attempts: u32, max_depth: Option<u32>) -> Self {
        Self {
            records: Vec::new(),
            index: HashMap::new(),
            eligible: HashMap::new(),
            eligible_count: 0,
            next_seq: 0,
            max_attempts,
            max_depth,
            dirty: HashSet::new(),
        }
    }

    /// Adds a URL at the given depth
    ///
    /// The URL is normalized first; a URL failing normalization is rejected
    /// with `CoordError::InvalidUrl` and never enters the dedup set. A known
    /// URL is a no-op except that a shallower depth replaces the recorded one.
    pub fn add(&mut self, raw: &str, depth: u32) -> Result<AddOutcome, CoordError> {
        let canonical = CanonicalUrl::parse(raw).map_err(|source| CoordError::InvalidUrl {
            url: raw.to_string(),
            source,
        })?;
        Ok(self.add_canonical(canonical, depth))
    }

    /// Adds an already-canonical URL
    pub fn add_canonical(&mut self, canonical: CanonicalUrl, depth: u32) -> AddOutcome {
        if let Some(&id) = self.index.get(canonical.as_str()) {
            self.refresh_depth(id, depth);
            return AddOutcome::Duplicate(id);
        }

        if self.max_depth.is_some_and(|max| depth > max) {
            return AddOutcome::BeyondMaxDepth;
        }

        let id = UrlId(self.records.len() as u64);
        let seq = self.take_seq();
        self.index.insert(canonical.as_str().to_string(), id);
        self.records.push(UrlRecord {
            id,
            url: canonical,
            state: UrlState::Discovered,
            depth,
            attempts: 0,
            last_attempt_at: None,
            last_error: None,
            queue_seq: seq,
        });
        self.insert_eligible((depth, seq, id));
        self.dirty.insert(id);
        AddOutcome::Inserted(id)
    }

    /// Re-inserts a persisted record when resuming
    ///
    /// Terminal records keep their state. Anything else comes back as
    /// `Discovered`, since leases do not survive a coordinator restart.
    pub fn restore(&mut self, snapshot: UrlSnapshot) -> Result<UrlId, CoordError> {
        let canonical =
            CanonicalUrl::parse(&snapshot.url).map_err(|source| CoordError::InvalidUrl {
                url: snapshot.url.clone(),
                source,
            })?;
        if let Some(&id) = self.index.get(canonical.as_str()) {
            return Ok(id);
        }

        let state = if snapshot.state.is_terminal() {
            snapshot.state
        } else {
            UrlState::Discovered
        };
        let id = UrlId(self.records.len() as u64);
        let seq = self.take_seq();
        self.index.insert(canonical.as_str().to_string(), id);
        self.records.push(UrlRecord {
            id,
            url: canonical,
            state,
            depth: snapshot.depth,
            attempts: snapshot.attempts,
            last_attempt_at: snapshot.last_attempt_at,
            last_error: snapshot.last_error,
            queue_seq: seq,
        });
        if state == UrlState::Discovered {
            self.insert_eligible((snapshot.depth, seq, id));
        }
        Ok(id)
    }

    /// Returns the shallowest, oldest `Discovered` URL whose domain is not
    /// in `exclude_domains`
    ///
    /// `None` is not an error: the frontier may be empty or every eligible
    /// domain may be temporarily excluded. Use `eligible_len` to tell the two
    /// apart.
    pub fn next_eligible(&self, exclude_domains: &HashSet<String>) -> Option<&UrlRecord> {
        self.eligible
            .iter()
            .filter(|(domain, _)| !exclude_domains.contains(domain.as_str()))
            .filter_map(|(_, queue)| queue.first())
            .min()
            .map(|&(_, _, id)| &self.records[id.0 as usize])
    }

    pub fn mark_queued(&mut self, id: UrlId) -> Result<(), FrontierError> {
        self.transition(id, UrlState::Queued)
    }

    pub fn mark_leased(&mut self, id: UrlId, at: DateTime<Utc>) -> Result<(), FrontierError> {
        self.transition(id, UrlState::Leased)?;
        self.record_mut(id)?.last_attempt_at = Some(at);
        Ok(())
    }

    pub fn mark_done(&mut self, id: UrlId) -> Result<(), FrontierError> {
        self.transition(id, UrlState::Done)?;
        self.record_mut(id)?.last_error = None;
        Ok(())
    }

    /// Moves a URL straight to terminal `Failed`, bypassing the retry cap
    pub fn mark_failed(&mut self, id: UrlId, reason: &str) -> Result<(), FrontierError> {
        self.transition(id, UrlState::Failed)?;
        self.record_mut(id)?.last_error = Some(reason.to_string());
        Ok(())
    }

    /// Returns a `Queued` URL to `Discovered` without counting an attempt
    pub fn unqueue(&mut self, id: UrlId) -> Result<(), FrontierError> {
        self.transition(id, UrlState::Discovered)
    }

    /// Counts a failed or expired attempt
    ///
    /// The attempt count is incremented; the URL goes back to `Discovered`
    /// unless the count now exceeds `max_attempts`, in which case it lands in
    /// terminal `Failed`. Returns the resulting state.
    pub fn record_attempt_failure(
        &mut self,
        id: UrlId,
        reason: &str,
    ) -> Result<UrlState, FrontierError> {
        let attempts = {
            let record = self.record_mut(id)?;
            if !record.state.can_transition_to(UrlState::Discovered) {
                return Err(FrontierError::InvalidTransition {
                    url: record.url.as_str().to_string(),
                    from: record.state,
                    to: UrlState::Discovered,
                });
            }
            record.attempts += 1;
            record.last_error = Some(reason.to_string());
            record.attempts
        };

        let next = if attempts > self.max_attempts {
            UrlState::Failed
        } else {
            UrlState::Discovered
        };
        self.transition(id, next)?;
        Ok(next)
    }

    pub fn get(&self, id: UrlId) -> Option<&UrlRecord> {
        self.records.get(id.0 as usize)
    }

    /// Looks up a URL by any of its spellings
    pub fn lookup(&self, raw: &str) -> Option<&UrlRecord> {
        let canonical = CanonicalUrl::parse(raw).ok()?;
        self.index
            .get(canonical.as_str())
            .and_then(|id| self.get(*id))
    }

    /// Size of the dedup set
    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Number of URLs currently eligible for dispatch (ignoring politeness)
    pub fn eligible_len(&self) -> usize {
        self.eligible_count
    }

    /// Domains that currently have at least one `Discovered` URL
    pub fn eligible_domains(&self) -> HashSet<&str> {
        self.eligible.keys().map(String::as_str).collect()
    }

    /// The first `Discovered` record of each domain, in no particular order
    pub fn eligible_heads(&self) -> impl Iterator<Item = &UrlRecord> {
        self.eligible
            .values()
            .filter_map(|queue| queue.first())
            .map(|&(_, _, id)| &self.records[id.0 as usize])
    }

    pub fn counts(&self) -> FrontierCounts {
        let mut counts = FrontierCounts {
            total: self.records.len() as u64,
            ..FrontierCounts::default()
        };
        for record in &self.records {
            match record.state {
                UrlState::Discovered => counts.discovered += 1,
                UrlState::Queued => counts.queued += 1,
                UrlState::Leased => counts.leased += 1,
                UrlState::Done => counts.done += 1,
                UrlState::Failed => counts.failed += 1,
            }
        }
        counts
    }

    pub fn records(&self) -> impl Iterator<Item = &UrlRecord> {
        self.records.iter()
    }

    /// Drains the set of records changed since the last call
    pub fn take_dirty(&mut self) -> Vec<UrlSnapshot> {
        let mut ids: Vec<UrlId> = self.dirty.drain().collect();
        ids.sort();
        ids.into_iter()
            .filter_map(|id| self.records.get(id.0 as usize))
            .map(UrlSnapshot::from)
            .collect()
    }

    /// Puts snapshots back into the dirty set after a failed flush
    pub fn mark_dirty(&mut self, urls: &[UrlSnapshot]) {
        for snapshot in urls {
            if let Some(&id) = self.index.get(&snapshot.url) {
                self.dirty.insert(id);
            }
        }
    }

    fn transition(&mut self, id: UrlId, to: UrlState) -> Result<(), FrontierError> {
        let (from, depth, seq) = {
            let record = self.records.get(id.0 as usize).ok_or(FrontierError::UnknownUrl(id))?;
            if !record.state.can_transition_to(to) {
                return Err(FrontierError::InvalidTransition {
                    url: record.url.as_str().to_string(),
                    from: record.state,
                    to,
                });
            }
            (record.state, record.depth, record.queue_seq)
        };

        if from == UrlState::Discovered {
            self.remove_eligible((depth, seq, id));
        }

        let new_seq = if to == UrlState::Discovered {
            let seq = self.take_seq();
            self.insert_eligible((depth, seq, id));
            seq
        } else {
            seq
        };

        let record = &mut self.records[id.0 as usize];
        record.state = to;
        record.queue_seq = new_seq;
        self.dirty.insert(id);
        Ok(())
    }

    fn refresh_depth(&mut self, id: UrlId, depth: u32) {
        let record = &self.records[id.0 as usize];
        if depth >= record.depth {
            return;
        }
        let (old_depth, seq, state) = (record.depth, record.queue_seq, record.state);

        // The record's depth is part of its key, so swap keys before updating it
        if state == UrlState::Discovered {
            self.remove_eligible((old_depth, seq, id));
        }
        self.records[id.0 as usize].depth = depth;
        if state == UrlState::Discovered {
            self.insert_eligible((depth, seq, id));
        }
        self.dirty.insert(id);
    }

    fn insert_eligible(&mut self, key: EligibleKey) {
        let (_, _, id) = key;
        let domain = self.records[id.0 as usize].domain().to_string();
        if self.eligible.entry(domain).or_default().insert(key) {
            self.eligible_count += 1;
        }
    }

    fn remove_eligible(&mut self, key: EligibleKey) {
        let (_, _, id) = key;
        let domain = self.records[id.0 as usize].domain();
        let Some(queue) = self.eligible.get_mut(domain) else {
            return;
        };
        if queue.remove(&key) {
            self.eligible_count -= 1;
        }
        if queue.is_empty() {
            self.eligible.remove(domain);
        }
    }

    fn record_mut(&mut self, id: UrlId) -> Result<&mut UrlRecord, FrontierError> {
        self.records
            .get_mut(id.0 as usize)
            .ok_or(FrontierError::UnknownUrl(id))
    }

    fn take_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }
}
