//! Per-domain politeness state
//!
//! The gate holds no URLs, only timing and robots state per domain. It is
//! consulted by the dispatcher under the coordination lock, so every method
//! takes `now` explicitly and performs no I/O.

use crate::politeness::RobotsRules;
use crate::url::CanonicalUrl;
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tokio::time::Instant;

/// Outcome of a finished task, as far as the domain is concerned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DomainOutcome {
    Success,
    TransientFailure,
    /// The server answered HTTP 429
    RateLimited,
}

/// Politeness state tracked for one domain
#[derive(Debug, Clone, Default)]
pub struct DomainPolicy {
    /// When the last task for this domain was dispatched
    pub last_dispatch: Option<Instant>,

    /// Robots rules, once fetched
    pub robots: Option<RobotsRules>,

    /// When the robots rules were installed
    pub robots_cached_at: Option<Instant>,

    /// A robots fetch is currently in flight
    pub robots_pending: bool,

    /// Dispatch count over the life of the coordinator
    pub dispatch_count: u64,

    /// Transient failures since the last success
    pub consecutive_failures: u32,

    /// Domain paused after a 429 until this instant
    pub cooldown_until: Option<Instant>,
}

/// Domain-aware rate limiter and robots policy cache
#[derive(Debug)]
pub struct PolitenessGate {
    domains: HashMap<String, DomainPolicy>,
    default_interval: Duration,
    robots_ttl: Option<Duration>,
    rate_limit_cooldown: Duration,
    failure_spike_threshold: u32,
}

impl PolitenessGate {
    /// Creates a gate with robots handling disabled
    pub fn new(default_interval: Duration) -> Self {
        Self {
            domains: HashMap::new(),
            default_interval,
            robots_ttl: None,
            rate_limit_cooldown: Duration::from_secs(60),
            failure_spike_threshold: 5,
        }
    }

    /// Enables robots handling; cached rules older than `ttl` are refreshed
    pub fn with_robots(mut self, ttl: Duration) -> Self {
        self.robots_ttl = Some(ttl);
        self
    }

    pub fn with_rate_limit_cooldown(mut self, cooldown: Duration) -> Self {
        self.rate_limit_cooldown = cooldown;
        self
    }

    pub fn with_failure_spike_threshold(mut self, threshold: u32) -> Self {
        self.failure_spike_threshold = threshold;
        self
    }

    pub fn robots_enabled(&self) -> bool {
        self.robots_ttl.is_some()
    }

    /// Minimum spacing between dispatches to `domain`
    ///
    /// A robots Crawl-delay replaces the default interval.
    pub fn min_interval(&self, domain: &str) -> Duration {
        self.domains
            .get(domain)
            .and_then(|p| p.robots.as_ref())
            .and_then(|r| r.crawl_delay())
            .unwrap_or(self.default_interval)
    }

    /// Whether a task for `domain` may be dispatched at `now`
    ///
    /// A domain with no recorded dispatch is always eligible. Otherwise
    /// dispatch is allowed once `min_interval` has fully elapsed, and not
    /// during a rate-limit cooldown.
    pub fn may_dispatch(&self, domain: &str, now: Instant) -> bool {
        self.time_until_ready(domain, now).is_none()
    }

    /// How long until `domain` may be dispatched again, `None` if it may now
    pub fn time_until_ready(&self, domain: &str, now: Instant) -> Option<Duration> {
        let policy = self.domains.get(domain)?;

        let interval_wait = policy.last_dispatch.and_then(|last| {
            let ready_at = last + self.min_interval(domain);
            (now < ready_at).then(|| ready_at - now)
        });
        let cooldown_wait = policy
            .cooldown_until
            .and_then(|until| (now < until).then(|| until - now));

        match (interval_wait, cooldown_wait) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        }
    }

    /// Records a dispatch to `domain` at `now`
    pub fn record_dispatch(&mut self, domain: &str, now: Instant) {
        let policy = self.domains.entry(domain.to_string()).or_default();
        policy.last_dispatch = Some(now);
        policy.dispatch_count += 1;
    }

    /// Whether robots rules forbid fetching `url`
    ///
    /// Unknown domains and disabled robots handling never disallow.
    pub fn is_disallowed(&self, url: &CanonicalUrl) -> bool {
        if !self.robots_enabled() {
            return false;
        }
        self.domains
            .get(url.domain())
            .and_then(|p| p.robots.as_ref())
            .is_some_and(|rules| !rules.is_allowed(url.url()))
    }

    /// Whether `domain` must wait for its first robots fetch before dispatch
    pub fn awaiting_robots(&self, domain: &str) -> bool {
        self.robots_enabled()
            && self
                .domains
                .get(domain)
                .map_or(true, |p| p.robots.is_none())
    }

    /// Whether a robots fetch should be started for `domain`
    ///
    /// True when rules are missing or older than the TTL and no fetch is
    /// already in flight.
    pub fn needs_robots_fetch(&self, domain: &str, now: Instant) -> bool {
        let Some(ttl) = self.robots_ttl else {
            return false;
        };
        match self.domains.get(domain) {
            None => true,
            Some(policy) if policy.robots_pending => false,
            Some(policy) => match (policy.robots.as_ref(), policy.robots_cached_at) {
                (Some(_), Some(cached_at)) => now.saturating_duration_since(cached_at) > ttl,
                _ => true,
            },
        }
    }

    /// Marks a robots fetch for `domain` as in flight
    pub fn begin_robots_fetch(&mut self, domain: &str) {
        self.domains.entry(domain.to_string()).or_default().robots_pending = true;
    }

    /// Installs freshly fetched rules for `domain`
    pub fn install_robots(&mut self, domain: &str, rules: RobotsRules, now: Instant) {
        let policy = self.domains.entry(domain.to_string()).or_default();
        policy.robots = Some(rules);
        policy.robots_cached_at = Some(now);
        policy.robots_pending = false;
    }

    /// Domains among `candidates` that cannot be dispatched at `now`
    pub fn blocked_domains<'a, I>(&self, candidates: I, now: Instant) -> HashSet<String>
    where
        I: IntoIterator<Item = &'a str>,
    {
        candidates
            .into_iter()
            .filter(|domain| self.awaiting_robots(domain) || !self.may_dispatch(domain, now))
            .map(str::to_string)
            .collect()
    }

    /// Shortest wait until any of `domains` becomes dispatchable
    ///
    /// Domains waiting on robots have no predictable wait and are skipped.
    pub fn next_ready_in<'a, I>(&self, domains: I, now: Instant) -> Option<Duration>
    where
        I: IntoIterator<Item = &'a str>,
    {
        domains
            .into_iter()
            .filter(|domain| !self.awaiting_robots(domain))
            .filter_map(|domain| self.time_until_ready(domain, now))
            .min()
    }

    /// Records how a task for `domain` ended
    ///
    /// Returns `true` exactly when this outcome makes the run of consecutive
    /// failures reach the spike threshold.
    pub fn record_outcome(&mut self, domain: &str, outcome: DomainOutcome, now: Instant) -> bool {
        let cooldown = self.rate_limit_cooldown;
        let threshold = self.failure_spike_threshold;
        let policy = self.domains.entry(domain.to_string()).or_default();

        match outcome {
            DomainOutcome::Success => {
                policy.consecutive_failures = 0;
                false
            }
            DomainOutcome::RateLimited | DomainOutcome::TransientFailure => {
                if outcome == DomainOutcome::RateLimited {
                    policy.cooldown_until = Some(now + cooldown);
                }
                policy.consecutive_failures += 1;
                threshold > 0 && policy.consecutive_failures == threshold
            }
        }
    }

    pub fn policy(&self, domain: &str) -> Option<&DomainPolicy> {
        self.domains.get(domain)
    }

    pub fn domain_count(&self) -> usize {
        self.domains.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INTERVAL: Duration = Duration::from_secs(2);

    fn create_test_gate() -> PolitenessGate {
        PolitenessGate::new(INTERVAL)
    }

    fn canonical(raw: &str) -> CanonicalUrl {
        CanonicalUrl::parse(raw).unwrap()
    }

    #[test]
    fn test_unknown_domain_is_eligible() {
        let gate = create_test_gate();
        assert!(gate.may_dispatch("example.com", Instant::now()));
    }

    #[test]
    fn test_interval_boundary() {
        let mut gate = create_test_gate();
        let t = Instant::now();
        gate.record_dispatch("example.com", t);

        assert!(!gate.may_dispatch("example.com", t));
        assert!(!gate.may_dispatch("example.com", t + INTERVAL - Duration::from_millis(1)));
        assert!(gate.may_dispatch("example.com", t + INTERVAL));
        assert!(gate.may_dispatch("example.com", t + INTERVAL + Duration::from_secs(1)));
    }

    #[test]
    fn test_other_domains_unaffected() {
        let mut gate = create_test_gate();
        let t = Instant::now();
        gate.record_dispatch("a.com", t);
        assert!(gate.may_dispatch("b.com", t));
    }

    #[test]
    fn test_time_until_ready() {
        let mut gate = create_test_gate();
        let t = Instant::now();
        gate.record_dispatch("example.com", t);

        let wait = gate.time_until_ready("example.com", t + Duration::from_millis(500));
        assert_eq!(wait, Some(Duration::from_millis(1500)));
        assert_eq!(gate.time_until_ready("example.com", t + INTERVAL), None);
    }

    #[test]
    fn test_crawl_delay_takes_precedence() {
        let mut gate = create_test_gate().with_robots(Duration::from_secs(3600));
        let t = Instant::now();
        let rules = RobotsRules::parse("User-agent: *\nCrawl-delay: 1", "driftnet");
        gate.install_robots("example.com", rules, t);

        assert_eq!(gate.min_interval("example.com"), Duration::from_secs(1));
        gate.record_dispatch("example.com", t);
        assert!(gate.may_dispatch("example.com", t + Duration::from_secs(1)));
    }

    #[test]
    fn test_blocked_domains() {
        let mut gate = create_test_gate();
        let t = Instant::now();
        gate.record_dispatch("a.com", t);

        let blocked = gate.blocked_domains(["a.com", "b.com"], t);
        assert!(blocked.contains("a.com"));
        assert!(!blocked.contains("b.com"));
    }

    #[test]
    fn test_awaiting_robots_blocks_unknown_domain() {
        let mut gate = create_test_gate().with_robots(Duration::from_secs(3600));
        let t = Instant::now();

        assert!(gate.needs_robots_fetch("a.com", t));
        gate.begin_robots_fetch("a.com");
        assert!(!gate.needs_robots_fetch("a.com", t));
        assert!(gate.blocked_domains(["a.com"], t).contains("a.com"));

        gate.install_robots("a.com", RobotsRules::allow_all(), t);
        assert!(gate.blocked_domains(["a.com"], t).is_empty());
    }

    #[test]
    fn test_stale_robots_refreshed_but_still_used() {
        let ttl = Duration::from_secs(60);
        let mut gate = create_test_gate().with_robots(ttl);
        let t = Instant::now();
        let rules = RobotsRules::parse("User-agent: *\nDisallow: /private", "driftnet");
        gate.install_robots("example.com", rules, t);

        let later = t + ttl + Duration::from_secs(1);
        assert!(gate.needs_robots_fetch("example.com", later));
        gate.begin_robots_fetch("example.com");
        assert!(!gate.awaiting_robots("example.com"));
        assert!(gate.is_disallowed(&canonical("https://example.com/private/x")));
    }

    #[test]
    fn test_is_disallowed() {
        let mut gate = create_test_gate().with_robots(Duration::from_secs(3600));
        let rules = RobotsRules::parse("User-agent: *\nDisallow: /admin", "driftnet");
        gate.install_robots("example.com", rules, Instant::now());

        assert!(gate.is_disallowed(&canonical("https://example.com/admin/panel")));
        assert!(!gate.is_disallowed(&canonical("https://example.com/about")));
        assert!(!gate.is_disallowed(&canonical("https://other.com/admin")));
    }

    #[test]
    fn test_robots_disabled_never_blocks() {
        let gate = create_test_gate();
        assert!(!gate.awaiting_robots("example.com"));
        assert!(!gate.needs_robots_fetch("example.com", Instant::now()));
    }

    #[test]
    fn test_rate_limited_cooldown() {
        let mut gate = create_test_gate().with_rate_limit_cooldown(Duration::from_secs(60));
        let t = Instant::now();
        gate.record_dispatch("example.com", t);
        gate.record_outcome("example.com", DomainOutcome::RateLimited, t);

        assert!(!gate.may_dispatch("example.com", t + Duration::from_secs(30)));
        assert!(gate.may_dispatch("example.com", t + Duration::from_secs(60)));
    }

    #[test]
    fn test_failure_spike_reported_once() {
        let mut gate = create_test_gate().with_failure_spike_threshold(3);
        let t = Instant::now();

        assert!(!gate.record_outcome("a.com", DomainOutcome::TransientFailure, t));
        assert!(!gate.record_outcome("a.com", DomainOutcome::TransientFailure, t));
        assert!(gate.record_outcome("a.com", DomainOutcome::TransientFailure, t));
        assert!(!gate.record_outcome("a.com", DomainOutcome::TransientFailure, t));

        gate.record_outcome("a.com", DomainOutcome::Success, t);
        assert_eq!(gate.policy("a.com").unwrap().consecutive_failures, 0);
    }

    #[test]
    fn test_next_ready_in_picks_minimum() {
        let mut gate = create_test_gate();
        let t = Instant::now();
        gate.record_dispatch("a.com", t);
        gate.record_dispatch("b.com", t + Duration::from_secs(1));

        let wait = gate.next_ready_in(["a.com", "b.com"], t + Duration::from_secs(1));
        assert_eq!(wait, Some(Duration::from_secs(1)));
    }
}
