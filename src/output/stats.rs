//! Operator-facing statistics
//!
//! Two views of a crawl:
//! - A live `StatusReport` fetched from a running coordinator
//! - Checkpoint statistics read straight from the database

use crate::coordinator::protocol::StatusReport;
use crate::frontier::UrlState;
use crate::storage::{RunRecord, Storage};
use crate::Result;
use std::fmt::Write;

/// Statistics read from a checkpoint database
#[derive(Debug, Clone)]
pub struct CrawlStatistics {
    pub latest_run: Option<RunRecord>,

    pub total_urls: u64,

    /// Count of URLs per state, in lifecycle order
    pub urls_by_state: Vec<(UrlState, u64)>,
}

impl CrawlStatistics {
    pub fn count(&self, state: UrlState) -> u64 {
        self.urls_by_state
            .iter()
            .find(|(s, _)| *s == state)
            .map(|(_, c)| *c)
            .unwrap_or(0)
    }
}

/// Loads statistics from storage
pub fn load_statistics(storage: &dyn Storage) -> Result<CrawlStatistics> {
    let latest_run = storage.get_latest_run()?;
    let total_urls = storage.count_total_urls()?;

    let mut urls_by_state = Vec::new();
    for state in UrlState::all_states() {
        urls_by_state.push((state, storage.count_urls_by_state(state)?));
    }

    Ok(CrawlStatistics {
        latest_run,
        total_urls,
        urls_by_state,
    })
}

fn percentage(count: u64, total: u64) -> f64 {
    if total > 0 {
        (count as f64 / total as f64) * 100.0
    } else {
        0.0
    }
}

/// Renders checkpoint statistics as text
pub fn render_statistics(stats: &CrawlStatistics) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "=== Checkpoint Statistics ===\n");

    if let Some(run) = &stats.latest_run {
        let _ = writeln!(out, "Latest Run:");
        let _ = writeln!(out, "  Id: {}", run.id);
        let _ = writeln!(out, "  Status: {}", run.status.to_db_string());
        let _ = writeln!(out, "  Started: {}", run.started_at);
        if let Some(finished) = &run.finished_at {
            let _ = writeln!(out, "  Finished: {}", finished);
        }
        let _ = writeln!(out);
    }

    let _ = writeln!(out, "URLs by State:");
    for (state, count) in &stats.urls_by_state {
        let _ = writeln!(
            out,
            "  {}: {} ({:.1}%)",
            state,
            count,
            percentage(*count, stats.total_urls)
        );
    }
    let _ = writeln!(out, "  total: {}", stats.total_urls);
    let _ = writeln!(out);

    let done = stats.count(UrlState::Done);
    let _ = writeln!(
        out,
        "Success Rate: {:.1}% ({} / {} URLs done)",
        percentage(done, stats.total_urls),
        done,
        stats.total_urls
    );
    out
}

/// Prints checkpoint statistics to stdout
pub fn print_statistics(stats: &CrawlStatistics) {
    print!("{}", render_statistics(stats));
}

/// Renders a live coordinator status report as text
pub fn render_status(report: &StatusReport) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "=== Coordinator Status ===\n");

    let _ = writeln!(out, "Overview:");
    let _ = writeln!(out, "  Health: {}", report.health.as_str());
    let _ = writeln!(out, "  Started: {}", report.started_at.to_rfc3339());
    let _ = writeln!(out, "  Uptime: {}s", report.uptime_secs);
    if report.draining {
        let _ = writeln!(out, "  Draining: no new leases are issued");
    }
    if report.exhausted {
        let _ = writeln!(out, "  Frontier exhausted");
    }
    let _ = writeln!(out);

    let f = &report.frontier;
    let _ = writeln!(out, "Frontier ({} URLs seen):", f.total);
    for state in UrlState::all_states() {
        let count = f.get(state);
        let _ = writeln!(
            out,
            "  {}: {} ({:.1}%)",
            state,
            count,
            percentage(count, f.total)
        );
    }
    let _ = writeln!(out, "  Active leases: {}", report.active_leases);
    let _ = writeln!(out, "  Known domains: {}", report.known_domains);
    let _ = writeln!(out);

    let w = &report.worker_counts;
    let _ = writeln!(
        out,
        "Workers ({} alive, {} suspected, {} dead):",
        w.alive, w.suspected, w.dead
    );
    for worker in &report.workers {
        let _ = writeln!(
            out,
            "  {:<20} {:<9} leases={} done={} failed={} last contact {}s ago",
            worker.id.as_str(),
            worker.status,
            worker.held_leases,
            worker.tasks_completed,
            worker.tasks_failed,
            worker.seconds_since_contact
        );
    }
    let _ = writeln!(out);

    let c = &report.counters;
    let _ = writeln!(out, "Counters:");
    let _ = writeln!(out, "  Tasks assigned: {}", c.tasks_assigned);
    let _ = writeln!(out, "  Tasks completed: {}", c.tasks_completed);
    let _ = writeln!(out, "  Tasks failed: {}", c.tasks_failed);
    let _ = writeln!(out, "  Retries scheduled: {}", c.retries_scheduled);
    let _ = writeln!(out, "  Robots denied: {}", c.robots_denied);
    let _ = writeln!(out, "  Leases expired: {}", c.leases_expired);
    let _ = writeln!(out, "  Stale reports discarded: {}", c.stale_reports);
    let _ = writeln!(out, "  URLs rejected: {}", c.urls_rejected);
    out
}

/// Prints a live status report to stdout
pub fn print_status(report: &StatusReport) {
    print!("{}", render_status(report));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::protocol::{Counters, Health, WorkerCounts};
    use crate::frontier::{FrontierCounts, UrlSnapshot};
    use crate::lease::{WorkerId, WorkerSnapshot, WorkerStatus};
    use crate::storage::SqliteStorage;
    use chrono::Utc;

    fn create_test_report() -> StatusReport {
        StatusReport {
            started_at: Utc::now(),
            uptime_secs: 42,
            health: Health::Healthy,
            draining: true,
            exhausted: false,
            frontier: FrontierCounts {
                discovered: 3,
                queued: 0,
                leased: 1,
                done: 6,
                failed: 0,
                total: 10,
            },
            active_leases: 1,
            known_domains: 2,
            worker_counts: WorkerCounts {
                alive: 1,
                suspected: 0,
                dead: 0,
            },
            workers: vec![WorkerSnapshot {
                id: WorkerId::new("worker-1"),
                status: WorkerStatus::Alive,
                last_contact_at: Utc::now(),
                first_seen_at: Utc::now(),
                seconds_since_contact: 3,
                held_leases: 1,
                tasks_completed: 6,
                tasks_failed: 0,
            }],
            counters: Counters {
                tasks_assigned: 7,
                tasks_completed: 6,
                stale_reports: 2,
                ..Counters::default()
            },
        }
    }

    #[test]
    fn test_render_status() {
        let text = render_status(&create_test_report());

        assert!(text.contains("Health: healthy"));
        assert!(text.contains("Draining"));
        assert!(text.contains("done: 6 (60.0%)"));
        assert!(text.contains("worker-1"));
        assert!(text.contains("Stale reports discarded: 2"));
    }

    #[test]
    fn test_load_and_render_statistics() {
        let mut storage = SqliteStorage::new_in_memory().unwrap();
        let run_id = storage.create_run("hash").unwrap();
        let snapshot = |url: &str, state| UrlSnapshot {
            url: url.to_string(),
            domain: "a.com".to_string(),
            state,
            depth: 0,
            attempts: 0,
            last_attempt_at: None,
            last_error: None,
        };
        storage
            .save_urls(
                &[
                    snapshot("https://a.com/1", UrlState::Done),
                    snapshot("https://a.com/2", UrlState::Discovered),
                ],
                run_id,
            )
            .unwrap();

        let stats = load_statistics(&storage).unwrap();

        assert_eq!(stats.total_urls, 2);
        assert_eq!(stats.count(UrlState::Done), 1);
        assert_eq!(stats.latest_run.as_ref().map(|r| r.id), Some(run_id));
        let text = render_statistics(&stats);
        assert!(text.contains("Success Rate: 50.0%"));
    }

    #[test]
    fn test_empty_statistics() {
        let storage = SqliteStorage::new_in_memory().unwrap();
        let stats = load_statistics(&storage).unwrap();
        assert_eq!(stats.total_urls, 0);
        assert!(render_statistics(&stats).contains("Success Rate: 0.0%"));
    }
}
