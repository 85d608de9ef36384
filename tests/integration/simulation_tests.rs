//! Randomized dispatch simulations asserting the one-lease-per-URL invariant

use crate::{create_test_policy, failure_report, success_report, worker};
use driftnet::coordinator::protocol::{FetchFailure, ReportAck, Task, TaskResponse};
use driftnet::coordinator::{CoordinationPolicy, Coordinator, CoordinatorState};
use driftnet::frontier::UrlState;
use driftnet::lease::WorkerId;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashSet;
use std::time::Duration;
use tokio::time::Instant;

const DOMAINS: &[&str] = &["a.com", "b.com", "c.com", "d.com"];

fn random_url(rng: &mut StdRng) -> String {
    let domain = DOMAINS[rng.gen_range(0..DOMAINS.len())];
    format!("https://{}/p{}", domain, rng.gen_range(0..40))
}

fn assert_single_lease_per_url(state: &CoordinatorState) {
    state.check_invariants().unwrap();
    let mut urls = HashSet::new();
    for lease in state.leases().iter() {
        assert!(urls.insert(lease.url), "{} leased twice", lease.url);
    }
}

fn run_simulation(seed: u64) {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut state = CoordinatorState::new(CoordinationPolicy {
        min_interval: Duration::from_millis(500),
        task_timeout: Duration::from_secs(20),
        ..create_test_policy()
    });
    let seeds: Vec<String> = DOMAINS.iter().map(|d| format!("https://{}/", d)).collect();
    state.seed(&seeds, 0);

    let workers: Vec<WorkerId> = (0..6).map(|i| worker(&format!("w{}", i))).collect();
    let mut held: Vec<Option<Task>> = vec![None; workers.len()];
    let mut finished: Vec<(usize, Task)> = Vec::new();
    let mut done: HashSet<String> = HashSet::new();
    let mut now = Instant::now();

    for _ in 0..3000 {
        now += Duration::from_millis(rng.gen_range(0..1500));
        let i = rng.gen_range(0..workers.len());
        let w = &workers[i];

        match rng.gen_range(0..10) {
            0..=3 => {
                if held[i].is_none() {
                    if let TaskResponse::Task(task) = state.request_task(w, now).unwrap() {
                        held[i] = Some(task);
                    }
                }
            }
            4..=6 => {
                if let Some(task) = held[i].take() {
                    let report = if rng.gen_bool(0.7) {
                        let links: Vec<String> = (0..3).map(|_| random_url(&mut rng)).collect();
                        let links: Vec<&str> = links.iter().map(String::as_str).collect();
                        success_report(w, &task, &links)
                    } else {
                        failure_report(w, &task, FetchFailure::Timeout)
                    };
                    if let ReportAck::Applied { state: UrlState::Done, .. } =
                        state.report_result(report, now).unwrap()
                    {
                        done.insert(task.url.clone());
                    }
                    finished.push((i, task));
                }
            }
            7 => {
                // Worker 0 is flaky and rarely heartbeats
                if i != 0 || rng.gen_bool(0.1) {
                    state.heartbeat(w, now);
                }
            }
            8 => {
                if !finished.is_empty() {
                    let (owner, old) = &finished[rng.gen_range(0..finished.len())];
                    let before = state.frontier().counts();
                    let ack = state
                        .report_result(success_report(&workers[*owner], old, &[]), now)
                        .unwrap();
                    assert_eq!(ack, ReportAck::Stale);
                    assert_eq!(state.frontier().counts(), before);
                }
            }
            _ => {
                state.sweep(now).unwrap();
            }
        }

        assert_single_lease_per_url(&state);
        for url in &done {
            assert_eq!(state.frontier().lookup(url).unwrap().state, UrlState::Done);
        }
    }

    assert!(!done.is_empty());
}

#[test]
fn test_randomized_dispatch_keeps_invariants() {
    for seed in [1, 7, 42, 1234] {
        run_simulation(seed);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_workers_lease_each_url_once() {
    let policy = CoordinationPolicy {
        min_interval: Duration::ZERO,
        max_depth: Some(2),
        ..create_test_policy()
    };
    let coordinator = Coordinator::new(policy, None);
    let seeds: Vec<String> = DOMAINS.iter().map(|d| format!("https://{}/", d)).collect();
    coordinator.seed(&seeds, 0).await;

    let mut handles = Vec::new();
    for n in 0..8 {
        let coordinator = coordinator.clone();
        handles.push(tokio::spawn(async move {
            let w = worker(&format!("w{}", n));
            let mut completed = 0u64;
            loop {
                match coordinator.request_task(&w).await.unwrap() {
                    TaskResponse::Task(task) => {
                        let base = task.url.trim_end_matches('/').to_string();
                        let links: Vec<String> =
                            (0..3).map(|i| format!("{}/{}", base, i)).collect();
                        let links: Vec<&str> = links.iter().map(String::as_str).collect();
                        let ack = coordinator
                            .report_result(success_report(&w, &task, &links))
                            .await
                            .unwrap();
                        assert!(matches!(ack, ReportAck::Applied { .. }));
                        completed += 1;
                    }
                    TaskResponse::NoneAvailable { .. } => {
                        if coordinator.status().await.exhausted {
                            break;
                        }
                        tokio::task::yield_now().await;
                    }
                }
            }
            completed
        }));
    }

    let mut completed = 0;
    for handle in handles {
        completed += handle.await.unwrap();
    }

    let status = coordinator.status().await;
    // 4 roots, 12 children, 36 grandchildren
    assert_eq!(status.frontier.total, 52);
    assert_eq!(status.frontier.done, 52);
    assert_eq!(completed, 52);
    assert_eq!(status.counters.tasks_assigned, 52);
    coordinator.check_invariants().await.unwrap();
}
