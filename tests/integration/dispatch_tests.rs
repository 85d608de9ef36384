//! End-to-end dispatch, liveness and retry scenarios

use crate::{
    create_test_policy, create_test_state, expect_task, failure_report, success_report, worker,
};
use driftnet::coordinator::protocol::{
    FetchFailure, NoneAvailableReason, ReportAck, TaskResponse,
};
use driftnet::coordinator::Coordinator;
use driftnet::frontier::UrlState;
use driftnet::politeness::PolitenessGate;
use std::collections::HashSet;
use std::time::Duration;
use tokio::time::Instant;

#[tokio::test(start_paused = true)]
async fn test_concurrent_requests_same_domain_one_wins() {
    let coordinator = Coordinator::new(create_test_policy(), None);
    coordinator
        .seed(
            &["https://a.com/A".to_string(), "https://a.com/B".to_string()],
            0,
        )
        .await;
    let (w1, w2) = (worker("w1"), worker("w2"));

    let (first, second) = tokio::join!(
        coordinator.request_task(&w1),
        coordinator.request_task(&w2)
    );
    let responses = [first.unwrap(), second.unwrap()];

    let tasks = responses
        .iter()
        .filter(|r| matches!(r, TaskResponse::Task(_)))
        .count();
    assert_eq!(tasks, 1);
    assert!(responses.iter().any(|r| matches!(
        r,
        TaskResponse::NoneAvailable {
            reason: NoneAvailableReason::PolitenessBlocked { .. }
        }
    )));

    tokio::time::advance(Duration::from_secs(2)).await;
    let retry = coordinator.request_task(&w2).await.unwrap();
    assert!(matches!(retry, TaskResponse::Task(_)));
    coordinator.check_invariants().await.unwrap();
}

#[test]
fn test_silent_worker_lease_requeued_within_one_sweep() {
    let mut state = create_test_state(&["https://a.com/X"]);
    let policy = create_test_policy();
    let w1 = worker("w1");
    let t0 = Instant::now();
    expect_task(state.request_task(&w1, t0).unwrap());

    // Sweeps every interval; W1 never contacts the coordinator again
    let horizon = t0 + policy.heartbeat_timeout + policy.sweep_interval;
    let mut now = t0;
    while now < horizon {
        now += policy.sweep_interval;
        state.sweep(now).unwrap();
    }

    let record = state.frontier().lookup("https://a.com/X").unwrap();
    assert_eq!(record.state, UrlState::Discovered);
    assert_eq!(record.attempts, 1);
    let next = state.frontier().next_eligible(&HashSet::new()).unwrap();
    assert_eq!(next.url.as_str(), "https://a.com/X");
    assert!(state.leases().is_empty());
    state.check_invariants().unwrap();
}

#[test]
fn test_fourth_failure_is_terminal() {
    let mut state = create_test_state(&["https://a.com/flaky"]);
    let w = worker("w1");
    let mut now = Instant::now();

    for attempt in 0..4u32 {
        let task = expect_task(state.request_task(&w, now).unwrap());
        assert_eq!(task.attempt, attempt);
        let ack = state
            .report_result(
                failure_report(&w, &task, FetchFailure::HttpError { status: 503 }),
                now,
            )
            .unwrap();

        let expected = if attempt < 3 {
            UrlState::Discovered
        } else {
            UrlState::Failed
        };
        assert!(matches!(ack, ReportAck::Applied { state, .. } if state == expected));
        now += Duration::from_secs(2);
    }

    assert!(state.frontier().next_eligible(&HashSet::new()).is_none());
    assert_eq!(
        state.request_task(&w, now).unwrap(),
        TaskResponse::NoneAvailable {
            reason: NoneAvailableReason::FrontierEmpty
        }
    );
    let counters = state.counters();
    assert_eq!(counters.retries_scheduled, 3);
    assert_eq!(counters.tasks_failed, 1);
}

#[test]
fn test_stale_report_does_not_mutate_state() {
    let mut state = create_test_state(&["https://a.com/page"]);
    let (slow, fast) = (worker("slow"), worker("fast"));
    let t0 = Instant::now();
    let old = expect_task(state.request_task(&slow, t0).unwrap());

    let expired = t0 + Duration::from_secs(120);
    state.heartbeat(&slow, expired);
    state.sweep(expired).unwrap();
    let current = expect_task(state.request_task(&fast, expired).unwrap());
    assert!(current.lease.generation > old.lease.generation);

    let counts_before = state.frontier().counts();
    let leases_before: Vec<_> = state.leases().iter().cloned().collect();
    let attempts_before = state.frontier().lookup("https://a.com/page").unwrap().attempts;

    let ack = state
        .report_result(
            success_report(&slow, &old, &["https://a.com/discovered"]),
            expired,
        )
        .unwrap();

    assert_eq!(ack, ReportAck::Stale);
    assert_eq!(state.frontier().counts(), counts_before);
    let leases_after: Vec<_> = state.leases().iter().cloned().collect();
    assert_eq!(leases_after, leases_before);
    assert_eq!(
        state.frontier().lookup("https://a.com/page").unwrap().attempts,
        attempts_before
    );

    // The current owner still completes normally
    let ack = state
        .report_result(success_report(&fast, &current, &[]), expired)
        .unwrap();
    assert!(matches!(ack, ReportAck::Applied { state: UrlState::Done, .. }));
    state.check_invariants().unwrap();
}

#[test]
fn test_duplicate_adds_grow_dedup_set_once() {
    let mut state = create_test_state(&[]);

    let response = state.seed(
        &[
            "https://Example.com/a/".to_string(),
            "https://example.com/a".to_string(),
            "https://example.com/a#top".to_string(),
            "https://example.com:443/a?utm_source=x".to_string(),
        ],
        0,
    );

    assert_eq!(response.inserted, 1);
    assert_eq!(response.duplicates, 3);
    assert_eq!(state.frontier().len(), 1);
}

#[test]
fn test_rediscovered_links_absorbed_after_done() {
    let mut state = create_test_state(&["https://a.com/"]);
    let w = worker("w1");
    let now = Instant::now();
    let task = expect_task(state.request_task(&w, now).unwrap());

    let ack = state
        .report_result(
            success_report(&w, &task, &["https://a.com/", "https://a.com/next"]),
            now,
        )
        .unwrap();

    assert_eq!(
        ack,
        ReportAck::Applied {
            state: UrlState::Done,
            added: 1,
            duplicates: 1,
            rejected: 0
        }
    );
    let next = state.frontier().lookup("https://a.com/next").unwrap();
    assert_eq!(next.depth, 1);
    assert_eq!(
        state.frontier().lookup("https://a.com/").unwrap().state,
        UrlState::Done
    );
}

#[test]
fn test_may_dispatch_boundary() {
    let mut gate = PolitenessGate::new(Duration::from_secs(2));
    let t = Instant::now();

    assert!(gate.may_dispatch("a.com", t));
    gate.record_dispatch("a.com", t);

    assert!(!gate.may_dispatch("a.com", t));
    assert!(!gate.may_dispatch("a.com", t + Duration::from_millis(1999)));
    assert!(gate.may_dispatch("a.com", t + Duration::from_secs(2)));
    assert!(gate.may_dispatch("a.com", t + Duration::from_secs(3)));
    assert!(gate.may_dispatch("b.com", t));
}

#[test]
fn test_robots_denied_is_terminal_without_retry() {
    let mut state = create_test_state(&["https://a.com/secret"]);
    let w = worker("w1");
    let now = Instant::now();
    let task = expect_task(state.request_task(&w, now).unwrap());

    let ack = state
        .report_result(failure_report(&w, &task, FetchFailure::RobotsDenied), now)
        .unwrap();

    assert!(matches!(ack, ReportAck::Applied { state: UrlState::Failed, .. }));
    let record = state.frontier().lookup("https://a.com/secret").unwrap();
    assert_eq!(record.state, UrlState::Failed);
    assert_eq!(state.counters().retries_scheduled, 0);
}
