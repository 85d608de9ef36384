//! Integration tests for driftnet
//!
//! These drive the coordinator through its public API: the synchronous
//! state machine with explicit clocks, the async service, the HTTP control
//! surface and SQLite resume.

mod dispatch_tests;
mod http_tests;
mod resume_tests;
mod simulation_tests;

use driftnet::coordinator::protocol::{
    FetchFailure, ReportRequest, Task, TaskOutcome, TaskResponse,
};
use driftnet::coordinator::{CoordinationPolicy, CoordinatorState};
use driftnet::lease::WorkerId;

/// Default policy with robots handling switched off
pub fn create_test_policy() -> CoordinationPolicy {
    CoordinationPolicy {
        robots_ttl: None,
        ..CoordinationPolicy::default()
    }
}

pub fn create_test_state(urls: &[&str]) -> CoordinatorState {
    let mut state = CoordinatorState::new(create_test_policy());
    let seeds: Vec<String> = urls.iter().map(|s| s.to_string()).collect();
    state.seed(&seeds, 0);
    state
}

pub fn worker(name: &str) -> WorkerId {
    WorkerId::new(name)
}

pub fn expect_task(response: TaskResponse) -> Task {
    match response {
        TaskResponse::Task(task) => task,
        other => panic!("expected a task, got {:?}", other),
    }
}

pub fn success_report(worker: &WorkerId, task: &Task, discovered: &[&str]) -> ReportRequest {
    ReportRequest {
        worker_id: worker.clone(),
        lease: task.lease,
        outcome: TaskOutcome::Success {
            status: 200,
            content_ref: None,
        },
        discovered: discovered.iter().map(|s| s.to_string()).collect(),
    }
}

pub fn failure_report(worker: &WorkerId, task: &Task, failure: FetchFailure) -> ReportRequest {
    ReportRequest {
        worker_id: worker.clone(),
        lease: task.lease,
        outcome: TaskOutcome::Failure { failure },
        discovered: Vec::new(),
    }
}
