//! Checkpoint and resume through SQLite

use crate::{create_test_policy, success_report, worker};
use driftnet::coordinator::protocol::{NoneAvailableReason, TaskResponse};
use driftnet::coordinator::Coordinator;
use driftnet::frontier::UrlState;
use driftnet::storage::{open_storage, RunStatus, Storage};
use std::path::Path;

fn open_coordinator(db: &Path, fresh: bool) -> Coordinator {
    let storage = open_storage(db).unwrap();
    Coordinator::resume(create_test_policy(), None, Box::new(storage), "hash", fresh).unwrap()
}

async fn expect_task(coordinator: &Coordinator, name: &str) -> driftnet::coordinator::protocol::Task {
    match coordinator.request_task(&worker(name)).await.unwrap() {
        TaskResponse::Task(task) => task,
        other => panic!("expected a task, got {:?}", other),
    }
}

#[tokio::test]
async fn test_restart_keeps_done_and_requeues_leased() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("driftnet.db");
    let w = worker("w1");

    {
        let coordinator = open_coordinator(&db, false);
        coordinator
            .seed(&["https://a.com/".to_string(), "https://b.com/".to_string()], 0)
            .await;
        let done = expect_task(&coordinator, "w1").await;
        let _in_flight = expect_task(&coordinator, "w1").await;
        coordinator
            .report_result(success_report(&w, &done, &["https://a.com/next"]))
            .await
            .unwrap();
        coordinator.shutdown().await.unwrap();
    }

    let storage = open_storage(&db).unwrap();
    let run = storage.get_latest_run().unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Interrupted);
    assert_eq!(storage.count_urls_by_state(UrlState::Done).unwrap(), 1);
    drop(storage);

    let resumed = open_coordinator(&db, false);
    let status = resumed.status().await;
    assert_eq!(status.frontier.total, 3);
    assert_eq!(status.frontier.done, 1);
    assert_eq!(status.frontier.discovered, 2);
    assert_eq!(status.active_leases, 0);
    assert_ne!(resumed.run_id(), Some(run.id));

    // The completed page is never handed out again
    let mut urls = vec![
        expect_task(&resumed, "w2").await.url,
        expect_task(&resumed, "w2").await.url,
    ];
    urls.sort();
    assert_eq!(urls, vec!["https://a.com/next", "https://b.com/"]);
    assert_eq!(
        resumed.request_task(&worker("w2")).await.unwrap(),
        TaskResponse::NoneAvailable {
            reason: NoneAvailableReason::FrontierEmpty
        }
    );
}

#[tokio::test]
async fn test_fresh_start_discards_checkpoint() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("driftnet.db");

    {
        let coordinator = open_coordinator(&db, false);
        coordinator.seed(&["https://a.com/".to_string()], 0).await;
        coordinator.shutdown().await.unwrap();
    }

    let coordinator = open_coordinator(&db, true);
    assert_eq!(coordinator.status().await.frontier.total, 0);
}

#[tokio::test]
async fn test_completed_run_marked_completed() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("driftnet.db");

    let coordinator = open_coordinator(&db, false);
    coordinator.seed(&["https://a.com/".to_string()], 0).await;
    let task = expect_task(&coordinator, "w1").await;
    coordinator
        .report_result(success_report(&worker("w1"), &task, &[]))
        .await
        .unwrap();
    coordinator.shutdown().await.unwrap();

    let storage = open_storage(&db).unwrap();
    let run = storage.get_latest_run().unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Completed);
    assert!(run.finished_at.is_some());
}
