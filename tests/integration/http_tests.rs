//! A worker crawling a mock site through the coordinator's HTTP surface

use crate::create_test_policy;
use driftnet::config::UserAgentConfig;
use driftnet::coordinator::{server, CoordinationPolicy, Coordinator};
use driftnet::lease::WorkerId;
use driftnet::worker::{
    build_http_client, HttpCoordinatorClient, HttpPipeline, MemoryBlobStore, MemoryIndexer,
    Worker, WorkerSettings,
};
use driftnet::DriftnetError;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn create_test_user_agent() -> UserAgentConfig {
    UserAgentConfig {
        crawler_name: "TestBot".to_string(),
        crawler_version: "1.0.0".to_string(),
        contact_url: "https://example.com/contact".to_string(),
        contact_email: "test@example.com".to_string(),
    }
}

/// Serves a coordinator on an ephemeral port, returning its base URL
async fn create_test_coordinator(policy: CoordinationPolicy) -> (Coordinator, String) {
    let coordinator = Coordinator::new(policy, None);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    let token = coordinator.shutdown_token();
    tokio::spawn(server::serve(coordinator.clone(), listener, async move {
        token.cancelled().await
    }));
    (coordinator, base)
}

fn html(body: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_raw(body.to_string(), "text/html; charset=utf-8")
}

#[tokio::test]
async fn test_worker_crawls_site_over_http() {
    let site = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html(
            r#"<html><head><title>Home</title></head><body>
               <a href="/a">A</a> <a href="/b">B</a> <a href="mailto:x@y.z">mail</a>
               </body></html>"#,
        ))
        .expect(1)
        .mount(&site)
        .await;
    Mock::given(method("GET"))
        .and(path("/a"))
        .respond_with(html(
            r#"<html><head><title>A</title></head><body><a href="/">home</a></body></html>"#,
        ))
        .expect(1)
        .mount(&site)
        .await;
    Mock::given(method("GET"))
        .and(path("/b"))
        .respond_with(ResponseTemplate::new(500))
        .expect(4)
        .mount(&site)
        .await;

    let policy = CoordinationPolicy {
        min_interval: Duration::from_millis(20),
        ..create_test_policy()
    };
    let (coordinator, base) = create_test_coordinator(policy).await;

    let client = HttpCoordinatorClient::new(&base, Duration::from_secs(5)).unwrap();
    let seeded = client.seed(vec![format!("{}/", site.uri())], 0).await.unwrap();
    assert_eq!(seeded.inserted, 1);

    let blobs = Arc::new(MemoryBlobStore::new());
    let indexer = Arc::new(MemoryIndexer::new());
    let fetcher = build_http_client(&create_test_user_agent(), Duration::from_secs(5)).unwrap();
    let mut settings = WorkerSettings::new(WorkerId::new("http-worker"));
    settings.backoff_base = Duration::from_millis(10);
    settings.backoff_cap = Duration::from_millis(50);
    settings.exit_when_idle = true;

    let worker = Worker::new(
        settings,
        Arc::new(client),
        Arc::new(HttpPipeline::new(fetcher, blobs.clone())),
        indexer.clone(),
        CancellationToken::new(),
    );
    let stats = tokio::time::timeout(Duration::from_secs(20), worker.run())
        .await
        .unwrap();

    assert_eq!(stats.tasks_completed, 2);
    assert_eq!(stats.tasks_failed, 4);
    assert_eq!(stats.pages_indexed, 2);
    assert_eq!(blobs.len().await, 2);

    let mut titles: Vec<String> = indexer
        .pages()
        .await
        .into_iter()
        .filter_map(|p| p.title)
        .collect();
    titles.sort();
    assert_eq!(titles, vec!["A".to_string(), "Home".to_string()]);

    let status = HttpCoordinatorClient::new(&base, Duration::from_secs(5))
        .unwrap()
        .status()
        .await
        .unwrap();
    assert_eq!(status.frontier.done, 2);
    assert_eq!(status.frontier.failed, 1);
    assert!(status.exhausted);
    assert_eq!(status.workers.len(), 1);

    coordinator.shutdown_token().cancel();
}

#[tokio::test]
async fn test_seed_over_http_reports_rejections() {
    let (coordinator, base) = create_test_coordinator(create_test_policy()).await;
    let client = HttpCoordinatorClient::new(&base, Duration::from_secs(5)).unwrap();

    let response = client
        .seed(
            vec![
                "https://a.com/".to_string(),
                "https://A.com".to_string(),
                "not a url".to_string(),
            ],
            0,
        )
        .await
        .unwrap();

    assert_eq!(response.inserted, 1);
    assert_eq!(response.duplicates, 1);
    assert_eq!(response.rejected.len(), 1);
    assert_eq!(response.rejected[0].url, "not a url");
    assert_eq!(coordinator.status().await.frontier.total, 1);
    coordinator.shutdown_token().cancel();
}

#[tokio::test]
async fn test_unreachable_coordinator_is_an_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    drop(listener);

    let client = HttpCoordinatorClient::new(&base, Duration::from_secs(2)).unwrap();
    let result = client.status().await;

    assert!(matches!(result, Err(DriftnetError::Reqwest(_))));
}
