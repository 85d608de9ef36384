//! Worker side of the coordination protocol
//!
//! `CoordinatorApi` is implemented directly by the in-process `Coordinator`
//! and over HTTP by `HttpCoordinatorClient`, so the worker loop runs the same
//! against either.

use crate::coordinator::protocol::{
    HeartbeatRequest, HeartbeatResponse, RenewRequest, RenewResponse, ReportAck, ReportRequest,
    SeedRequest, SeedResponse, StatusReport, TaskRequest, TaskResponse,
};
use crate::coordinator::Coordinator;
use crate::lease::{LeaseId, WorkerId};
use crate::{DriftnetError, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;

#[async_trait]
pub trait CoordinatorApi: Send + Sync {
    async fn request_task(&self, worker: &WorkerId) -> Result<TaskResponse>;

    async fn report_result(&self, report: ReportRequest) -> Result<ReportAck>;

    async fn heartbeat(&self, worker: &WorkerId) -> Result<HeartbeatResponse>;

    async fn renew(&self, worker: &WorkerId, lease_id: LeaseId) -> Result<RenewResponse>;
}

#[async_trait]
impl CoordinatorApi for Coordinator {
    async fn request_task(&self, worker: &WorkerId) -> Result<TaskResponse> {
        Coordinator::request_task(self, worker).await
    }

    async fn report_result(&self, report: ReportRequest) -> Result<ReportAck> {
        Coordinator::report_result(self, report).await
    }

    async fn heartbeat(&self, worker: &WorkerId) -> Result<HeartbeatResponse> {
        Ok(Coordinator::heartbeat(self, worker).await)
    }

    async fn renew(&self, worker: &WorkerId, lease_id: LeaseId) -> Result<RenewResponse> {
        Ok(Coordinator::renew(self, worker, lease_id).await)
    }
}

/// JSON-over-HTTP client for a remote coordinator
#[derive(Debug, Clone)]
pub struct HttpCoordinatorClient {
    client: Client,
    base_url: String,
}

impl HttpCoordinatorClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub async fn status(&self) -> Result<StatusReport> {
        let response = self.client.get(self.endpoint("/status")).send().await?;
        decode(response).await
    }

    pub async fn seed(&self, urls: Vec<String>, depth: u32) -> Result<SeedResponse> {
        self.post("/seeds", &SeedRequest { urls, depth }).await
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn post<B, T>(&self, path: &str, body: &B) -> Result<T>
    where
        B: Serialize + Sync,
        T: DeserializeOwned,
    {
        let response = self
            .client
            .post(self.endpoint(path))
            .json(body)
            .send()
            .await?;
        decode(response).await
    }
}

async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(DriftnetError::Remote {
            status: status.as_u16(),
            body,
        });
    }
    let bytes = response.bytes().await?;
    Ok(serde_json::from_slice(&bytes)?)
}

#[async_trait]
impl CoordinatorApi for HttpCoordinatorClient {
    async fn request_task(&self, worker: &WorkerId) -> Result<TaskResponse> {
        self.post(
            "/tasks/request",
            &TaskRequest {
                worker_id: worker.clone(),
            },
        )
        .await
    }

    async fn report_result(&self, report: ReportRequest) -> Result<ReportAck> {
        self.post("/tasks/report", &report).await
    }

    async fn heartbeat(&self, worker: &WorkerId) -> Result<HeartbeatResponse> {
        self.post(
            "/workers/heartbeat",
            &HeartbeatRequest {
                worker_id: worker.clone(),
            },
        )
        .await
    }

    async fn renew(&self, worker: &WorkerId, lease_id: LeaseId) -> Result<RenewResponse> {
        self.post(
            "/leases/renew",
            &RenewRequest {
                worker_id: worker.clone(),
                lease_id,
            },
        )
        .await
    }
}
