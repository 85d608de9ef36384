//! Axum HTTP surface of the coordinator
//!
//! Worker protocol endpoints plus the operator status/control routes.

use crate::coordinator::protocol::{
    HeartbeatRequest, RenewRequest, ReportRequest, SeedRequest, TaskRequest,
};
use crate::coordinator::Coordinator;
use crate::{CoordError, DriftnetError, Result};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use std::future::Future;
use tokio::net::TcpListener;

pub fn build_router(coordinator: Coordinator) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/status", get(status))
        .route("/workers", get(workers))
        .route("/seeds", post(seed))
        .route("/tasks/request", post(request_task))
        .route("/tasks/report", post(report_result))
        .route("/leases/renew", post(renew))
        .route("/workers/heartbeat", post(heartbeat))
        .with_state(coordinator)
}

// ─── Handlers ────────────────────────────────────────────────────

async fn health(State(coordinator): State<Coordinator>) -> impl IntoResponse {
    let status = coordinator.status().await;
    Json(serde_json::json!({
        "status": status.health.as_str(),
        "draining": status.draining,
        "version": env!("CARGO_PKG_VERSION"),
        "service": "driftnet-coordinator",
    }))
}

async fn status(State(coordinator): State<Coordinator>) -> impl IntoResponse {
    Json(coordinator.status().await)
}

async fn workers(State(coordinator): State<Coordinator>) -> impl IntoResponse {
    let workers = coordinator.workers().await;
    Json(serde_json::json!({
        "count": workers.len(),
        "workers": workers,
    }))
}

async fn seed(
    State(coordinator): State<Coordinator>,
    Json(body): Json<SeedRequest>,
) -> impl IntoResponse {
    Json(coordinator.seed(&body.urls, body.depth).await)
}

async fn request_task(
    State(coordinator): State<Coordinator>,
    Json(body): Json<TaskRequest>,
) -> Result<impl IntoResponse> {
    Ok(Json(coordinator.request_task(&body.worker_id).await?))
}

async fn report_result(
    State(coordinator): State<Coordinator>,
    Json(body): Json<ReportRequest>,
) -> Result<impl IntoResponse> {
    Ok(Json(coordinator.report_result(body).await?))
}

async fn renew(
    State(coordinator): State<Coordinator>,
    Json(body): Json<RenewRequest>,
) -> impl IntoResponse {
    Json(coordinator.renew(&body.worker_id, body.lease_id).await)
}

async fn heartbeat(
    State(coordinator): State<Coordinator>,
    Json(body): Json<HeartbeatRequest>,
) -> impl IntoResponse {
    Json(coordinator.heartbeat(&body.worker_id).await)
}

impl IntoResponse for DriftnetError {
    fn into_response(self) -> Response {
        let status = match &self {
            DriftnetError::Coordination(CoordError::InvalidUrl { .. })
            | DriftnetError::UrlError(_)
            | DriftnetError::UrlParse(_)
            | DriftnetError::Json(_) => StatusCode::BAD_REQUEST,
            DriftnetError::Coordination(CoordError::AlreadyLeased(_)) => {
                tracing::error!("Dispatch invariant violated: {}", self);
                StatusCode::INTERNAL_SERVER_ERROR
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = serde_json::json!({ "error": self.to_string() });
        (status, Json(body)).into_response()
    }
}

// ─── Server startup ──────────────────────────────────────────────

/// Serves the coordinator on `listener` until `shutdown` resolves
pub async fn serve<F>(coordinator: Coordinator, listener: TcpListener, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = listener.local_addr()?;
    tracing::info!("Coordinator listening on http://{}", addr);

    axum::serve(listener, build_router(coordinator))
        .with_graceful_shutdown(shutdown)
        .await?;

    tracing::info!("HTTP server stopped");
    Ok(())
}
