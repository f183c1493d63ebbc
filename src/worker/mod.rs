//! Worker agent: registers with the control plane, heartbeats, and serves
//! the `/run` endpoint the scheduler dispatches to. Execution happens on a
//! spawned task; `/run` acknowledges with 202 and the outcome is reported
//! back via `POST /jobs/:id/complete`.

pub mod executor;

pub use executor::{ExecutionResult, PayloadRunner};

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::error::{PlaneError, Result};
use crate::job::generate_id;
use crate::scheduler::RunJobRequest;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(20);

pub struct WorkerAgent {
    api_url: String,
    worker_id: String,
    endpoint: String,
    runner: PayloadRunner,
    client: reqwest::Client,
}

impl WorkerAgent {
    pub fn new(
        api_url: String,
        endpoint: String,
        worker_id: Option<String>,
        runner: PayloadRunner,
    ) -> Self {
        let worker_id = worker_id
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| format!("worker-{}", generate_id()));
        Self {
            api_url,
            worker_id,
            endpoint,
            runner,
            client: reqwest::Client::new(),
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// Register with the control plane, start the heartbeat loop, and serve
    /// `/run` until the token is cancelled.
    pub async fn run(self: Arc<Self>, port: u16, shutdown: CancellationToken) -> Result<()> {
        self.register().await?;

        let agent = Arc::clone(&self);
        let heartbeat_shutdown = shutdown.clone();
        tokio::spawn(async move {
            agent.heartbeat_loop(heartbeat_shutdown).await;
        });

        let app = Router::new()
            .route("/run", post(handle_run))
            .route("/health", get(|| async { "OK" }))
            .with_state(self.clone());

        let listener = tokio::net::TcpListener::bind(("0.0.0.0", port))
            .await
            .map_err(|e| PlaneError::Internal(format!("bind worker listener: {e}")))?;
        tracing::info!(worker_id = %self.worker_id, port, "Worker listening");
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown.cancelled_owned())
            .await
            .map_err(|e| PlaneError::Internal(format!("worker server: {e}")))?;
        Ok(())
    }

    async fn register(&self) -> Result<()> {
        let url = format!("{}/workers", self.api_url);
        let body = json!({ "id": self.worker_id, "endpoint": self.endpoint });
        let resp = self.client.post(&url).json(&body).send().await?;
        if !resp.status().is_success() {
            return Err(PlaneError::Internal(format!(
                "register: control plane returned {}",
                resp.status()
            )));
        }
        tracing::info!(
            worker_id = %self.worker_id,
            endpoint = %self.endpoint,
            "Registered with control plane"
        );
        Ok(())
    }

    async fn heartbeat_loop(&self, shutdown: CancellationToken) {
        let mut tick = tokio::time::interval(HEARTBEAT_INTERVAL);
        tick.tick().await; // first tick fires immediately; registration already counted
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = tick.tick() => self.send_heartbeat().await,
            }
        }
    }

    async fn send_heartbeat(&self) {
        let url = format!("{}/workers/heartbeat", self.api_url);
        let body = json!({ "id": self.worker_id });
        match self.client.post(&url).json(&body).send().await {
            Ok(resp) if resp.status().is_success() => {}
            Ok(resp) => {
                tracing::warn!(
                    worker_id = %self.worker_id,
                    status = %resp.status(),
                    "Heartbeat rejected"
                );
            }
            Err(e) => {
                tracing::warn!(worker_id = %self.worker_id, error = %e, "Heartbeat failed");
            }
        }
    }

    async fn execute_and_report(&self, req: RunJobRequest) {
        tracing::info!(job_id = %req.job_id, worker_id = %self.worker_id, "Job execution started");
        let result = self
            .runner
            .run(&req.job_id, &req.job_type, &req.payload, req.timeout_sec)
            .await;
        tracing::info!(
            job_id = %req.job_id,
            worker_id = %self.worker_id,
            success = result.success,
            "Job execution finished"
        );
        self.report_complete(&req.job_id, result).await;
    }

    async fn report_complete(&self, job_id: &str, result: ExecutionResult) {
        let url = format!("{}/jobs/{}/complete", self.api_url, job_id);
        let body = json!({
            "success": result.success,
            "result": result.output,
            "error": result.error,
        });
        match self.client.post(&url).json(&body).send().await {
            Ok(resp) if resp.status().is_success() => {}
            Ok(resp) => {
                tracing::warn!(job_id, status = %resp.status(), "Completion report rejected");
            }
            Err(e) => {
                tracing::warn!(job_id, error = %e, "Completion report failed");
            }
        }
    }
}

async fn handle_run(
    State(agent): State<Arc<WorkerAgent>>,
    body: std::result::Result<Json<RunJobRequest>, JsonRejection>,
) -> Response {
    let Ok(Json(req)) = body else {
        return (StatusCode::BAD_REQUEST, "bad request").into_response();
    };
    tokio::spawn(async move {
        agent.execute_and_report(req).await;
    });
    StatusCode::ACCEPTED.into_response()
}
