pub mod idempotency;
pub mod ratelimit;

pub use idempotency::IdempotencyCache;
pub use ratelimit::RateLimiter;

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, Query, Request, State},
    http::{header::HeaderValue, HeaderMap, StatusCode},
    middleware::{self, Next},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::{Mutex, RwLock};
use tower_http::cors::{Any, CorsLayer};

use crate::clock::SharedClock;
use crate::job::{generate_id, JobStatus, JobStore, PRIORITY_HIGH, PRIORITY_LOW, PRIORITY_NORMAL};
use crate::registry::WorkerRegistry;
use crate::scheduler::{PriorityQueue, Scheduler};

const DEFAULT_LIST_LIMIT: usize = 50;
const MAX_LIST_LIMIT: usize = 500;
const MAX_LIST_OFFSET: usize = 10_000;

/// Shared state behind every control-plane endpoint.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<RwLock<JobStore>>,
    pub registry: Arc<RwLock<WorkerRegistry>>,
    pub queue: Arc<Mutex<PriorityQueue>>,
    pub scheduler: Arc<Scheduler>,
    pub rate_limiter: Option<Arc<RateLimiter>>,
    pub idempotency: Option<Arc<IdempotencyCache>>,
    pub clock: SharedClock,
    pub started_at: DateTime<Utc>,
}

/// Build the control-plane router.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/jobs", post(submit_job).get(list_jobs))
        .route("/jobs/{id}", get(get_job).delete(cancel_job))
        .route("/jobs/{id}/complete", post(complete_job))
        .route("/workers", post(register_worker).get(list_workers))
        .route("/workers/heartbeat", post(worker_heartbeat))
        .route("/health", get(health))
        .route("/ready", get(ready))
        .route("/stats", get(stats))
        .route("/metrics", get(metrics))
        .route("/dashboard", get(dashboard))
        .layer(middleware::from_fn(request_id))
        .layer(cors)
        .with_state(state)
}

/// Echo `X-Request-ID` on every response, generating one when absent.
async fn request_id(req: Request, next: Next) -> Response {
    let id = req
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(generate_id);
    let mut resp = next.run(req).await;
    if let Ok(value) = HeaderValue::from_str(&id) {
        resp.headers_mut().insert("x-request-id", value);
    }
    resp
}

fn error_body(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

#[derive(Debug, Deserialize)]
pub struct SubmitJobRequest {
    #[serde(rename = "type", default)]
    pub job_type: String,
    pub payload: String,
    #[serde(default)]
    pub timeout_sec: Option<u64>,
    #[serde(default)]
    pub priority: Option<i32>,
}

async fn submit_job(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<SubmitJobRequest>, JsonRejection>,
) -> Response {
    if let Some(limiter) = &state.rate_limiter {
        if !limiter.allow() {
            let mut resp = error_body(StatusCode::TOO_MANY_REQUESTS, "rate limit exceeded");
            resp.headers_mut()
                .insert("retry-after", HeaderValue::from_static("60"));
            return resp;
        }
    }

    let idem_key = headers
        .get("x-idempotency-key")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    if let (Some(key), Some(cache)) = (&idem_key, &state.idempotency) {
        if let Some(job_id) = cache.get(key) {
            if let Some(job) = state.store.read().await.get(&job_id) {
                return (StatusCode::OK, Json(job)).into_response();
            }
        }
    }

    let Ok(Json(req)) = body else {
        return error_body(StatusCode::BAD_REQUEST, "invalid request body");
    };
    let priority = req
        .priority
        .unwrap_or(PRIORITY_NORMAL)
        .clamp(PRIORITY_HIGH, PRIORITY_LOW);

    let job = state
        .store
        .write()
        .await
        .create(req.job_type, req.payload, priority, req.timeout_sec);
    if let (Some(key), Some(cache)) = (idem_key, &state.idempotency) {
        cache.set(key, job.id.clone());
    }

    let depth = {
        let mut queue = state.queue.lock().await;
        queue.enqueue(job.id.clone(), job.priority);
        queue.depth()
    };
    let job = state
        .store
        .write()
        .await
        .update_with(&job.id, |j| j.status = JobStatus::Queued)
        .unwrap_or(job);

    tracing::info!(job_id = %job.id, queue_depth = depth, "Job submitted");
    (StatusCode::ACCEPTED, Json(job)).into_response()
}

#[derive(Debug, Deserialize)]
struct ListJobsParams {
    status: Option<JobStatus>,
    limit: Option<usize>,
    offset: Option<usize>,
}

async fn list_jobs(State(state): State<AppState>, params: Query<ListJobsParams>) -> Response {
    let limit = params.limit.unwrap_or(DEFAULT_LIST_LIMIT).clamp(1, MAX_LIST_LIMIT);
    let offset = params.offset.unwrap_or(0).min(MAX_LIST_OFFSET);

    let jobs = state.store.read().await.list(params.status);
    let total = jobs.len();
    let page: Vec<_> = jobs.into_iter().skip(offset).take(limit).collect();

    Json(json!({
        "jobs": page,
        "total": total,
        "limit": limit,
        "offset": offset,
    }))
    .into_response()
}

async fn get_job(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.store.read().await.get(&id) {
        Some(job) => Json(job).into_response(),
        None => error_body(StatusCode::NOT_FOUND, "job not found"),
    }
}

async fn cancel_job(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let mut cancelled = false;
    let job = state.store.write().await.update_with(&id, |j| {
        if matches!(j.status, JobStatus::Pending | JobStatus::Queued) {
            j.status = JobStatus::Cancelled;
            cancelled = true;
        }
    });
    let Some(job) = job else {
        return error_body(StatusCode::NOT_FOUND, "job not found");
    };
    if !cancelled {
        return error_body(StatusCode::BAD_REQUEST, "job cannot be cancelled");
    }
    state.queue.lock().await.remove(&id);
    tracing::info!(job_id = %id, "Job cancelled");
    Json(job).into_response()
}

#[derive(Debug, Deserialize)]
pub struct CompleteJobRequest {
    pub success: bool,
    #[serde(default)]
    pub result: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

async fn complete_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Result<Json<CompleteJobRequest>, JsonRejection>,
) -> Response {
    // Existence is checked before the body: a malformed callback for an
    // unknown job is a 404, not a 400.
    if state.store.read().await.get(&id).is_none() {
        return error_body(StatusCode::NOT_FOUND, "job not found");
    }
    let Ok(Json(req)) = body else {
        return error_body(StatusCode::BAD_REQUEST, "invalid request body");
    };

    let now = state.clock.now();
    let mut was_running = false;
    let job = state.store.write().await.update_with(&id, |j| {
        if j.status != JobStatus::Running {
            return;
        }
        was_running = true;
        j.finished_at = Some(now);
        if req.success {
            j.status = JobStatus::Completed;
            j.result = req.result.clone();
            j.error = None;
        } else {
            j.status = JobStatus::Failed;
            j.error = req.error.clone();
            j.result = None;
        }
    });
    let Some(job) = job else {
        return error_body(StatusCode::NOT_FOUND, "job not found");
    };
    if !was_running {
        return error_body(StatusCode::BAD_REQUEST, "job not running");
    }

    if let Some(worker_id) = job.worker_id.as_deref() {
        state.scheduler.on_job_complete(&id, worker_id).await;
    }
    match job.status {
        JobStatus::Completed => {
            tracing::info!(job_id = %id, worker_id = ?job.worker_id, "Job completed")
        }
        _ => tracing::warn!(job_id = %id, worker_id = ?job.worker_id, error = ?job.error, "Job failed"),
    }
    Json(job).into_response()
}

#[derive(Debug, Deserialize)]
pub struct RegisterWorkerRequest {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub endpoint: String,
}

async fn register_worker(
    State(state): State<AppState>,
    body: Result<Json<RegisterWorkerRequest>, JsonRejection>,
) -> Response {
    let Ok(Json(req)) = body else {
        return error_body(StatusCode::BAD_REQUEST, "invalid request body");
    };
    if req.endpoint.is_empty() {
        return error_body(StatusCode::BAD_REQUEST, "endpoint required");
    }
    let id = req.id.filter(|id| !id.is_empty()).unwrap_or_else(generate_id);
    let worker = state.registry.write().await.register(id, req.endpoint);
    tracing::info!(worker_id = %worker.id, endpoint = %worker.endpoint, "Worker registered");
    Json(worker).into_response()
}

#[derive(Debug, Deserialize)]
struct HeartbeatRequest {
    #[serde(default)]
    id: String,
}

async fn worker_heartbeat(
    State(state): State<AppState>,
    body: Result<Json<HeartbeatRequest>, JsonRejection>,
) -> Response {
    let Ok(Json(req)) = body else {
        return error_body(StatusCode::BAD_REQUEST, "invalid request body");
    };
    if req.id.is_empty() {
        return error_body(StatusCode::BAD_REQUEST, "id required");
    }
    if !state.registry.write().await.heartbeat(&req.id) {
        return error_body(StatusCode::NOT_FOUND, "worker not found");
    }
    tracing::debug!(worker_id = %req.id, "Worker heartbeat");
    Json(json!({ "status": "ok" })).into_response()
}

async fn list_workers(State(state): State<AppState>) -> Response {
    Json(state.registry.read().await.list()).into_response()
}

async fn health() -> &'static str {
    "OK"
}

async fn ready(State(state): State<AppState>) -> Response {
    if state.registry.read().await.is_empty() {
        return (StatusCode::SERVICE_UNAVAILABLE, "no workers registered").into_response();
    }
    (StatusCode::OK, "OK").into_response()
}

async fn stats(State(state): State<AppState>) -> Response {
    let counts = state.store.read().await.count_by_status();
    let total: usize = counts.values().sum();
    let completed = counts.get(&JobStatus::Completed).copied().unwrap_or(0);
    let failed = counts.get(&JobStatus::Failed).copied().unwrap_or(0);
    let success_rate = if completed + failed > 0 {
        completed as f64 / (completed + failed) as f64 * 100.0
    } else {
        0.0
    };
    let by_status: serde_json::Map<String, serde_json::Value> = counts
        .iter()
        .map(|(status, n)| (status.to_string(), json!(n)))
        .collect();
    let uptime = (state.clock.now() - state.started_at).num_milliseconds() as f64 / 1000.0;

    Json(json!({
        "queue_depth": state.queue.lock().await.depth(),
        "workers": state.registry.read().await.len(),
        "jobs_total": total,
        "jobs_by_status": by_status,
        "success_rate_pct": success_rate,
        "uptime_seconds": uptime,
    }))
    .into_response()
}

async fn metrics(State(state): State<AppState>) -> Response {
    let depth = state.queue.lock().await.depth();
    let workers = state.registry.read().await.list();
    let counts = state.store.read().await.count_by_status();
    let now = state.clock.now();
    let max_heartbeat_age = workers
        .iter()
        .map(|w| (now - w.last_heartbeat).num_milliseconds() as f64 / 1000.0)
        .fold(0.0_f64, f64::max);

    let mut body = String::new();
    body.push_str("# HELP job_queue_depth number of jobs waiting in queue\n");
    body.push_str("# TYPE job_queue_depth gauge\n");
    body.push_str(&format!("job_queue_depth {depth}\n"));
    body.push_str("# HELP workers_registered number of registered workers\n");
    body.push_str("# TYPE workers_registered gauge\n");
    body.push_str(&format!("workers_registered {}\n", workers.len()));
    body.push_str("# HELP job_total jobs by status\n");
    body.push_str("# TYPE job_total gauge\n");
    for status in [
        JobStatus::Pending,
        JobStatus::Queued,
        JobStatus::Running,
        JobStatus::Completed,
        JobStatus::Failed,
        JobStatus::Cancelled,
    ] {
        let n = counts.get(&status).copied().unwrap_or(0);
        body.push_str(&format!("job_total{{status=\"{status}\"}} {n}\n"));
    }
    body.push_str("# HELP worker_heartbeat_age_seconds max seconds since last worker heartbeat\n");
    body.push_str("# TYPE worker_heartbeat_age_seconds gauge\n");
    body.push_str(&format!("worker_heartbeat_age_seconds {max_heartbeat_age:.2}\n"));

    ([(axum::http::header::CONTENT_TYPE, "text/plain; charset=utf-8")], body).into_response()
}

async fn dashboard() -> Html<&'static str> {
    Html(include_str!("dashboard.html"))
}
