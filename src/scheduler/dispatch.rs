use std::sync::Arc;
use std::time::Duration;

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;

use crate::clock::SharedClock;
use crate::error::Result;
use crate::job::{Job, JobStatus, JobStore};
use crate::registry::{Worker, WorkerRegistry, WorkerStatus};
use crate::scheduler::balancer::{select_worker, Strategy};
use crate::scheduler::queue::PriorityQueue;

pub const MAX_DISPATCH_RETRIES: u32 = 3;

const DISPATCH_INTERVAL: Duration = Duration::from_millis(500);
const DISPATCH_TIMEOUT: Duration = Duration::from_secs(30);
const REAPER_INTERVAL: Duration = Duration::from_secs(30);
const MAX_BACKOFF_SECS: u64 = 60;

/// Body POSTed to `{worker.endpoint}/run`. The worker acknowledges with
/// 200/202 and reports the outcome later via `POST /jobs/:id/complete`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunJobRequest {
    pub job_id: String,
    #[serde(rename = "type", default, skip_serializing_if = "String::is_empty")]
    pub job_type: String,
    pub payload: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_sec: Option<u64>,
}

/// Couples queue pops with worker selection and owns every job/worker
/// lifecycle transition: dispatch, retry with backoff, completion, reaping.
pub struct Scheduler {
    queue: Arc<Mutex<PriorityQueue>>,
    store: Arc<RwLock<JobStore>>,
    registry: Arc<RwLock<WorkerRegistry>>,
    strategy: Strategy,
    client: reqwest::Client,
    clock: SharedClock,
}

impl Scheduler {
    pub fn new(
        queue: Arc<Mutex<PriorityQueue>>,
        store: Arc<RwLock<JobStore>>,
        registry: Arc<RwLock<WorkerRegistry>>,
        clock: SharedClock,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(DISPATCH_TIMEOUT)
            .build()?;
        Ok(Self {
            queue,
            store,
            registry,
            strategy: Strategy::default(),
            client,
            clock,
        })
    }

    pub fn with_strategy(mut self, strategy: Strategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Dispatch loop: one tick every 500 ms until the token is cancelled.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        let mut tick = tokio::time::interval(DISPATCH_INTERVAL);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("Scheduler loop stopped");
                    return;
                }
                _ = tick.tick() => {
                    self.tick().await;
                }
            }
        }
    }

    /// Stale-worker reaper loop, on its own 30 s ticker.
    pub async fn run_reaper(
        self: Arc<Self>,
        threshold: chrono::Duration,
        shutdown: CancellationToken,
    ) {
        let mut tick = tokio::time::interval(REAPER_INTERVAL);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("Reaper loop stopped");
                    return;
                }
                _ = tick.tick() => {
                    self.reap_stale_workers(threshold).await;
                }
            }
        }
    }

    /// One scheduling step: pop a job, pick an idle worker, transition both
    /// records, then hand the HTTP dispatch off to a concurrent task.
    pub async fn tick(self: &Arc<Self>) {
        let Some(job_id) = self.queue.lock().await.dequeue() else {
            return;
        };
        let Some(job) = self.store.read().await.get(&job_id) else {
            return;
        };
        if job.status == JobStatus::Cancelled {
            return;
        }

        let workers = self.registry.read().await.list();
        let Some(worker) = select_worker(&workers, self.strategy).cloned() else {
            self.queue.lock().await.enqueue(job_id, job.priority);
            return;
        };

        let now = self.clock.now();
        let worker_id = worker.id.clone();
        let Some(job) = self.store.write().await.update_with(&job_id, |j| {
            j.status = JobStatus::Running;
            j.started_at = Some(now);
            j.worker_id = Some(worker_id.clone());
        }) else {
            return;
        };
        self.registry.write().await.update_with(&worker.id, |w| {
            w.status = WorkerStatus::Busy;
            w.current_job_id = Some(job_id.clone());
        });

        let depth = self.queue.lock().await.depth();
        tracing::info!(
            worker_id = %worker.id,
            job_id = %job_id,
            queue_depth = depth,
            "Job assigned"
        );

        let scheduler = Arc::clone(self);
        tokio::spawn(async move {
            scheduler.dispatch(job, worker).await;
        });
    }

    /// POST the run request to the worker. Only 200/202 acknowledge the
    /// dispatch; anything else takes the failure path.
    async fn dispatch(self: Arc<Self>, job: Job, worker: Worker) {
        let url = format!("{}/run", worker.endpoint);
        let body = RunJobRequest {
            job_id: job.id.clone(),
            job_type: job.job_type.clone(),
            payload: job.payload.clone(),
            timeout_sec: job.timeout_sec,
        };
        match self.client.post(&url).json(&body).send().await {
            Ok(resp) if resp.status() == StatusCode::OK || resp.status() == StatusCode::ACCEPTED => {
                tracing::info!(job_id = %job.id, worker_id = %worker.id, "Job dispatched");
            }
            Ok(resp) => {
                let msg = format!("worker returned {}", resp.status());
                self.handle_dispatch_failure(&job.id, &worker.id, msg).await;
            }
            Err(e) => {
                self.handle_dispatch_failure(&job.id, &worker.id, e.to_string())
                    .await;
            }
        }
    }

    /// Dispatch-failure path: free the worker, bump `retry_count`, then
    /// either re-enqueue after exponential backoff or fail the job.
    pub async fn handle_dispatch_failure(
        self: &Arc<Self>,
        job_id: &str,
        worker_id: &str,
        error: String,
    ) {
        self.on_job_complete(job_id, worker_id).await;

        let err_for_job = error.clone();
        let Some(job) = self.store.write().await.update_with(job_id, |j| {
            j.retry_count += 1;
            if j.retry_count < MAX_DISPATCH_RETRIES {
                j.status = JobStatus::Queued;
                j.started_at = None;
                j.worker_id = None;
            } else {
                j.status = JobStatus::Failed;
                j.error = Some(err_for_job);
            }
        }) else {
            return;
        };

        if job.status == JobStatus::Failed {
            tracing::warn!(
                job_id,
                retry_count = job.retry_count,
                error = %error,
                "Job failed after dispatch retries"
            );
            return;
        }

        let backoff_secs = (1u64 << job.retry_count.min(16)).min(MAX_BACKOFF_SECS);
        let scheduler = Arc::clone(self);
        let id = job.id.clone();
        let priority = job.priority;
        let retry_count = job.retry_count;
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(backoff_secs)).await;
            scheduler.queue.lock().await.enqueue(id.clone(), priority);
            tracing::info!(
                job_id = %id,
                retry_count,
                backoff_sec = backoff_secs,
                error = %error,
                "Job requeued after dispatch failure"
            );
        });
    }

    /// Return the worker to idle once its job reached a terminal state.
    ///
    /// Clears the assignment only while it still references this job, so a
    /// duplicate or stale callback is a no-op. The job record's own terminal
    /// transition happens at the completion endpoint before this hook runs.
    pub async fn on_job_complete(&self, job_id: &str, worker_id: &str) {
        self.registry.write().await.update_with(worker_id, |w| {
            if w.current_job_id.as_deref() == Some(job_id) {
                w.status = WorkerStatus::Idle;
                w.current_job_id = None;
            }
        });
    }

    /// Unregister workers whose heartbeat aged past `threshold`, requeuing
    /// the job each one owned.
    ///
    /// The still-running check and the field clears happen inside one store
    /// write lock, so a completion callback racing the reaper settles on
    /// whichever grabbed the lock first; the loser sees a non-running job and
    /// backs off.
    pub async fn reap_stale_workers(&self, threshold: chrono::Duration) {
        let now = self.clock.now();
        let stale: Vec<Worker> = self
            .registry
            .read()
            .await
            .list()
            .into_iter()
            .filter(|w| now - w.last_heartbeat > threshold)
            .collect();

        for worker in stale {
            if let Some(job_id) = worker.current_job_id.as_deref() {
                let mut requeue_priority = None;
                self.store.write().await.update_with(job_id, |j| {
                    if j.status == JobStatus::Running {
                        j.status = JobStatus::Queued;
                        j.started_at = None;
                        j.worker_id = None;
                        requeue_priority = Some(j.priority);
                    }
                });
                if let Some(priority) = requeue_priority {
                    self.queue.lock().await.enqueue(job_id.to_string(), priority);
                    tracing::warn!(
                        worker_id = %worker.id,
                        job_id,
                        heartbeat_age_sec = (now - worker.last_heartbeat).num_seconds(),
                        "Stale worker, job requeued"
                    );
                }
            }
            self.registry.write().await.unregister(&worker.id);
            tracing::warn!(worker_id = %worker.id, "Worker reaped");
        }
    }
}
