pub mod docker;

pub use docker::DockerScaler;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;

use crate::clock::SharedClock;
use crate::error::Result;
use crate::registry::WorkerRegistry;
use crate::scheduler::PriorityQueue;

const TICK_INTERVAL: Duration = Duration::from_secs(10);
const SCALER_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Abstract port to the container runtime managing worker processes.
///
/// Implementations must label their containers so `worker_container_ids`
/// returns only this control plane's workers, ignoring unrelated containers
/// on the same runtime.
#[async_trait]
pub trait Scaler: Send + Sync {
    async fn start_worker(&self) -> Result<String>;
    async fn stop_worker(&self, container_id: &str) -> Result<()>;
    async fn worker_container_ids(&self) -> Result<Vec<String>>;
}

/// Autoscaling thresholds and bounds.
#[derive(Debug, Clone)]
pub struct ScalerConfig {
    /// Scale up while queue depth exceeds this.
    pub queue_threshold_high: usize,
    /// Scale down once queue depth stays below this.
    pub queue_threshold_low: usize,
    pub min_workers: usize,
    pub max_workers: usize,
    /// How long the queue must stay low before a scale-down fires.
    pub scale_down_stable: chrono::Duration,
}

/// Queue-depth control loop: grow on high queue, shrink on sustained low
/// queue. The managed-container count reported by the scaler is authoritative
/// for scaling decisions; the worker registry may lag behind it and is logged
/// only.
pub struct AutoScaler {
    cfg: ScalerConfig,
    queue: Arc<Mutex<PriorityQueue>>,
    registry: Arc<RwLock<WorkerRegistry>>,
    scaler: Option<Arc<dyn Scaler>>,
    clock: SharedClock,
    low_since: std::sync::Mutex<Option<DateTime<Utc>>>,
}

impl AutoScaler {
    /// A `None` scaler disables autoscaling; `run` exits immediately.
    pub fn new(
        cfg: ScalerConfig,
        queue: Arc<Mutex<PriorityQueue>>,
        registry: Arc<RwLock<WorkerRegistry>>,
        scaler: Option<Arc<dyn Scaler>>,
        clock: SharedClock,
    ) -> Self {
        Self {
            cfg,
            queue,
            registry,
            scaler,
            clock,
            low_since: std::sync::Mutex::new(None),
        }
    }

    /// Control loop: one tick every 10 s until the token is cancelled.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        if self.scaler.is_none() {
            tracing::info!("No scaler configured, autoscaler disabled");
            return;
        }
        let mut tick = tokio::time::interval(TICK_INTERVAL);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("Autoscaler loop stopped");
                    return;
                }
                _ = tick.tick() => {
                    self.tick().await;
                }
            }
        }
    }

    /// One control step. Scaler errors are logged and retried next tick; at
    /// most one container is added or removed per tick.
    pub async fn tick(&self) {
        let Some(scaler) = self.scaler.as_ref() else {
            return;
        };

        let depth = self.queue.lock().await.depth();
        let registered = self.registry.read().await.len();

        let container_ids =
            match tokio::time::timeout(SCALER_CALL_TIMEOUT, scaler.worker_container_ids()).await {
                Ok(Ok(ids)) => ids,
                Ok(Err(e)) => {
                    tracing::error!(error = %e, "Autoscaler could not list containers");
                    return;
                }
                Err(_) => {
                    tracing::error!("Autoscaler timed out listing containers");
                    return;
                }
            };
        let managed = container_ids.len();

        if depth > self.cfg.queue_threshold_high && managed < self.cfg.max_workers {
            match tokio::time::timeout(SCALER_CALL_TIMEOUT, scaler.start_worker()).await {
                Ok(Ok(container_id)) => {
                    tracing::info!(
                        queue_depth = depth,
                        managed = managed + 1,
                        registered,
                        container_id = %container_id,
                        "Scaled up worker pool"
                    );
                }
                Ok(Err(e)) => {
                    tracing::warn!(
                        queue_depth = depth,
                        managed,
                        registered,
                        error = %e,
                        "Scale up failed"
                    );
                }
                Err(_) => {
                    tracing::warn!(queue_depth = depth, managed, "Scale up timed out");
                }
            }
            return;
        }
        if depth > self.cfg.queue_threshold_high {
            tracing::warn!(
                queue_depth = depth,
                workers = managed,
                "Scale up recommended but pool is at capacity"
            );
        }

        if depth < self.cfg.queue_threshold_low {
            let now = self.clock.now();
            let since = {
                let mut low_since = self.low_since.lock().unwrap();
                *low_since.get_or_insert(now)
            };
            let stable = now - since >= self.cfg.scale_down_stable;
            if stable && managed > self.cfg.min_workers && !container_ids.is_empty() {
                let container_id = &container_ids[0];
                match tokio::time::timeout(SCALER_CALL_TIMEOUT, scaler.stop_worker(container_id))
                    .await
                {
                    Ok(Ok(())) => {
                        tracing::info!(
                            queue_depth = depth,
                            workers = managed - 1,
                            container_id = %container_id,
                            "Scaled down worker pool"
                        );
                    }
                    Ok(Err(e)) => {
                        tracing::warn!(
                            queue_depth = depth,
                            workers = managed,
                            error = %e,
                            "Scale down failed"
                        );
                    }
                    Err(_) => {
                        tracing::warn!(queue_depth = depth, workers = managed, "Scale down timed out");
                    }
                }
            }
        } else {
            *self.low_since.lock().unwrap() = None;
        }
    }
}
