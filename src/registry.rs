use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::clock::SharedClock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerStatus {
    Idle,
    Busy,
}

impl std::fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkerStatus::Idle => write!(f, "idle"),
            WorkerStatus::Busy => write!(f, "busy"),
        }
    }
}

/// A registered executor process, reachable at `endpoint`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Worker {
    pub id: String,
    pub endpoint: String,
    pub status: WorkerStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_job_id: Option<String>,
    pub last_heartbeat: DateTime<Utc>,
}

/// In-memory worker registry. Shared as `Arc<RwLock<WorkerRegistry>>`.
pub struct WorkerRegistry {
    workers: HashMap<String, Worker>,
    clock: SharedClock,
}

impl WorkerRegistry {
    pub fn new(clock: SharedClock) -> Self {
        Self {
            workers: HashMap::new(),
            clock,
        }
    }

    /// Register a worker, or refresh an existing registration.
    ///
    /// Registration doubles as a heartbeat: `last_heartbeat` is stamped on
    /// every call. Re-registering a known id updates the endpoint but keeps
    /// `status` and `current_job_id`, so a busy worker that re-announces
    /// itself does not lose its assignment.
    pub fn register(&mut self, id: String, endpoint: String) -> Worker {
        let now = self.clock.now();
        let worker = self
            .workers
            .entry(id.clone())
            .and_modify(|w| {
                w.endpoint = endpoint.clone();
                w.last_heartbeat = now;
            })
            .or_insert(Worker {
                id,
                endpoint,
                status: WorkerStatus::Idle,
                current_job_id: None,
                last_heartbeat: now,
            });
        worker.clone()
    }

    /// Refresh `last_heartbeat`. Returns false for an unknown worker.
    pub fn heartbeat(&mut self, id: &str) -> bool {
        let now = self.clock.now();
        match self.workers.get_mut(id) {
            Some(w) => {
                w.last_heartbeat = now;
                true
            }
            None => false,
        }
    }

    pub fn unregister(&mut self, id: &str) -> Option<Worker> {
        self.workers.remove(id)
    }

    pub fn get(&self, id: &str) -> Option<Worker> {
        self.workers.get(id).cloned()
    }

    /// Mutate a worker in place. Returns the updated copy, or `None` if absent.
    pub fn update_with(&mut self, id: &str, f: impl FnOnce(&mut Worker)) -> Option<Worker> {
        let worker = self.workers.get_mut(id)?;
        f(worker);
        Some(worker.clone())
    }

    /// Snapshot of all registered workers.
    pub fn list(&self) -> Vec<Worker> {
        let mut out: Vec<Worker> = self.workers.values().cloned().collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }
}
