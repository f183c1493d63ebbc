use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::clock::SharedClock;

/// Priority levels: lower value is dispatched first.
pub const PRIORITY_HIGH: i32 = 0;
pub const PRIORITY_NORMAL: i32 = 1;
pub const PRIORITY_LOW: i32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    /// Terminal states never transition again.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Pending => write!(f, "pending"),
            JobStatus::Queued => write!(f, "queued"),
            JobStatus::Running => write!(f, "running"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Failed => write!(f, "failed"),
            JobStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// A compute request and its execution state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    #[serde(rename = "type", default, skip_serializing_if = "String::is_empty")]
    pub job_type: String,
    pub payload: String,
    pub status: JobStatus,
    pub priority: i32,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worker_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_sec: Option<u64>,
}

/// Generate an opaque 16-hex-char id.
pub fn generate_id() -> String {
    let mut bytes = [0u8; 8];
    rand::thread_rng().fill(&mut bytes);
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// In-memory job store. Shared as `Arc<RwLock<JobStore>>`; all lifecycle
/// transitions go through [`JobStore::update_with`] so each read-modify-write
/// is atomic under the store's write lock.
pub struct JobStore {
    jobs: HashMap<String, Job>,
    clock: SharedClock,
}

impl JobStore {
    pub fn new(clock: SharedClock) -> Self {
        Self {
            jobs: HashMap::new(),
            clock,
        }
    }

    /// Create a job in `pending` state with a fresh id and return a copy.
    pub fn create(
        &mut self,
        job_type: String,
        payload: String,
        priority: i32,
        timeout_sec: Option<u64>,
    ) -> Job {
        let job = Job {
            id: generate_id(),
            job_type,
            payload,
            status: JobStatus::Pending,
            priority,
            created_at: self.clock.now(),
            started_at: None,
            finished_at: None,
            worker_id: None,
            result: None,
            error: None,
            retry_count: 0,
            timeout_sec,
        };
        self.jobs.insert(job.id.clone(), job.clone());
        job
    }

    pub fn get(&self, id: &str) -> Option<Job> {
        self.jobs.get(id).cloned()
    }

    /// Mutate a job in place. Returns the updated copy, or `None` if absent.
    pub fn update_with(&mut self, id: &str, f: impl FnOnce(&mut Job)) -> Option<Job> {
        let job = self.jobs.get_mut(id)?;
        f(job);
        Some(job.clone())
    }

    /// Snapshot of all jobs, optionally filtered by status, ordered by
    /// creation time so pagination is stable.
    pub fn list(&self, status: Option<JobStatus>) -> Vec<Job> {
        let mut out: Vec<Job> = self
            .jobs
            .values()
            .filter(|j| status.is_none_or(|s| j.status == s))
            .cloned()
            .collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        out
    }

    /// Job counts keyed by status, for the observability endpoints.
    pub fn count_by_status(&self) -> HashMap<JobStatus, usize> {
        let mut counts = HashMap::new();
        for job in self.jobs.values() {
            *counts.entry(job.status).or_insert(0) += 1;
        }
        counts
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::system_clock;

    #[test]
    fn create_assigns_id_and_pending_status() {
        let mut store = JobStore::new(system_clock());
        let job = store.create(String::new(), "payload".into(), PRIORITY_NORMAL, None);
        assert_eq!(job.id.len(), 16);
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.retry_count, 0);
        assert!(store.get(&job.id).is_some());
    }

    #[test]
    fn update_with_mutates_in_place() {
        let mut store = JobStore::new(system_clock());
        let job = store.create(String::new(), "p".into(), PRIORITY_HIGH, None);
        let updated = store
            .update_with(&job.id, |j| j.status = JobStatus::Queued)
            .unwrap();
        assert_eq!(updated.status, JobStatus::Queued);
        assert_eq!(store.get(&job.id).unwrap().status, JobStatus::Queued);
        assert!(store.update_with("missing", |_| {}).is_none());
    }

    #[test]
    fn list_filters_and_sorts() {
        let mut store = JobStore::new(system_clock());
        let a = store.create(String::new(), "a".into(), PRIORITY_NORMAL, None);
        let b = store.create(String::new(), "b".into(), PRIORITY_NORMAL, None);
        store.update_with(&b.id, |j| j.status = JobStatus::Queued);

        assert_eq!(store.list(None).len(), 2);
        let queued = store.list(Some(JobStatus::Queued));
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].id, b.id);
        assert_eq!(store.list(Some(JobStatus::Pending))[0].id, a.id);
    }
}
