use crate::registry::{Worker, WorkerStatus};

/// Worker-selection strategy.
///
/// Because busy workers are filtered out and each worker holds at most one
/// job, every candidate has identical load and both strategies collapse to
/// pick-first. The enum is the seam for future weighted or affinity
/// selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Strategy {
    #[default]
    RoundRobin,
    LeastConnections,
}

/// Select an idle worker from the list, or `None` when all are busy.
/// Filter-then-pick order is part of the contract.
pub fn select_worker(workers: &[Worker], strategy: Strategy) -> Option<&Worker> {
    let mut idle = workers.iter().filter(|w| w.status == WorkerStatus::Idle);
    match strategy {
        Strategy::RoundRobin | Strategy::LeastConnections => idle.next(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn worker(id: &str, status: WorkerStatus) -> Worker {
        Worker {
            id: id.to_string(),
            endpoint: format!("http://{id}:9090"),
            status,
            current_job_id: None,
            last_heartbeat: Utc::now(),
        }
    }

    #[test]
    fn skips_busy_workers() {
        let workers = vec![
            worker("w1", WorkerStatus::Busy),
            worker("w2", WorkerStatus::Idle),
            worker("w3", WorkerStatus::Idle),
        ];
        let picked = select_worker(&workers, Strategy::RoundRobin).unwrap();
        assert_eq!(picked.id, "w2");
    }

    #[test]
    fn returns_none_when_no_idle_worker() {
        let workers = vec![worker("w1", WorkerStatus::Busy)];
        assert!(select_worker(&workers, Strategy::RoundRobin).is_none());
        assert!(select_worker(&[], Strategy::LeastConnections).is_none());
    }

    #[test]
    fn strategies_agree_on_first_idle() {
        let workers = vec![
            worker("w1", WorkerStatus::Busy),
            worker("w2", WorkerStatus::Idle),
        ];
        let rr = select_worker(&workers, Strategy::RoundRobin).unwrap();
        let lc = select_worker(&workers, Strategy::LeastConnections).unwrap();
        assert_eq!(rr.id, lc.id);
    }
}
