//! Autoscaler control-loop tests against a mock scaler port: threshold
//! crossings, capacity bounds, scale-down hysteresis and scaler failures.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{Mutex, RwLock};

use jobplane::autoscaler::{AutoScaler, Scaler, ScalerConfig};
use jobplane::clock::{ManualClock, SharedClock};
use jobplane::error::{PlaneError, Result};
use jobplane::job::PRIORITY_NORMAL;
use jobplane::registry::WorkerRegistry;
use jobplane::scheduler::PriorityQueue;

#[derive(Default)]
struct MockScaler {
    containers: std::sync::Mutex<Vec<String>>,
    next_id: AtomicUsize,
    starts: AtomicUsize,
    stops: AtomicUsize,
    lists: AtomicUsize,
    fail_start: AtomicBool,
    fail_list: AtomicBool,
}

impl MockScaler {
    fn with_containers(n: usize) -> Arc<Self> {
        let mock = Self::default();
        {
            let mut containers = mock.containers.lock().unwrap();
            for i in 0..n {
                containers.push(format!("seed-{i}"));
            }
        }
        mock.next_id.store(n, Ordering::SeqCst);
        Arc::new(mock)
    }

    fn container_count(&self) -> usize {
        self.containers.lock().unwrap().len()
    }
}

#[async_trait]
impl Scaler for MockScaler {
    async fn start_worker(&self) -> Result<String> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        if self.fail_start.load(Ordering::SeqCst) {
            return Err(PlaneError::Scaler("runtime unavailable".into()));
        }
        let id = format!("c-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        self.containers.lock().unwrap().push(id.clone());
        Ok(id)
    }

    async fn stop_worker(&self, container_id: &str) -> Result<()> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        self.containers
            .lock()
            .unwrap()
            .retain(|id| id != container_id);
        Ok(())
    }

    async fn worker_container_ids(&self) -> Result<Vec<String>> {
        self.lists.fetch_add(1, Ordering::SeqCst);
        if self.fail_list.load(Ordering::SeqCst) {
            return Err(PlaneError::Scaler("runtime unavailable".into()));
        }
        Ok(self.containers.lock().unwrap().clone())
    }
}

struct Fixture {
    queue: Arc<Mutex<PriorityQueue>>,
    scaler: Arc<MockScaler>,
    autoscaler: AutoScaler,
    clock: Arc<ManualClock>,
}

fn fixture(cfg: ScalerConfig, containers: usize) -> Fixture {
    let clock = ManualClock::new(Utc::now());
    let shared: SharedClock = clock.clone();
    let queue = Arc::new(Mutex::new(PriorityQueue::new()));
    let registry = Arc::new(RwLock::new(WorkerRegistry::new(shared.clone())));
    let scaler = MockScaler::with_containers(containers);
    let autoscaler = AutoScaler::new(
        cfg,
        queue.clone(),
        registry,
        Some(scaler.clone() as Arc<dyn Scaler>),
        shared,
    );
    Fixture {
        queue,
        scaler,
        autoscaler,
        clock,
    }
}

fn test_config() -> ScalerConfig {
    ScalerConfig {
        queue_threshold_high: 5,
        queue_threshold_low: 1,
        min_workers: 1,
        max_workers: 3,
        scale_down_stable: chrono::Duration::seconds(10),
    }
}

async fn fill_queue(queue: &Arc<Mutex<PriorityQueue>>, n: usize) {
    let mut queue = queue.lock().await;
    for i in 0..n {
        queue.enqueue(format!("job-{i}"), PRIORITY_NORMAL);
    }
}

#[tokio::test]
async fn scales_up_one_container_per_tick_until_max() {
    let f = fixture(test_config(), 1);
    fill_queue(&f.queue, 10).await;

    f.autoscaler.tick().await;
    assert_eq!(f.scaler.container_count(), 2);

    f.autoscaler.tick().await;
    assert_eq!(f.scaler.container_count(), 3);

    // At MAX the high queue only produces a recommendation.
    f.autoscaler.tick().await;
    f.autoscaler.tick().await;
    assert_eq!(f.scaler.container_count(), 3);
    assert_eq!(f.scaler.starts.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn scale_up_failure_is_absorbed() {
    let f = fixture(test_config(), 1);
    f.scaler.fail_start.store(true, Ordering::SeqCst);
    fill_queue(&f.queue, 10).await;

    f.autoscaler.tick().await;
    assert_eq!(f.scaler.container_count(), 1);
    assert_eq!(f.scaler.starts.load(Ordering::SeqCst), 1);

    // Next tick retries.
    f.scaler.fail_start.store(false, Ordering::SeqCst);
    f.autoscaler.tick().await;
    assert_eq!(f.scaler.container_count(), 2);
}

#[tokio::test]
async fn list_failure_skips_the_whole_tick() {
    let f = fixture(test_config(), 1);
    f.scaler.fail_list.store(true, Ordering::SeqCst);
    fill_queue(&f.queue, 10).await;

    f.autoscaler.tick().await;
    assert_eq!(f.scaler.starts.load(Ordering::SeqCst), 0);
    assert_eq!(f.scaler.stops.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn scales_down_after_sustained_low_queue() {
    let f = fixture(test_config(), 3);

    // Queue empty but the stability window has not elapsed yet.
    f.autoscaler.tick().await;
    assert_eq!(f.scaler.stops.load(Ordering::SeqCst), 0);

    f.clock.advance(chrono::Duration::seconds(10));
    f.autoscaler.tick().await;
    assert_eq!(f.scaler.stops.load(Ordering::SeqCst), 1);
    assert_eq!(f.scaler.container_count(), 2);
}

#[tokio::test]
async fn oscillation_above_low_resets_hysteresis() {
    let f = fixture(test_config(), 3);

    f.autoscaler.tick().await;
    f.clock.advance(chrono::Duration::seconds(5));

    // Queue pops back above LOW before the window elapses.
    fill_queue(&f.queue, 2).await;
    f.autoscaler.tick().await;
    assert_eq!(f.scaler.stops.load(Ordering::SeqCst), 0);

    // Low again: the window restarts from scratch.
    f.queue.lock().await.dequeue();
    f.queue.lock().await.dequeue();
    f.autoscaler.tick().await;
    f.clock.advance(chrono::Duration::seconds(5));
    f.autoscaler.tick().await;
    assert_eq!(f.scaler.stops.load(Ordering::SeqCst), 0);

    f.clock.advance(chrono::Duration::seconds(5));
    f.autoscaler.tick().await;
    assert_eq!(f.scaler.stops.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn never_scales_below_min_workers() {
    let f = fixture(test_config(), 1);

    f.autoscaler.tick().await;
    f.clock.advance(chrono::Duration::seconds(30));
    f.autoscaler.tick().await;
    f.autoscaler.tick().await;

    assert_eq!(f.scaler.stops.load(Ordering::SeqCst), 0);
    assert_eq!(f.scaler.container_count(), 1);
}

#[tokio::test]
async fn disabled_without_scaler_port() {
    let clock = ManualClock::new(Utc::now());
    let shared: SharedClock = clock;
    let queue = Arc::new(Mutex::new(PriorityQueue::new()));
    let registry = Arc::new(RwLock::new(WorkerRegistry::new(shared.clone())));
    let autoscaler = Arc::new(AutoScaler::new(test_config(), queue, registry, None, shared));

    // The loop exits immediately instead of ticking forever.
    let token = tokio_util::sync::CancellationToken::new();
    autoscaler.run(token).await;
}
