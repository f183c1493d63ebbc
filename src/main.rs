use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use tokio::sync::{Mutex, RwLock};
use tracing_subscriber::EnvFilter;

use jobplane::api::{self, AppState, IdempotencyCache, RateLimiter};
use jobplane::autoscaler::{AutoScaler, DockerScaler, Scaler, ScalerConfig};
use jobplane::clock::system_clock;
use jobplane::config::Config;
use jobplane::job::JobStore;
use jobplane::registry::WorkerRegistry;
use jobplane::scheduler::{PriorityQueue, Scheduler};
use jobplane::shutdown::install_shutdown_handler;

#[derive(Parser, Debug)]
#[command(name = "jobplane")]
#[command(about = "Distributed job-execution control plane")]
struct Args {
    /// Port for the control-plane API
    #[arg(long, default_value = "8080")]
    port: u16,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = Config::from_env()?;
    let clock = system_clock();

    let store = Arc::new(RwLock::new(JobStore::new(clock.clone())));
    let registry = Arc::new(RwLock::new(WorkerRegistry::new(clock.clone())));
    let queue = Arc::new(Mutex::new(PriorityQueue::new()));
    let scheduler = Arc::new(Scheduler::new(
        queue.clone(),
        store.clone(),
        registry.clone(),
        clock.clone(),
    )?);

    let shutdown = install_shutdown_handler();

    tokio::spawn(scheduler.clone().run(shutdown.clone()));
    tokio::spawn(scheduler.clone().run_reaper(
        chrono::Duration::seconds(config.worker_heartbeat_timeout_sec as i64),
        shutdown.clone(),
    ));

    let scaler: Option<Arc<dyn Scaler>> = match &config.worker_image {
        Some(image) => match DockerScaler::new(image.clone()) {
            Ok(s) => Some(Arc::new(s)),
            Err(e) => {
                tracing::warn!(error = %e, "Docker unavailable, autoscaling disabled");
                None
            }
        },
        None => None,
    };
    let autoscaler = Arc::new(AutoScaler::new(
        ScalerConfig {
            queue_threshold_high: config.queue_threshold_high,
            queue_threshold_low: config.queue_threshold_low,
            min_workers: config.min_workers,
            max_workers: config.max_workers,
            scale_down_stable: chrono::Duration::seconds(config.scale_down_stable_sec as i64),
        },
        queue.clone(),
        registry.clone(),
        scaler,
        clock.clone(),
    ));
    tokio::spawn(autoscaler.run(shutdown.clone()));

    let rate_limiter = (config.rate_limit_jobs_per_min > 0)
        .then(|| Arc::new(RateLimiter::new(config.rate_limit_jobs_per_min, clock.clone())));
    let idempotency = (config.idempotency_ttl_sec > 0).then(|| {
        Arc::new(IdempotencyCache::new(
            chrono::Duration::seconds(config.idempotency_ttl_sec as i64),
            clock.clone(),
        ))
    });

    let state = AppState {
        store,
        registry,
        queue,
        scheduler,
        rate_limiter,
        idempotency,
        clock: clock.clone(),
        started_at: clock.now(),
    };
    let app = api::router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], args.port));
    tracing::info!(addr = %addr, "Control plane listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await?;

    tracing::info!("Control plane stopped");
    Ok(())
}
