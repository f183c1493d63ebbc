use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use jobplane::shutdown::install_shutdown_handler;
use jobplane::worker::{PayloadRunner, WorkerAgent};

#[derive(Parser, Debug)]
#[command(name = "jobplane-worker")]
#[command(about = "Worker agent: executes dispatched jobs via the payload binary")]
struct Args {
    /// Control-plane API base URL
    #[arg(long, env = "API_URL", default_value = "http://localhost:8080")]
    api_url: String,

    /// Port for the worker's run endpoint
    #[arg(long, default_value = "9090")]
    port: u16,

    /// URL at which the control plane can reach this worker
    #[arg(long, env = "WORKER_ENDPOINT", default_value = "http://localhost:9090")]
    endpoint: String,

    /// Path to the payload execution binary
    #[arg(long, env = "EXECUTION_BINARY", default_value = "/app/runner")]
    binary: String,

    /// Worker id (generated when absent)
    #[arg(long)]
    worker_id: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let runner = PayloadRunner::new(args.binary);
    let agent = Arc::new(WorkerAgent::new(
        args.api_url,
        args.endpoint,
        args.worker_id,
        runner,
    ));

    let shutdown = install_shutdown_handler();
    agent.run(args.port, shutdown).await?;

    tracing::info!("Worker stopped");
    Ok(())
}
