use anyhow::Context;
use clap::Parser;
use docker_runner::engine::{DockerClient, RunnerConfig};
use docker_runner::server::{self, AppState};
use std::net::SocketAddr;
use tracing::info;

/// HTTP service that runs disposable Docker containers with staged volumes.
#[derive(Debug, Parser)]
#[command(name = "docker-runner", version, about)]
struct Args {
    /// Address to listen on
    #[arg(long, default_value = "0.0.0.0:8000")]
    listen: SocketAddr,

    /// Maximum seconds a container may run before it is forcibly removed
    #[arg(long, default_value_t = 300)]
    timeout_secs: u64,

    /// Tracing filter (overridden by RUST_LOG)
    #[arg(long, default_value = "docker_runner=info,tower_http=info")]
    log_filter: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&args.log_filter)),
        )
        .init();

    info!("Starting Docker Runner");

    let client = DockerClient::new()
        .await
        .context("failed to connect to the container engine")?;

    let config = RunnerConfig {
        timeout_secs: args.timeout_secs,
        ..Default::default()
    };

    let state = AppState::new(client, config);
    server::serve(args.listen, state).await
}
