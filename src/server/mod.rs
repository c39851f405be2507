//! HTTP transport surface.
//!
//! Exposes the execution engine over two protocols on one listener: a REST
//! API (`/run`, `/volumes`, `/health`) and an MCP JSON-RPC endpoint
//! (`/mcp`) for AI-agent clients. Both consume the same engine contracts;
//! neither holds state beyond the MCP session table.

pub mod mcp;
pub mod rest;

use crate::engine::{ContainerRunner, DockerClient, RunnerConfig, VolumeManager};
use axum::Router;
use axum::routing::{get, post};
use std::net::SocketAddr;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub runner: ContainerRunner,
    pub volumes: VolumeManager,
    pub sessions: mcp::SessionStore,
}

impl AppState {
    /// Build the state around one injected engine client.
    pub fn new(client: DockerClient, runner_config: RunnerConfig) -> Self {
        Self {
            runner: ContainerRunner::with_config(client.clone(), runner_config),
            volumes: VolumeManager::new(client),
            sessions: mcp::SessionStore::new(),
        }
    }
}

/// Create the application router.
pub fn create_app(state: AppState) -> Router {
    Router::new()
        .route("/run", post(rest::run_container))
        .route("/volumes", post(rest::create_volume))
        .route("/health", get(rest::health_check))
        .route("/mcp", post(mcp::post_mcp).delete(mcp::delete_mcp))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the HTTP server.
pub async fn serve(addr: SocketAddr, state: AppState) -> anyhow::Result<()> {
    let app = create_app(state);

    info!("Starting server on {}", addr);
    info!("- REST API: http://{}/run", addr);
    info!("- MCP endpoint: http://{}/mcp", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
