//! # Docker Runner
//!
//! An HTTP service that runs single, disposable Docker containers on behalf
//! of callers that never touch the container engine directly. A request
//! names an image, a command, environment variables, registry credentials,
//! and a set of volume specs; the engine stages the volumes, runs the
//! container to completion, and returns stdout, stderr, the exit status,
//! and the post-execution contents of any capture-flagged volume.
//!
//! ## Architecture Overview
//!
//! - **[`engine`]**: volume staging, container execution, response capture,
//!   and guaranteed teardown of every ephemeral resource
//! - **[`server`]**: the REST API and the MCP JSON-RPC endpoint, both thin
//!   consumers of the engine's `execute` / `create volume` / `health`
//!   contracts
//!
//! ## Volume strategies
//!
//! Each mount key (`<container_path>[:ro|:rw]`) maps to one of four
//! provisioning strategies:
//!
//! - **file**: inline base64 file bytes staged into an engine-owned temp
//!   directory, with an optional POSIX mode
//! - **directory**: inline base64 gzip tar archive unpacked into an
//!   engine-owned temp directory (entries that would escape it are
//!   rejected)
//! - **volume**: a pre-existing named engine volume
//! - **host**: a bind of an existing absolute host path
//!
//! `file` and `directory` mounts may set `response: true` to have their
//! post-execution contents returned in the result.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use docker_runner::engine::{ContainerRunner, DockerClient};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let client = DockerClient::new().await?;
//!     let runner = ContainerRunner::new(client);
//!
//!     let request = serde_json::from_value(serde_json::json!({
//!         "image": "alpine:latest",
//!         "command": ["echo", "hi"],
//!     }))?;
//!
//!     let result = runner.execute(request).await?;
//!     assert_eq!(result.stdout, "hi\n");
//!     Ok(())
//! }
//! ```

/// Volume staging and container execution engine.
///
/// Validates requests, materializes mounts, drives the container lifecycle,
/// captures responses, and tears down every resource it created.
pub mod engine;

/// HTTP transport: REST API and MCP endpoint.
pub mod server;

// Re-export the engine boundary types
pub use engine::{
    ContainerRunner, DockerClient, EngineError, ExecutionRequest, ExecutionResult, HealthReport,
    RunnerConfig, VolumeManager,
};

// Re-export server entry points
pub use server::{AppState, create_app, serve};
