//! Volume staging and container execution engine.
//!
//! This module turns a declarative [`ExecutionRequest`] into a running
//! one-off container via the bollard Docker API: it validates and classifies
//! the requested mounts, materializes them on disk, pulls the image per the
//! requested policy, runs the container to completion, captures output and
//! any mutated volume contents, and removes every ephemeral resource it
//! created on every exit path.
//!
//! ## Architecture
//!
//! - [`client`]: Docker/Podman API client wrapper with connection management
//! - [`spec`]: request/response wire types and the volume spec resolver
//! - [`archive`]: gzip tarball pack/unpack with a path traversal guard
//! - [`staging`]: ephemeral mount provisioning, response capture, and
//!   guaranteed teardown
//! - [`runner`]: container lifecycle (pull, create, start, wait, logs,
//!   remove) and the end-to-end `execute` entry point
//! - [`volume`]: named engine volume creation and seeding
//!
//! ## Usage
//!
//! ```rust,no_run
//! use docker_runner::engine::{ContainerRunner, DockerClient, ExecutionRequest};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let client = DockerClient::new().await?;
//!     let runner = ContainerRunner::new(client);
//!
//!     let request: ExecutionRequest = serde_json::from_value(serde_json::json!({
//!         "image": "alpine:latest",
//!         "command": ["echo", "hi"],
//!     }))?;
//!
//!     let result = runner.execute(request).await?;
//!     println!("{}: {}", result.status, result.stdout);
//!     Ok(())
//! }
//! ```

mod archive;
mod client;
mod runner;
mod spec;
mod staging;
mod volume;

pub use client::{DockerClient, HealthReport};
pub use runner::{ContainerRunner, RunnerConfig};
pub use spec::{
    AccessMode, CapturedVolume, CommandLine, ExecutionRequest, ExecutionResult, ExecutionStatus,
    MountKey, PullPolicy, RegistryAuth, VolumeSpec, VolumeSpecPayload, resolve_volumes,
};
pub use volume::VolumeManager;

/// Engine errors.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Malformed request: bad mount key, invalid spec payload, unsupported
    /// capture request, undecodable content
    #[error("Validation error: {0}")]
    Validation(String),

    /// Registry rejected the supplied credentials
    #[error("Registry authentication failed: {0}")]
    Auth(String),

    /// Referenced resource does not exist (named volume, local image)
    #[error("Not found: {0}")]
    NotFound(String),

    /// Container engine daemon unreachable
    #[error("Container engine unavailable: {0}")]
    Unavailable(String),

    /// Execution exceeded the configured timeout; the container was
    /// forcibly removed
    #[error("Execution timed out after {0} seconds")]
    Timeout(u64),

    /// Docker/Podman API error
    #[error("Container API error: {0}")]
    Api(#[from] bollard::errors::Error),

    /// IO error while staging or capturing volumes
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;
