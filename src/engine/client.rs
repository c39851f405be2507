//! Docker/Podman client wrapper.
//!
//! Provides a simplified interface to the bollard Docker API with automatic
//! connection handling, fallback strategies, and health checking.

use crate::engine::{EngineError, Result};
use bollard::Docker;
use std::sync::Arc;
use tracing::{debug, info};

/// Docker/Podman API client wrapper.
///
/// Manages the connection to the Docker or Podman daemon. Constructed once at
/// process start and cloned into every consumer; the underlying bollard
/// handle is safe for concurrent use.
#[derive(Clone)]
pub struct DockerClient {
    docker: Arc<Docker>,
}

impl DockerClient {
    /// Create a new client, connecting to the first reachable daemon.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Unavailable`] if no daemon answers a ping.
    pub async fn new() -> Result<Self> {
        let docker = Self::connect()?;

        let client = Self {
            docker: Arc::new(docker),
        };

        // Verify connection works
        client.ping().await?;

        Ok(client)
    }

    /// Wrap an already-connected bollard handle.
    ///
    /// Used by tests and callers that manage the connection themselves.
    pub fn from_docker(docker: Docker) -> Self {
        Self {
            docker: Arc::new(docker),
        }
    }

    /// Connect to a Docker or Podman daemon.
    ///
    /// Tries connection strategies in order:
    /// 1. `DOCKER_HOST` environment variable (tcp or unix socket)
    /// 2. Local defaults (Unix socket or Windows named pipe)
    /// 3. Podman sockets (rootless, then system-wide)
    fn connect() -> Result<Docker> {
        debug!("Attempting to connect to container runtime...");

        if let Ok(host) = std::env::var("DOCKER_HOST") {
            debug!("Using DOCKER_HOST: {}", host);

            let attempt = if host.starts_with("tcp://") || host.starts_with("http://") {
                Docker::connect_with_http(&host, 120, bollard::API_DEFAULT_VERSION)
            } else {
                Docker::connect_with_socket(&host, 120, bollard::API_DEFAULT_VERSION)
            };

            match attempt {
                Ok(docker) => {
                    info!("Connected to container runtime via DOCKER_HOST");
                    return Ok(docker);
                }
                Err(e) => {
                    debug!("DOCKER_HOST connection failed: {}", e);
                }
            }
        }

        match Docker::connect_with_local_defaults() {
            Ok(docker) => {
                info!("Connected to container runtime via local defaults");
                return Ok(docker);
            }
            Err(e) => {
                debug!("Local defaults failed: {}", e);
            }
        }

        #[cfg(unix)]
        {
            // Try rootless Podman socket
            if let Ok(home) = std::env::var("HOME") {
                let podman_socket = format!("unix://{}/run/podman/podman.sock", home);
                debug!("Trying Podman socket: {}", podman_socket);

                match Docker::connect_with_socket(&podman_socket, 120, bollard::API_DEFAULT_VERSION)
                {
                    Ok(docker) => {
                        info!("Connected to Podman via rootless socket");
                        return Ok(docker);
                    }
                    Err(e) => {
                        debug!("Podman rootless socket failed: {}", e);
                    }
                }
            }

            // Try system Podman socket
            let system_socket = "unix:///run/podman/podman.sock";
            debug!("Trying system Podman socket: {}", system_socket);

            match Docker::connect_with_socket(system_socket, 120, bollard::API_DEFAULT_VERSION) {
                Ok(docker) => {
                    info!("Connected to Podman via system socket");
                    return Ok(docker);
                }
                Err(e) => {
                    debug!("Podman system socket failed: {}", e);
                }
            }
        }

        Err(EngineError::Unavailable(
            "failed to connect to Docker or Podman; ensure a daemon is installed and running"
                .to_string(),
        ))
    }

    /// Ping the container runtime to verify connectivity.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Unavailable`] if the ping fails.
    pub async fn ping(&self) -> Result<()> {
        self.docker
            .ping()
            .await
            .map_err(|e| EngineError::Unavailable(format!("ping failed: {}", e)))?;
        debug!("Container runtime ping successful");
        Ok(())
    }

    /// Probe the daemon for the health endpoint.
    ///
    /// Never fails; an unreachable daemon yields `reachable: false`.
    pub async fn health(&self) -> HealthReport {
        match self.docker.version().await {
            Ok(version) => HealthReport {
                reachable: true,
                version: version.version,
            },
            Err(e) => {
                debug!("Health probe failed: {}", e);
                HealthReport {
                    reachable: false,
                    version: None,
                }
            }
        }
    }

    /// Check if an image exists locally.
    ///
    /// # Errors
    ///
    /// Returns error if image inspection fails for reasons other than 404.
    pub async fn image_exists(&self, image: &str) -> Result<bool> {
        match self.docker.inspect_image(image).await {
            Ok(_) => Ok(true),
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(false),
            Err(e) => Err(EngineError::Api(e)),
        }
    }

    /// Check if a named volume exists.
    ///
    /// # Errors
    ///
    /// Returns error if volume inspection fails for reasons other than 404.
    pub async fn volume_exists(&self, name: &str) -> Result<bool> {
        match self.docker.inspect_volume(name).await {
            Ok(_) => Ok(true),
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(false),
            Err(e) => Err(EngineError::Api(e)),
        }
    }

    /// Get the underlying Docker client.
    ///
    /// This provides direct access to the bollard Docker API.
    pub fn docker(&self) -> &Docker {
        &self.docker
    }
}

/// Daemon health probe result.
#[derive(Debug, Clone, serde::Serialize)]
pub struct HealthReport {
    /// Whether the daemon answered the version query
    pub reachable: bool,
    /// Daemon version string, when reachable
    pub version: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    #[ignore] // Requires Docker/Podman to be running
    async fn test_client_connection() {
        let client = DockerClient::new().await.unwrap();
        client.ping().await.unwrap();
    }

    #[tokio::test]
    #[ignore]
    async fn test_health_report() {
        let client = DockerClient::new().await.unwrap();
        let report = client.health().await;
        assert!(report.reachable);
        println!("Version: {:?}", report.version);
    }
}
