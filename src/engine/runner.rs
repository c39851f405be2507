//! Container execution controller.
//!
//! Drives one disposable container end to end: resolve and stage volumes,
//! pull the image per the requested policy, create and start the container,
//! wait for completion under the execution timeout, collect output, capture
//! response volumes, and remove the container. Staged resources tear down
//! via [`StagedMounts`]'s drop on every exit path.

use crate::engine::client::DockerClient;
use crate::engine::spec::{
    self, ExecutionRequest, ExecutionResult, ExecutionStatus, PullPolicy, RegistryAuth,
};
use crate::engine::staging::StagedMounts;
use crate::engine::{EngineError, Result};
use bollard::auth::DockerCredentials;
use bollard::service::HostConfig;
use futures::stream::StreamExt;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Runner configuration.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Maximum seconds a container may run before it is forcibly removed
    pub timeout_secs: u64,
    /// Container name prefix
    pub name_prefix: String,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 300,
            name_prefix: "docker-runner".to_string(),
        }
    }
}

/// Executes one-off containers with staged volume mounts.
#[derive(Clone)]
pub struct ContainerRunner {
    client: DockerClient,
    config: RunnerConfig,
}

impl ContainerRunner {
    /// Create a runner with default configuration.
    pub fn new(client: DockerClient) -> Self {
        Self::with_config(client, RunnerConfig::default())
    }

    /// Create a runner with custom configuration.
    pub fn with_config(client: DockerClient, config: RunnerConfig) -> Self {
        Self { client, config }
    }

    /// Get the underlying client.
    pub fn client(&self) -> &DockerClient {
        &self.client
    }

    /// Execute a request end to end.
    ///
    /// A nonzero in-container exit is a successful execution whose result
    /// carries `status: "error: <code>"`; `Err` is reserved for system
    /// faults (validation, auth, missing resources, daemon failures,
    /// timeout).
    ///
    /// # Errors
    ///
    /// See [`EngineError`] for the taxonomy.
    pub async fn execute(&self, request: ExecutionRequest) -> Result<ExecutionResult> {
        let resolved = spec::resolve_volumes(&request.volumes)?;
        let env = spec::env_to_strings(&request.env_vars)?;

        // Owns every temp resource from here on; drops on all paths below.
        let staged = StagedMounts::provision(&self.client, resolved).await?;

        match request.pull_policy {
            PullPolicy::Always => {
                self.pull_image(&request.image, request.auth_config.as_ref())
                    .await?;
            }
            PullPolicy::Never => {
                if !self.client.image_exists(&request.image).await? {
                    return Err(EngineError::NotFound(format!(
                        "image '{}' is not present locally and pull_policy is 'never'",
                        request.image
                    )));
                }
            }
        }

        let container_id = self.create_container(&request, &staged, env).await?;

        let started = Instant::now();
        let run_outcome = async {
            let exit_code = self.run_to_completion(&container_id).await?;
            let output = self.collect_output(&container_id).await?;
            Ok::<_, EngineError>((exit_code, output))
        }
        .await;

        // The container is removed exactly once, whatever happened above.
        self.remove_container(&container_id).await;

        let (exit_code, (stdout, stderr)) = run_outcome?;
        let execution_time = started.elapsed().as_secs_f64();

        // Capture must precede teardown of the staged paths.
        let volumes = staged.capture()?;

        let status = if exit_code == 0 {
            ExecutionStatus::Success
        } else {
            ExecutionStatus::Failed(exit_code)
        };

        info!(
            "Container {} finished: {} in {:.3}s",
            container_id, status, execution_time
        );

        Ok(ExecutionResult {
            status,
            stdout,
            stderr,
            execution_time,
            volumes,
        })
    }

    /// Pull an image from a registry, with optional credentials.
    ///
    /// # Errors
    ///
    /// Auth rejections map to [`EngineError::Auth`], unknown images to
    /// [`EngineError::NotFound`].
    async fn pull_image(&self, image: &str, auth: Option<&RegistryAuth>) -> Result<()> {
        info!("Pulling image: {}", image);

        let credentials = auth.map(|auth| DockerCredentials {
            username: Some(auth.username.clone()),
            password: Some(auth.password.clone()),
            email: auth.email.clone(),
            serveraddress: Some(auth.serveraddress.clone()),
            ..Default::default()
        });

        let mut stream = self.client.docker().create_image(
            Some(bollard::image::CreateImageOptions {
                from_image: image,
                ..Default::default()
            }),
            None,
            credentials,
        );

        while let Some(result) = stream.next().await {
            match result {
                Ok(progress) => {
                    if let Some(status) = progress.status {
                        debug!("Pull status: {}", status);
                    }
                    if let Some(error) = progress.error {
                        return Err(classify_pull_failure(image, &error));
                    }
                }
                Err(bollard::errors::Error::DockerResponseServerError {
                    status_code,
                    message,
                }) => {
                    return Err(classify_pull_response(image, status_code, message));
                }
                Err(e) => return Err(EngineError::Api(e)),
            }
        }

        info!("Successfully pulled image: {}", image);
        Ok(())
    }

    /// Create the container with binds, env, command, and entrypoint.
    async fn create_container(
        &self,
        request: &ExecutionRequest,
        staged: &StagedMounts,
        env: Vec<String>,
    ) -> Result<String> {
        let container_name = format!("{}-{}", self.config.name_prefix, uuid::Uuid::new_v4());

        let options = bollard::container::CreateContainerOptions {
            name: container_name.as_str(),
            ..Default::default()
        };

        let binds = staged.binds();
        let host_config = HostConfig {
            binds: if binds.is_empty() { None } else { Some(binds) },
            ..Default::default()
        };

        let config = bollard::container::Config {
            image: Some(request.image.clone()),
            cmd: request.command.clone().map(|c| c.into_argv()),
            entrypoint: request.entrypoint.clone().map(|e| e.into_argv()),
            env: if env.is_empty() { None } else { Some(env) },
            host_config: Some(host_config),
            ..Default::default()
        };

        debug!("Creating container: {}", container_name);

        let response = self
            .client
            .docker()
            .create_container(Some(options), config)
            .await
            .map_err(|e| match e {
                bollard::errors::Error::DockerResponseServerError {
                    status_code: 404,
                    message,
                } => EngineError::NotFound(format!("image '{}': {}", request.image, message)),
                e => EngineError::Api(e),
            })?;

        info!("Created container: {} ({})", container_name, response.id);
        Ok(response.id)
    }

    /// Start the container and wait for it to exit, bounded by the
    /// execution timeout.
    ///
    /// Returns the exit code. On timeout the caller force-removes the
    /// container; this function only reports the distinct outcome.
    async fn run_to_completion(&self, container_id: &str) -> Result<i64> {
        debug!("Starting container: {}", container_id);

        self.client
            .docker()
            .start_container(
                container_id,
                None::<bollard::container::StartContainerOptions<String>>,
            )
            .await?;

        let wait = self.wait_for_exit(container_id);
        match tokio::time::timeout(Duration::from_secs(self.config.timeout_secs), wait).await {
            Ok(exit_code) => exit_code,
            Err(_) => {
                warn!(
                    "Container {} exceeded the {}s timeout",
                    container_id, self.config.timeout_secs
                );
                Err(EngineError::Timeout(self.config.timeout_secs))
            }
        }
    }

    /// Block until the container stops and return its exit code.
    async fn wait_for_exit(&self, container_id: &str) -> Result<i64> {
        let mut stream = self.client.docker().wait_container(
            container_id,
            Some(bollard::container::WaitContainerOptions {
                condition: "not-running",
            }),
        );

        match stream.next().await {
            Some(Ok(response)) => Ok(response.status_code),
            // bollard reports nonzero exits through the wait error channel
            Some(Err(bollard::errors::Error::DockerContainerWaitError { code, .. })) => Ok(code),
            Some(Err(e)) => Err(EngineError::Api(e)),
            None => Err(EngineError::Unavailable(
                "container wait stream closed unexpectedly".to_string(),
            )),
        }
    }

    /// Drain the stopped container's stdout and stderr fully into memory.
    ///
    /// Acceptable for one-off short-lived containers; nothing here streams
    /// back to the caller.
    async fn collect_output(&self, container_id: &str) -> Result<(String, String)> {
        let mut stream = self.client.docker().logs(
            container_id,
            Some(bollard::container::LogsOptions {
                stdout: true,
                stderr: true,
                tail: "all".to_string(),
                ..Default::default()
            }),
        );

        let mut stdout = String::new();
        let mut stderr = String::new();

        while let Some(result) = stream.next().await {
            match result {
                Ok(log) => {
                    let text = log.to_string();
                    match log {
                        bollard::container::LogOutput::StdOut { .. } => stdout.push_str(&text),
                        bollard::container::LogOutput::StdErr { .. } => stderr.push_str(&text),
                        _ => {}
                    }
                }
                Err(e) => return Err(EngineError::Api(e)),
            }
        }

        Ok((stdout, stderr))
    }

    /// Remove the container, logging failures instead of raising them so a
    /// removal problem never masks the execution outcome.
    async fn remove_container(&self, container_id: &str) {
        let result = self
            .client
            .docker()
            .remove_container(
                container_id,
                Some(bollard::container::RemoveContainerOptions {
                    force: true,
                    v: true,
                    ..Default::default()
                }),
            )
            .await;

        match result {
            Ok(()) => debug!("Removed container: {}", container_id),
            Err(e) => warn!("Failed to remove container {}: {}", container_id, e),
        }
    }
}

/// Classify an in-stream pull failure message.
fn classify_pull_failure(image: &str, message: &str) -> EngineError {
    let lowered = message.to_lowercase();
    if lowered.contains("unauthorized") || lowered.contains("authentication") {
        EngineError::Auth(message.to_string())
    } else if lowered.contains("not found") || lowered.contains("manifest unknown") {
        EngineError::NotFound(format!("image '{}': {}", image, message))
    } else {
        EngineError::Unavailable(format!("pull of '{}' failed: {}", image, message))
    }
}

/// Classify a registry HTTP error from the pull stream.
fn classify_pull_response(image: &str, status_code: u16, message: String) -> EngineError {
    match status_code {
        401 | 403 => EngineError::Auth(message),
        404 => EngineError::NotFound(format!("image '{}': {}", image, message)),
        // Docker Hub surfaces credential rejections as 500s with an
        // "unauthorized" body
        500 if message.to_lowercase().contains("unauthorized") => EngineError::Auth(message),
        _ => EngineError::Api(bollard::errors::Error::DockerResponseServerError {
            status_code,
            message,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RunnerConfig::default();
        assert_eq!(config.timeout_secs, 300);
        assert_eq!(config.name_prefix, "docker-runner");
    }

    #[test]
    fn test_pull_response_auth_classification() {
        let err = classify_pull_response("private:latest", 401, "unauthorized".to_string());
        assert!(matches!(err, EngineError::Auth(_)));

        let err = classify_pull_response(
            "private:latest",
            500,
            "unauthorized: incorrect username or password".to_string(),
        );
        assert!(matches!(err, EngineError::Auth(_)));
    }

    #[test]
    fn test_pull_response_not_found_classification() {
        let err = classify_pull_response("ghost:latest", 404, "manifest unknown".to_string());
        assert!(matches!(err, EngineError::NotFound(_)));
        assert!(err.to_string().contains("ghost:latest"));
    }

    #[test]
    fn test_pull_failure_message_classification() {
        let err = classify_pull_failure("x:y", "manifest unknown: manifest unknown");
        assert!(matches!(err, EngineError::NotFound(_)));

        let err = classify_pull_failure("x:y", "unauthorized: access denied");
        assert!(matches!(err, EngineError::Auth(_)));

        let err = classify_pull_failure("x:y", "connection reset by peer");
        assert!(matches!(err, EngineError::Unavailable(_)));
    }
}
