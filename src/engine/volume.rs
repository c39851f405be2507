//! Named engine volume management.
//!
//! Creates named volumes, optionally pre-populated from a gzip tar archive
//! unpacked into the volume's mountpoint. Population assumes the server
//! shares a filesystem with the daemon, the same assumption the bind-mount
//! staging strategies make.

use crate::engine::client::DockerClient;
use crate::engine::{EngineError, Result, archive};
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info};

/// Manager for named engine volumes.
#[derive(Clone)]
pub struct VolumeManager {
    client: DockerClient,
}

impl VolumeManager {
    /// Create a new volume manager.
    pub fn new(client: DockerClient) -> Self {
        Self { client }
    }

    /// Create a named volume, optionally seeding it from an archive.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Validation`] for an empty name or a bad
    /// archive, [`EngineError::Api`] if the engine rejects the creation.
    pub async fn create_volume(&self, name: &str, seed: Option<&[u8]>) -> Result<String> {
        if name.trim().is_empty() {
            return Err(EngineError::Validation(
                "volume name must not be empty".to_string(),
            ));
        }

        debug!("Creating volume: {}", name);

        let response = self
            .client
            .docker()
            .create_volume(bollard::volume::CreateVolumeOptions {
                name,
                driver: "local",
                driver_opts: HashMap::new(),
                labels: HashMap::new(),
            })
            .await?;

        info!("Created volume: {}", response.name);

        if let Some(bytes) = seed {
            let mountpoint = response.mountpoint.clone();
            if mountpoint.is_empty() {
                return Err(EngineError::Unavailable(format!(
                    "volume '{}' reports no mountpoint; cannot seed content",
                    response.name
                )));
            }

            archive::unpack_archive(bytes, Path::new(&mountpoint))?;
            info!("Seeded volume {} from archive", response.name);
        }

        Ok(response.name)
    }

    /// Check if a named volume exists.
    ///
    /// # Errors
    ///
    /// Returns error if volume inspection fails.
    pub async fn volume_exists(&self, name: &str) -> Result<bool> {
        self.client.volume_exists(name).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn offline_manager() -> VolumeManager {
        VolumeManager::new(DockerClient::from_docker(
            bollard::Docker::connect_with_local_defaults().expect("lazy client"),
        ))
    }

    #[tokio::test]
    async fn test_empty_name_rejected() {
        let err = offline_manager().create_volume("  ", None).await.unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }

    #[tokio::test]
    #[ignore] // Requires Docker/Podman
    async fn test_volume_lifecycle() {
        let client = DockerClient::new().await.unwrap();
        let manager = VolumeManager::new(client.clone());

        let name = format!("test-volume-{}", uuid::Uuid::new_v4());
        let created = manager.create_volume(&name, None).await.unwrap();
        assert!(manager.volume_exists(&created).await.unwrap());

        client
            .docker()
            .remove_volume(
                &created,
                Some(bollard::volume::RemoveVolumeOptions { force: true }),
            )
            .await
            .unwrap();
    }
}
