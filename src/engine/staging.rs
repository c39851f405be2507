//! Ephemeral mount staging and teardown.
//!
//! [`StagedMounts::provision`] materializes resolved volume specs into real
//! filesystem resources under a per-request temp root
//! (`$TMPDIR/docker-runner-<uuid>/`). The staged set owns everything it
//! creates and removes the whole root in its `Drop` impl, so teardown runs
//! on every exit path — including a failure partway through provisioning.
//! Named volumes and host paths are only referenced, never owned.

use crate::engine::archive;
use crate::engine::client::DockerClient;
use crate::engine::spec::{CapturedVolume, FILE_MOUNT_NAME, MountKey, VolumeSpec};
use crate::engine::{EngineError, Result};
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

/// Host-side source a mount binds from.
#[derive(Debug, Clone)]
enum BindSource {
    /// Engine-created temp file or directory, destroyed at teardown
    Owned(PathBuf),
    /// Pre-existing named engine volume, never destroyed
    Volume(String),
    /// Caller-owned host path, never destroyed
    Host(PathBuf),
}

/// One provisioned mount: the validated spec bound to its host-side source.
#[derive(Debug)]
struct StagedMount {
    key: MountKey,
    spec: VolumeSpec,
    source: BindSource,
}

impl StagedMount {
    /// Engine bind string: `<source>:<container_path>:<ro|rw>`.
    fn bind_string(&self) -> String {
        let source = match &self.source {
            BindSource::Owned(path) | BindSource::Host(path) => path.display().to_string(),
            BindSource::Volume(name) => name.clone(),
        };
        format!(
            "{}:{}:{}",
            source,
            self.key.container_path,
            self.key.access.as_str()
        )
    }
}

/// The full set of provisioned mounts for one execution.
///
/// Dropping the set removes the per-request temp root; removal failures are
/// logged and swallowed so they never mask the primary outcome.
#[derive(Debug)]
pub struct StagedMounts {
    root: Option<PathBuf>,
    mounts: Vec<StagedMount>,
}

impl StagedMounts {
    /// Materialize resolved specs in order.
    ///
    /// The temp root is created (and owned) before the first entry, so an
    /// error on any later entry rolls back everything staged so far when
    /// the returned-by-value set drops.
    ///
    /// # Errors
    ///
    /// [`EngineError::NotFound`] for a missing named volume,
    /// [`EngineError::Validation`] for a missing host path or escaping
    /// archive entry, [`EngineError::Io`] for filesystem failures.
    pub async fn provision(
        client: &DockerClient,
        resolved: Vec<(MountKey, VolumeSpec)>,
    ) -> Result<Self> {
        let mut staged = Self {
            root: None,
            mounts: Vec::with_capacity(resolved.len()),
        };

        for (index, (key, spec)) in resolved.into_iter().enumerate() {
            let source = match &spec {
                VolumeSpec::File { contents, mode, .. } => {
                    let dir = staged.entry_dir(index)?;
                    let file_path = dir.join(FILE_MOUNT_NAME);
                    std::fs::write(&file_path, contents)?;
                    if let Some(mode) = mode {
                        apply_mode(&file_path, *mode)?;
                    }
                    debug!(
                        "Staged file mount for {} at {}",
                        key.raw,
                        file_path.display()
                    );
                    BindSource::Owned(file_path)
                }
                VolumeSpec::Directory { archive: bytes, .. } => {
                    let dir = staged.entry_dir(index)?;
                    archive::unpack_archive(bytes, &dir)?;
                    debug!("Staged directory mount for {} at {}", key.raw, dir.display());
                    BindSource::Owned(dir)
                }
                VolumeSpec::Volume { name } => {
                    if !client.volume_exists(name).await? {
                        return Err(EngineError::NotFound(format!(
                            "named volume '{}' does not exist",
                            name
                        )));
                    }
                    BindSource::Volume(name.clone())
                }
                VolumeSpec::Host { path } => {
                    if !path.exists() {
                        return Err(EngineError::Validation(format!(
                            "host path '{}' does not exist",
                            path.display()
                        )));
                    }
                    BindSource::Host(path.clone())
                }
            };

            staged.mounts.push(StagedMount { key, spec, source });
        }

        Ok(staged)
    }

    /// Create the numbered subdirectory for one entry, creating the
    /// request's temp root first if this is the first owned resource.
    fn entry_dir(&mut self, index: usize) -> Result<PathBuf> {
        let root = match &self.root {
            Some(root) => root.clone(),
            None => {
                let root = std::env::temp_dir().join(format!("docker-runner-{}", Uuid::new_v4()));
                std::fs::create_dir_all(&root)?;
                debug!("Created staging root {}", root.display());
                self.root = Some(root.clone());
                root
            }
        };

        let dir = root.join(index.to_string());
        std::fs::create_dir(&dir)?;
        Ok(dir)
    }

    /// Bind strings for container creation, in resolution order.
    pub fn binds(&self) -> Vec<String> {
        self.mounts.iter().map(StagedMount::bind_string).collect()
    }

    /// Re-read capture-flagged mounts into response payloads.
    ///
    /// Must run after the container has stopped and before this set drops.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Io`] if a staged path cannot be re-read.
    pub fn capture(&self) -> Result<BTreeMap<String, CapturedVolume>> {
        let mut captured = BTreeMap::new();

        for mount in &self.mounts {
            if !mount.spec.captures() {
                continue;
            }

            let BindSource::Owned(path) = &mount.source else {
                // resolver guarantees capture is only set on owned variants
                continue;
            };

            let volume = match &mount.spec {
                VolumeSpec::File { .. } => CapturedVolume {
                    kind: "file",
                    content: BASE64.encode(std::fs::read(path)?),
                },
                VolumeSpec::Directory { .. } => CapturedVolume {
                    kind: "directory",
                    content: BASE64.encode(archive::pack_dir(path)?),
                },
                VolumeSpec::Volume { .. } | VolumeSpec::Host { .. } => continue,
            };

            captured.insert(mount.key.raw.clone(), volume);
        }

        Ok(captured)
    }
}

impl Drop for StagedMounts {
    fn drop(&mut self) {
        let Some(root) = self.root.take() else {
            return;
        };

        match std::fs::remove_dir_all(&root) {
            Ok(()) => debug!("Removed staging root {}", root.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove staging root {}: {}", root.display(), e),
        }
    }
}

#[cfg(unix)]
fn apply_mode(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))?;
    Ok(())
}

#[cfg(not(unix))]
fn apply_mode(_path: &Path, _mode: u32) -> Result<()> {
    Ok(())
}
