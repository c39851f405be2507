//! Request/response wire types and the volume spec resolver.
//!
//! An [`ExecutionRequest`] arrives with volumes as a map from mount key
//! (`<container_path>[:ro|:rw]`) to a loosely-typed payload. The resolver
//! validates each entry and classifies it into the closed [`VolumeSpec`]
//! sum type, so downstream staging and execution never re-check fields.
//! Resolution order is deterministic: the map is a `BTreeMap`, so entries
//! resolve in lexicographic key order.

use crate::engine::{EngineError, Result};
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use serde::{Deserialize, Serialize, Serializer};
use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;

/// Default registry used when auth credentials omit a server address.
pub const DEFAULT_REGISTRY: &str = "https://index.docker.io/v1/";

/// Fixed child name for staged single-file mounts.
pub const FILE_MOUNT_NAME: &str = "data";

/// A request to run one disposable container.
///
/// Immutable once accepted; every field beyond `image` is optional.
#[derive(Debug, Clone, Deserialize)]
pub struct ExecutionRequest {
    /// Image reference, e.g. `alpine:latest`
    pub image: String,
    /// Command: argv list or a single shell string
    #[serde(default)]
    pub command: Option<CommandLine>,
    /// Entrypoint override, same shape as `command`
    #[serde(default)]
    pub entrypoint: Option<CommandLine>,
    /// Environment variables; values may be strings, numbers, or booleans
    #[serde(default)]
    pub env_vars: BTreeMap<String, serde_json::Value>,
    /// When to pull the image
    #[serde(default)]
    pub pull_policy: PullPolicy,
    /// Registry credentials for the pull
    #[serde(default)]
    pub auth_config: Option<RegistryAuth>,
    /// Mount key -> volume spec payload
    #[serde(default)]
    pub volumes: BTreeMap<String, VolumeSpecPayload>,
}

/// Command or entrypoint: an explicit argv list, or one string run through
/// the shell.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum CommandLine {
    /// Single string, executed as `/bin/sh -c <string>`
    Shell(String),
    /// Explicit argument vector, passed to the engine as-is
    Argv(Vec<String>),
}

impl CommandLine {
    /// Resolve to the argv the engine receives.
    pub fn into_argv(self) -> Vec<String> {
        match self {
            CommandLine::Shell(cmd) => {
                vec!["/bin/sh".to_string(), "-c".to_string(), cmd]
            }
            CommandLine::Argv(argv) => argv,
        }
    }
}

/// Image pull policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PullPolicy {
    /// Pull the image before every run (default)
    #[default]
    Always,
    /// Never pull; fail if the image is absent locally
    Never,
}

/// Registry authentication for image pulls.
#[derive(Debug, Clone, Deserialize)]
pub struct RegistryAuth {
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default = "default_registry")]
    pub serveraddress: String,
}

fn default_registry() -> String {
    DEFAULT_REGISTRY.to_string()
}

/// Raw wire payload for one volume entry, before classification.
///
/// Every field is optional here; the resolver enforces the per-variant
/// requirements and rejects whatever a variant does not support.
#[derive(Debug, Clone, Deserialize)]
pub struct VolumeSpecPayload {
    /// Variant discriminant: `file`, `directory`, `volume`, or `host`
    #[serde(rename = "type")]
    pub kind: Option<String>,
    /// Base64 payload (`file`, `directory`)
    pub content: Option<String>,
    /// POSIX octal mode string, e.g. `"0755"` (`file` only)
    pub mode: Option<String>,
    /// Named engine volume (`volume`)
    pub name: Option<String>,
    /// Absolute host path (`host`)
    pub host_path: Option<String>,
    /// Capture the mount's contents into the response (`file`, `directory`)
    #[serde(default)]
    pub response: bool,
}

/// Access mode for a mount, parsed from the mount key suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    ReadOnly,
    ReadWrite,
}

impl AccessMode {
    /// Bind-string suffix understood by the engine.
    pub fn as_str(self) -> &'static str {
        match self {
            AccessMode::ReadOnly => "ro",
            AccessMode::ReadWrite => "rw",
        }
    }
}

/// A parsed mount key: `<container_path>[:ro|:rw]`.
///
/// The raw string is kept verbatim because it keys the captured-volumes map
/// in the response exactly as the caller supplied it.
#[derive(Debug, Clone)]
pub struct MountKey {
    /// Key exactly as supplied, including any suffix
    pub raw: String,
    /// Absolute path inside the container
    pub container_path: String,
    /// Access mode; defaults to read-write when no suffix is present
    pub access: AccessMode,
}

impl MountKey {
    /// Parse a mount key, rejecting non-absolute container paths.
    pub fn parse(raw: &str) -> Result<Self> {
        let (path, access) = if let Some(path) = raw.strip_suffix(":ro") {
            (path, AccessMode::ReadOnly)
        } else if let Some(path) = raw.strip_suffix(":rw") {
            (path, AccessMode::ReadWrite)
        } else {
            (raw, AccessMode::ReadWrite)
        };

        if !path.starts_with('/') {
            return Err(EngineError::Validation(format!(
                "mount key '{}': container path must be absolute",
                raw
            )));
        }

        Ok(Self {
            raw: raw.to_string(),
            container_path: path.to_string(),
            access,
        })
    }
}

/// A validated volume spec. Each variant carries only its valid fields.
#[derive(Debug, Clone)]
pub enum VolumeSpec {
    /// Inline file, staged into an engine-owned temp directory
    File {
        contents: Vec<u8>,
        mode: Option<u32>,
        capture: bool,
    },
    /// Inline directory tree, shipped as a gzip tar archive
    Directory { archive: Vec<u8>, capture: bool },
    /// Pre-existing named engine volume
    Volume { name: String },
    /// Bind of an existing host path
    Host { path: PathBuf },
}

impl VolumeSpec {
    /// Whether this spec's contents are re-read into the response.
    pub fn captures(&self) -> bool {
        match self {
            VolumeSpec::File { capture, .. } | VolumeSpec::Directory { capture, .. } => *capture,
            VolumeSpec::Volume { .. } | VolumeSpec::Host { .. } => false,
        }
    }

    fn from_payload(key: &str, payload: &VolumeSpecPayload) -> Result<Self> {
        let kind = payload.kind.as_deref().ok_or_else(|| {
            EngineError::Validation(format!("volume '{}': missing 'type' field", key))
        })?;

        match kind {
            "file" => Ok(VolumeSpec::File {
                contents: decode_content(key, payload)?,
                mode: payload.mode.as_deref().map(|m| parse_mode(key, m)).transpose()?,
                capture: payload.response,
            }),
            "directory" => Ok(VolumeSpec::Directory {
                archive: decode_content(key, payload)?,
                capture: payload.response,
            }),
            "volume" => {
                if payload.response {
                    return Err(EngineError::Validation(format!(
                        "volume '{}': response capture is not supported for 'volume' mounts",
                        key
                    )));
                }
                let name = payload.name.as_deref().ok_or_else(|| {
                    EngineError::Validation(format!(
                        "volume '{}': 'name' is required for type 'volume'",
                        key
                    ))
                })?;
                Ok(VolumeSpec::Volume {
                    name: name.to_string(),
                })
            }
            "host" => {
                if payload.response {
                    return Err(EngineError::Validation(format!(
                        "volume '{}': response capture is not supported for 'host' mounts",
                        key
                    )));
                }
                let host_path = payload.host_path.as_deref().ok_or_else(|| {
                    EngineError::Validation(format!(
                        "volume '{}': 'host_path' is required for type 'host'",
                        key
                    ))
                })?;
                if !host_path.starts_with('/') {
                    return Err(EngineError::Validation(format!(
                        "volume '{}': host_path must be absolute",
                        key
                    )));
                }
                Ok(VolumeSpec::Host {
                    path: PathBuf::from(host_path),
                })
            }
            other => Err(EngineError::Validation(format!(
                "volume '{}': unknown type '{}'",
                key, other
            ))),
        }
    }
}

fn decode_content(key: &str, payload: &VolumeSpecPayload) -> Result<Vec<u8>> {
    let content = payload.content.as_deref().ok_or_else(|| {
        EngineError::Validation(format!("volume '{}': 'content' is required", key))
    })?;

    BASE64.decode(content).map_err(|e| {
        EngineError::Validation(format!("volume '{}': content is not valid base64: {}", key, e))
    })
}

fn parse_mode(key: &str, mode: &str) -> Result<u32> {
    let parsed = u32::from_str_radix(mode, 8).map_err(|_| {
        EngineError::Validation(format!(
            "volume '{}': mode '{}' is not a valid octal permission string",
            key, mode
        ))
    })?;

    if parsed > 0o7777 {
        return Err(EngineError::Validation(format!(
            "volume '{}': mode '{}' is out of range",
            key, mode
        )));
    }

    Ok(parsed)
}

/// Resolve the request's volume map into an ordered list of validated
/// (mount key, spec) pairs.
///
/// # Errors
///
/// Returns [`EngineError::Validation`] naming the offending key for any
/// malformed entry, duplicate container path, or unsupported capture
/// request.
pub fn resolve_volumes(
    volumes: &BTreeMap<String, VolumeSpecPayload>,
) -> Result<Vec<(MountKey, VolumeSpec)>> {
    let mut seen = HashSet::new();
    let mut resolved = Vec::with_capacity(volumes.len());

    for (raw, payload) in volumes {
        let key = MountKey::parse(raw)?;

        if !seen.insert(key.container_path.clone()) {
            return Err(EngineError::Validation(format!(
                "mount key '{}': duplicate container path '{}'",
                raw, key.container_path
            )));
        }

        let spec = VolumeSpec::from_payload(raw, payload)?;
        resolved.push((key, spec));
    }

    Ok(resolved)
}

/// Coerce env var values to `KEY=value` strings.
///
/// Strings pass through; numbers and booleans use their JSON display form.
/// Anything else (null, arrays, objects) is rejected.
pub fn env_to_strings(env: &BTreeMap<String, serde_json::Value>) -> Result<Vec<String>> {
    env.iter()
        .map(|(key, value)| {
            let rendered = match value {
                serde_json::Value::String(s) => s.clone(),
                serde_json::Value::Number(n) => n.to_string(),
                serde_json::Value::Bool(b) => b.to_string(),
                other => {
                    return Err(EngineError::Validation(format!(
                        "env var '{}': expected string, number, or boolean, got {}",
                        key, other
                    )));
                }
            };
            Ok(format!("{}={}", key, rendered))
        })
        .collect()
}

/// Outcome of one container execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionStatus {
    /// Container exited with code 0
    Success,
    /// Container exited with the given nonzero code
    Failed(i64),
}

impl ExecutionStatus {
    pub fn success(self) -> bool {
        matches!(self, ExecutionStatus::Success)
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionStatus::Success => write!(f, "success"),
            ExecutionStatus::Failed(code) => write!(f, "error: {}", code),
        }
    }
}

impl Serialize for ExecutionStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

/// Captured contents of one response-flagged mount.
#[derive(Debug, Clone, Serialize)]
pub struct CapturedVolume {
    /// Originating variant: `file` or `directory`
    #[serde(rename = "type")]
    pub kind: &'static str,
    /// Base64 of the file bytes (`file`) or of a gzip tar archive
    /// (`directory`)
    pub content: String,
}

/// Result of one execution, returned to the caller and never retained.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionResult {
    /// `"success"` or `"error: <exit_code>"`
    pub status: ExecutionStatus,
    /// Full captured stdout
    pub stdout: String,
    /// Full captured stderr
    pub stderr: String,
    /// Elapsed wall-clock seconds
    pub execution_time: f64,
    /// Captured contents, keyed by the raw mount key as supplied
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub volumes: BTreeMap<String, CapturedVolume>,
}
