//! MCP (Model Context Protocol) endpoint.
//!
//! JSON-RPC 2.0 over `POST /mcp` with the `initialize`, `tools/list`, and
//! `tools/call` methods. The engine's three contracts surface as the
//! `run_container`, `create_volume`, and `docker_health` tools. Sessions
//! are keyed by the `Mcp-Session-Id` header, created on demand, expired
//! after one hour, and terminated by `DELETE /mcp`.

use crate::engine::ExecutionRequest;
use crate::server::AppState;
use axum::Json;
use axum::extract::State;
use axum::http::{HeaderMap, HeaderName, StatusCode};
use axum::response::{IntoResponse, Response};
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Protocol version offered when the client does not request one.
const DEFAULT_PROTOCOL_VERSION: &str = "2024-11-05";

/// Sessions idle longer than this are dropped.
const SESSION_TTL: Duration = Duration::from_secs(3600);

static SESSION_HEADER: HeaderName = HeaderName::from_static("mcp-session-id");

/// One MCP session.
#[derive(Debug)]
struct Session {
    created_at: Instant,
    protocol_version: String,
    initialized: bool,
}

impl Session {
    fn new(protocol_version: &str) -> Self {
        Self {
            created_at: Instant::now(),
            protocol_version: protocol_version.to_string(),
            initialized: false,
        }
    }

    fn expired(&self, ttl: Duration) -> bool {
        self.created_at.elapsed() > ttl
    }
}

/// Concurrent session table shared by all MCP handlers.
#[derive(Clone, Default)]
pub struct SessionStore {
    inner: Arc<DashMap<String, Session>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a session under the given or a generated id.
    fn create(&self, id: Option<String>) -> String {
        let id = id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        self.inner
            .insert(id.clone(), Session::new(DEFAULT_PROTOCOL_VERSION));
        id
    }

    /// Check liveness, dropping expired sessions as a side effect.
    fn is_live(&self, id: &str) -> bool {
        self.sweep(SESSION_TTL);
        self.inner.contains_key(id)
    }

    fn sweep(&self, ttl: Duration) {
        self.inner.retain(|_, session| !session.expired(ttl));
    }

    fn remove(&self, id: &str) -> bool {
        self.inner.remove(id).is_some()
    }

    fn initialize(&self, id: &str, protocol_version: &str) {
        if let Some(mut session) = self.inner.get_mut(id) {
            session.initialized = true;
            session.protocol_version = protocol_version.to_string();
        }
    }
}

/// JSON-RPC request envelope.
#[derive(Debug, Deserialize)]
pub struct McpRequest {
    #[serde(default)]
    pub id: Option<Value>,
    pub method: String,
    #[serde(default)]
    pub params: Option<Value>,
}

/// JSON-RPC response envelope.
#[derive(Debug, Serialize)]
pub struct McpResponse {
    pub jsonrpc: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<McpError>,
}

#[derive(Debug, Serialize)]
pub struct McpError {
    pub code: i64,
    pub message: String,
}

impl McpResponse {
    fn result(id: Option<Value>, result: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: Some(result),
            error: None,
        }
    }

    fn error(id: Option<Value>, code: i64, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: None,
            error: Some(McpError {
                code,
                message: message.into(),
            }),
        }
    }
}

/// POST /mcp
pub async fn post_mcp(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> Response {
    let session_id = resolve_session(&state, &headers);

    let request: McpRequest = match serde_json::from_str(&body) {
        Ok(request) => request,
        Err(e) => {
            warn!("MCP parse error: {}", e);
            let response = McpResponse::error(None, -32700, format!("Parse error: {}", e));
            return with_session(StatusCode::BAD_REQUEST, &session_id, Json(response));
        }
    };

    // A request without an id is a notification; it gets no response body.
    if request.id.is_none() {
        debug!("MCP notification: {}", request.method);
        return with_session(StatusCode::NO_CONTENT, &session_id, ());
    }

    let response = handle_request(&state, &session_id, request).await;
    with_session(StatusCode::OK, &session_id, Json(response))
}

/// DELETE /mcp
pub async fn delete_mcp(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let session_id = headers
        .get(&SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    match session_id {
        Some(id) if state.sessions.remove(&id) => {
            info!("Terminated MCP session {}", id);
            Json(json!({"message": format!("Session {} terminated", id)})).into_response()
        }
        _ => (
            StatusCode::NOT_FOUND,
            Json(json!({"error": "Session not found"})),
        )
            .into_response(),
    }
}

/// Resolve the session id from the header, creating or renewing as needed.
fn resolve_session(state: &AppState, headers: &HeaderMap) -> String {
    let supplied = headers
        .get(&SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    match supplied {
        Some(id) if state.sessions.is_live(&id) => {
            debug!("Using MCP session {}", id);
            id
        }
        Some(id) => {
            let id = state.sessions.create(Some(id));
            info!("Renewed MCP session {}", id);
            id
        }
        None => {
            let id = state.sessions.create(None);
            info!("Created MCP session {}", id);
            id
        }
    }
}

fn with_session(status: StatusCode, session_id: &str, body: impl IntoResponse) -> Response {
    (
        status,
        [(SESSION_HEADER.clone(), session_id.to_string())],
        body,
    )
        .into_response()
}

async fn handle_request(state: &AppState, session_id: &str, request: McpRequest) -> McpResponse {
    match request.method.as_str() {
        "initialize" => {
            let protocol_version = request
                .params
                .as_ref()
                .and_then(|p| p.get("protocolVersion"))
                .and_then(Value::as_str)
                .unwrap_or(DEFAULT_PROTOCOL_VERSION)
                .to_string();

            state.sessions.initialize(session_id, &protocol_version);

            McpResponse::result(
                request.id,
                json!({
                    "protocolVersion": protocol_version,
                    "capabilities": {"tools": {}},
                    "serverInfo": {
                        "name": "docker-runner",
                        "version": env!("CARGO_PKG_VERSION"),
                    },
                }),
            )
        }
        "tools/list" => McpResponse::result(request.id, json!({"tools": tool_descriptors()})),
        "tools/call" => {
            let params = request.params.unwrap_or_else(|| json!({}));
            let Some(tool) = params.get("name").and_then(Value::as_str) else {
                return McpResponse::error(request.id, -32601, "Missing or invalid tool name");
            };
            let arguments = params.get("arguments").cloned().unwrap_or_else(|| json!({}));

            match call_tool(state, tool, arguments).await {
                Some(result) => McpResponse::result(request.id, result),
                None => McpResponse::error(
                    request.id,
                    -32601,
                    format!("Tool '{}' not found", tool),
                ),
            }
        }
        method => McpResponse::error(
            request.id,
            -32601,
            format!("Method '{}' not found", method),
        ),
    }
}

/// Run one tool; `None` means the tool does not exist.
async fn call_tool(state: &AppState, tool: &str, arguments: Value) -> Option<Value> {
    let result = match tool {
        "run_container" => run_container_tool(state, arguments).await,
        "create_volume" => create_volume_tool(state, arguments).await,
        "docker_health" => docker_health_tool(state).await,
        _ => return None,
    };
    Some(result)
}

async fn run_container_tool(state: &AppState, arguments: Value) -> Value {
    let request: ExecutionRequest = match serde_json::from_value(arguments) {
        Ok(request) => request,
        Err(e) => return tool_error(format!("Invalid run_container arguments: {}", e)),
    };

    match state.runner.execute(request).await {
        Ok(result) => {
            let is_error = !result.status.success();
            let text = serde_json::to_string(&result)
                .unwrap_or_else(|e| format!("result serialization failed: {}", e));
            tool_text(text, is_error)
        }
        Err(e) => tool_error(format!("Container execution failed: {}", e)),
    }
}

async fn create_volume_tool(state: &AppState, arguments: Value) -> Value {
    let Some(name) = arguments.get("name").and_then(Value::as_str) else {
        return tool_error("Volume creation failed: 'name' is required".to_string());
    };

    let seed = match arguments.get("content").and_then(Value::as_str) {
        Some(content) => match BASE64.decode(content) {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                return tool_error(format!(
                    "Volume creation failed: content is not valid base64: {}",
                    e
                ));
            }
        },
        None => None,
    };

    match state.volumes.create_volume(name, seed.as_deref()).await {
        Ok(created) => tool_text(format!("Volume '{}' created successfully", created), false),
        Err(e) => tool_error(format!("Volume creation failed: {}", e)),
    }
}

async fn docker_health_tool(state: &AppState) -> Value {
    let report = state.runner.client().health().await;
    if report.reachable {
        tool_text(
            format!(
                "Docker daemon is healthy. Version: {}",
                report.version.as_deref().unwrap_or("unknown")
            ),
            false,
        )
    } else {
        tool_error("Docker health check failed: daemon unreachable".to_string())
    }
}

fn tool_text(text: String, is_error: bool) -> Value {
    let mut result = json!({
        "content": [{"type": "text", "text": text}],
    });
    if is_error {
        result["isError"] = json!(true);
    }
    result
}

fn tool_error(text: String) -> Value {
    tool_text(text, true)
}

fn tool_descriptors() -> Value {
    json!([
        {
            "name": "run_container",
            "description": "Execute a disposable Docker container with staged volumes and return its output",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "image": {"type": "string", "description": "Docker image to run"},
                    "command": {
                        "description": "Command: argv array or a single shell string",
                        "anyOf": [
                            {"type": "array", "items": {"type": "string"}},
                            {"type": "string"},
                        ],
                    },
                    "entrypoint": {
                        "description": "Entrypoint override, same shape as command",
                        "anyOf": [
                            {"type": "array", "items": {"type": "string"}},
                            {"type": "string"},
                        ],
                    },
                    "env_vars": {
                        "type": "object",
                        "description": "Environment variables (string, number, or boolean values)",
                    },
                    "pull_policy": {
                        "type": "string",
                        "enum": ["always", "never"],
                        "default": "always",
                        "description": "When to pull the image",
                    },
                    "auth_config": {
                        "type": "object",
                        "description": "Registry credentials for the pull",
                    },
                    "volumes": {
                        "type": "object",
                        "description": "Mount key (<container_path>[:ro|:rw]) to volume spec",
                    },
                },
                "required": ["image"],
            },
        },
        {
            "name": "create_volume",
            "description": "Create a named Docker volume, optionally seeded from a base64 gzip tar archive",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "name": {"type": "string", "description": "Volume name"},
                    "content": {
                        "type": "string",
                        "description": "Base64 gzip tar archive to unpack into the volume (optional)",
                    },
                },
                "required": ["name"],
            },
        },
        {
            "name": "docker_health",
            "description": "Check Docker daemon health and version",
            "inputSchema": {"type": "object", "properties": {}, "required": []},
        },
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{DockerClient, RunnerConfig};

    fn offline_state() -> AppState {
        AppState::new(
            DockerClient::from_docker(
                bollard::Docker::connect_with_local_defaults().expect("lazy client"),
            ),
            RunnerConfig::default(),
        )
    }

    fn request(id: Value, method: &str, params: Value) -> McpRequest {
        McpRequest {
            id: Some(id),
            method: method.to_string(),
            params: Some(params),
        }
    }

    #[test]
    fn test_session_lifecycle() {
        let store = SessionStore::new();

        let id = store.create(None);
        assert!(store.is_live(&id));

        assert!(store.remove(&id));
        assert!(!store.is_live(&id));
        assert!(!store.remove(&id));
    }

    #[test]
    fn test_session_expiry() {
        let store = SessionStore::new();
        let id = store.create(None);

        store.sweep(Duration::ZERO);
        assert!(!store.inner.contains_key(&id));
    }

    #[tokio::test]
    async fn test_initialize_marks_session() {
        let state = offline_state();
        let session_id = state.sessions.create(None);

        let response = handle_request(
            &state,
            &session_id,
            request(json!(1), "initialize", json!({"protocolVersion": "2025-01-01"})),
        )
        .await;

        let result = response.result.unwrap();
        assert_eq!(result["protocolVersion"], "2025-01-01");
        assert_eq!(result["serverInfo"]["name"], "docker-runner");
        assert!(state.sessions.inner.get(&session_id).unwrap().initialized);
    }

    #[tokio::test]
    async fn test_tools_list() {
        let state = offline_state();
        let session_id = state.sessions.create(None);

        let response = handle_request(
            &state,
            &session_id,
            request(json!(2), "tools/list", json!({})),
        )
        .await;

        let tools = response.result.unwrap()["tools"].clone();
        let names: Vec<&str> = tools
            .as_array()
            .unwrap()
            .iter()
            .map(|t| t["name"].as_str().unwrap())
            .collect();
        assert_eq!(names, vec!["run_container", "create_volume", "docker_health"]);
    }

    #[tokio::test]
    async fn test_unknown_method_rejected() {
        let state = offline_state();
        let session_id = state.sessions.create(None);

        let response = handle_request(
            &state,
            &session_id,
            request(json!(3), "resources/list", json!({})),
        )
        .await;

        let error = response.error.unwrap();
        assert_eq!(error.code, -32601);
    }

    #[tokio::test]
    async fn test_unknown_tool_rejected() {
        let state = offline_state();
        let session_id = state.sessions.create(None);

        let response = handle_request(
            &state,
            &session_id,
            request(
                json!(4),
                "tools/call",
                json!({"name": "list_images", "arguments": {}}),
            ),
        )
        .await;

        let error = response.error.unwrap();
        assert_eq!(error.code, -32601);
        assert!(error.message.contains("list_images"));
    }

    #[tokio::test]
    async fn test_run_container_tool_rejects_bad_arguments() {
        let state = offline_state();

        // Missing the required image field; fails before any engine call
        let result = run_container_tool(&state, json!({"command": ["echo"]})).await;

        assert_eq!(result["isError"], json!(true));
        let text = result["content"][0]["text"].as_str().unwrap();
        assert!(text.contains("Invalid run_container arguments"));
    }
}
