//! Transport-level tests for the REST and MCP endpoints.
//!
//! These exercise request validation and protocol plumbing only, so they
//! run without a Docker daemon: the lazily-connected client never issues an
//! API call before validation rejects the request.

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use docker_runner::engine::{DockerClient, RunnerConfig};
use docker_runner::server::{AppState, create_app};
use tower::ServiceExt;

fn app() -> Router {
    let client = DockerClient::from_docker(
        bollard::Docker::connect_with_local_defaults().expect("lazy client"),
    );
    create_app(AppState::new(client, RunnerConfig::default()))
}

async fn post_json(app: Router, uri: &str, body: serde_json::Value) -> (StatusCode, serde_json::Value) {
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

#[tokio::test]
async fn test_run_rejects_relative_mount_key() {
    let (status, body) = post_json(
        app(),
        "/run",
        serde_json::json!({
            "image": "alpine:latest",
            "volumes": {
                "app/data": {"type": "file", "content": BASE64.encode(b"x")},
            },
        }),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "validation_error");
    assert!(body["error"].as_str().unwrap().contains("app/data"));
}

#[tokio::test]
async fn test_run_rejects_invalid_base64_content() {
    let (status, body) = post_json(
        app(),
        "/run",
        serde_json::json!({
            "image": "alpine:latest",
            "volumes": {
                "/data": {"type": "file", "content": "%%% not base64 %%%"},
            },
        }),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("base64"));
}

#[tokio::test]
async fn test_run_rejects_capture_on_host_mount() {
    let (status, body) = post_json(
        app(),
        "/run",
        serde_json::json!({
            "image": "alpine:latest",
            "volumes": {
                "/data": {"type": "host", "host_path": "/srv", "response": true},
            },
        }),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(
        body["error"]
            .as_str()
            .unwrap()
            .contains("response capture is not supported")
    );
}

#[tokio::test]
async fn test_run_rejects_structured_env_value() {
    let (status, body) = post_json(
        app(),
        "/run",
        serde_json::json!({
            "image": "alpine:latest",
            "env_vars": {"BAD": {"nested": true}},
        }),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "validation_error");
}

#[tokio::test]
async fn test_create_volume_rejects_bad_archive_encoding() {
    let (status, body) = post_json(
        app(),
        "/volumes",
        serde_json::json!({"name": "vol", "content": "!!!"}),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "validation_error");
}

#[tokio::test]
async fn test_health_reports_engine_state() {
    let (status, body) = post_health(app()).await;

    // Reachability depends on the test host; the shape does not.
    assert!(status == StatusCode::OK || status == StatusCode::SERVICE_UNAVAILABLE);
    assert!(body["engine"].get("reachable").is_some());
}

async fn post_health(app: Router) -> (StatusCode, serde_json::Value) {
    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

#[tokio::test]
async fn test_mcp_initialize_assigns_session() {
    let response = app()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/mcp")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(
                    serde_json::json!({
                        "jsonrpc": "2.0",
                        "id": 1,
                        "method": "initialize",
                        "params": {"protocolVersion": "2024-11-05"},
                    })
                    .to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("mcp-session-id"));

    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["id"], 1);
    assert_eq!(body["result"]["serverInfo"]["name"], "docker-runner");
}

#[tokio::test]
async fn test_mcp_tools_list() {
    let (status, body) = post_json(
        app(),
        "/mcp",
        serde_json::json!({"jsonrpc": "2.0", "id": 2, "method": "tools/list"}),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    let tools = body["result"]["tools"].as_array().unwrap();
    assert_eq!(tools.len(), 3);
}

#[tokio::test]
async fn test_mcp_unknown_method() {
    let (status, body) = post_json(
        app(),
        "/mcp",
        serde_json::json!({"jsonrpc": "2.0", "id": 3, "method": "prompts/list"}),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["error"]["code"], -32601);
}

#[tokio::test]
async fn test_mcp_parse_error() {
    let response = app()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/mcp")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from("{not json"))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["error"]["code"], -32700);
}

#[tokio::test]
async fn test_mcp_notification_gets_no_body() {
    let (status, body) = post_json(
        app(),
        "/mcp",
        serde_json::json!({"jsonrpc": "2.0", "method": "notifications/initialized"}),
    )
    .await;

    assert_eq!(status, StatusCode::NO_CONTENT);
    assert_eq!(body, serde_json::Value::Null);
}

#[tokio::test]
async fn test_mcp_delete_unknown_session() {
    let response = app()
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri("/mcp")
                .header("mcp-session-id", "no-such-session")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
