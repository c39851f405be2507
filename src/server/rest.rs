//! REST API endpoints.
//!
//! `POST /run` executes one disposable container, `POST /volumes` creates a
//! named engine volume, `GET /health` probes the daemon. Engine errors map
//! to status codes with `{error, code}` bodies.

use crate::engine::{EngineError, ExecutionRequest, ExecutionResult};
use crate::server::AppState;
use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Error response format.
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    code: String,
}

/// Engine error wrapper carrying the HTTP mapping.
pub struct ApiError(EngineError);

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = match &self.0 {
            EngineError::Validation(_) => (StatusCode::BAD_REQUEST, "validation_error"),
            EngineError::Auth(_) => (StatusCode::UNAUTHORIZED, "auth_error"),
            EngineError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            EngineError::Unavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, "engine_unavailable"),
            EngineError::Timeout(_) => (StatusCode::GATEWAY_TIMEOUT, "timeout"),
            EngineError::Api(_) => (StatusCode::INTERNAL_SERVER_ERROR, "engine_error"),
            EngineError::Io(_) => (StatusCode::INTERNAL_SERVER_ERROR, "io_error"),
        };

        let body = ErrorResponse {
            error: self.0.to_string(),
            code: code.to_string(),
        };

        (status, Json(body)).into_response()
    }
}

/// POST /run
///
/// Execute one disposable container. Returns 200 with the full result for
/// both zero and nonzero exits; the `status` field distinguishes them.
pub async fn run_container(
    State(state): State<AppState>,
    Json(request): Json<ExecutionRequest>,
) -> Result<Json<ExecutionResult>, ApiError> {
    debug!("POST /run image={}", request.image);
    let result = state.runner.execute(request).await?;
    Ok(Json(result))
}

/// Request body for volume creation.
#[derive(Debug, Deserialize)]
pub struct CreateVolumeRequest {
    pub name: String,
    /// Optional base64 gzip tar archive to seed the volume with
    #[serde(default)]
    pub content: Option<String>,
}

#[derive(Serialize)]
struct CreateVolumeResponse {
    status: &'static str,
    name: String,
}

/// POST /volumes
///
/// Create a named engine volume, optionally pre-populated from an archive.
pub async fn create_volume(
    State(state): State<AppState>,
    Json(request): Json<CreateVolumeRequest>,
) -> Result<Response, ApiError> {
    debug!("POST /volumes name={}", request.name);

    let seed = request
        .content
        .as_deref()
        .map(|content| {
            BASE64.decode(content).map_err(|e| {
                EngineError::Validation(format!("content is not valid base64: {}", e))
            })
        })
        .transpose()?;

    let name = state
        .volumes
        .create_volume(&request.name, seed.as_deref())
        .await?;

    let body = CreateVolumeResponse {
        status: "created",
        name,
    };
    Ok((StatusCode::CREATED, Json(body)).into_response())
}

/// GET /health
///
/// Read-only daemon probe: 200 when the engine answers, 503 otherwise.
pub async fn health_check(State(state): State<AppState>) -> Response {
    let report = state.runner.client().health().await;

    let (status, label) = if report.reachable {
        (StatusCode::OK, "healthy")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "unhealthy")
    };

    let body = serde_json::json!({
        "status": label,
        "engine": report,
    });

    (status, Json(body)).into_response()
}
