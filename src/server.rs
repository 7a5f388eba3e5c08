//! HTTP polling gateway.
//!
//! Exposes the four task manager operations (plus workspace listing and a
//! health check) over a JSON HTTP API. The gateway performs no business
//! logic: it validates input, passes through to the task manager, and maps
//! the error taxonomy to status codes. Pollers always get a well-formed
//! status or result — business failures never surface as transport errors.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/tasks` | Submit a processing task (202 + task id) |
//! | `GET`  | `/tasks/{id}` | Poll task status |
//! | `GET`  | `/tasks/{id}/result` | Fetch the result once completed |
//! | `POST` | `/tasks/{id}/cancel` | Request cooperative cancellation |
//! | `GET`  | `/workspaces` | List imported snapshots |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Error Contract
//!
//! All error responses share one schema:
//!
//! ```json
//! { "error": { "code": "not_ready", "message": "task ... is running, not completed" } }
//! ```
//!
//! Error codes: `validation` (422), `not_found` (404), `not_ready` (409),
//! `internal` (500).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted so browser-based
//! dashboards can poll directly.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};

use crate::config::Config;
use crate::error::DigestError;
use crate::models::TaskOptions;
use crate::store::SnapshotStore;
use crate::summarizer::create_summarizer;
use crate::task::{TaskManager, TaskManagerSettings};

/// Shared application state passed to all route handlers.
#[derive(Clone)]
struct AppState {
    manager: Arc<TaskManager>,
    store: Arc<SnapshotStore>,
}

/// Starts the polling gateway.
///
/// Hydrates the snapshot store, spins up the worker pool, binds to the
/// address configured in `[server].bind`, and serves until the process is
/// terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let pool = crate::db::connect(config).await?;
    crate::migrate::apply_schema(&pool).await?;

    let store = Arc::new(SnapshotStore::load(&pool).await?);
    let summarizer = create_summarizer(&config.summarizer)?;
    let manager = Arc::new(TaskManager::start(
        store.clone(),
        summarizer,
        TaskManagerSettings::from_config(config),
        Some(pool),
    ));

    let state = AppState { manager, store };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/tasks", post(handle_submit))
        .route("/tasks/{id}", get(handle_status))
        .route("/tasks/{id}/result", get(handle_result))
        .route("/tasks/{id}/cancel", post(handle_cancel))
        .route("/workspaces", get(handle_workspaces))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(state);

    println!("digest server listening on http://{}", config.server.bind);

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// ============ Error response ============

/// JSON error response body.
#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

/// Inner error detail with a machine-readable code and human-readable
/// message.
#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

/// Internal error type that converts into an HTTP response.
struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

/// Map the error taxonomy onto the HTTP contract.
fn classify_error(err: DigestError) -> AppError {
    match err {
        DigestError::Validation(message) => AppError {
            status: StatusCode::UNPROCESSABLE_ENTITY,
            code: "validation",
            message,
        },
        DigestError::NotFound(message) => AppError {
            status: StatusCode::NOT_FOUND,
            code: "not_found",
            message,
        },
        DigestError::NotReady(message) => AppError {
            status: StatusCode::CONFLICT,
            code: "not_ready",
            message,
        },
        // Provider failures are terminal task states, observed via polling;
        // one reaching a handler is an infrastructure fault.
        DigestError::Provider(e) => AppError {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            code: "internal",
            message: e.to_string(),
        },
    }
}

// ============ POST /tasks ============

/// JSON request body for `POST /tasks`.
#[derive(Deserialize)]
struct SubmitRequest {
    workspace_id: String,
    #[serde(flatten)]
    options: TaskOptions,
}

/// JSON response body for `POST /tasks`.
#[derive(Serialize)]
struct SubmitResponse {
    task_id: String,
}

/// Handler for `POST /tasks`.
///
/// Creates a queued task and returns `202 Accepted` with its id
/// immediately; processing happens in the worker pool.
async fn handle_submit(
    State(state): State<AppState>,
    Json(request): Json<SubmitRequest>,
) -> Result<(StatusCode, Json<SubmitResponse>), AppError> {
    if request.workspace_id.trim().is_empty() {
        return Err(classify_error(DigestError::Validation(
            "workspace_id must not be empty".to_string(),
        )));
    }

    let task_id = state
        .manager
        .submit(&request.workspace_id, request.options)
        .map_err(classify_error)?;

    Ok((StatusCode::ACCEPTED, Json(SubmitResponse { task_id })))
}

// ============ GET /tasks/{id} ============

/// Handler for `GET /tasks/{id}`.
///
/// Returns the task's state, progress, and error (when failed). `404` for
/// unknown ids.
async fn handle_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let status = state.manager.status(&id).map_err(classify_error)?;
    Ok(Json(serde_json::to_value(&status).unwrap_or_default()))
}

// ============ GET /tasks/{id}/result ============

/// Handler for `GET /tasks/{id}/result`.
///
/// Returns the full result once the task completed; `409 not_ready` while
/// it has not, `404` for unknown ids.
async fn handle_result(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let result = state.manager.result(&id).map_err(classify_error)?;
    Ok(Json(serde_json::to_value(&result).unwrap_or_default()))
}

// ============ POST /tasks/{id}/cancel ============

/// Handler for `POST /tasks/{id}/cancel`.
///
/// Requests cooperative cancellation and acknowledges with the task's
/// current status. A no-op on terminal tasks.
async fn handle_cancel(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<serde_json::Value>), AppError> {
    let status = state.manager.cancel(&id).map_err(classify_error)?;
    Ok((
        StatusCode::ACCEPTED,
        Json(serde_json::to_value(&status).unwrap_or_default()),
    ))
}

// ============ GET /workspaces ============

/// Handler for `GET /workspaces`.
///
/// Lists imported snapshots. Pass-through over the snapshot store.
async fn handle_workspaces(State(state): State<AppState>) -> Json<serde_json::Value> {
    let infos = state.store.list();
    Json(serde_json::json!({ "workspaces": infos }))
}

// ============ GET /health ============

/// JSON response body for `GET /health`.
#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

/// Handler for `GET /health`.
async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderError;

    #[test]
    fn validation_maps_to_422() {
        let e = classify_error(DigestError::Validation("bad".to_string()));
        assert_eq!(e.status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(e.code, "validation");
    }

    #[test]
    fn not_found_maps_to_404() {
        let e = classify_error(DigestError::NotFound("nope".to_string()));
        assert_eq!(e.status, StatusCode::NOT_FOUND);
        assert_eq!(e.code, "not_found");
    }

    #[test]
    fn not_ready_maps_to_409() {
        let e = classify_error(DigestError::NotReady("still running".to_string()));
        assert_eq!(e.status, StatusCode::CONFLICT);
        assert_eq!(e.code, "not_ready");
    }

    #[test]
    fn provider_maps_to_500() {
        let e = classify_error(DigestError::Provider(ProviderError::EmptyCompletion));
        assert_eq!(e.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(e.code, "internal");
    }

    #[test]
    fn submit_request_parses_flattened_options() {
        let body = r#"{
            "workspace_id": "W1",
            "instruction": "focus on decisions",
            "selected_channel_ids": ["C1"],
            "max_message_age_days": 30
        }"#;
        let req: SubmitRequest = serde_json::from_str(body).unwrap();
        assert_eq!(req.workspace_id, "W1");
        assert_eq!(req.options.selected_channel_ids.as_deref(), Some(&["C1".to_string()][..]));
        assert!(req.options.include_canvases);
    }
}
