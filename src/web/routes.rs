//! HTTP route handlers for the batch submission surface.
//!
//! Thin REST layer over the engine: submit batches, query status and results,
//! drain events, request cancellation. All business logic lives in the engine
//! and `AppState`.

use std::sync::Arc;

use axum::{
    extract::{Extension, Json, Path},
    http::StatusCode,
    middleware,
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use tracing::info;
use uuid::Uuid;

use crate::{AppConfig, AppState, BatchSubmission, SubmitError};

/// JSON error response helper
fn err_response(status: StatusCode, msg: &str) -> impl IntoResponse {
    (status, Json(serde_json::json!({ "error": msg })))
}

/// Build the API router with all endpoints.
pub fn api_router(state: Arc<AppState>) -> Router {
    Router::new()
        // Config
        .route("/config", get(get_config).post(configure))
        // Scripts
        .route("/scripts", get(list_scripts))
        // Batches
        .route("/batches", get(list_batches).post(submit_batch))
        .route("/batches/:id/status", get(batch_status))
        .route("/batches/:id/results", get(batch_results))
        .route("/batches/:id/events", get(batch_events))
        .route("/batches/:id/cancel", post(cancel_session))
        .route("/batches/:id/cancel-all", post(cancel_all))
        // Logs
        .route("/logs/dir", get(get_log_dir))
        // Auth middleware (only if PROFILE_RUNNER_WEB_PASS is set)
        .layer(middleware::from_fn(super::auth::basic_auth_middleware))
        .layer(Extension(state))
}

// ========== Config Handlers ==========

async fn get_config(
    Extension(state): Extension<Arc<AppState>>,
) -> impl IntoResponse {
    let config = state.config.read().await.clone();
    Json(config)
}

async fn configure(
    Extension(state): Extension<Arc<AppState>>,
    Json(config): Json<AppConfig>,
) -> impl IntoResponse {
    info!("Configuring application via web API");
    state.configure(config).await;
    StatusCode::OK
}

// ========== Script Handlers ==========

async fn list_scripts(
    Extension(state): Extension<Arc<AppState>>,
) -> impl IntoResponse {
    Json(state.script_store.list())
}

// ========== Batch Handlers ==========

async fn submit_batch(
    Extension(state): Extension<Arc<AppState>>,
    Json(submission): Json<BatchSubmission>,
) -> impl IntoResponse {
    info!(
        "Submitting batch via web API: script {} against {} targets",
        submission.script_id,
        submission.targets.len()
    );

    match state.submit(submission).await {
        Ok(handle) => Json(serde_json::json!({ "batchId": handle.id().to_string() }))
            .into_response(),
        Err(SubmitError::Store(e)) => {
            err_response(StatusCode::NOT_FOUND, &e.to_string()).into_response()
        }
        Err(SubmitError::Admission(e)) => {
            err_response(StatusCode::BAD_REQUEST, &e.to_string()).into_response()
        }
    }
}

async fn list_batches(
    Extension(state): Extension<Arc<AppState>>,
) -> impl IntoResponse {
    Json(state.batch_statuses())
}

fn parse_batch_id(id: &str) -> Result<Uuid, StatusCode> {
    Uuid::parse_str(id).map_err(|_| StatusCode::BAD_REQUEST)
}

async fn batch_status(
    Extension(state): Extension<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let Ok(id) = parse_batch_id(&id) else {
        return err_response(StatusCode::BAD_REQUEST, "invalid batch id").into_response();
    };
    match state.batch(&id) {
        Some(handle) => Json(handle.status()).into_response(),
        None => err_response(StatusCode::NOT_FOUND, "unknown batch").into_response(),
    }
}

async fn batch_results(
    Extension(state): Extension<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let Ok(id) = parse_batch_id(&id) else {
        return err_response(StatusCode::BAD_REQUEST, "invalid batch id").into_response();
    };
    match state.batch(&id) {
        Some(handle) => Json(handle.results()).into_response(),
        None => err_response(StatusCode::NOT_FOUND, "unknown batch").into_response(),
    }
}

async fn batch_events(
    Extension(state): Extension<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let Ok(id) = parse_batch_id(&id) else {
        return err_response(StatusCode::BAD_REQUEST, "invalid batch id").into_response();
    };
    match state.batch(&id) {
        Some(handle) => Json(serde_json::json!({
            "events": handle.drain_events(),
            "droppedEvents": handle.dropped_events(),
        }))
        .into_response(),
        None => err_response(StatusCode::NOT_FOUND, "unknown batch").into_response(),
    }
}

#[derive(serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct CancelSessionRequest {
    target: String,
}

async fn cancel_session(
    Extension(state): Extension<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<CancelSessionRequest>,
) -> impl IntoResponse {
    let Ok(id) = parse_batch_id(&id) else {
        return err_response(StatusCode::BAD_REQUEST, "invalid batch id").into_response();
    };
    info!("Cancelling session via web API: {}", req.target);
    match state.batch(&id) {
        Some(handle) if handle.cancel(&req.target) => StatusCode::OK.into_response(),
        Some(_) => err_response(StatusCode::NOT_FOUND, "unknown target").into_response(),
        None => err_response(StatusCode::NOT_FOUND, "unknown batch").into_response(),
    }
}

async fn cancel_all(
    Extension(state): Extension<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let Ok(id) = parse_batch_id(&id) else {
        return err_response(StatusCode::BAD_REQUEST, "invalid batch id").into_response();
    };
    match state.batch(&id) {
        Some(handle) => {
            handle.cancel_all();
            StatusCode::OK.into_response()
        }
        None => err_response(StatusCode::NOT_FOUND, "unknown batch").into_response(),
    }
}

// ========== Log Handlers ==========

async fn get_log_dir() -> impl IntoResponse {
    match crate::log_dir() {
        Some(p) => Json(serde_json::json!({ "path": p.to_string_lossy() })).into_response(),
        None => err_response(StatusCode::INTERNAL_SERVER_ERROR, "Could not determine log directory")
            .into_response(),
    }
}
