//! HTTP control surface: health probe, run lifecycle, status query, and the
//! API-key-gated `/api/*` twins for external integrations (n8n, webhooks).

use crate::core::types::*;
use crate::AppState;
use axum::{
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::Json,
    routing::{get, post},
    Router,
};
use std::collections::HashMap;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Build the full application router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(health_check))
        .route("/health", get(health_check))
        .route("/start", post(start_run))
        .route("/stop", post(stop_run))
        .route("/status", get(get_status))
        // API-key-gated twins
        .route("/api/start", post(api_start_run))
        .route("/api/stop", post(api_stop_run))
        .route("/api/status", get(api_get_status))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "stock-pilot",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

type ApiRejection = (StatusCode, Json<ErrorResponse>);

/// Shared-secret gate for the `/api/*` endpoints.
///
/// Missing key (when required) → 401 with a distinct "required" outcome;
/// wrong key → 403 with a distinct "invalid" outcome. A disabled gate passes
/// everything through.
fn check_api_key(
    state: &AppState,
    headers: &HeaderMap,
    params: &HashMap<String, String>,
) -> Result<(), ApiRejection> {
    if !state.config.resolve_require_api_key() {
        return Ok(());
    }

    let supplied = headers
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .or_else(|| params.get("api_key").cloned());

    let Some(supplied) = supplied else {
        return Err((
            StatusCode::UNAUTHORIZED,
            Json(ErrorResponse::new(
                "API key required",
                "Please provide API key in X-API-Key header or api_key parameter",
            )),
        ));
    };

    let expected = state.config.resolve_api_key().unwrap_or_default();
    if expected.is_empty() || supplied != expected {
        return Err((
            StatusCode::FORBIDDEN,
            Json(ErrorResponse::new(
                "Invalid API key",
                "The provided API key is invalid",
            )),
        ));
    }
    Ok(())
}

async fn start_run(
    State(state): State<Arc<AppState>>,
    body: Result<Json<RunOptions>, axum::extract::rejection::JsonRejection>,
) -> Result<Json<StartResponse>, ApiRejection> {
    // A missing or non-JSON body simply means "all defaults".
    let options = body.map(|Json(o)| o).unwrap_or_default();
    info!("Starting automation with options: {:?}", options);

    match state.controller.start(options) {
        Ok(handle) => Ok(Json(StartResponse {
            success: true,
            message: "Automation started successfully".to_string(),
            options: handle.configuration().clone(),
        })),
        Err(e) => Err((
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse::new("start rejected", e.to_string())),
        )),
    }
}

async fn stop_run(State(state): State<Arc<AppState>>) -> Result<Json<AckResponse>, ApiRejection> {
    let Some(handle) = state.controller.active_handle() else {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse::new(
                "stop rejected",
                "No automation is currently running",
            )),
        ));
    };
    match state.controller.stop(&handle) {
        Ok(()) => Ok(Json(AckResponse {
            success: true,
            message: "Stop request sent to automation".to_string(),
        })),
        Err(e) => Err((
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse::new("stop rejected", e.to_string())),
        )),
    }
}

async fn get_status(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    Json(state.controller.status_snapshot())
}

async fn api_start_run(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
    body: Result<Json<RunOptions>, axum::extract::rejection::JsonRejection>,
) -> Result<Json<StartResponse>, ApiRejection> {
    check_api_key(&state, &headers, &params)?;
    start_run(State(state), body).await
}

async fn api_stop_run(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<AckResponse>, ApiRejection> {
    check_api_key(&state, &headers, &params)?;
    stop_run(State(state)).await
}

async fn api_get_status(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<StatusResponse>, ApiRejection> {
    check_api_key(&state, &headers, &params)?;
    Ok(get_status(State(state)).await)
}
