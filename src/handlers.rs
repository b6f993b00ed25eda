//! Operational endpoints and the demo API surface the policies gate.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use std::time::Instant;

use crate::response::{HealthBody, StoreStatus};
use crate::server::AppState;
use crate::store::sanitize_component;

pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let started = Instant::now();
    let store = match state.store.ping().await {
        Ok(()) => StoreStatus {
            status: "healthy",
            response_time_ms: started.elapsed().as_millis() as u64,
            error: None,
        },
        Err(err) => StoreStatus {
            status: "unavailable",
            response_time_ms: started.elapsed().as_millis() as u64,
            error: Some(err.to_string()),
        },
    };

    let uptime = state.started_at.elapsed().as_secs();
    Json(HealthBody::new(uptime, store))
}

pub async fn ready(State(state): State<AppState>) -> impl IntoResponse {
    match state.store.ping().await {
        Ok(()) => Json(json!({ "status": "ready", "store": "connected" })),
        Err(_) => Json(json!({ "status": "ready", "store": "disconnected" })),
    }
}

/// Clears all admission counters for one identity across every strategy.
pub async fn reset_limits(
    State(state): State<AppState>,
    Path(identity): Path<String>,
) -> impl IntoResponse {
    let pattern = format!(
        "{}:ratelimit:*:{}*",
        state.key_prefix,
        sanitize_component(&identity)
    );

    match state.store.delete_by_pattern(&pattern).await {
        Ok(()) => (
            StatusCode::OK,
            Json(json!({ "status": "ok", "identity": identity })),
        ),
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": "store_error", "message": err.to_string() })),
        ),
    }
}

pub async fn list_items() -> impl IntoResponse {
    Json(json!({
        "items": [
            { "id": 1, "name": "alpha" },
            { "id": 2, "name": "beta" }
        ]
    }))
}

pub async fn create_item(Json(payload): Json<serde_json::Value>) -> impl IntoResponse {
    (StatusCode::CREATED, Json(json!({ "created": payload })))
}

#[derive(Debug, Deserialize)]
pub struct SearchParams {
    #[serde(default)]
    pub q: String,
}

pub async fn search(Query(params): Query<SearchParams>) -> impl IntoResponse {
    Json(json!({ "query": params.q, "results": [] }))
}

pub async fn get_report(Path(id): Path<String>) -> impl IntoResponse {
    Json(json!({ "report": id, "rows": [] }))
}
