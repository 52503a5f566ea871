// Introspection endpoints: allow-listed methods and breaker state.

use axum::extract::State;
use axum::response::{IntoResponse, Json, Response};
use serde_json::json;

use crate::proxy::server::AppState;

/// `GET /api/methods` returns the allow-list with per-method required fields.
pub async fn list_methods(State(state): State<AppState>) -> Response {
    let specs = state.pipeline.registry().specs();
    Json(json!({ "methods": specs })).into_response()
}

/// `GET /api/circuits` returns the current breaker snapshot per upstream target.
pub async fn circuit_stats(State(state): State<AppState>) -> Response {
    Json(json!({ "circuits": state.pipeline.circuit_stats() })).into_response()
}
