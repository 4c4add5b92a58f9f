use axum::{routing::get, Json, Router};
use serde_json::{json, Value};

use crate::AppState;

pub fn health_router() -> Router<AppState> {
    Router::new().route("/api/health/status", get(status))
}

/// Liveness probe — no auth required.
async fn status() -> Json<Value> {
    Json(json!({ "status": "UP" }))
}
