use axum::{extract::State, routing::get, Json, Router};

use engine::RiskMetrics;

use crate::{ApiResult, AppState};

pub fn router() -> Router<AppState> {
    Router::new().route("/api/risk/metrics", get(risk_metrics))
}

async fn risk_metrics(State(state): State<AppState>) -> ApiResult<Json<RiskMetrics>> {
    Ok(Json(state.metrics.compute().await?))
}
