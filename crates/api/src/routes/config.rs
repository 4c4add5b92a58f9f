use axum::{
    extract::{Query, State},
    http::StatusCode,
    routing::{delete, get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use common::{Error, StrategyConfig};

use crate::{ApiError, ApiResult, AppState};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/config/strategies", get(list_strategies))
        .route("/api/config/strategies", post(upsert_config))
        .route("/api/config/strategies/active", get(active_configs))
        .route("/api/config/strategies", delete(remove_config))
}

/// Names of every registered strategy implementation.
async fn list_strategies(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "strategies": state.registry.names() }))
}

async fn upsert_config(
    State(state): State<AppState>,
    Json(config): Json<StrategyConfig>,
) -> ApiResult<StatusCode> {
    if config.symbol.trim().is_empty() {
        return Err(ApiError(Error::Validation("symbol must not be empty".into())));
    }
    if !state.registry.contains(&config.strategy_name) {
        return Err(ApiError(Error::Config(format!(
            "unknown strategy '{}'",
            config.strategy_name
        ))));
    }

    info!(symbol = %config.symbol, strategy = %config.strategy_name, "strategy config upserted");
    state.configs.upsert(config).await?;
    Ok(StatusCode::CREATED)
}

async fn active_configs(State(state): State<AppState>) -> Json<Vec<StrategyConfig>> {
    Json(state.configs.active().await)
}

#[derive(Deserialize)]
struct PairQuery {
    pair: String,
}

async fn remove_config(
    State(state): State<AppState>,
    Query(query): Query<PairQuery>,
) -> ApiResult<StatusCode> {
    if state.configs.remove(&query.pair).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError(Error::NotFound(format!(
            "no strategy config for '{}'",
            query.pair
        ))))
    }
}
