mod auth;
mod error;
pub mod routes;

pub use error::{ApiError, ApiResult};

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use engine::{MetricsService, PositionManager};
use gateway::MarketDataService;
use store::{ConfigStore, PositionRepository, TradeRepository};
use strategy::StrategyRegistry;

/// Shared application state injected into every route handler.
#[derive(Clone)]
pub struct AppState {
    pub configs: Arc<ConfigStore>,
    pub registry: Arc<StrategyRegistry>,
    pub positions: PositionRepository,
    pub trades: TradeRepository,
    pub manager: Arc<PositionManager>,
    pub market: Arc<MarketDataService>,
    pub metrics: Arc<MetricsService>,
    pub api_token: String,
}

/// Build and run the admin API server.
pub async fn serve(state: AppState, port: u16) {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_headers(Any)
        .allow_methods(Any);

    let app = Router::new()
        .merge(routes::api_router(state.clone()))
        .merge(routes::health_router())
        .with_state(state)
        .layer(cors);

    info!(%addr, "Admin API listening");
    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    axum::serve(listener, app).await.unwrap();
}
