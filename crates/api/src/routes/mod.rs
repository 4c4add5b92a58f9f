pub mod config;
pub mod health;
pub mod metrics;
pub mod trading;

use axum::{middleware, Router};

use crate::{auth::require_auth, AppState};

pub use health::health_router;

/// Everything except health sits behind the bearer-token middleware.
pub fn api_router(state: AppState) -> Router<AppState> {
    Router::new()
        .merge(config::router())
        .merge(trading::router())
        .merge(metrics::router())
        .route_layer(middleware::from_fn_with_state(state, require_auth))
}
