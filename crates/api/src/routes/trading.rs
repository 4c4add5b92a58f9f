use std::time::Duration;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    routing::{delete, get},
    Json, Router,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::info;

use common::{CloseReason, Error, Position, Trade};

use crate::{ApiError, ApiResult, AppState};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/trading/positions/active", get(active_positions))
        .route("/api/trading/positions/history", get(position_history))
        .route("/api/trading/trades/history", get(trade_history))
        .route("/api/trading/positions/active", delete(close_position))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionView {
    pub id: String,
    pub symbol: String,
    pub side: String,
    pub quantity: Decimal,
    pub entry_price: Decimal,
    pub stop_loss_price: Option<Decimal>,
    pub take_profit_price: Option<Decimal>,
    pub trailing_stop_pct: Option<Decimal>,
    pub active: bool,
    pub opened_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub force_close_at: DateTime<Utc>,
    pub exit_price: Option<Decimal>,
    pub pnl: Option<Decimal>,
    pub close_reason: Option<String>,
}

impl From<Position> for PositionView {
    fn from(p: Position) -> Self {
        Self {
            id: p.id,
            symbol: p.symbol,
            side: p.side.to_string(),
            quantity: p.quantity,
            entry_price: p.entry_price,
            stop_loss_price: p.stop_loss_price,
            take_profit_price: p.take_profit_price,
            trailing_stop_pct: p.trailing_stop_pct,
            active: p.active,
            opened_at: p.opened_at,
            closed_at: p.closed_at,
            force_close_at: p.force_close_at,
            exit_price: p.exit_price,
            pnl: p.pnl,
            close_reason: p.close_reason.map(|r| r.to_string()),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TradeView {
    pub exchange_trade_id: String,
    pub symbol: String,
    pub side: String,
    pub order_type: String,
    pub status: String,
    pub price: Decimal,
    pub quantity: Decimal,
    pub commission: Decimal,
    pub executed_at: DateTime<Utc>,
}

impl From<Trade> for TradeView {
    fn from(t: Trade) -> Self {
        Self {
            exchange_trade_id: t.exchange_trade_id,
            symbol: t.symbol,
            side: t.side.to_string(),
            order_type: t.order_type.to_string(),
            status: t.status.to_string(),
            price: t.price,
            quantity: t.quantity,
            commission: t.commission,
            executed_at: t.executed_at,
        }
    }
}

#[derive(Deserialize)]
struct SymbolFilter {
    symbol: Option<String>,
}

#[derive(Deserialize)]
struct SymbolQuery {
    symbol: String,
}

async fn active_positions(State(state): State<AppState>) -> ApiResult<Json<Vec<PositionView>>> {
    let positions = state.manager.list_active().await?;
    Ok(Json(positions.into_iter().map(PositionView::from).collect()))
}

async fn position_history(
    State(state): State<AppState>,
    Query(filter): Query<SymbolFilter>,
) -> ApiResult<Json<Vec<PositionView>>> {
    let positions = state.positions.history(filter.symbol.as_deref()).await?;
    Ok(Json(positions.into_iter().map(PositionView::from).collect()))
}

async fn trade_history(
    State(state): State<AppState>,
    Query(filter): Query<SymbolFilter>,
) -> ApiResult<Json<Vec<TradeView>>> {
    let trades = state.trades.history(filter.symbol.as_deref()).await?;
    Ok(Json(trades.into_iter().map(TradeView::from).collect()))
}

/// Manually flatten the symbol's active position at market. 404 once it is
/// already closed, so a repeated delete is loud but harmless.
async fn close_position(
    State(state): State<AppState>,
    Query(query): Query<SymbolQuery>,
) -> ApiResult<StatusCode> {
    if state.manager.get_active(&query.symbol).await?.is_none() {
        return Err(ApiError(Error::NotFound(format!(
            "no active position for '{}'",
            query.symbol
        ))));
    }

    let snapshot = state
        .market
        .snapshot_fresh(&query.symbol, Duration::from_secs(5))
        .await?;
    let closed = state
        .manager
        .close(&query.symbol, snapshot.last_price, CloseReason::Manual)
        .await?;

    info!(symbol = %query.symbol, pnl = ?closed.pnl, "position closed manually");
    Ok(StatusCode::NO_CONTENT)
}
