use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::types::{MarketSnapshot, OrderSide, OrderStatus, OrderType, TradingPair};
use crate::Result;

/// An order to be submitted to the exchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRequest {
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub quantity: Decimal,
    /// Required for limit orders, ignored for market orders.
    pub price: Option<Decimal>,
}

impl OrderRequest {
    pub fn market(symbol: impl Into<String>, side: OrderSide, quantity: Decimal) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            order_type: OrderType::Market,
            quantity,
            price: None,
        }
    }
}

/// Confirmation returned by the exchange after order placement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderReceipt {
    pub order_id: String,
    pub exchange_trade_id: String,
    pub status: OrderStatus,
    pub executed_qty: Decimal,
    /// Volume-weighted fill price; zero when the exchange reported no fills.
    pub avg_price: Decimal,
    pub commission: Decimal,
    pub executed_at: DateTime<Utc>,
}

/// Free/locked balance of one asset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetBalance {
    pub asset: String,
    pub free: Decimal,
    pub locked: Decimal,
}

impl AssetBalance {
    pub fn total(&self) -> Decimal {
        self.free + self.locked
    }
}

/// An order resting on the exchange book.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenOrder {
    pub order_id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub status: OrderStatus,
    pub price: Option<Decimal>,
    pub quantity: Decimal,
}

/// Exchange-side exposure for one symbol, as seen by the reconciler.
/// On spot this is the base-asset balance above the dust threshold.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangePosition {
    pub symbol: String,
    pub quantity: Decimal,
}

/// Uniform contract to a spot exchange.
///
/// `BinanceGateway` implements this for live trading, `PaperGateway` for
/// simulation. Adapters normalize exchange-specific order-status strings to
/// the canonical [`OrderStatus`] set and surface rate limiting as
/// `Error::RateLimited` with an advised delay.
#[async_trait]
pub trait ExchangeGateway: Send + Sync {
    /// Submit an order and return the fill confirmation.
    async fn place_order(&self, request: &OrderRequest) -> Result<OrderReceipt>;

    async fn cancel_order(&self, symbol: &str, order_id: &str) -> Result<()>;

    async fn order_status(&self, symbol: &str, order_id: &str) -> Result<OrderStatus>;

    /// Latest ticker summary for a symbol.
    async fn ticker(&self, symbol: &str) -> Result<MarketSnapshot>;

    async fn balances(&self) -> Result<Vec<AssetBalance>>;

    async fn server_time(&self) -> Result<DateTime<Utc>>;

    async fn open_orders(&self, symbol: &str) -> Result<Vec<OpenOrder>>;

    /// Exchange-side exposure for the pair, `None` when below the dust
    /// threshold (`pair.min_order_size`).
    async fn exchange_position(&self, pair: &TradingPair) -> Result<Option<ExchangePosition>>;
}
