use std::collections::HashMap;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Side of an order or position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "UPPERCASE")]
#[sqlx(type_name = "TEXT", rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    /// The side that flattens a position opened on this side.
    pub fn opposite(self) -> Self {
        match self {
            OrderSide::Buy => OrderSide::Sell,
            OrderSide::Sell => OrderSide::Buy,
        }
    }
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "BUY"),
            OrderSide::Sell => write!(f, "SELL"),
        }
    }
}

impl FromStr for OrderSide {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "BUY" => Ok(OrderSide::Buy),
            "SELL" => Ok(OrderSide::Sell),
            other => Err(format!("unknown order side '{other}'")),
        }
    }
}

/// Canonical order types supported across adapters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderType {
    Market,
    Limit,
}

impl std::fmt::Display for OrderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderType::Market => write!(f, "MARKET"),
            OrderType::Limit => write!(f, "LIMIT"),
        }
    }
}

impl FromStr for OrderType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "MARKET" => Ok(OrderType::Market),
            "LIMIT" => Ok(OrderType::Limit),
            other => Err(format!("unknown order type '{other}'")),
        }
    }
}

/// Canonical order status. Adapters normalize exchange-specific strings
/// into this set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    New,
    PartiallyFilled,
    Filled,
    Canceled,
    Rejected,
    Expired,
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            OrderStatus::New => "NEW",
            OrderStatus::PartiallyFilled => "PARTIALLY_FILLED",
            OrderStatus::Filled => "FILLED",
            OrderStatus::Canceled => "CANCELED",
            OrderStatus::Rejected => "REJECTED",
            OrderStatus::Expired => "EXPIRED",
        };
        write!(f, "{s}")
    }
}

impl FromStr for OrderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NEW" => Ok(OrderStatus::New),
            "PARTIALLY_FILLED" => Ok(OrderStatus::PartiallyFilled),
            "FILLED" => Ok(OrderStatus::Filled),
            "CANCELED" => Ok(OrderStatus::Canceled),
            "REJECTED" => Ok(OrderStatus::Rejected),
            "EXPIRED" => Ok(OrderStatus::Expired),
            other => Err(format!("unknown order status '{other}'")),
        }
    }
}

/// Market kind of a trading pair. Sell (short) opens are refused on Spot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PairKind {
    Spot,
    PerpFutures,
    DatedFutures,
}

impl std::fmt::Display for PairKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PairKind::Spot => "SPOT",
            PairKind::PerpFutures => "PERP_FUTURES",
            PairKind::DatedFutures => "DATED_FUTURES",
        };
        write!(f, "{s}")
    }
}

impl FromStr for PairKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SPOT" => Ok(PairKind::Spot),
            "PERP_FUTURES" => Ok(PairKind::PerpFutures),
            "DATED_FUTURES" => Ok(PairKind::DatedFutures),
            other => Err(format!("unknown pair kind '{other}'")),
        }
    }
}

/// A tradable market. Immutable after load; only `active` is admin-mutable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradingPair {
    pub symbol: String,
    pub base_asset: String,
    pub quote_asset: String,
    pub price_precision: u32,
    pub quantity_precision: u32,
    /// Minimum order size in base asset units; doubles as the dust
    /// threshold when reading exchange-side spot exposure.
    pub min_order_size: Decimal,
    pub active: bool,
    pub kind: PairKind,
}

/// Whether the bot is running against the real exchange or simulating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "TEXT", rename_all = "lowercase")]
pub enum TradingMode {
    Live,
    Paper,
}

impl std::fmt::Display for TradingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TradingMode::Live => write!(f, "live"),
            TradingMode::Paper => write!(f, "paper"),
        }
    }
}

/// Why a position was closed. Serialized verbatim into the DB and API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CloseReason {
    StrategySignal,
    StopLoss,
    TakeProfit,
    TimeLimit,
    ExternalClose,
    Manual,
    EmergencyStop,
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CloseReason::StrategySignal => "StrategySignal",
            CloseReason::StopLoss => "StopLoss",
            CloseReason::TakeProfit => "TakeProfit",
            CloseReason::TimeLimit => "TimeLimit",
            CloseReason::ExternalClose => "ExternalClose",
            CloseReason::Manual => "Manual",
            CloseReason::EmergencyStop => "EmergencyStop",
        };
        write!(f, "{s}")
    }
}

impl FromStr for CloseReason {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "StrategySignal" => Ok(CloseReason::StrategySignal),
            "StopLoss" => Ok(CloseReason::StopLoss),
            "TakeProfit" => Ok(CloseReason::TakeProfit),
            "TimeLimit" => Ok(CloseReason::TimeLimit),
            "ExternalClose" => Ok(CloseReason::ExternalClose),
            "Manual" => Ok(CloseReason::Manual),
            "EmergencyStop" => Ok(CloseReason::EmergencyStop),
            other => Err(format!("unknown close reason '{other}'")),
        }
    }
}

/// A net open exposure on one trading pair.
///
/// `active == true` iff `closed_at` and `pnl` are unset. At most one active
/// position per symbol exists at any instant; `PositionManager` is the sole
/// mutator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: Decimal,
    pub entry_price: Decimal,
    pub stop_loss_price: Option<Decimal>,
    pub take_profit_price: Option<Decimal>,
    pub trailing_stop_pct: Option<Decimal>,
    /// Best price seen since open, maintained by the trailing-stop check.
    pub high_watermark: Option<Decimal>,
    pub active: bool,
    pub opened_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    /// Hard deadline: `opened_at + max_holding_duration`.
    pub force_close_at: DateTime<Utc>,
    pub exit_price: Option<Decimal>,
    pub pnl: Option<Decimal>,
    pub close_reason: Option<CloseReason>,
}

impl Position {
    /// Reconciler-adopted exposure with an unknown entry price. Excluded
    /// from stop-loss/take-profit monitoring until an operator supplies one.
    pub fn is_emergency(&self) -> bool {
        self.entry_price.is_zero()
    }
}

/// Immutable record of an exchange fill.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub exchange_trade_id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub status: OrderStatus,
    pub price: Decimal,
    pub quantity: Decimal,
    pub commission: Decimal,
    pub executed_at: DateTime<Utc>,
}

/// Per-symbol strategy assignment, admin-managed, consumed read-only by the
/// scheduler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyConfig {
    pub symbol: String,
    pub strategy_name: String,
    pub active: bool,
    #[serde(default)]
    pub params: HashMap<String, String>,
}

impl StrategyConfig {
    pub fn param_decimal(&self, key: &str) -> Option<Decimal> {
        self.params.get(key).and_then(|v| Decimal::from_str(v).ok())
    }

    pub fn param_usize(&self, key: &str) -> Option<usize> {
        self.params.get(key).and_then(|v| v.parse().ok())
    }

    pub fn param_f64(&self, key: &str) -> Option<f64> {
        self.params.get(key).and_then(|v| v.parse().ok())
    }
}

/// Classification of an audit event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RiskEventKind {
    PositionOpened,
    PositionClosed,
    StopLossTriggered,
    TakeProfitTriggered,
    TrailingStopTightened,
    TimeLimitTriggered,
    ExternalClose,
    EmergencyPosition,
    QuantityAligned,
    DailyLossWarning,
    DailyLossHalt,
}

impl std::fmt::Display for RiskEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RiskEventKind::PositionOpened => "PositionOpened",
            RiskEventKind::PositionClosed => "PositionClosed",
            RiskEventKind::StopLossTriggered => "StopLossTriggered",
            RiskEventKind::TakeProfitTriggered => "TakeProfitTriggered",
            RiskEventKind::TrailingStopTightened => "TrailingStopTightened",
            RiskEventKind::TimeLimitTriggered => "TimeLimitTriggered",
            RiskEventKind::ExternalClose => "ExternalClose",
            RiskEventKind::EmergencyPosition => "EmergencyPosition",
            RiskEventKind::QuantityAligned => "QuantityAligned",
            RiskEventKind::DailyLossWarning => "DailyLossWarning",
            RiskEventKind::DailyLossHalt => "DailyLossHalt",
        };
        write!(f, "{s}")
    }
}

impl FromStr for RiskEventKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PositionOpened" => Ok(RiskEventKind::PositionOpened),
            "PositionClosed" => Ok(RiskEventKind::PositionClosed),
            "StopLossTriggered" => Ok(RiskEventKind::StopLossTriggered),
            "TakeProfitTriggered" => Ok(RiskEventKind::TakeProfitTriggered),
            "TrailingStopTightened" => Ok(RiskEventKind::TrailingStopTightened),
            "TimeLimitTriggered" => Ok(RiskEventKind::TimeLimitTriggered),
            "ExternalClose" => Ok(RiskEventKind::ExternalClose),
            "EmergencyPosition" => Ok(RiskEventKind::EmergencyPosition),
            "QuantityAligned" => Ok(RiskEventKind::QuantityAligned),
            "DailyLossWarning" => Ok(RiskEventKind::DailyLossWarning),
            "DailyLossHalt" => Ok(RiskEventKind::DailyLossHalt),
            other => Err(format!("unknown risk event kind '{other}'")),
        }
    }
}

/// Append-only audit record persisted to `risk_events`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskEventRecord {
    pub position_id: Option<String>,
    pub symbol: String,
    pub kind: RiskEventKind,
    pub trigger_price: Option<Decimal>,
    pub message: String,
    pub severity: crate::notify::Severity,
    pub at: DateTime<Utc>,
}

impl RiskEventRecord {
    pub fn new(
        kind: RiskEventKind,
        symbol: impl Into<String>,
        severity: crate::notify::Severity,
        message: impl Into<String>,
    ) -> Self {
        Self {
            position_id: None,
            symbol: symbol.into(),
            kind,
            trigger_price: None,
            message: message.into(),
            severity,
            at: Utc::now(),
        }
    }

    pub fn with_position(mut self, position_id: impl Into<String>) -> Self {
        self.position_id = Some(position_id.into());
        self
    }

    pub fn with_trigger_price(mut self, price: Decimal) -> Self {
        self.trigger_price = Some(price);
        self
    }
}

/// Latest ticker summary for a symbol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub symbol: String,
    pub last_price: Decimal,
    pub best_bid: Decimal,
    pub best_ask: Decimal,
    pub volume_24h: Decimal,
    pub quote_volume_24h: Decimal,
    pub change_pct_24h: Decimal,
    pub at: DateTime<Utc>,
}

/// One 1-minute OHLCV bar. Indicators only consume bars where
/// `closed == true`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candle {
    pub open_time: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
    pub closed: bool,
}

/// Live market data event published on the broadcast channel.
#[derive(Debug, Clone)]
pub enum MarketDataEvent {
    Ticker(MarketSnapshot),
    Candle { symbol: String, candle: Candle },
}

impl MarketDataEvent {
    pub fn symbol(&self) -> &str {
        match self {
            MarketDataEvent::Ticker(snap) => &snap.symbol,
            MarketDataEvent::Candle { symbol, .. } => symbol,
        }
    }
}
