//! Shared fixtures for the engine integration tests: in-memory SQLite, a
//! paper gateway, and a fully wired `PositionManager`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sqlx::sqlite::SqlitePoolOptions;

use common::{NoopNotifier, PairKind, TradingPair};
use paper::PaperGateway;
use risk::DailyLossTracker;
use store::{ConfigStore, PositionRepository, RiskEventRepository, TradeRepository};

use crate::position_manager::{PositionDefaults, PositionManager};

pub(crate) struct Harness {
    pub gateway: Arc<PaperGateway>,
    pub manager: Arc<PositionManager>,
    pub positions: PositionRepository,
    pub trades: TradeRepository,
    pub events: RiskEventRepository,
    pub configs: Arc<ConfigStore>,
    pub pairs: Arc<HashMap<String, TradingPair>>,
    pub tracker: Arc<DailyLossTracker>,
}

pub(crate) fn defaults() -> PositionDefaults {
    PositionDefaults {
        notional: dec!(1000),
        stop_loss_pct: dec!(0.015),
        take_profit_pct: dec!(0.03),
        trailing_stop_pct: None,
        max_holding: Duration::from_secs(3600),
        max_open_positions: 10,
    }
}

fn pair(symbol: &str, base: &str, kind: PairKind) -> TradingPair {
    TradingPair {
        symbol: symbol.to_string(),
        base_asset: base.to_string(),
        quote_asset: "USDT".to_string(),
        price_precision: 8,
        quantity_precision: 8,
        min_order_size: dec!(0.0001),
        active: true,
        kind,
    }
}

pub(crate) async fn harness() -> Harness {
    harness_with(defaults(), dec!(10000)).await
}

pub(crate) async fn harness_with(defaults: PositionDefaults, capital: Decimal) -> Harness {
    // A single connection keeps every query on the same in-memory database.
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    sqlx::migrate!("../../migrations").run(&pool).await.unwrap();

    let positions = PositionRepository::new(pool.clone());
    let trades = TradeRepository::new(pool.clone());
    let events = RiskEventRepository::new(pool.clone());
    let configs = Arc::new(ConfigStore::load(pool.clone()).await.unwrap());

    let mut pairs = HashMap::new();
    pairs.insert("BTCUSDT".to_string(), pair("BTCUSDT", "BTC", PairKind::Spot));
    pairs.insert("ETHUSDT".to_string(), pair("ETHUSDT", "ETH", PairKind::Spot));
    pairs.insert(
        "SOLUSDT".to_string(),
        pair("SOLUSDT", "SOL", PairKind::PerpFutures),
    );
    let pairs = Arc::new(pairs);

    for symbol in ["BTCUSDT", "ETHUSDT", "SOLUSDT"] {
        configs
            .upsert(common::StrategyConfig {
                symbol: symbol.to_string(),
                strategy_name: "SMA_CROSSOVER".to_string(),
                active: true,
                params: HashMap::new(),
            })
            .await
            .unwrap();
    }

    let gateway = Arc::new(PaperGateway::new("USDT", 0.0));
    let tracker = Arc::new(DailyLossTracker::new(capital, dec!(0.018), dec!(0.02)));

    let manager = Arc::new(PositionManager::new(
        positions.clone(),
        trades.clone(),
        events.clone(),
        configs.clone(),
        pairs.clone(),
        gateway.clone(),
        Arc::new(NoopNotifier),
        tracker.clone(),
        defaults,
    ));

    Harness {
        gateway,
        manager,
        positions,
        trades,
        events,
        configs,
        pairs,
        tracker,
    }
}
