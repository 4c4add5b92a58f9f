use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use common::{
    CloseReason, Error, Notifier, OrderSide, PairKind, Result, Severity, StrategyConfig,
    TradingPair,
};
use gateway::MarketDataService;
use store::ConfigStore;
use strategy::{Signal, StrategyRegistry};

use crate::position_manager::PositionManager;

/// Drives trading decisions at a fixed delay (D1): the next cycle starts
/// only after the previous one completes, so slow exchange calls can never
/// stack sweeps on top of each other.
///
/// Per-symbol faults are logged and reported but never abort the sweep of
/// the other symbols. Rate limiting abandons the remainder of the cycle.
pub struct StrategyScheduler {
    configs: Arc<ConfigStore>,
    registry: Arc<StrategyRegistry>,
    market: Arc<MarketDataService>,
    manager: Arc<PositionManager>,
    pairs: Arc<HashMap<String, TradingPair>>,
    notifier: Arc<dyn Notifier>,
    interval: Duration,
    ticker_stale_after: Duration,
}

impl StrategyScheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        configs: Arc<ConfigStore>,
        registry: Arc<StrategyRegistry>,
        market: Arc<MarketDataService>,
        manager: Arc<PositionManager>,
        pairs: Arc<HashMap<String, TradingPair>>,
        notifier: Arc<dyn Notifier>,
        interval: Duration,
    ) -> Self {
        Self {
            configs,
            registry,
            market,
            manager,
            pairs,
            notifier,
            interval,
            ticker_stale_after: Duration::from_secs(5),
        }
    }

    /// Run the decision loop. Call from `tokio::spawn`.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(interval = ?self.interval, "StrategyScheduler running");
        loop {
            self.run_once().await;
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("StrategyScheduler stopping");
                        return;
                    }
                }
            }
        }
    }

    /// One full sweep over every active symbol config.
    pub async fn run_once(&self) {
        for config in self.configs.active().await {
            match self.evaluate_symbol(&config).await {
                Ok(()) => {}
                Err(e @ Error::RateLimited { .. }) => {
                    warn!(
                        retry_after = ?e.retry_after(),
                        "rate limited — abandoning the rest of this cycle"
                    );
                    return;
                }
                Err(e) => {
                    error!(symbol = %config.symbol, error = %e, "strategy cycle failed");
                    self.notifier
                        .notify(
                            Severity::Warning,
                            &format!("[{}] strategy cycle failed: {e}", config.symbol),
                        )
                        .await;
                }
            }
        }
    }

    async fn evaluate_symbol(&self, config: &StrategyConfig) -> Result<()> {
        let Some(strategy) = self.registry.get(&config.strategy_name) else {
            warn!(
                symbol = %config.symbol,
                strategy = %config.strategy_name,
                "unknown strategy name — skipping symbol"
            );
            return Ok(());
        };

        let candles = self.market.candles(&config.symbol).await;
        let signal = strategy.generate_signal(&config.symbol, &config.params, &candles)?;
        let active = self.manager.get_active(&config.symbol).await?;

        match (active, signal) {
            // An opposite signal flattens the running position
            (Some(position), Signal::Sell) if position.side == OrderSide::Buy => {
                self.close_at_market(&config.symbol).await?;
            }
            (Some(position), Signal::Buy) if position.side == OrderSide::Sell => {
                self.close_at_market(&config.symbol).await?;
            }

            (None, Signal::Buy) => {
                self.open_at_market(&config.symbol, OrderSide::Buy).await?;
            }
            (None, Signal::Sell) => {
                // Shorts only exist off spot
                let kind = self.pairs.get(&config.symbol).map(|p| p.kind);
                if kind.is_some_and(|k| k != PairKind::Spot) {
                    self.open_at_market(&config.symbol, OrderSide::Sell).await?;
                } else {
                    debug!(symbol = %config.symbol, "sell signal ignored on spot pair");
                }
            }

            _ => {}
        }
        Ok(())
    }

    async fn open_at_market(&self, symbol: &str, side: OrderSide) -> Result<()> {
        let snapshot = self
            .market
            .snapshot_fresh(symbol, self.ticker_stale_after)
            .await?;
        match self.manager.open(symbol, side, snapshot.last_price).await? {
            Some(position) => {
                debug!(%symbol, id = %position.id, "scheduler opened position");
            }
            None => {
                debug!(%symbol, "open raced an existing position — no-op");
            }
        }
        Ok(())
    }

    async fn close_at_market(&self, symbol: &str) -> Result<()> {
        let snapshot = self
            .market
            .snapshot_fresh(symbol, self.ticker_stale_after)
            .await?;
        self.manager
            .close(symbol, snapshot.last_price, CloseReason::StrategySignal)
            .await?;
        Ok(())
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use common::{Candle, NoopNotifier};
    use rust_decimal_macros::dec;
    use strategy::Strategy;

    use crate::testutil::{harness, Harness};

    /// Emits a fixed signal regardless of market data.
    struct Fixed(&'static str, Signal);

    impl Strategy for Fixed {
        fn name(&self) -> &'static str {
            self.0
        }

        fn generate_signal(
            &self,
            _symbol: &str,
            _params: &HashMap<String, String>,
            _candles: &[Candle],
        ) -> Result<Signal> {
            Ok(self.1)
        }
    }

    /// Always fails, to prove per-symbol fault isolation.
    struct Broken;

    impl Strategy for Broken {
        fn name(&self) -> &'static str {
            "BROKEN"
        }

        fn generate_signal(
            &self,
            _symbol: &str,
            _params: &HashMap<String, String>,
            _candles: &[Candle],
        ) -> Result<Signal> {
            Err(Error::Other("indicator blew up".to_string()))
        }
    }

    fn scheduler(h: &Harness, registry: StrategyRegistry) -> StrategyScheduler {
        StrategyScheduler::new(
            h.configs.clone(),
            Arc::new(registry),
            Arc::new(MarketDataService::new(h.gateway.clone())),
            h.manager.clone(),
            h.pairs.clone(),
            Arc::new(NoopNotifier),
            Duration::from_secs(15),
        )
    }

    async fn assign(h: &Harness, symbol: &str, strategy_name: &str) {
        let mut cfg = h.configs.get(symbol).await.unwrap();
        cfg.strategy_name = strategy_name.to_string();
        h.configs.upsert(cfg).await.unwrap();
    }

    #[tokio::test]
    async fn buy_signal_opens_a_position_at_the_ticker_price() {
        let h = harness().await;
        let mut registry = StrategyRegistry::with_builtins();
        registry.register(Arc::new(Fixed("ALWAYS_BUY", Signal::Buy)));
        let scheduler = scheduler(&h, registry);

        // Only BTCUSDT trades in this test
        h.configs.remove("ETHUSDT").await.unwrap();
        h.configs.remove("SOLUSDT").await.unwrap();
        assign(&h, "BTCUSDT", "ALWAYS_BUY").await;
        h.gateway.set_price("BTCUSDT", dec!(100)).await;

        scheduler.run_once().await;

        let position = h.manager.get_active("BTCUSDT").await.unwrap().unwrap();
        assert_eq!(position.side, OrderSide::Buy);
        assert_eq!(position.entry_price, dec!(100));

        // A second sweep sees the open position and does nothing
        scheduler.run_once().await;
        assert_eq!(h.gateway.submitted_orders().await.len(), 1);
    }

    #[tokio::test]
    async fn opposite_signal_closes_the_running_position() {
        let h = harness().await;
        let mut registry = StrategyRegistry::with_builtins();
        registry.register(Arc::new(Fixed("ALWAYS_SELL", Signal::Sell)));
        let scheduler = scheduler(&h, registry);

        h.configs.remove("ETHUSDT").await.unwrap();
        h.configs.remove("SOLUSDT").await.unwrap();
        h.gateway.set_price("BTCUSDT", dec!(100)).await;
        h.manager
            .open("BTCUSDT", OrderSide::Buy, dec!(100))
            .await
            .unwrap();

        assign(&h, "BTCUSDT", "ALWAYS_SELL").await;
        h.gateway.set_price("BTCUSDT", dec!(101)).await;
        scheduler.run_once().await;

        let closed = &h.positions.history(Some("BTCUSDT")).await.unwrap()[0];
        assert_eq!(closed.close_reason, Some(CloseReason::StrategySignal));
        assert_eq!(closed.pnl, Some(dec!(10.0)));
    }

    #[tokio::test]
    async fn sell_signal_without_a_position_is_ignored_on_spot() {
        let h = harness().await;
        let mut registry = StrategyRegistry::with_builtins();
        registry.register(Arc::new(Fixed("ALWAYS_SELL", Signal::Sell)));
        let scheduler = scheduler(&h, registry);

        h.configs.remove("ETHUSDT").await.unwrap();
        h.configs.remove("SOLUSDT").await.unwrap();
        assign(&h, "BTCUSDT", "ALWAYS_SELL").await;
        h.gateway.set_price("BTCUSDT", dec!(100)).await;

        scheduler.run_once().await;
        assert!(h.manager.get_active("BTCUSDT").await.unwrap().is_none());
        assert!(h.gateway.submitted_orders().await.is_empty());
    }

    #[tokio::test]
    async fn sell_signal_opens_a_short_off_spot() {
        let h = harness().await;
        let mut registry = StrategyRegistry::with_builtins();
        registry.register(Arc::new(Fixed("ALWAYS_SELL", Signal::Sell)));
        let scheduler = scheduler(&h, registry);

        h.configs.remove("BTCUSDT").await.unwrap();
        h.configs.remove("ETHUSDT").await.unwrap();
        assign(&h, "SOLUSDT", "ALWAYS_SELL").await;
        h.gateway.set_price("SOLUSDT", dec!(100)).await;

        scheduler.run_once().await;
        let position = h.manager.get_active("SOLUSDT").await.unwrap().unwrap();
        assert_eq!(position.side, OrderSide::Sell);
    }

    #[tokio::test]
    async fn one_broken_symbol_never_aborts_the_sweep() {
        let h = harness().await;
        let mut registry = StrategyRegistry::with_builtins();
        registry.register(Arc::new(Broken));
        registry.register(Arc::new(Fixed("ALWAYS_BUY", Signal::Buy)));
        let scheduler = scheduler(&h, registry);

        h.configs.remove("SOLUSDT").await.unwrap();
        // BTCUSDT sorts before ETHUSDT, so the broken one runs first
        assign(&h, "BTCUSDT", "BROKEN").await;
        assign(&h, "ETHUSDT", "ALWAYS_BUY").await;
        h.gateway.set_price("ETHUSDT", dec!(500)).await;

        scheduler.run_once().await;
        assert!(h.manager.get_active("ETHUSDT").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn unknown_strategy_names_are_skipped() {
        let h = harness().await;
        let scheduler = scheduler(&h, StrategyRegistry::with_builtins());

        h.configs.remove("ETHUSDT").await.unwrap();
        h.configs.remove("SOLUSDT").await.unwrap();
        assign(&h, "BTCUSDT", "DOES_NOT_EXIST").await;
        h.gateway.set_price("BTCUSDT", dec!(100)).await;

        scheduler.run_once().await;
        assert!(h.gateway.submitted_orders().await.is_empty());
    }
}
