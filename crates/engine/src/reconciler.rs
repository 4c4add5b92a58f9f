use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use tokio::sync::watch;
use tracing::{debug, error, info};

use common::{ExchangeGateway, Result, TradingPair};
use store::ConfigStore;

use crate::position_manager::PositionManager;

/// Aligns local position state with the exchange, once at startup and then
/// at a long interval. The exchange is authoritative.
///
/// All mutation goes through the `PositionManager` reconciliation entry
/// points, which makes a repeated run with unchanged exchange state a no-op.
pub struct StateReconciler {
    manager: Arc<PositionManager>,
    gateway: Arc<dyn ExchangeGateway>,
    configs: Arc<ConfigStore>,
    pairs: Arc<HashMap<String, TradingPair>>,
    interval: Duration,
    default_strategy: String,
    default_params: HashMap<String, String>,
}

impl StateReconciler {
    pub fn new(
        manager: Arc<PositionManager>,
        gateway: Arc<dyn ExchangeGateway>,
        configs: Arc<ConfigStore>,
        pairs: Arc<HashMap<String, TradingPair>>,
        default_strategy: String,
        default_params: HashMap<String, String>,
    ) -> Self {
        Self {
            manager,
            gateway,
            configs,
            pairs,
            interval: Duration::from_secs(300),
            default_strategy,
            default_params,
        }
    }

    /// Startup pass: seed missing strategy configs, then reconcile.
    pub async fn startup(&self) -> Result<()> {
        let symbols: Vec<String> = self.pairs.keys().cloned().collect();
        let seeded = self
            .configs
            .seed_defaults(&symbols, &self.default_strategy, &self.default_params)
            .await?;
        if seeded > 0 {
            info!(seeded, strategy = %self.default_strategy, "seeded default strategy configs");
        }
        self.run_once().await;
        Ok(())
    }

    /// Run the periodic loop. Call from `tokio::spawn` after `startup`.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(interval = ?self.interval, "StateReconciler running");
        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {
                    self.run_once().await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("StateReconciler stopping");
                        return;
                    }
                }
            }
        }
    }

    /// One pass over every configured pair. Per-symbol failures don't stop
    /// the rest.
    pub async fn run_once(&self) {
        for pair in self.pairs.values() {
            if let Err(e) = self.reconcile_symbol(pair).await {
                error!(symbol = %pair.symbol, error = %e, "reconciliation failed");
            }
        }
    }

    async fn reconcile_symbol(&self, pair: &TradingPair) -> Result<()> {
        let local = self.manager.get_active(&pair.symbol).await?;
        let exchange = self.gateway.exchange_position(pair).await?;

        match (local, exchange) {
            // Closed on the exchange while we were away
            (Some(_), None) => {
                self.manager.mark_closed_external(&pair.symbol).await?;
            }

            // Uncontrolled exposure: adopt it so risk monitoring can see it
            (None, Some(exchange)) => {
                self.manager
                    .adopt_exchange_position(&pair.symbol, exchange.quantity)
                    .await?;
            }

            // Both sides agree a position exists; sizes must match within
            // one quantum of the pair's quantity precision
            (Some(local), Some(exchange)) => {
                let tolerance = Decimal::new(1, pair.quantity_precision);
                if (local.quantity - exchange.quantity).abs() > tolerance {
                    self.manager
                        .align_quantity(&pair.symbol, exchange.quantity)
                        .await?;
                } else {
                    debug!(symbol = %pair.symbol, "local and exchange state agree");
                }
            }

            (None, None) => {}
        }
        Ok(())
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use common::{CloseReason, OrderSide, RiskEventKind};
    use rust_decimal_macros::dec;

    use crate::testutil::{harness, Harness};

    fn reconciler(h: &Harness) -> StateReconciler {
        StateReconciler::new(
            h.manager.clone(),
            h.gateway.clone(),
            h.configs.clone(),
            h.pairs.clone(),
            "SMA_CROSSOVER".to_string(),
            HashMap::new(),
        )
    }

    #[tokio::test]
    async fn orphan_exchange_exposure_becomes_an_emergency_position() {
        let h = harness().await;
        let reconciler = reconciler(&h);

        h.gateway.set_holding("BTC", dec!(0.5)).await;
        reconciler.run_once().await;

        let position = h.manager.get_active("BTCUSDT").await.unwrap().unwrap();
        assert_eq!(position.side, OrderSide::Buy);
        assert_eq!(position.quantity, dec!(0.5));
        assert_eq!(position.entry_price, Decimal::ZERO);
        assert!(position.stop_loss_price.is_none());

        let events = h.events.recent(10).await.unwrap();
        assert!(events
            .iter()
            .any(|e| e.kind == RiskEventKind::EmergencyPosition));
    }

    #[tokio::test]
    async fn externally_closed_positions_are_marked_closed_without_pnl() {
        let h = harness().await;
        let reconciler = reconciler(&h);

        h.gateway.set_price("BTCUSDT", dec!(100)).await;
        h.manager
            .open("BTCUSDT", OrderSide::Buy, dec!(100))
            .await
            .unwrap();

        // Someone sold the coins outside the bot
        h.gateway.set_holding("BTC", Decimal::ZERO).await;
        reconciler.run_once().await;

        assert!(h.manager.get_active("BTCUSDT").await.unwrap().is_none());
        let closed = &h.positions.history(Some("BTCUSDT")).await.unwrap()[0];
        assert_eq!(closed.close_reason, Some(CloseReason::ExternalClose));
        assert_eq!(closed.pnl, None);
        assert_eq!(closed.exit_price, None);
    }

    #[tokio::test]
    async fn quantity_drift_realigns_local_to_exchange() {
        let h = harness().await;
        let reconciler = reconciler(&h);

        h.gateway.set_price("BTCUSDT", dec!(100)).await;
        h.manager
            .open("BTCUSDT", OrderSide::Buy, dec!(100))
            .await
            .unwrap();

        // Exchange shows twice the size
        h.gateway.set_holding("BTC", dec!(20)).await;
        reconciler.run_once().await;

        let position = h.manager.get_active("BTCUSDT").await.unwrap().unwrap();
        assert_eq!(position.quantity, dec!(20));
        let events = h.events.recent(10).await.unwrap();
        assert!(events
            .iter()
            .any(|e| e.kind == RiskEventKind::QuantityAligned));
    }

    #[tokio::test]
    async fn reconciling_matching_state_is_a_no_op() {
        let h = harness().await;
        let reconciler = reconciler(&h);

        h.gateway.set_price("BTCUSDT", dec!(100)).await;
        h.manager
            .open("BTCUSDT", OrderSide::Buy, dec!(100))
            .await
            .unwrap();

        let before = h.events.count().await.unwrap();
        reconciler.run_once().await;
        assert_eq!(h.events.count().await.unwrap(), before);
    }

    #[tokio::test]
    async fn repeated_runs_without_exchange_changes_are_idempotent() {
        let h = harness().await;
        let reconciler = reconciler(&h);

        h.gateway.set_holding("BTC", dec!(0.5)).await;
        reconciler.run_once().await;
        let events_after_first = h.events.count().await.unwrap();
        let adopted = h.manager.get_active("BTCUSDT").await.unwrap().unwrap();

        reconciler.run_once().await;
        assert_eq!(h.events.count().await.unwrap(), events_after_first);
        let still = h.manager.get_active("BTCUSDT").await.unwrap().unwrap();
        assert_eq!(still.id, adopted.id);
        assert_eq!(h.positions.count_active().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn startup_seeds_missing_configs_once() {
        let h = harness().await;
        h.configs.remove("ETHUSDT").await.unwrap();
        let reconciler = reconciler(&h);

        reconciler.startup().await.unwrap();
        let seeded = h.configs.get("ETHUSDT").await.unwrap();
        assert_eq!(seeded.strategy_name, "SMA_CROSSOVER");
        assert!(seeded.active);
    }
}
