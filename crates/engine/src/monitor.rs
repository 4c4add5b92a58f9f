use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rust_decimal::Decimal;
use tokio::sync::{broadcast, watch};
use tracing::{debug, error, info, warn};

use common::{
    CloseReason, Error, MarketDataEvent, Notifier, Position, Result, RiskEventKind,
    RiskEventRecord, Severity,
};
use gateway::MarketDataService;
use risk::{calculator, DailyLossTracker};
use store::RiskEventRepository;

use crate::position_manager::PositionManager;

#[derive(Debug, Clone)]
pub struct RiskMonitorConfig {
    /// Fixed-rate fallback sweep interval (D2).
    pub sweep_interval: Duration,
    /// Cached tickers older than this are refetched during a sweep.
    pub ticker_stale_after: Duration,
}

impl Default for RiskMonitorConfig {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_secs(1),
            ticker_stale_after: Duration::from_secs(5),
        }
    }
}

/// Watches every active position on two triggers: each incoming ticker (the
/// low-latency path) and a fixed-rate sweep (the safety net for missed
/// events).
///
/// Per position the checks run in a fixed order: trailing-stop update,
/// stop-loss, take-profit, max-holding-time. When stop-loss and take-profit
/// would both fire on one tick, stop-loss wins and take-profit is never
/// evaluated. A failed close is retried on the next tick; idempotency comes
/// from the per-symbol lock inside `PositionManager`.
pub struct RiskMonitor {
    manager: Arc<PositionManager>,
    market: Arc<MarketDataService>,
    events: RiskEventRepository,
    notifier: Arc<dyn Notifier>,
    loss_tracker: Arc<DailyLossTracker>,
    config: RiskMonitorConfig,
}

impl RiskMonitor {
    pub fn new(
        manager: Arc<PositionManager>,
        market: Arc<MarketDataService>,
        events: RiskEventRepository,
        notifier: Arc<dyn Notifier>,
        loss_tracker: Arc<DailyLossTracker>,
        config: RiskMonitorConfig,
    ) -> Self {
        Self {
            manager,
            market,
            events,
            notifier,
            loss_tracker,
            config,
        }
    }

    /// Run the monitor loop. Call from `tokio::spawn`.
    pub async fn run(
        self,
        mut market_rx: broadcast::Receiver<MarketDataEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!(interval = ?self.config.sweep_interval, "RiskMonitor running");
        let mut ticker = tokio::time::interval(self.config.sweep_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("RiskMonitor stopping");
                        return;
                    }
                }

                // ── Event path: react to each ticker immediately ──────────
                event = market_rx.recv() => match event {
                    Ok(MarketDataEvent::Ticker(snapshot)) => {
                        self.check_symbol(&snapshot.symbol, snapshot.last_price).await;
                    }
                    Ok(MarketDataEvent::Candle { .. }) => {}
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(dropped = n, "risk monitor lagged on market events");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        warn!("market broadcast closed — RiskMonitor exiting");
                        return;
                    }
                },

                // ── Periodic safety net ───────────────────────────────────
                _ = ticker.tick() => {
                    self.sweep_once().await;
                }
            }
        }
    }

    /// One fixed-rate pass over all active positions using cached tickers
    /// (refetched when stale). Rate limiting aborts the sweep; the next tick
    /// retries.
    pub async fn sweep_once(&self) {
        let active = match self.manager.list_active().await {
            Ok(active) => active,
            Err(e) => {
                error!(error = %e, "failed to list active positions");
                return;
            }
        };

        for position in active {
            let price = match self
                .market
                .snapshot_fresh(&position.symbol, self.config.ticker_stale_after)
                .await
            {
                Ok(snapshot) => snapshot.last_price,
                Err(Error::RateLimited { retry_after }) => {
                    warn!(?retry_after, "rate limited during sweep, backing off to next tick");
                    return;
                }
                Err(e) => {
                    error!(symbol = %position.symbol, error = %e, "no price for risk sweep");
                    continue;
                }
            };
            self.check_symbol(&position.symbol, price).await;
        }

        self.enforce_daily_halt().await;
    }

    /// Run the ordered checks for one symbol at the given price. Errors are
    /// logged and reported; the position is retried on the next tick.
    pub async fn check_symbol(&self, symbol: &str, price: Decimal) {
        match self.run_checks(symbol, price).await {
            Ok(()) => {}
            // Benign races: another path already closed or is closing it
            Err(Error::NotFound(_)) | Err(Error::CloseInProgress { .. }) => {
                debug!(%symbol, "position vanished mid-check");
            }
            Err(e) => {
                error!(%symbol, error = %e, "risk check failed");
                self.notifier
                    .notify(Severity::Warning, &format!("[{symbol}] risk check failed: {e}"))
                    .await;
            }
        }
    }

    async fn run_checks(&self, symbol: &str, price: Decimal) -> Result<()> {
        // 1. Trailing stop: monotone tightening, serialized inside the manager.
        self.manager.tighten_trailing_stop(symbol, price).await?;

        let Some(position) = self.manager.get_active(symbol).await? else {
            return Ok(());
        };

        // Emergency adoptions have no meaningful entry; stop/target checks
        // stay off until an operator supplies one. The clock still runs.
        if !position.is_emergency() {
            // 2. Stop-loss. Wins ties: a tick through both levels crossed
            // the stop first on any continuous path.
            if let Some(stop) = position.stop_loss_price {
                if calculator::stop_loss_hit(position.side, price, stop) {
                    self.trigger(
                        RiskEventKind::StopLossTriggered,
                        &position,
                        price,
                        format!("price {price} crossed stop {stop}"),
                    )
                    .await;
                    self.manager.close(symbol, price, CloseReason::StopLoss).await?;
                    self.enforce_daily_halt().await;
                    return Ok(());
                }
            }

            // 3. Take-profit, against a fresh read — the stop check may have
            // closed the position on a competing tick.
            let Some(position) = self.manager.get_active(symbol).await? else {
                return Ok(());
            };
            if let Some(target) = position.take_profit_price {
                if calculator::take_profit_hit(position.side, price, target) {
                    self.trigger(
                        RiskEventKind::TakeProfitTriggered,
                        &position,
                        price,
                        format!("price {price} reached target {target}"),
                    )
                    .await;
                    self.manager
                        .close(symbol, price, CloseReason::TakeProfit)
                        .await?;
                    self.enforce_daily_halt().await;
                    return Ok(());
                }
            }
        }

        // 4. Max holding time.
        let Some(position) = self.manager.get_active(symbol).await? else {
            return Ok(());
        };
        if Utc::now() >= position.force_close_at {
            self.trigger(
                RiskEventKind::TimeLimitTriggered,
                &position,
                price,
                "max holding time reached".to_string(),
            )
            .await;
            self.manager.close(symbol, price, CloseReason::TimeLimit).await?;
            self.enforce_daily_halt().await;
        }

        Ok(())
    }

    /// After the daily loss limit trips, flatten whatever is still open.
    /// Opens are already refused by the manager; this clears existing
    /// exposure with the last known prices.
    async fn enforce_daily_halt(&self) {
        if !self.loss_tracker.is_halted(Utc::now()) {
            return;
        }
        let active = match self.manager.list_active().await {
            Ok(active) => active,
            Err(e) => {
                error!(error = %e, "failed to list positions for emergency flatten");
                return;
            }
        };
        for position in active {
            let Some(snapshot) = self.market.snapshot(&position.symbol) else {
                warn!(symbol = %position.symbol, "no cached price to flatten against");
                continue;
            };
            match self
                .manager
                .close(&position.symbol, snapshot.last_price, CloseReason::EmergencyStop)
                .await
            {
                Ok(_) => info!(symbol = %position.symbol, "position flattened by daily-loss halt"),
                Err(e) => error!(symbol = %position.symbol, error = %e, "emergency flatten failed"),
            }
        }
    }

    async fn trigger(
        &self,
        kind: RiskEventKind,
        position: &Position,
        price: Decimal,
        message: String,
    ) {
        let event = RiskEventRecord::new(kind, &position.symbol, Severity::Warning, message)
            .with_position(&position.id)
            .with_trigger_price(price);
        if let Err(e) = self.events.append(&event).await {
            error!(symbol = %position.symbol, error = %e, "failed to persist risk event");
        }
        self.notifier
            .notify(event.severity, &format!("[{}] {}", event.symbol, event.message))
            .await;
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use common::{MarketSnapshot, NoopNotifier, OrderSide};
    use rust_decimal_macros::dec;

    use crate::testutil::{defaults, harness, harness_with, Harness};

    fn monitor(h: &Harness, market: Arc<MarketDataService>) -> RiskMonitor {
        RiskMonitor::new(
            h.manager.clone(),
            market,
            h.events.clone(),
            Arc::new(NoopNotifier),
            h.tracker.clone(),
            RiskMonitorConfig::default(),
        )
    }

    fn snapshot(symbol: &str, price: Decimal) -> MarketSnapshot {
        MarketSnapshot {
            symbol: symbol.to_string(),
            last_price: price,
            best_bid: price,
            best_ask: price,
            volume_24h: Decimal::ZERO,
            quote_volume_24h: Decimal::ZERO,
            change_pct_24h: Decimal::ZERO,
            at: Utc::now(),
        }
    }

    async fn kinds(h: &Harness) -> Vec<RiskEventKind> {
        h.events
            .recent(100)
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.kind)
            .collect()
    }

    #[tokio::test]
    async fn stop_loss_wins_when_a_gap_tick_crosses_both_levels() {
        let h = harness().await;
        let market = Arc::new(MarketDataService::new(h.gateway.clone()));
        let monitor = monitor(&h, market);

        h.gateway.set_price("BTCUSDT", dec!(100)).await;
        h.manager
            .open("BTCUSDT", OrderSide::Buy, dec!(100))
            .await
            .unwrap();

        h.gateway.set_price("BTCUSDT", dec!(98.2)).await;
        monitor.check_symbol("BTCUSDT", dec!(98.2)).await;

        let closed = &h.positions.history(Some("BTCUSDT")).await.unwrap()[0];
        assert_eq!(closed.close_reason, Some(CloseReason::StopLoss));
        assert_eq!(closed.pnl, Some(dec!(-18.0)));

        let kinds = kinds(&h).await;
        assert!(kinds.contains(&RiskEventKind::StopLossTriggered));
        assert!(!kinds.contains(&RiskEventKind::TakeProfitTriggered));
    }

    #[tokio::test]
    async fn take_profit_closes_at_the_target() {
        let h = harness().await;
        let market = Arc::new(MarketDataService::new(h.gateway.clone()));
        let monitor = monitor(&h, market);

        h.gateway.set_price("BTCUSDT", dec!(100)).await;
        h.manager
            .open("BTCUSDT", OrderSide::Buy, dec!(100))
            .await
            .unwrap();

        // Below the target nothing happens
        monitor.check_symbol("BTCUSDT", dec!(102.9)).await;
        assert!(h.manager.get_active("BTCUSDT").await.unwrap().is_some());

        h.gateway.set_price("BTCUSDT", dec!(103.2)).await;
        monitor.check_symbol("BTCUSDT", dec!(103.2)).await;

        let closed = &h.positions.history(Some("BTCUSDT")).await.unwrap()[0];
        assert_eq!(closed.close_reason, Some(CloseReason::TakeProfit));
        assert_eq!(closed.pnl, Some(dec!(32.0)));
    }

    #[tokio::test]
    async fn trailing_stop_tightens_then_stops_out() {
        let h = harness().await;
        let market = Arc::new(MarketDataService::new(h.gateway.clone()));
        let monitor = monitor(&h, market);

        let mut cfg = h.configs.get("BTCUSDT").await.unwrap();
        cfg.params
            .insert("trailing_stop_pct".to_string(), "0.01".to_string());
        h.configs.upsert(cfg).await.unwrap();

        h.gateway.set_price("BTCUSDT", dec!(100)).await;
        h.manager
            .open("BTCUSDT", OrderSide::Buy, dec!(100))
            .await
            .unwrap();

        for price in [dec!(101), dec!(102), dec!(103)] {
            h.gateway.set_price("BTCUSDT", price).await;
            monitor.check_symbol("BTCUSDT", price).await;
        }
        let position = h.manager.get_active("BTCUSDT").await.unwrap().unwrap();
        assert_eq!(position.stop_loss_price, Some(dec!(101.97)));
        assert_eq!(position.high_watermark, Some(dec!(103)));

        // The pullback through the tightened stop closes the position
        h.gateway.set_price("BTCUSDT", dec!(101)).await;
        monitor.check_symbol("BTCUSDT", dec!(101)).await;

        let closed = &h.positions.history(Some("BTCUSDT")).await.unwrap()[0];
        assert_eq!(closed.close_reason, Some(CloseReason::StopLoss));
        assert_eq!(closed.pnl, Some(dec!(10.0)));
    }

    #[tokio::test]
    async fn time_limit_closes_even_without_stop_or_target_hit() {
        let mut d = defaults();
        d.max_holding = Duration::from_secs(0);
        let h = harness_with(d, dec!(10000)).await;
        let market = Arc::new(MarketDataService::new(h.gateway.clone()));
        let monitor = monitor(&h, market);

        h.gateway.set_price("BTCUSDT", dec!(100)).await;
        h.manager
            .open("BTCUSDT", OrderSide::Buy, dec!(100))
            .await
            .unwrap();

        // Price is inside the bracket; only the clock forces the close
        monitor.check_symbol("BTCUSDT", dec!(100.5)).await;

        let closed = &h.positions.history(Some("BTCUSDT")).await.unwrap()[0];
        assert_eq!(closed.close_reason, Some(CloseReason::TimeLimit));
        assert!(kinds(&h).await.contains(&RiskEventKind::TimeLimitTriggered));
    }

    #[tokio::test]
    async fn emergency_positions_are_not_stop_monitored() {
        let h = harness().await;
        let market = Arc::new(MarketDataService::new(h.gateway.clone()));
        let monitor = monitor(&h, market);

        h.manager
            .adopt_exchange_position("BTCUSDT", dec!(0.5))
            .await
            .unwrap();

        // Any price: no stops are set and the entry is unknown
        monitor.check_symbol("BTCUSDT", dec!(42)).await;
        assert!(h.manager.get_active("BTCUSDT").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn periodic_sweep_catches_a_missed_event() {
        let h = harness().await;
        let market = Arc::new(MarketDataService::new(h.gateway.clone()));
        let monitor = monitor(&h, market);

        h.gateway.set_price("BTCUSDT", dec!(100)).await;
        h.manager
            .open("BTCUSDT", OrderSide::Buy, dec!(100))
            .await
            .unwrap();

        // No ticker event was ever broadcast; the sweep fetches the price
        h.gateway.set_price("BTCUSDT", dec!(98.0)).await;
        monitor.sweep_once().await;

        let closed = &h.positions.history(Some("BTCUSDT")).await.unwrap()[0];
        assert_eq!(closed.close_reason, Some(CloseReason::StopLoss));
    }

    #[tokio::test]
    async fn daily_loss_halt_flattens_remaining_positions() {
        // Capital 1000: the halt trips at a 20 quote-unit loss
        let h = harness_with(defaults(), dec!(1000)).await;
        let market = Arc::new(MarketDataService::new(h.gateway.clone()));
        let monitor = monitor(&h, market.clone());

        h.gateway.set_price("BTCUSDT", dec!(100)).await;
        h.gateway.set_price("ETHUSDT", dec!(100)).await;
        h.manager
            .open("BTCUSDT", OrderSide::Buy, dec!(100))
            .await
            .unwrap();
        h.manager
            .open("ETHUSDT", OrderSide::Buy, dec!(100))
            .await
            .unwrap();

        // ETH needs a cached price for the emergency flatten
        market.apply_ticker(snapshot("ETHUSDT", dec!(100)));

        // BTC stops out at 98: pnl -20 breaches the 2% daily limit
        h.gateway.set_price("BTCUSDT", dec!(98)).await;
        monitor.check_symbol("BTCUSDT", dec!(98)).await;

        let eth = &h.positions.history(Some("ETHUSDT")).await.unwrap()[0];
        assert_eq!(eth.close_reason, Some(CloseReason::EmergencyStop));
        assert!(h.tracker.is_halted(Utc::now()));
        assert!(kinds(&h).await.contains(&RiskEventKind::DailyLossHalt));
    }
}
