use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rust_decimal::Decimal;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use common::{
    CloseReason, Error, ExchangeGateway, Notifier, OrderRequest, OrderSide, PairKind, Position,
    Result, RiskEventKind, RiskEventRecord, Severity, Trade, TradingPair,
};
use risk::{calculator, DailyLossTracker, LossAction};
use store::{ConfigStore, PositionRepository, RiskEventRepository, TradeRepository};

use crate::locks::SymbolLocks;

/// Global defaults for position sizing and protection. Per-symbol overrides
/// ride in `StrategyConfig.params` under the same key names.
#[derive(Debug, Clone)]
pub struct PositionDefaults {
    /// Quote-currency notional per position.
    pub notional: Decimal,
    pub stop_loss_pct: Decimal,
    pub take_profit_pct: Decimal,
    pub trailing_stop_pct: Option<Decimal>,
    pub max_holding: Duration,
    pub max_open_positions: usize,
}

/// Sole mutator of `Position` state.
///
/// Every mutating operation runs its whole read-modify-write — including the
/// exchange call — under the symbol's lock, so at most one open/close per
/// symbol is ever in flight and the one-active-position invariant holds by
/// construction. Exchange failures surface to the caller with no local state
/// touched.
pub struct PositionManager {
    positions: PositionRepository,
    trades: TradeRepository,
    events: RiskEventRepository,
    configs: Arc<ConfigStore>,
    pairs: Arc<HashMap<String, TradingPair>>,
    gateway: Arc<dyn ExchangeGateway>,
    notifier: Arc<dyn Notifier>,
    loss_tracker: Arc<DailyLossTracker>,
    locks: SymbolLocks,
    defaults: PositionDefaults,
    /// Bounded wait for the symbol lock on the close path; a timeout means a
    /// close is already in flight.
    close_lock_wait: Duration,
}

impl PositionManager {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        positions: PositionRepository,
        trades: TradeRepository,
        events: RiskEventRepository,
        configs: Arc<ConfigStore>,
        pairs: Arc<HashMap<String, TradingPair>>,
        gateway: Arc<dyn ExchangeGateway>,
        notifier: Arc<dyn Notifier>,
        loss_tracker: Arc<DailyLossTracker>,
        defaults: PositionDefaults,
    ) -> Self {
        Self {
            positions,
            trades,
            events,
            configs,
            pairs,
            gateway,
            notifier,
            loss_tracker,
            locks: SymbolLocks::new(),
            defaults,
            close_lock_wait: Duration::from_secs(5),
        }
    }

    fn pair(&self, symbol: &str) -> Result<&TradingPair> {
        self.pairs
            .get(symbol)
            .ok_or_else(|| Error::Config(format!("unknown trading pair '{symbol}'")))
    }

    pub async fn get_active(&self, symbol: &str) -> Result<Option<Position>> {
        self.positions.get_active(symbol).await
    }

    pub async fn list_active(&self) -> Result<Vec<Position>> {
        self.positions.list_active().await
    }

    /// Open a position at roughly `entry_price` (the fill price wins when
    /// the exchange reports one).
    ///
    /// Returns `Ok(None)` when an active position already exists: the loser
    /// of a signal race observes the winner's position and backs off without
    /// touching the exchange.
    pub async fn open(
        &self,
        symbol: &str,
        side: OrderSide,
        entry_price: Decimal,
    ) -> Result<Option<Position>> {
        let pair = self.pair(symbol)?;
        if side == OrderSide::Sell && pair.kind == PairKind::Spot {
            return Err(Error::Validation(format!(
                "short opens are not allowed on spot pair '{symbol}'"
            )));
        }
        let config = self
            .configs
            .get(symbol)
            .await
            .filter(|c| c.active)
            .ok_or_else(|| Error::Config(format!("no active strategy config for '{symbol}'")))?;

        let _guard = self.locks.acquire(symbol).await;

        if let Some(existing) = self.positions.get_active(symbol).await? {
            debug!(%symbol, id = %existing.id, "open skipped, position already active");
            return Ok(None);
        }
        let now = Utc::now();
        if self.loss_tracker.is_halted(now) {
            return Err(Error::RiskViolation(
                "opens disabled until next UTC day: daily loss limit".to_string(),
            ));
        }
        if self.positions.count_active().await? >= self.defaults.max_open_positions as i64 {
            return Err(Error::RiskViolation(format!(
                "max concurrent positions ({}) reached",
                self.defaults.max_open_positions
            )));
        }

        let notional = config
            .param_decimal("notional")
            .unwrap_or(self.defaults.notional);
        let quantity =
            calculator::quantity_for_notional(notional, entry_price, pair.quantity_precision)?;
        if quantity < pair.min_order_size {
            return Err(Error::Validation(format!(
                "sized quantity {quantity} is below the '{symbol}' minimum {}",
                pair.min_order_size
            )));
        }

        // Exchange first: an error here leaves no local state behind.
        let receipt = self
            .gateway
            .place_order(&OrderRequest::market(symbol, side, quantity))
            .await?;
        let entry = if receipt.avg_price > Decimal::ZERO {
            receipt.avg_price
        } else {
            entry_price
        };

        let stop_loss_pct = config
            .param_decimal("stop_loss_pct")
            .unwrap_or(self.defaults.stop_loss_pct);
        let take_profit_pct = config
            .param_decimal("take_profit_pct")
            .unwrap_or(self.defaults.take_profit_pct);
        let trailing_stop_pct = config
            .param_decimal("trailing_stop_pct")
            .or(self.defaults.trailing_stop_pct);

        let opened_at = Utc::now();
        let position = Position {
            id: Uuid::new_v4().to_string(),
            symbol: symbol.to_string(),
            side,
            quantity: if receipt.executed_qty > Decimal::ZERO {
                receipt.executed_qty
            } else {
                quantity
            },
            entry_price: entry,
            stop_loss_price: Some(calculator::round_half_up(
                calculator::stop_loss_price(side, entry, stop_loss_pct),
                pair.price_precision,
            )),
            take_profit_price: Some(calculator::round_half_up(
                calculator::take_profit_price(side, entry, take_profit_pct),
                pair.price_precision,
            )),
            trailing_stop_pct,
            high_watermark: trailing_stop_pct.map(|_| entry),
            active: true,
            opened_at,
            closed_at: None,
            force_close_at: opened_at
                + chrono::Duration::from_std(self.defaults.max_holding)
                    .unwrap_or_else(|_| chrono::Duration::hours(1)),
            exit_price: None,
            pnl: None,
            close_reason: None,
        };
        self.positions.insert(&position).await?;
        self.record_trade(&position.symbol, side, &receipt, entry, position.quantity)
            .await;

        info!(
            %symbol, %side, qty = %position.quantity, entry = %entry,
            stop = ?position.stop_loss_price, target = ?position.take_profit_price,
            "position opened"
        );
        self.emit(
            RiskEventRecord::new(
                RiskEventKind::PositionOpened,
                symbol,
                Severity::Info,
                format!("opened {side} {} @ {entry}", position.quantity),
            )
            .with_position(&position.id)
            .with_trigger_price(entry),
        )
        .await;

        Ok(Some(position))
    }

    /// Close the symbol's active position at roughly `exit_price`.
    ///
    /// The symbol lock is held for the duration of the exchange call; a
    /// second close arriving meanwhile times out and gets `CloseInProgress`.
    /// If the exchange-side close fails, the local position stays active and
    /// the error surfaces — the risk monitor retries on the next tick.
    pub async fn close(
        &self,
        symbol: &str,
        exit_price: Decimal,
        reason: CloseReason,
    ) -> Result<Position> {
        let _guard = self
            .locks
            .acquire_timeout(symbol, self.close_lock_wait)
            .await
            .ok_or_else(|| Error::CloseInProgress {
                symbol: symbol.to_string(),
            })?;

        let position = self
            .positions
            .get_active(symbol)
            .await?
            .ok_or_else(|| Error::NotFound(format!("no active position for '{symbol}'")))?;

        let receipt = self
            .gateway
            .place_order(&OrderRequest::market(
                symbol,
                position.side.opposite(),
                position.quantity,
            ))
            .await?;
        let exit = if receipt.avg_price > Decimal::ZERO {
            receipt.avg_price
        } else {
            exit_price
        };

        // Emergency adoptions have no known entry; their P&L is unknowable.
        let pnl = (!position.is_emergency()).then(|| {
            calculator::realized_pnl(position.side, position.entry_price, exit, position.quantity)
        });

        let closed_at = Utc::now();
        self.positions
            .mark_closed(&position.id, closed_at, Some(exit), pnl, reason)
            .await?;
        self.record_trade(
            symbol,
            position.side.opposite(),
            &receipt,
            exit,
            position.quantity,
        )
        .await;

        info!(%symbol, %reason, exit = %exit, pnl = ?pnl, "position closed");
        self.emit(
            RiskEventRecord::new(
                RiskEventKind::PositionClosed,
                symbol,
                Severity::Info,
                format!("closed {reason} @ {exit}, pnl {pnl:?}"),
            )
            .with_position(&position.id)
            .with_trigger_price(exit),
        )
        .await;

        if let Some(pnl) = pnl {
            self.escalate_loss(pnl).await;
        }

        Ok(Position {
            active: false,
            closed_at: Some(closed_at),
            exit_price: Some(exit),
            pnl,
            close_reason: Some(reason),
            ..position
        })
    }

    /// Manual stop adjustment. Only accepts stops strictly more protective
    /// than the current one (same monotone rule the trailing service obeys).
    pub async fn update_stop_loss(&self, position_id: &str, new_price: Decimal) -> Result<()> {
        let position = self
            .positions
            .get(position_id)
            .await?
            .filter(|p| p.active)
            .ok_or_else(|| Error::NotFound(format!("no active position '{position_id}'")))?;

        let _guard = self.locks.acquire(&position.symbol).await;
        // Re-read under the lock; the monitor may have moved the stop.
        let position = self
            .positions
            .get(position_id)
            .await?
            .filter(|p| p.active)
            .ok_or_else(|| Error::NotFound(format!("no active position '{position_id}'")))?;

        if !calculator::tightens(position.side, position.stop_loss_price, new_price) {
            return Err(Error::Validation(format!(
                "stop {new_price} does not tighten current {:?}",
                position.stop_loss_price
            )));
        }
        self.positions
            .update_stop(position_id, new_price, position.high_watermark)
            .await
    }

    /// One trailing-stop step for the symbol: advance the watermark and
    /// apply the proposed stop when it tightens. Whole sequence runs under
    /// the symbol lock. Returns the applied `(watermark, stop)` if any.
    pub async fn tighten_trailing_stop(
        &self,
        symbol: &str,
        price: Decimal,
    ) -> Result<Option<(Decimal, Decimal)>> {
        let _guard = self.locks.acquire(symbol).await;

        let Some(position) = self.positions.get_active(symbol).await? else {
            return Ok(None);
        };
        let Some(trail_pct) = position.trailing_stop_pct else {
            return Ok(None);
        };
        if position.is_emergency() {
            return Ok(None);
        }

        let watermark = calculator::advance_watermark(position.side, position.high_watermark, price);
        let proposed = calculator::trailing_stop_price(position.side, watermark, trail_pct);

        if calculator::tightens(position.side, position.stop_loss_price, proposed) {
            self.positions
                .update_stop(&position.id, proposed, Some(watermark))
                .await?;
            debug!(%symbol, %watermark, stop = %proposed, "trailing stop tightened");
            self.emit(
                RiskEventRecord::new(
                    RiskEventKind::TrailingStopTightened,
                    symbol,
                    Severity::Info,
                    format!("stop moved to {proposed} (watermark {watermark})"),
                )
                .with_position(&position.id)
                .with_trigger_price(price),
            )
            .await;
            return Ok(Some((watermark, proposed)));
        }

        // Keep the watermark current even when the stop holds still.
        if Some(watermark) != position.high_watermark {
            if let Some(stop) = position.stop_loss_price {
                self.positions
                    .update_stop(&position.id, stop, Some(watermark))
                    .await?;
            }
        }
        Ok(None)
    }

    // ─── Reconciliation entry points ─────────────────────────────────────────
    // The StateReconciler mutates local state only through these; each one is
    // serialized under the symbol lock and idempotent.

    /// The exchange no longer shows exposure: mark the local position closed
    /// with an unknown exit (`pnl = None`).
    pub async fn mark_closed_external(&self, symbol: &str) -> Result<Option<Position>> {
        let _guard = self.locks.acquire(symbol).await;

        let Some(position) = self.positions.get_active(symbol).await? else {
            return Ok(None);
        };
        self.positions
            .mark_closed(&position.id, Utc::now(), None, None, CloseReason::ExternalClose)
            .await?;

        warn!(%symbol, id = %position.id, "position closed externally while bot was away");
        self.emit(
            RiskEventRecord::new(
                RiskEventKind::ExternalClose,
                symbol,
                Severity::Warning,
                "exchange shows no exposure; local position marked closed",
            )
            .with_position(&position.id),
        )
        .await;
        Ok(Some(position))
    }

    /// Exchange exposure with no local record: adopt it as an emergency
    /// position (entry price unknown, stops unset) so the operator sees it
    /// and the holding-time limit still applies.
    pub async fn adopt_exchange_position(&self, symbol: &str, quantity: Decimal) -> Result<Position> {
        let _guard = self.locks.acquire(symbol).await;

        if let Some(existing) = self.positions.get_active(symbol).await? {
            return Err(Error::Invariant(format!(
                "cannot adopt '{symbol}': position {} already active",
                existing.id
            )));
        }

        let now = Utc::now();
        let position = Position {
            id: Uuid::new_v4().to_string(),
            symbol: symbol.to_string(),
            side: OrderSide::Buy,
            quantity,
            entry_price: Decimal::ZERO,
            stop_loss_price: None,
            take_profit_price: None,
            trailing_stop_pct: None,
            high_watermark: None,
            active: true,
            opened_at: now,
            closed_at: None,
            force_close_at: now
                + chrono::Duration::from_std(self.defaults.max_holding)
                    .unwrap_or_else(|_| chrono::Duration::hours(1)),
            exit_price: None,
            pnl: None,
            close_reason: None,
        };
        self.positions.insert(&position).await?;

        warn!(%symbol, %quantity, "adopted uncontrolled exchange exposure");
        self.emit(
            RiskEventRecord::new(
                RiskEventKind::EmergencyPosition,
                symbol,
                Severity::Critical,
                format!("uncontrolled exposure of {quantity} adopted; supply an entry price"),
            )
            .with_position(&position.id),
        )
        .await;
        Ok(position)
    }

    /// Local and exchange quantities disagree beyond tolerance: the exchange
    /// is authoritative.
    pub async fn align_quantity(&self, symbol: &str, quantity: Decimal) -> Result<()> {
        let _guard = self.locks.acquire(symbol).await;

        let Some(position) = self.positions.get_active(symbol).await? else {
            return Ok(());
        };
        let local = position.quantity;
        self.positions.update_quantity(&position.id, quantity).await?;

        warn!(%symbol, %local, exchange = %quantity, "aligned local quantity to exchange");
        self.emit(
            RiskEventRecord::new(
                RiskEventKind::QuantityAligned,
                symbol,
                Severity::Warning,
                format!("local quantity {local} aligned to exchange {quantity}"),
            )
            .with_position(&position.id),
        )
        .await;
        Ok(())
    }

    // ─── Internals ───────────────────────────────────────────────────────────

    async fn record_trade(
        &self,
        symbol: &str,
        side: OrderSide,
        receipt: &common::OrderReceipt,
        price: Decimal,
        quantity: Decimal,
    ) {
        let trade = Trade {
            exchange_trade_id: receipt.exchange_trade_id.clone(),
            symbol: symbol.to_string(),
            side,
            order_type: common::OrderType::Market,
            status: receipt.status,
            price,
            quantity,
            commission: receipt.commission,
            executed_at: receipt.executed_at,
        };
        if let Err(e) = self.trades.insert(&trade).await {
            error!(%symbol, error = %e, "failed to persist trade");
        }
    }

    async fn escalate_loss(&self, pnl: Decimal) {
        match self.loss_tracker.record(pnl, Utc::now()) {
            LossAction::None => {}
            LossAction::Emergency => {
                self.emit(RiskEventRecord::new(
                    RiskEventKind::DailyLossWarning,
                    "*",
                    Severity::Critical,
                    "emergency-stop threshold crossed",
                ))
                .await;
            }
            LossAction::Halt => {
                self.emit(RiskEventRecord::new(
                    RiskEventKind::DailyLossHalt,
                    "*",
                    Severity::Critical,
                    "daily loss limit breached; opens disabled until next UTC day",
                ))
                .await;
            }
        }
    }

    /// Persist the audit event and notify. Both are best-effort: neither a
    /// full disk nor a dead notifier may block trading.
    async fn emit(&self, event: RiskEventRecord) {
        if let Err(e) = self.events.append(&event).await {
            error!(symbol = %event.symbol, error = %e, "failed to persist risk event");
        }
        self.notifier
            .notify(event.severity, &format!("[{}] {}", event.symbol, event.message))
            .await;
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
