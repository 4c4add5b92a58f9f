use rust_decimal::Decimal;
use serde::Serialize;

use common::Result;
use risk::calculator::round_half_up;
use store::PositionRepository;

/// Presentation scale: half-up at the boundary, exact decimal inside.
const SCALE: u32 = 8;

/// Read-only aggregation over all closed positions.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskMetrics {
    pub trade_count: usize,
    pub total_pnl: Decimal,
    /// Percentage of closed trades with positive P&L.
    pub win_rate: Decimal,
    /// Gross profit over gross loss; `Decimal::MAX` stands in for +inf when
    /// there are wins and no losses.
    pub profit_factor: Decimal,
    /// Peak-to-trough decline of the equity curve, as a percentage of the
    /// peak.
    pub max_drawdown_pct: Decimal,
    pub average_trade_pnl: Decimal,
    pub average_winning_trade: Decimal,
    /// Negative by convention.
    pub average_losing_trade: Decimal,
}

impl RiskMetrics {
    fn empty() -> Self {
        Self {
            trade_count: 0,
            total_pnl: Decimal::ZERO,
            win_rate: Decimal::ZERO,
            profit_factor: Decimal::ZERO,
            max_drawdown_pct: Decimal::ZERO,
            average_trade_pnl: Decimal::ZERO,
            average_winning_trade: Decimal::ZERO,
            average_losing_trade: Decimal::ZERO,
        }
    }
}

pub struct MetricsService {
    positions: PositionRepository,
    initial_capital: Decimal,
}

impl MetricsService {
    pub fn new(positions: PositionRepository, initial_capital: Decimal) -> Self {
        Self {
            positions,
            initial_capital,
        }
    }

    /// Compute metrics over all closed positions, ordered by close time.
    /// Positions without a realized P&L (external closes) don't contribute.
    pub async fn compute(&self) -> Result<RiskMetrics> {
        let closed = self.positions.closed_chronological().await?;
        let pnls: Vec<Decimal> = closed.iter().filter_map(|p| p.pnl).collect();
        Ok(compute_metrics(&pnls, self.initial_capital))
    }
}

/// Pure metric math over an ordered P&L series.
pub fn compute_metrics(pnls: &[Decimal], initial_capital: Decimal) -> RiskMetrics {
    if pnls.is_empty() {
        return RiskMetrics::empty();
    }
    let count = Decimal::from(pnls.len());
    let hundred = Decimal::from(100);

    let total: Decimal = pnls.iter().sum();
    let wins: Vec<Decimal> = pnls.iter().copied().filter(|p| *p > Decimal::ZERO).collect();
    let losses: Vec<Decimal> = pnls.iter().copied().filter(|p| *p < Decimal::ZERO).collect();

    let gross_profit: Decimal = wins.iter().sum();
    let gross_loss: Decimal = -losses.iter().sum::<Decimal>();

    let win_rate = Decimal::from(wins.len()) / count * hundred;

    let profit_factor = if gross_loss.is_zero() {
        if gross_profit > Decimal::ZERO {
            Decimal::MAX
        } else {
            Decimal::ZERO
        }
    } else {
        gross_profit / gross_loss
    };

    // Walk the equity curve from the configured capital base, tracking the
    // running peak and the worst percentage decline from it.
    let mut equity = initial_capital;
    let mut peak = initial_capital;
    let mut max_drawdown_pct = Decimal::ZERO;
    for pnl in pnls {
        equity += *pnl;
        if equity > peak {
            peak = equity;
        }
        if peak > Decimal::ZERO {
            let drawdown_pct = (peak - equity) / peak * hundred;
            if drawdown_pct > max_drawdown_pct {
                max_drawdown_pct = drawdown_pct;
            }
        }
    }

    let average = |sum: Decimal, n: usize| {
        if n == 0 {
            Decimal::ZERO
        } else {
            sum / Decimal::from(n)
        }
    };

    RiskMetrics {
        trade_count: pnls.len(),
        total_pnl: round_half_up(total, SCALE),
        win_rate: round_half_up(win_rate, SCALE),
        profit_factor: if profit_factor == Decimal::MAX {
            profit_factor
        } else {
            round_half_up(profit_factor, SCALE)
        },
        max_drawdown_pct: round_half_up(max_drawdown_pct, SCALE),
        average_trade_pnl: round_half_up(average(total, pnls.len()), SCALE),
        average_winning_trade: round_half_up(average(gross_profit, wins.len()), SCALE),
        average_losing_trade: round_half_up(average(-gross_loss, losses.len()), SCALE),
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn empty_history_yields_zeroed_metrics() {
        let metrics = compute_metrics(&[], dec!(10000));
        assert_eq!(metrics.trade_count, 0);
        assert_eq!(metrics.total_pnl, Decimal::ZERO);
        assert_eq!(metrics.win_rate, Decimal::ZERO);
    }

    #[test]
    fn mixed_series_produces_the_expected_aggregates() {
        let pnls = [dec!(32), dec!(-18), dec!(10)];
        let metrics = compute_metrics(&pnls, dec!(1000));

        assert_eq!(metrics.trade_count, 3);
        assert_eq!(metrics.total_pnl, dec!(24));
        // 2 of 3 winners
        assert_eq!(metrics.win_rate, dec!(66.66666667));
        // 42 gross profit / 18 gross loss
        assert_eq!(metrics.profit_factor, dec!(2.33333333));
        assert_eq!(metrics.average_trade_pnl, dec!(8));
        assert_eq!(metrics.average_winning_trade, dec!(21));
        assert_eq!(metrics.average_losing_trade, dec!(-18));
    }

    #[test]
    fn drawdown_is_measured_from_the_running_peak() {
        // Equity: 1032 (peak), 1014, 1024 — trough is 18 below the peak
        let pnls = [dec!(32), dec!(-18), dec!(10)];
        let metrics = compute_metrics(&pnls, dec!(1000));
        // 18 / 1032 * 100
        assert_eq!(metrics.max_drawdown_pct, dec!(1.74418605));
    }

    #[test]
    fn profit_factor_saturates_when_there_are_no_losses() {
        let metrics = compute_metrics(&[dec!(5), dec!(7)], dec!(1000));
        assert_eq!(metrics.profit_factor, Decimal::MAX);
        assert_eq!(metrics.win_rate, dec!(100));
        assert_eq!(metrics.max_drawdown_pct, Decimal::ZERO);
    }

    #[test]
    fn all_losing_series_has_zero_profit_factor() {
        let metrics = compute_metrics(&[dec!(-5), dec!(-7)], dec!(1000));
        assert_eq!(metrics.profit_factor, Decimal::ZERO);
        assert_eq!(metrics.win_rate, Decimal::ZERO);
        assert_eq!(metrics.average_losing_trade, dec!(-6));
    }
}
