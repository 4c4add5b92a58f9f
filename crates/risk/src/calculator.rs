//! Pure price/size arithmetic shared by the position manager and the risk
//! monitor. Everything is `rust_decimal` — binary floats never touch money.

use rust_decimal::{Decimal, RoundingStrategy};

use common::{Error, OrderSide, Result};

/// Protective stop price for a fresh position.
/// Buy: `entry * (1 - pct)`. Sell: `entry * (1 + pct)`.
pub fn stop_loss_price(side: OrderSide, entry: Decimal, pct: Decimal) -> Decimal {
    match side {
        OrderSide::Buy => entry * (Decimal::ONE - pct),
        OrderSide::Sell => entry * (Decimal::ONE + pct),
    }
}

/// Target price for a fresh position.
/// Buy: `entry * (1 + pct)`. Sell: `entry * (1 - pct)`.
pub fn take_profit_price(side: OrderSide, entry: Decimal, pct: Decimal) -> Decimal {
    match side {
        OrderSide::Buy => entry * (Decimal::ONE + pct),
        OrderSide::Sell => entry * (Decimal::ONE - pct),
    }
}

/// Realized P&L at exit: `(exit - entry) * qty`, sign-flipped for shorts.
/// Pre-fee; commissions live on `Trade` records only.
pub fn realized_pnl(side: OrderSide, entry: Decimal, exit: Decimal, quantity: Decimal) -> Decimal {
    let raw = (exit - entry) * quantity;
    match side {
        OrderSide::Buy => raw,
        OrderSide::Sell => -raw,
    }
}

/// Order size for a quote-currency notional, truncated to the pair's
/// quantity precision. Never rounds up: that would exceed the budget.
pub fn quantity_for_notional(
    notional: Decimal,
    price: Decimal,
    quantity_precision: u32,
) -> Result<Decimal> {
    if price <= Decimal::ZERO {
        return Err(Error::Validation(format!(
            "cannot size an order at non-positive price {price}"
        )));
    }
    Ok((notional / price).round_dp_with_strategy(quantity_precision, RoundingStrategy::ToZero))
}

/// Advance the trailing high-watermark. Buy positions track the maximum
/// price seen, Sell positions the minimum.
pub fn advance_watermark(side: OrderSide, current: Option<Decimal>, price: Decimal) -> Decimal {
    match (side, current) {
        (_, None) => price,
        (OrderSide::Buy, Some(hwm)) => hwm.max(price),
        (OrderSide::Sell, Some(hwm)) => hwm.min(price),
    }
}

/// Stop proposed by the trailing rule for the current watermark.
/// Buy: `hwm * (1 - pct)`. Sell: `hwm * (1 + pct)`.
pub fn trailing_stop_price(side: OrderSide, watermark: Decimal, pct: Decimal) -> Decimal {
    match side {
        OrderSide::Buy => watermark * (Decimal::ONE - pct),
        OrderSide::Sell => watermark * (Decimal::ONE + pct),
    }
}

/// Monotone-tightening rule: a proposed stop is applied only when it is
/// strictly more protective than the current one.
pub fn tightens(side: OrderSide, current: Option<Decimal>, proposed: Decimal) -> bool {
    match (side, current) {
        (_, None) => true,
        (OrderSide::Buy, Some(sl)) => proposed > sl,
        (OrderSide::Sell, Some(sl)) => proposed < sl,
    }
}

/// Buy stops trigger at or below the stop price, Sell stops at or above.
pub fn stop_loss_hit(side: OrderSide, price: Decimal, stop: Decimal) -> bool {
    match side {
        OrderSide::Buy => price <= stop,
        OrderSide::Sell => price >= stop,
    }
}

/// Buy targets trigger at or above the target price, Sell targets at or below.
pub fn take_profit_hit(side: OrderSide, price: Decimal, target: Decimal) -> bool {
    match side {
        OrderSide::Buy => price >= target,
        OrderSide::Sell => price <= target,
    }
}

/// Half-up rounding applied only at presentation boundaries.
pub fn round_half_up(value: Decimal, scale: u32) -> Decimal {
    value.round_dp_with_strategy(scale, RoundingStrategy::MidpointAwayFromZero)
}
