use proptest::prelude::*;
use rust_decimal::Decimal;

use common::OrderSide;
use risk::calculator;

fn price() -> impl Strategy<Value = Decimal> {
    // Positive prices with up to 4 decimal places
    (1u64..100_000_000u64).prop_map(|n| Decimal::new(n as i64, 4))
}

fn pct() -> impl Strategy<Value = Decimal> {
    // Fractions in (0, 10%]
    (1u64..1_000u64).prop_map(|n| Decimal::new(n as i64, 4))
}

proptest! {
    /// Opening and closing at the same price realizes exactly zero,
    /// and a Buy P&L is the exact negation of the Sell P&L.
    #[test]
    fn pnl_is_zero_at_entry_and_antisymmetric(
        entry in price(),
        exit in price(),
        qty in price(),
    ) {
        prop_assert_eq!(
            calculator::realized_pnl(OrderSide::Buy, entry, entry, qty),
            Decimal::ZERO
        );
        let buy = calculator::realized_pnl(OrderSide::Buy, entry, exit, qty);
        let sell = calculator::realized_pnl(OrderSide::Sell, entry, exit, qty);
        prop_assert_eq!(buy, -sell);
    }

    /// Replaying any tick sequence through the trailing rule leaves a Buy
    /// stop monotonically non-decreasing (Sell: non-increasing).
    #[test]
    fn trailing_stop_is_monotone(
        entry in price(),
        trail in pct(),
        ticks in proptest::collection::vec(price(), 1..40),
    ) {
        for side in [OrderSide::Buy, OrderSide::Sell] {
            let mut hwm = Some(entry);
            let mut stop = Some(calculator::trailing_stop_price(side, entry, trail));
            for tick in &ticks {
                let next = calculator::advance_watermark(side, hwm, *tick);
                let proposed = calculator::trailing_stop_price(side, next, trail);
                if calculator::tightens(side, stop, proposed) {
                    match side {
                        OrderSide::Buy => prop_assert!(proposed > stop.unwrap()),
                        OrderSide::Sell => prop_assert!(proposed < stop.unwrap()),
                    }
                    stop = Some(proposed);
                }
                hwm = Some(next);
            }
        }
    }

    /// Stop and target always bracket the entry on the protective sides.
    #[test]
    fn brackets_surround_entry(entry in price(), sl in pct(), tp in pct()) {
        let buy_sl = calculator::stop_loss_price(OrderSide::Buy, entry, sl);
        let buy_tp = calculator::take_profit_price(OrderSide::Buy, entry, tp);
        prop_assert!(buy_sl <= entry && entry <= buy_tp);

        let sell_sl = calculator::stop_loss_price(OrderSide::Sell, entry, sl);
        let sell_tp = calculator::take_profit_price(OrderSide::Sell, entry, tp);
        prop_assert!(sell_tp <= entry && entry <= sell_sl);
    }

    /// Sized orders never exceed the quote budget.
    #[test]
    fn sized_quantity_never_exceeds_notional(
        notional in price(),
        px in price(),
        precision in 0u32..8,
    ) {
        let qty = calculator::quantity_for_notional(notional, px, precision).unwrap();
        prop_assert!(qty * px <= notional);
    }
}
