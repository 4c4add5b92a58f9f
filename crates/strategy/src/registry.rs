use std::collections::HashMap;
use std::sync::Arc;

use rust_decimal::prelude::ToPrimitive;
use tracing::debug;

use common::{Candle, Result};

use crate::indicators::{BollingerBands, MacdIndicator, MacdSignal, RsiIndicator};
use crate::{indicators::sma, Signal, Strategy};

/// Maps a strategy name to its implementation. Populated with the built-ins
/// at startup; the scheduler resolves names from `StrategyConfig` rows and
/// skips unknown ones.
pub struct StrategyRegistry {
    strategies: HashMap<String, Arc<dyn Strategy>>,
}

impl StrategyRegistry {
    pub fn with_builtins() -> Self {
        let mut registry = Self {
            strategies: HashMap::new(),
        };
        registry.register(Arc::new(SmaCrossover));
        registry.register(Arc::new(RsiReversion));
        registry.register(Arc::new(MacdCross));
        registry.register(Arc::new(BollingerReversion));
        registry
    }

    pub fn register(&mut self, strategy: Arc<dyn Strategy>) {
        self.strategies
            .insert(strategy.name().to_string(), strategy);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Strategy>> {
        self.strategies.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.strategies.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.strategies.keys().cloned().collect();
        names.sort();
        names
    }
}

/// Close prices of finalized candles, oldest first, as binary floats for the
/// indicator math.
fn closes(candles: &[Candle]) -> Vec<f64> {
    candles
        .iter()
        .filter(|c| c.closed)
        .filter_map(|c| c.close.to_f64())
        .collect()
}

fn param_usize(params: &HashMap<String, String>, key: &str, default: usize) -> usize {
    params
        .get(key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn param_f64(params: &HashMap<String, String>, key: &str, default: f64) -> f64 {
    params
        .get(key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

// ─── Built-in strategies ──────────────────────────────────────────────────────

/// Golden/death cross of two simple moving averages.
/// Params: `short` (10), `long` (50).
struct SmaCrossover;

impl Strategy for SmaCrossover {
    fn name(&self) -> &'static str {
        "SMA_CROSSOVER"
    }

    fn generate_signal(
        &self,
        symbol: &str,
        params: &HashMap<String, String>,
        candles: &[Candle],
    ) -> Result<Signal> {
        let short = param_usize(params, "short", 10);
        let long = param_usize(params, "long", 50);
        let closes = closes(candles);
        if closes.len() < long + 1 {
            return Ok(Signal::None);
        }

        let prev = &closes[..closes.len() - 1];
        let (Some(prev_short), Some(prev_long), Some(curr_short), Some(curr_long)) = (
            sma(prev, short),
            sma(prev, long),
            sma(&closes, short),
            sma(&closes, long),
        ) else {
            return Ok(Signal::None);
        };

        let signal = if prev_short <= prev_long && curr_short > curr_long {
            Signal::Buy
        } else if prev_short >= prev_long && curr_short < curr_long {
            Signal::Sell
        } else {
            Signal::None
        };
        debug!(%symbol, short = curr_short, long = curr_long, %signal, "SMA crossover evaluated");
        Ok(signal)
    }
}

/// Mean reversion on Wilder RSI.
/// Params: `period` (14), `oversold` (30), `overbought` (70).
struct RsiReversion;

impl Strategy for RsiReversion {
    fn name(&self) -> &'static str {
        "RSI_REVERSION"
    }

    fn generate_signal(
        &self,
        _symbol: &str,
        params: &HashMap<String, String>,
        candles: &[Candle],
    ) -> Result<Signal> {
        let period = param_usize(params, "period", 14);
        let oversold = param_f64(params, "oversold", 30.0);
        let overbought = param_f64(params, "overbought", 70.0);

        let closes = closes(candles);
        let Some(rsi) = RsiIndicator::new(period).compute(&closes) else {
            return Ok(Signal::None);
        };

        Ok(if rsi <= oversold {
            Signal::Buy
        } else if rsi >= overbought {
            Signal::Sell
        } else {
            Signal::None
        })
    }
}

/// MACD line / signal line crossover.
/// Params: `fast` (12), `slow` (26), `signal` (9).
struct MacdCross;

impl Strategy for MacdCross {
    fn name(&self) -> &'static str {
        "MACD_CROSS"
    }

    fn generate_signal(
        &self,
        _symbol: &str,
        params: &HashMap<String, String>,
        candles: &[Candle],
    ) -> Result<Signal> {
        let fast = param_usize(params, "fast", 12);
        let slow = param_usize(params, "slow", 26);
        let signal = param_usize(params, "signal", 9);

        let closes = closes(candles);
        match MacdIndicator::new(fast, slow, signal).compute(&closes) {
            Some(MacdSignal::Bullish) => Ok(Signal::Buy),
            Some(MacdSignal::Bearish) => Ok(Signal::Sell),
            Some(MacdSignal::Neutral) | None => Ok(Signal::None),
        }
    }
}

/// Mean reversion at the Bollinger band edges.
/// Params: `period` (20), `k` (2.0).
struct BollingerReversion;

impl Strategy for BollingerReversion {
    fn name(&self) -> &'static str {
        "BOLLINGER_REVERSION"
    }

    fn generate_signal(
        &self,
        _symbol: &str,
        params: &HashMap<String, String>,
        candles: &[Candle],
    ) -> Result<Signal> {
        let period = param_usize(params, "period", 20);
        let k = param_f64(params, "k", 2.0);

        let closes = closes(candles);
        let (Some(bands), Some(last)) = (
            BollingerBands::new(period, k).compute(&closes),
            closes.last(),
        ) else {
            return Ok(Signal::None);
        };

        Ok(if *last < bands.lower {
            Signal::Buy
        } else if *last > bands.upper {
            Signal::Sell
        } else {
            Signal::None
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn candles_from(closes: &[f64]) -> Vec<Candle> {
        closes
            .iter()
            .map(|&c| {
                let px = Decimal::try_from(c).unwrap();
                Candle {
                    open_time: Utc::now(),
                    open: px,
                    high: px,
                    low: px,
                    close: px,
                    volume: dec!(1),
                    closed: true,
                }
            })
            .collect()
    }

    fn params(entries: &[(&str, &str)]) -> HashMap<String, String> {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn registry_resolves_builtin_names() {
        let registry = StrategyRegistry::with_builtins();
        assert!(registry.contains("SMA_CROSSOVER"));
        assert!(registry.contains("RSI_REVERSION"));
        assert!(registry.contains("MACD_CROSS"));
        assert!(registry.contains("BOLLINGER_REVERSION"));
        assert!(registry.get("GRID_9000").is_none());
        assert_eq!(registry.names().len(), 4);
    }

    #[test]
    fn sma_crossover_buys_when_short_crosses_above_long() {
        let registry = StrategyRegistry::with_builtins();
        let strategy = registry.get("SMA_CROSSOVER").unwrap();
        let p = params(&[("short", "2"), ("long", "3")]);

        // short SMA below long, then a jump lifts it above
        let candles = candles_from(&[100.0, 90.0, 80.0, 120.0]);
        let signal = strategy.generate_signal("BTCUSDT", &p, &candles).unwrap();
        assert_eq!(signal, Signal::Buy);
    }

    #[test]
    fn sma_crossover_sells_on_cross_below() {
        let registry = StrategyRegistry::with_builtins();
        let strategy = registry.get("SMA_CROSSOVER").unwrap();
        let p = params(&[("short", "2"), ("long", "3")]);

        let candles = candles_from(&[100.0, 110.0, 120.0, 80.0]);
        let signal = strategy.generate_signal("BTCUSDT", &p, &candles).unwrap();
        assert_eq!(signal, Signal::Sell);
    }

    #[test]
    fn sma_crossover_is_silent_without_history() {
        let registry = StrategyRegistry::with_builtins();
        let strategy = registry.get("SMA_CROSSOVER").unwrap();
        let candles = candles_from(&[100.0, 101.0]);
        let signal = strategy
            .generate_signal("BTCUSDT", &HashMap::new(), &candles)
            .unwrap();
        assert_eq!(signal, Signal::None);
    }

    #[test]
    fn rsi_reversion_buys_a_washed_out_series() {
        let registry = StrategyRegistry::with_builtins();
        let strategy = registry.get("RSI_REVERSION").unwrap();
        let p = params(&[("period", "3")]);

        let candles = candles_from(&[14.0, 13.0, 12.0, 11.0, 10.0]);
        let signal = strategy.generate_signal("ETHUSDT", &p, &candles).unwrap();
        assert_eq!(signal, Signal::Buy);
    }

    #[test]
    fn bollinger_reversion_fades_the_band_edges() {
        let registry = StrategyRegistry::with_builtins();
        let strategy = registry.get("BOLLINGER_REVERSION").unwrap();
        let p = params(&[("period", "4"), ("k", "1.0")]);

        // Steady closes then a collapse far through the lower band
        let candles = candles_from(&[100.0, 101.0, 99.0, 100.0, 80.0]);
        let signal = strategy.generate_signal("ETHUSDT", &p, &candles).unwrap();
        assert_eq!(signal, Signal::Buy);
    }
}
