pub mod indicators;
pub mod registry;

pub use registry::StrategyRegistry;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use common::{Candle, Result};

/// Decision emitted by a strategy for one symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Signal {
    Buy,
    Sell,
    None,
}

impl std::fmt::Display for Signal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Signal::Buy => write!(f, "BUY"),
            Signal::Sell => write!(f, "SELL"),
            Signal::None => write!(f, "NONE"),
        }
    }
}

/// All strategy implementations must satisfy this trait.
///
/// `candles` is the bounded history of closed 1-minute bars for the symbol,
/// oldest first. Implementations are stateless: per-symbol tuning arrives in
/// `params` from the symbol's `StrategyConfig`.
pub trait Strategy: Send + Sync {
    /// Registry key, e.g. "SMA_CROSSOVER".
    fn name(&self) -> &'static str;

    fn generate_signal(
        &self,
        symbol: &str,
        params: &HashMap<String, String>,
        candles: &[Candle],
    ) -> Result<Signal>;
}
