pub mod bollinger;
pub mod macd;
pub mod rsi;
pub mod sma;

pub use bollinger::BollingerBands;
pub use macd::{MacdIndicator, MacdSignal};
pub use rsi::RsiIndicator;
pub use sma::sma;
