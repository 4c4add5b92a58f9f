pub mod binance;
pub mod market_data;
pub mod rate_limit;

pub use binance::{BinanceGateway, BinanceStream};
pub use market_data::MarketDataService;
pub use rate_limit::TokenBucket;
