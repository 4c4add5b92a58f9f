//! sqlx/SQLite repositories for the persisted tables. Monetary values are
//! stored as canonical decimal TEXT and parsed back with `rust_decimal`;
//! timestamps are RFC 3339 TEXT.

pub mod configs;
pub mod market_data;
pub mod pairs;
pub mod positions;
pub mod risk_events;
pub mod trades;

pub use configs::ConfigStore;
pub use market_data::MarketDataRepository;
pub use pairs::PairRepository;
pub use positions::PositionRepository;
pub use risk_events::RiskEventRepository;
pub use trades::TradeRepository;

use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use common::{Error, Result};

pub(crate) fn parse_decimal(raw: &str) -> Result<Decimal> {
    Decimal::from_str(raw).map_err(|e| Error::Other(format!("corrupt decimal '{raw}': {e}")))
}

pub(crate) fn parse_opt_decimal(raw: &Option<String>) -> Result<Option<Decimal>> {
    raw.as_deref().map(parse_decimal).transpose()
}

pub(crate) fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| Error::Other(format!("corrupt timestamp '{raw}': {e}")))
}

pub(crate) fn parse_opt_timestamp(raw: &Option<String>) -> Result<Option<DateTime<Utc>>> {
    raw.as_deref().map(parse_timestamp).transpose()
}

pub(crate) fn parse_enum<T: FromStr<Err = String>>(raw: &str) -> Result<T> {
    T::from_str(raw).map_err(Error::Other)
}
