pub mod config;
pub mod error;
pub mod exchange;
pub mod notify;
pub mod types;

pub use config::Config;
pub use error::{Error, Result};
pub use exchange::{
    AssetBalance, ExchangeGateway, ExchangePosition, OpenOrder, OrderReceipt, OrderRequest,
};
pub use notify::{NoopNotifier, Notifier, Severity};
pub use types::*;
