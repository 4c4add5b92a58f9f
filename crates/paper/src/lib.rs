use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

use common::{
    AssetBalance, Error, ExchangeGateway, ExchangePosition, MarketSnapshot, OpenOrder,
    OrderReceipt, OrderRequest, OrderSide, OrderStatus, Result, TradingPair,
};

/// Simulated exchange gateway for paper trading and the engine tests.
///
/// Market orders fill instantly at the latest seeded price with configurable
/// slippage. Every accepted order lands in a journal so tests can assert on
/// exactly what reached the "exchange". No real orders are ever sent.
pub struct PaperGateway {
    /// Latest known price per symbol, seeded via `set_price`.
    prices: RwLock<HashMap<String, Decimal>>,
    /// Simulated base-asset holdings, keyed by asset.
    holdings: RwLock<HashMap<String, Decimal>>,
    /// Everything submitted through `place_order`, in order.
    journal: Mutex<Vec<OrderRequest>>,
    quote_asset: String,
    /// Slippage in basis points applied to all fills.
    slippage_bps: Decimal,
    /// When set, `place_order` fails with a retryable exchange error.
    reject_orders: AtomicBool,
    order_seq: AtomicU64,
}

impl PaperGateway {
    pub fn new(quote_asset: impl Into<String>, slippage_bps: f64) -> Self {
        let quote_asset = quote_asset.into();
        info!(%quote_asset, slippage_bps, "PaperGateway initialized");
        Self {
            prices: RwLock::new(HashMap::new()),
            holdings: RwLock::new(HashMap::new()),
            journal: Mutex::new(Vec::new()),
            quote_asset,
            slippage_bps: Decimal::try_from(slippage_bps).unwrap_or(Decimal::ZERO),
            reject_orders: AtomicBool::new(false),
            order_seq: AtomicU64::new(1),
        }
    }

    /// Update the latest price for a symbol.
    pub async fn set_price(&self, symbol: &str, price: Decimal) {
        self.prices.write().await.insert(symbol.to_string(), price);
    }

    /// Seed a base-asset holding (reconciler test fixtures).
    pub async fn set_holding(&self, asset: &str, quantity: Decimal) {
        self.holdings
            .write()
            .await
            .insert(asset.to_string(), quantity);
    }

    /// Snapshot of everything submitted so far.
    pub async fn submitted_orders(&self) -> Vec<OrderRequest> {
        self.journal.lock().await.clone()
    }

    /// Make subsequent `place_order` calls fail (exchange outage simulation).
    pub fn reject_orders(&self, reject: bool) {
        self.reject_orders.store(reject, Ordering::SeqCst);
    }

    fn base_asset(&self, symbol: &str) -> String {
        symbol
            .strip_suffix(self.quote_asset.as_str())
            .unwrap_or(symbol)
            .to_string()
    }

    fn fill_price(&self, side: OrderSide, mid: Decimal) -> Decimal {
        let slip = self.slippage_bps / Decimal::from(10_000);
        match side {
            OrderSide::Buy => mid * (Decimal::ONE + slip),
            OrderSide::Sell => mid * (Decimal::ONE - slip),
        }
    }
}

#[async_trait]
impl ExchangeGateway for PaperGateway {
    async fn place_order(&self, request: &OrderRequest) -> Result<OrderReceipt> {
        if self.reject_orders.load(Ordering::SeqCst) {
            return Err(Error::exchange_retryable("paper exchange is down", None));
        }

        let mid = {
            let prices = self.prices.read().await;
            prices.get(&request.symbol).copied().ok_or_else(|| {
                Error::exchange(format!(
                    "no price seeded for '{}'; feed market data first",
                    request.symbol
                ))
            })?
        };
        let fill_price = self.fill_price(request.side, mid);

        debug!(
            symbol = %request.symbol,
            side = %request.side,
            mid = %mid,
            fill = %fill_price,
            qty = %request.quantity,
            "paper fill simulated"
        );

        // Update simulated holdings
        {
            let base = self.base_asset(&request.symbol);
            let mut holdings = self.holdings.write().await;
            let held = holdings.entry(base).or_insert(Decimal::ZERO);
            match request.side {
                OrderSide::Buy => *held += request.quantity,
                OrderSide::Sell => *held = (*held - request.quantity).max(Decimal::ZERO),
            }
        }

        self.journal.lock().await.push(request.clone());
        let seq = self.order_seq.fetch_add(1, Ordering::SeqCst);

        Ok(OrderReceipt {
            order_id: seq.to_string(),
            exchange_trade_id: format!("paper-{seq}"),
            status: OrderStatus::Filled,
            executed_qty: request.quantity,
            avg_price: fill_price,
            commission: Decimal::ZERO,
            executed_at: Utc::now(),
        })
    }

    async fn cancel_order(&self, _symbol: &str, _order_id: &str) -> Result<()> {
        // Market orders fill instantly; nothing to cancel.
        Ok(())
    }

    async fn order_status(&self, _symbol: &str, _order_id: &str) -> Result<OrderStatus> {
        Ok(OrderStatus::Filled)
    }

    async fn ticker(&self, symbol: &str) -> Result<MarketSnapshot> {
        let price = self
            .prices
            .read()
            .await
            .get(symbol)
            .copied()
            .ok_or_else(|| Error::exchange(format!("no price available for {symbol}")))?;
        Ok(MarketSnapshot {
            symbol: symbol.to_string(),
            last_price: price,
            best_bid: price,
            best_ask: price,
            volume_24h: Decimal::ZERO,
            quote_volume_24h: Decimal::ZERO,
            change_pct_24h: Decimal::ZERO,
            at: Utc::now(),
        })
    }

    async fn balances(&self) -> Result<Vec<AssetBalance>> {
        Ok(self
            .holdings
            .read()
            .await
            .iter()
            .map(|(asset, qty)| AssetBalance {
                asset: asset.clone(),
                free: *qty,
                locked: Decimal::ZERO,
            })
            .collect())
    }

    async fn server_time(&self) -> Result<DateTime<Utc>> {
        Ok(Utc::now())
    }

    async fn open_orders(&self, _symbol: &str) -> Result<Vec<OpenOrder>> {
        Ok(Vec::new())
    }

    async fn exchange_position(&self, pair: &TradingPair) -> Result<Option<ExchangePosition>> {
        let exposure = self
            .holdings
            .read()
            .await
            .get(&pair.base_asset)
            .copied()
            .unwrap_or(Decimal::ZERO);
        if exposure >= pair.min_order_size {
            Ok(Some(ExchangePosition {
                symbol: pair.symbol.clone(),
                quantity: exposure,
            }))
        } else {
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn pair(symbol: &str, base: &str) -> TradingPair {
        TradingPair {
            symbol: symbol.to_string(),
            base_asset: base.to_string(),
            quote_asset: "USDT".to_string(),
            price_precision: 8,
            quantity_precision: 8,
            min_order_size: dec!(0.0001),
            active: true,
            kind: common::PairKind::Spot,
        }
    }

    #[tokio::test]
    async fn buy_fill_applies_positive_slippage() {
        let gateway = PaperGateway::new("USDT", 10.0); // 10 bps
        gateway.set_price("BTCUSDT", dec!(1000)).await;

        let order = OrderRequest::market("BTCUSDT", OrderSide::Buy, dec!(0.01));
        let receipt = gateway.place_order(&order).await.unwrap();
        assert_eq!(receipt.avg_price, dec!(1001.0000));
        assert_eq!(receipt.status, OrderStatus::Filled);
    }

    #[tokio::test]
    async fn sell_fill_applies_negative_slippage() {
        let gateway = PaperGateway::new("USDT", 10.0);
        gateway.set_price("BTCUSDT", dec!(1000)).await;

        let order = OrderRequest::market("BTCUSDT", OrderSide::Sell, dec!(0.01));
        let receipt = gateway.place_order(&order).await.unwrap();
        assert_eq!(receipt.avg_price, dec!(999.0000));
    }

    #[tokio::test]
    async fn fills_move_the_simulated_holdings() {
        let gateway = PaperGateway::new("USDT", 0.0);
        gateway.set_price("ETHUSDT", dec!(500)).await;

        let buy = OrderRequest::market("ETHUSDT", OrderSide::Buy, dec!(1));
        gateway.place_order(&buy).await.unwrap();
        let position = gateway.exchange_position(&pair("ETHUSDT", "ETH")).await.unwrap();
        assert_eq!(position.unwrap().quantity, dec!(1));

        let sell = OrderRequest::market("ETHUSDT", OrderSide::Sell, dec!(1));
        gateway.place_order(&sell).await.unwrap();
        let position = gateway.exchange_position(&pair("ETHUSDT", "ETH")).await.unwrap();
        assert!(position.is_none());
    }

    #[tokio::test]
    async fn journal_records_every_submission() {
        let gateway = PaperGateway::new("USDT", 0.0);
        gateway.set_price("BTCUSDT", dec!(100)).await;

        for _ in 0..3 {
            let order = OrderRequest::market("BTCUSDT", OrderSide::Buy, dec!(1));
            gateway.place_order(&order).await.unwrap();
        }
        assert_eq!(gateway.submitted_orders().await.len(), 3);
    }

    #[tokio::test]
    async fn rejected_orders_surface_a_retryable_error() {
        let gateway = PaperGateway::new("USDT", 0.0);
        gateway.set_price("BTCUSDT", dec!(100)).await;
        gateway.reject_orders(true);

        let order = OrderRequest::market("BTCUSDT", OrderSide::Buy, dec!(1));
        let err = gateway.place_order(&order).await.unwrap_err();
        assert!(err.is_retryable());
        assert!(gateway.submitted_orders().await.is_empty());
    }

    #[tokio::test]
    async fn unseeded_symbol_cannot_fill() {
        let gateway = PaperGateway::new("USDT", 0.0);
        let order = OrderRequest::market("SOLUSDT", OrderSide::Buy, dec!(1));
        assert!(gateway.place_order(&order).await.is_err());
    }
}
