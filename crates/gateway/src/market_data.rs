use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::{broadcast, RwLock};
use tracing::debug;

use common::{Candle, ExchangeGateway, MarketDataEvent, MarketSnapshot, Result};

/// Live market data hub: caches the latest ticker per symbol (lock-free
/// reads), keeps a bounded history of closed candles for the strategies, and
/// broadcasts `MarketDataEvent`s to the risk monitor.
///
/// The WebSocket streams feed it; consumers never talk to the stream
/// directly.
pub struct MarketDataService {
    tickers: DashMap<String, MarketSnapshot>,
    candles: RwLock<HashMap<String, VecDeque<Candle>>>,
    events_tx: broadcast::Sender<MarketDataEvent>,
    gateway: Arc<dyn ExchangeGateway>,
    max_candles: usize,
}

impl MarketDataService {
    pub const DEFAULT_MAX_CANDLES: usize = 500;

    pub fn new(gateway: Arc<dyn ExchangeGateway>) -> Self {
        let (events_tx, _) = broadcast::channel(1024);
        Self {
            tickers: DashMap::new(),
            candles: RwLock::new(HashMap::new()),
            events_tx,
            gateway,
            max_candles: Self::DEFAULT_MAX_CANDLES,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MarketDataEvent> {
        self.events_tx.subscribe()
    }

    /// Latest cached ticker, if any has been seen.
    pub fn snapshot(&self, symbol: &str) -> Option<MarketSnapshot> {
        self.tickers.get(symbol).map(|entry| entry.clone())
    }

    /// Cached ticker no older than `max_age`, refetched through the gateway
    /// otherwise.
    pub async fn snapshot_fresh(&self, symbol: &str, max_age: Duration) -> Result<MarketSnapshot> {
        if let Some(snap) = self.snapshot(symbol) {
            let age = (Utc::now() - snap.at).to_std().unwrap_or_default();
            if age <= max_age {
                return Ok(snap);
            }
        }
        let snap = self.gateway.ticker(symbol).await?;
        self.tickers.insert(symbol.to_string(), snap.clone());
        Ok(snap)
    }

    /// Bounded history of closed candles, oldest first.
    pub async fn candles(&self, symbol: &str) -> Vec<Candle> {
        self.candles
            .read()
            .await
            .get(symbol)
            .map(|buf| buf.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Record a ticker update and fan it out.
    pub fn apply_ticker(&self, snapshot: MarketSnapshot) {
        self.tickers
            .insert(snapshot.symbol.clone(), snapshot.clone());
        // Send errors mean no subscriber is listening yet; that's fine.
        let _ = self.events_tx.send(MarketDataEvent::Ticker(snapshot));
    }

    /// Record a candle update; only finalized candles enter the history.
    pub async fn apply_candle(&self, symbol: &str, candle: Candle) {
        if candle.closed {
            let mut all = self.candles.write().await;
            let buf = all.entry(symbol.to_string()).or_default();
            buf.push_back(candle.clone());
            while buf.len() > self.max_candles {
                buf.pop_front();
            }
        }
        let _ = self.events_tx.send(MarketDataEvent::Candle {
            symbol: symbol.to_string(),
            candle,
        });
    }

    /// Seed candle history at startup (REST backfill or the DB).
    pub async fn seed_candles(&self, symbol: &str, history: Vec<Candle>) {
        debug!(%symbol, count = history.len(), "seeding candle history");
        let mut all = self.candles.write().await;
        let buf = all.entry(symbol.to_string()).or_default();
        for candle in history {
            buf.push_back(candle);
        }
        while buf.len() > self.max_candles {
            buf.pop_front();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{Duration as ChronoDuration, Utc};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use common::{
        AssetBalance, Error, ExchangePosition, OpenOrder, OrderReceipt, OrderRequest, OrderStatus,
        TradingPair,
    };

    struct StubGateway {
        ticker_calls: AtomicUsize,
        price: Decimal,
    }

    #[async_trait]
    impl ExchangeGateway for StubGateway {
        async fn place_order(&self, _r: &OrderRequest) -> Result<OrderReceipt> {
            Err(Error::exchange("not implemented"))
        }
        async fn cancel_order(&self, _s: &str, _o: &str) -> Result<()> {
            Ok(())
        }
        async fn order_status(&self, _s: &str, _o: &str) -> Result<OrderStatus> {
            Ok(OrderStatus::Filled)
        }
        async fn ticker(&self, symbol: &str) -> Result<MarketSnapshot> {
            self.ticker_calls.fetch_add(1, Ordering::SeqCst);
            Ok(snapshot(symbol, self.price))
        }
        async fn balances(&self) -> Result<Vec<AssetBalance>> {
            Ok(vec![])
        }
        async fn server_time(&self) -> Result<chrono::DateTime<Utc>> {
            Ok(Utc::now())
        }
        async fn open_orders(&self, _s: &str) -> Result<Vec<OpenOrder>> {
            Ok(vec![])
        }
        async fn exchange_position(&self, _p: &TradingPair) -> Result<Option<ExchangePosition>> {
            Ok(None)
        }
    }

    fn snapshot(symbol: &str, price: Decimal) -> MarketSnapshot {
        MarketSnapshot {
            symbol: symbol.to_string(),
            last_price: price,
            best_bid: price,
            best_ask: price,
            volume_24h: dec!(1),
            quote_volume_24h: dec!(1),
            change_pct_24h: Decimal::ZERO,
            at: Utc::now(),
        }
    }

    fn candle(close: Decimal, closed: bool) -> Candle {
        Candle {
            open_time: Utc::now(),
            open: close,
            high: close,
            low: close,
            close,
            volume: dec!(1),
            closed,
        }
    }

    fn service() -> MarketDataService {
        MarketDataService::new(Arc::new(StubGateway {
            ticker_calls: AtomicUsize::new(0),
            price: dec!(100),
        }))
    }

    #[tokio::test]
    async fn ticker_updates_are_cached_and_broadcast() {
        let svc = service();
        let mut rx = svc.subscribe();

        svc.apply_ticker(snapshot("BTCUSDT", dec!(101)));

        assert_eq!(svc.snapshot("BTCUSDT").unwrap().last_price, dec!(101));
        match rx.recv().await.unwrap() {
            MarketDataEvent::Ticker(snap) => assert_eq!(snap.symbol, "BTCUSDT"),
            other => panic!("expected ticker event, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn only_closed_candles_enter_history() {
        let svc = service();
        svc.apply_candle("BTCUSDT", candle(dec!(100), false)).await;
        svc.apply_candle("BTCUSDT", candle(dec!(101), true)).await;

        let history = svc.candles("BTCUSDT").await;
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].close, dec!(101));
    }

    #[tokio::test]
    async fn candle_history_is_bounded() {
        let svc = service();
        for i in 0..(MarketDataService::DEFAULT_MAX_CANDLES + 20) {
            svc.apply_candle("BTCUSDT", candle(Decimal::from(i as i64), true))
                .await;
        }
        let history = svc.candles("BTCUSDT").await;
        assert_eq!(history.len(), MarketDataService::DEFAULT_MAX_CANDLES);
        // Oldest were dropped
        assert_eq!(history[0].close, Decimal::from(20));
    }

    #[tokio::test]
    async fn fresh_snapshot_prefers_the_cache() {
        let gateway = Arc::new(StubGateway {
            ticker_calls: AtomicUsize::new(0),
            price: dec!(200),
        });
        let svc = MarketDataService::new(gateway.clone());

        svc.apply_ticker(snapshot("ETHUSDT", dec!(150)));
        let snap = svc
            .snapshot_fresh("ETHUSDT", Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(snap.last_price, dec!(150));
        assert_eq!(gateway.ticker_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn stale_snapshot_falls_back_to_the_gateway() {
        let gateway = Arc::new(StubGateway {
            ticker_calls: AtomicUsize::new(0),
            price: dec!(200),
        });
        let svc = MarketDataService::new(gateway.clone());

        let mut stale = snapshot("ETHUSDT", dec!(150));
        stale.at = Utc::now() - ChronoDuration::seconds(30);
        svc.tickers.insert("ETHUSDT".to_string(), stale);

        let snap = svc
            .snapshot_fresh("ETHUSDT", Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(snap.last_price, dec!(200));
        assert_eq!(gateway.ticker_calls.load(Ordering::SeqCst), 1);
    }
}
