use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use futures_util::StreamExt;
use rust_decimal::Decimal;
use serde::Deserialize;
use tokio_tungstenite::connect_async;
use tracing::{info, warn};
use url::Url;

use common::{Candle, Error, MarketSnapshot, Result};

use crate::market_data::MarketDataService;

/// Combined Binance WebSocket stream for a single pair: the rolling 24h
/// ticker (risk monitor's event path) plus 1-minute klines (strategy
/// history). Reconnects forever with exponential backoff.
pub struct BinanceStream {
    symbol: String,
    market: Arc<MarketDataService>,
}

impl BinanceStream {
    pub fn new(symbol: impl Into<String>, market: Arc<MarketDataService>) -> Self {
        Self {
            symbol: symbol.into(),
            market,
        }
    }

    /// Run the stream loop forever, reconnecting on failure.
    /// Call this inside a `tokio::spawn`.
    pub async fn run(self) {
        let mut backoff = Duration::from_secs(1);
        const MAX_BACKOFF: Duration = Duration::from_secs(60);

        loop {
            info!(symbol = %self.symbol, "connecting market data stream");
            match self.connect_once().await {
                Ok(()) => {
                    info!(symbol = %self.symbol, "market data stream closed cleanly");
                    // Clean close (e.g. 24h session end) — reconnect shortly
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    backoff = Duration::from_secs(1);
                }
                Err(e) => {
                    warn!(symbol = %self.symbol, error = %e, backoff = ?backoff, "stream error, reconnecting");
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                }
            }
        }
    }

    async fn connect_once(&self) -> Result<()> {
        let lower = self.symbol.to_lowercase();
        let url_str = format!(
            "wss://stream.binance.com:9443/stream?streams={lower}@ticker/{lower}@kline_1m"
        );
        let url = Url::parse(&url_str).map_err(|e| Error::WebSocket(e.to_string()))?;

        let (ws_stream, _) = connect_async(url)
            .await
            .map_err(|e| Error::WebSocket(e.to_string()))?;

        let (_, mut read) = ws_stream.split();

        while let Some(msg) = read.next().await {
            let msg = msg.map_err(|e| Error::WebSocket(e.to_string()))?;

            if let tokio_tungstenite::tungstenite::Message::Text(text) = msg {
                match parse_stream_event(&self.symbol, &text) {
                    Ok(Some(StreamEvent::Ticker(snapshot))) => {
                        self.market.apply_ticker(snapshot);
                    }
                    Ok(Some(StreamEvent::Candle(candle))) => {
                        self.market.apply_candle(&self.symbol, candle).await;
                    }
                    Ok(None) => {} // subscription acks etc., skip
                    Err(e) => {
                        warn!(error = %e, "failed to parse stream event");
                    }
                }
            }
        }

        Ok(())
    }
}

// ─── Combined-stream JSON parsing ────────────────────────────────────────────

#[derive(Debug)]
pub(crate) enum StreamEvent {
    Ticker(MarketSnapshot),
    Candle(Candle),
}

#[derive(Deserialize)]
struct TickerData {
    #[serde(rename = "c")]
    last_price: String,
    #[serde(rename = "b")]
    best_bid: String,
    #[serde(rename = "a")]
    best_ask: String,
    #[serde(rename = "v")]
    volume: String,
    #[serde(rename = "q")]
    quote_volume: String,
    #[serde(rename = "P")]
    change_pct: String,
    #[serde(rename = "E")]
    event_time_ms: i64,
}

#[derive(Deserialize)]
struct KlineWrapper {
    k: KlineData,
}

#[derive(Deserialize)]
struct KlineData {
    #[serde(rename = "t")]
    open_time_ms: i64,
    #[serde(rename = "o")]
    open: String,
    #[serde(rename = "h")]
    high: String,
    #[serde(rename = "l")]
    low: String,
    #[serde(rename = "c")]
    close: String,
    #[serde(rename = "v")]
    volume: String,
    #[serde(rename = "x")]
    is_closed: bool,
}

pub(crate) fn parse_stream_event(symbol: &str, text: &str) -> Result<Option<StreamEvent>> {
    let wrapper: serde_json::Value = serde_json::from_str(text)?;
    // Combined streams wrap the payload; raw streams deliver it directly.
    let data = wrapper.get("data").unwrap_or(&wrapper);

    match data.get("e").and_then(|v| v.as_str()) {
        Some("24hrTicker") => {
            let ticker: TickerData = serde_json::from_value(data.clone())?;
            Ok(Some(StreamEvent::Ticker(MarketSnapshot {
                symbol: symbol.to_string(),
                last_price: parse_price(&ticker.last_price)?,
                best_bid: parse_price(&ticker.best_bid)?,
                best_ask: parse_price(&ticker.best_ask)?,
                volume_24h: parse_price(&ticker.volume)?,
                quote_volume_24h: parse_price(&ticker.quote_volume)?,
                change_pct_24h: parse_price(&ticker.change_pct)?,
                at: millis_to_utc(ticker.event_time_ms),
            })))
        }
        Some("kline") => {
            let kline: KlineWrapper = serde_json::from_value(data.clone())?;
            let k = kline.k;
            Ok(Some(StreamEvent::Candle(Candle {
                open_time: millis_to_utc(k.open_time_ms),
                open: parse_price(&k.open)?,
                high: parse_price(&k.high)?,
                low: parse_price(&k.low)?,
                close: parse_price(&k.close)?,
                volume: parse_price(&k.volume)?,
                closed: k.is_closed,
            })))
        }
        _ => Ok(None),
    }
}

fn parse_price(raw: &str) -> Result<Decimal> {
    Decimal::from_str(raw).map_err(|e| Error::WebSocket(format!("bad decimal '{raw}': {e}")))
}

fn millis_to_utc(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_else(Utc::now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn ticker_payload_parses_into_a_snapshot() {
        let text = r#"{"stream":"btcusdt@ticker","data":{
            "e":"24hrTicker","E":1700000000000,"s":"BTCUSDT",
            "c":"100.5","b":"100.4","a":"100.6",
            "v":"1234.5","q":"123456.7","P":"-1.25"
        }}"#;
        match parse_stream_event("BTCUSDT", text).unwrap() {
            Some(StreamEvent::Ticker(snap)) => {
                assert_eq!(snap.last_price, dec!(100.5));
                assert_eq!(snap.best_bid, dec!(100.4));
                assert_eq!(snap.best_ask, dec!(100.6));
                assert_eq!(snap.change_pct_24h, dec!(-1.25));
            }
            other => panic!("expected ticker, got {other:?}"),
        }
    }

    #[test]
    fn kline_payload_parses_into_a_candle() {
        let text = r#"{"stream":"btcusdt@kline_1m","data":{
            "e":"kline","E":1700000000000,"s":"BTCUSDT",
            "k":{"t":1699999940000,"o":"99.0","h":"101.0","l":"98.5","c":"100.0","v":"42.0","x":true}
        }}"#;
        match parse_stream_event("BTCUSDT", text).unwrap() {
            Some(StreamEvent::Candle(candle)) => {
                assert_eq!(candle.close, dec!(100.0));
                assert!(candle.closed);
            }
            other => panic!("expected candle, got {other:?}"),
        }
    }

    #[test]
    fn unrelated_payloads_are_skipped() {
        let ack = r#"{"result":null,"id":1}"#;
        assert!(parse_stream_event("BTCUSDT", ack).unwrap().is_none());
    }
}
