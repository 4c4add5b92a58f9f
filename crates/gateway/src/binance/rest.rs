use std::str::FromStr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use hmac::{Hmac, Mac};
use reqwest::{Client, Method, Response, StatusCode};
use rust_decimal::Decimal;
use serde::Deserialize;
use sha2::Sha256;
use tracing::debug;

use common::{
    AssetBalance, Error, ExchangeGateway, ExchangePosition, MarketSnapshot, OpenOrder,
    OrderReceipt, OrderRequest, OrderStatus, OrderType, Result, TradingPair,
};

use crate::rate_limit::TokenBucket;

const BASE_URL: &str = "https://api.binance.com";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const READ_TIMEOUT: Duration = Duration::from_secs(10);
/// Consecutive retryable failures before errors escalate to
/// `ExchangeUnreachable`.
const UNREACHABLE_AFTER: u32 = 5;

/// REST adapter for Binance spot. Signs requests with HMAC-SHA256 and
/// normalizes responses to the uniform gateway contract. A global token
/// bucket guards every call; exhaustion surfaces as `Error::RateLimited`
/// with the advised wait.
pub struct BinanceGateway {
    api_key: String,
    secret: String,
    recv_window_ms: u64,
    base_url: String,
    http: Client,
    limiter: TokenBucket,
    consecutive_failures: AtomicU32,
}

impl BinanceGateway {
    pub fn new(api_key: impl Into<String>, secret: impl Into<String>, recv_window_ms: u64) -> Self {
        Self {
            api_key: api_key.into(),
            secret: secret.into(),
            recv_window_ms,
            base_url: BASE_URL.to_string(),
            http: Client::builder()
                .use_rustls_tls()
                .connect_timeout(CONNECT_TIMEOUT)
                .timeout(READ_TIMEOUT)
                .build()
                .expect("Failed to build HTTP client"),
            // Binance allows 1200 request weight/min; stay well under it.
            limiter: TokenBucket::new(10, 10),
            consecutive_failures: AtomicU32::new(0),
        }
    }

    /// Track consecutive transport-level failures; once the streak crosses
    /// the threshold, surface the critical `ExchangeUnreachable` instead.
    fn track<T>(&self, result: Result<T>) -> Result<T> {
        match result {
            Ok(value) => {
                self.consecutive_failures.store(0, Ordering::Relaxed);
                Ok(value)
            }
            Err(e @ Error::Exchange { retryable: true, .. }) | Err(e @ Error::Http(_)) => {
                let streak = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
                if streak >= UNREACHABLE_AFTER {
                    Err(Error::ExchangeUnreachable(format!(
                        "{streak} consecutive failures: {e}"
                    )))
                } else {
                    Err(e)
                }
            }
            Err(e) => Err(e),
        }
    }

    fn timestamp_ms() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_millis() as u64
    }

    fn sign(&self, query: &str) -> String {
        type HmacSha256 = Hmac<Sha256>;
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .expect("HMAC accepts any key length");
        mac.update(query.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    fn acquire(&self) -> Result<()> {
        self.limiter
            .try_acquire()
            .map_err(|retry_after| Error::RateLimited { retry_after })
    }

    async fn signed(&self, method: Method, path: &str, params: &str) -> Result<String> {
        self.acquire()?;
        let query = format!(
            "{params}{}recvWindow={}&timestamp={}",
            if params.is_empty() { "" } else { "&" },
            self.recv_window_ms,
            Self::timestamp_ms()
        );
        let signature = self.sign(&query);
        let url = format!("{}{path}?{query}&signature={signature}", self.base_url);

        let result = match self
            .http
            .request(method, &url)
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await
            .map_err(transport_error)
        {
            Ok(resp) => read_body(resp).await,
            Err(e) => Err(e),
        };
        self.track(result)
    }

    async fn public_get(&self, path: &str, params: &str) -> Result<String> {
        self.acquire()?;
        let url = if params.is_empty() {
            format!("{}{path}", self.base_url)
        } else {
            format!("{}{path}?{params}", self.base_url)
        };
        let result = match self.http.get(&url).send().await.map_err(transport_error) {
            Ok(resp) => read_body(resp).await,
            Err(e) => Err(e),
        };
        self.track(result)
    }

    /// Recent closed 1-minute candles, oldest first. Not part of the
    /// gateway contract; used to seed indicator history at startup.
    pub async fn klines(&self, symbol: &str, limit: usize) -> Result<Vec<common::Candle>> {
        let body = self
            .public_get(
                "/api/v3/klines",
                &format!("symbol={symbol}&interval=1m&limit={limit}"),
            )
            .await?;
        let rows: Vec<Vec<serde_json::Value>> = serde_json::from_str(&body)?;

        rows.iter()
            .map(|row| {
                let open_time = row
                    .first()
                    .and_then(|v| v.as_i64())
                    .ok_or_else(|| Error::exchange("kline row missing open time"))?;
                Ok(common::Candle {
                    open_time: millis_to_utc(open_time),
                    open: kline_field(row, 1)?,
                    high: kline_field(row, 2)?,
                    low: kline_field(row, 3)?,
                    close: kline_field(row, 4)?,
                    volume: kline_field(row, 5)?,
                    closed: true,
                })
            })
            .collect()
    }
}

#[async_trait]
impl ExchangeGateway for BinanceGateway {
    async fn place_order(&self, request: &OrderRequest) -> Result<OrderReceipt> {
        let mut params = format!(
            "symbol={}&side={}&type={}&quantity={}",
            request.symbol, request.side, request.order_type, request.quantity
        );
        if let (OrderType::Limit, Some(price)) = (request.order_type, request.price) {
            params.push_str(&format!("&price={price}&timeInForce=GTC"));
        }

        debug!(symbol = %request.symbol, side = %request.side, qty = %request.quantity, "submitting order");
        let body = self.signed(Method::POST, "/api/v3/order", &params).await?;
        let resp: OrderResponse = serde_json::from_str(&body)
            .map_err(|e| Error::exchange(format!("unparseable order response: {e}")))?;

        let mut filled_qty = Decimal::ZERO;
        let mut notional = Decimal::ZERO;
        let mut commission = Decimal::ZERO;
        for fill in &resp.fills {
            let price = parse_decimal(&fill.price, "fill price")?;
            let qty = parse_decimal(&fill.qty, "fill qty")?;
            commission += parse_decimal(&fill.commission, "fill commission")?;
            filled_qty += qty;
            notional += price * qty;
        }
        let avg_price = if filled_qty.is_zero() {
            Decimal::ZERO
        } else {
            notional / filled_qty
        };

        Ok(OrderReceipt {
            order_id: resp.order_id.to_string(),
            exchange_trade_id: resp
                .fills
                .first()
                .and_then(|f| f.trade_id)
                .map(|id| id.to_string())
                .unwrap_or_else(|| resp.order_id.to_string()),
            status: normalize_status(&resp.status)?,
            executed_qty: parse_decimal(&resp.executed_qty, "executedQty")
                .unwrap_or(request.quantity),
            avg_price,
            commission,
            executed_at: resp
                .transact_time
                .map(millis_to_utc)
                .unwrap_or_else(Utc::now),
        })
    }

    async fn cancel_order(&self, symbol: &str, order_id: &str) -> Result<()> {
        let params = format!("symbol={symbol}&orderId={order_id}");
        self.signed(Method::DELETE, "/api/v3/order", &params).await?;
        Ok(())
    }

    async fn order_status(&self, symbol: &str, order_id: &str) -> Result<OrderStatus> {
        let params = format!("symbol={symbol}&orderId={order_id}");
        let body = self.signed(Method::GET, "/api/v3/order", &params).await?;
        let resp: OrderStatusResponse = serde_json::from_str(&body)
            .map_err(|e| Error::exchange(format!("unparseable order status: {e}")))?;
        normalize_status(&resp.status)
    }

    async fn ticker(&self, symbol: &str) -> Result<MarketSnapshot> {
        let body = self
            .public_get("/api/v3/ticker/24hr", &format!("symbol={symbol}"))
            .await?;
        let resp: Ticker24h = serde_json::from_str(&body)
            .map_err(|e| Error::exchange(format!("unparseable ticker: {e}")))?;

        Ok(MarketSnapshot {
            symbol: symbol.to_string(),
            last_price: parse_decimal(&resp.last_price, "lastPrice")?,
            best_bid: parse_decimal(&resp.bid_price, "bidPrice")?,
            best_ask: parse_decimal(&resp.ask_price, "askPrice")?,
            volume_24h: parse_decimal(&resp.volume, "volume")?,
            quote_volume_24h: parse_decimal(&resp.quote_volume, "quoteVolume")?,
            change_pct_24h: parse_decimal(&resp.price_change_percent, "priceChangePercent")?,
            at: Utc::now(),
        })
    }

    async fn balances(&self) -> Result<Vec<AssetBalance>> {
        let body = self.signed(Method::GET, "/api/v3/account", "").await?;
        let account: AccountResponse = serde_json::from_str(&body)
            .map_err(|e| Error::exchange(format!("unparseable account: {e}")))?;

        account
            .balances
            .into_iter()
            .map(|b| {
                Ok(AssetBalance {
                    free: parse_decimal(&b.free, "balance free")?,
                    locked: parse_decimal(&b.locked, "balance locked")?,
                    asset: b.asset,
                })
            })
            .collect()
    }

    async fn server_time(&self) -> Result<DateTime<Utc>> {
        let body = self.public_get("/api/v3/time", "").await?;
        let resp: ServerTime = serde_json::from_str(&body)
            .map_err(|e| Error::exchange(format!("unparseable server time: {e}")))?;
        Ok(millis_to_utc(resp.server_time))
    }

    async fn open_orders(&self, symbol: &str) -> Result<Vec<OpenOrder>> {
        let params = format!("symbol={symbol}");
        let body = self.signed(Method::GET, "/api/v3/openOrders", &params).await?;
        let rows: Vec<OpenOrderResponse> = serde_json::from_str(&body)
            .map_err(|e| Error::exchange(format!("unparseable open orders: {e}")))?;

        rows.into_iter()
            .map(|o| {
                let price = parse_decimal(&o.price, "order price")?;
                Ok(OpenOrder {
                    order_id: o.order_id.to_string(),
                    side: o
                        .side
                        .parse()
                        .map_err(|e: String| Error::exchange(e))?,
                    order_type: normalize_order_type(&o.order_type)?,
                    status: normalize_status(&o.status)?,
                    price: (!price.is_zero()).then_some(price),
                    quantity: parse_decimal(&o.orig_qty, "order qty")?,
                    symbol: o.symbol,
                })
            })
            .collect()
    }

    async fn exchange_position(&self, pair: &TradingPair) -> Result<Option<ExchangePosition>> {
        let balances = self.balances().await?;
        let exposure = balances
            .iter()
            .find(|b| b.asset == pair.base_asset)
            .map(|b| b.total())
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

// ─── Normalization and response plumbing ─────────────────────────────────────

/// Map Binance order-status strings onto the canonical set.
pub fn normalize_status(raw: &str) -> Result<OrderStatus> {
    match raw {
        "NEW" => Ok(OrderStatus::New),
        "PARTIALLY_FILLED" => Ok(OrderStatus::PartiallyFilled),
        "FILLED" => Ok(OrderStatus::Filled),
        "CANCELED" | "PENDING_CANCEL" => Ok(OrderStatus::Canceled),
        "REJECTED" => Ok(OrderStatus::Rejected),
        "EXPIRED" | "EXPIRED_IN_MATCH" => Ok(OrderStatus::Expired),
        other => Err(Error::exchange(format!("unknown order status '{other}'"))),
    }
}

fn normalize_order_type(raw: &str) -> Result<OrderType> {
    match raw {
        "MARKET" => Ok(OrderType::Market),
        // Binance's limit-flavored types all behave as limit orders here
        "LIMIT" | "LIMIT_MAKER" | "STOP_LOSS_LIMIT" | "TAKE_PROFIT_LIMIT" => Ok(OrderType::Limit),
        other => Err(Error::exchange(format!("unknown order type '{other}'"))),
    }
}

fn transport_error(e: reqwest::Error) -> Error {
    // Timeouts and connection failures are worth retrying
    Error::exchange_retryable(e.to_string(), None)
}

async fn read_body(resp: Response) -> Result<String> {
    let status = resp.status();
    let retry_after = resp
        .headers()
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_secs);
    let body = resp.text().await.map_err(transport_error)?;

    if status == StatusCode::TOO_MANY_REQUESTS || status.as_u16() == 418 {
        return Err(Error::RateLimited {
            retry_after: retry_after.unwrap_or(Duration::from_secs(1)),
        });
    }
    if status.is_server_error() {
        return Err(Error::exchange_retryable(
            format!("HTTP {status}: {body}"),
            retry_after,
        ));
    }
    if !status.is_success() {
        return Err(Error::exchange(format!("HTTP {status}: {body}")));
    }
    Ok(body)
}

fn parse_decimal(raw: &str, field: &str) -> Result<Decimal> {
    Decimal::from_str(raw)
        .map_err(|e| Error::exchange(format!("unparseable {field} '{raw}': {e}")))
}

fn millis_to_utc(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_else(Utc::now)
}

fn kline_field(row: &[serde_json::Value], index: usize) -> Result<Decimal> {
    let raw = row
        .get(index)
        .and_then(|v| v.as_str())
        .ok_or_else(|| Error::exchange(format!("kline row missing field {index}")))?;
    parse_decimal(raw, "kline field")
}

// ─── Response types ───────────────────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderResponse {
    order_id: i64,
    status: String,
    #[serde(default)]
    executed_qty: String,
    #[serde(default)]
    fills: Vec<FillDetail>,
    transact_time: Option<i64>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct FillDetail {
    price: String,
    qty: String,
    commission: String,
    trade_id: Option<i64>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderStatusResponse {
    status: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Ticker24h {
    last_price: String,
    bid_price: String,
    ask_price: String,
    volume: String,
    quote_volume: String,
    price_change_percent: String,
}

#[derive(Deserialize)]
struct AccountResponse {
    balances: Vec<Balance>,
}

#[derive(Deserialize)]
struct Balance {
    asset: String,
    free: String,
    locked: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerTime {
    server_time: i64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct OpenOrderResponse {
    symbol: String,
    order_id: i64,
    side: String,
    #[serde(rename = "type")]
    order_type: String,
    status: String,
    price: String,
    orig_qty: String,
}
