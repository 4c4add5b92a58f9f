use sqlx::SqlitePool;

use common::{Candle, Result};

use crate::{parse_decimal, parse_timestamp};

/// Persists closed 1-minute candles so indicator history survives restarts.
#[derive(Clone)]
pub struct MarketDataRepository {
    pool: SqlitePool,
}

#[derive(sqlx::FromRow)]
struct CandleRow {
    open_time: String,
    open: String,
    high: String,
    low: String,
    close: String,
    volume: String,
}

impl CandleRow {
    fn into_candle(self) -> Result<Candle> {
        Ok(Candle {
            open_time: parse_timestamp(&self.open_time)?,
            open: parse_decimal(&self.open)?,
            high: parse_decimal(&self.high)?,
            low: parse_decimal(&self.low)?,
            close: parse_decimal(&self.close)?,
            volume: parse_decimal(&self.volume)?,
            closed: true,
        })
    }
}

impl MarketDataRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn insert(&self, symbol: &str, candle: &Candle) -> Result<()> {
        sqlx::query(
            "INSERT INTO market_data (symbol, open_time, open, high, low, close, volume) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7) \
             ON CONFLICT(symbol, open_time) DO NOTHING",
        )
        .bind(symbol)
        .bind(candle.open_time.to_rfc3339())
        .bind(candle.open.to_string())
        .bind(candle.high.to_string())
        .bind(candle.low.to_string())
        .bind(candle.close.to_string())
        .bind(candle.volume.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// The most recent `limit` closed candles, oldest first.
    pub async fn recent(&self, symbol: &str, limit: i64) -> Result<Vec<Candle>> {
        let rows: Vec<CandleRow> = sqlx::query_as(
            "SELECT open_time, open, high, low, close, volume FROM \
             (SELECT * FROM market_data WHERE symbol = ?1 ORDER BY open_time DESC LIMIT ?2) \
             ORDER BY open_time ASC",
        )
        .bind(symbol)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(CandleRow::into_candle).collect()
    }
}
