use std::collections::HashMap;

use rust_decimal::Decimal;
use sqlx::SqlitePool;
use tracing::info;

use common::{PairKind, Result, TradingPair};

use crate::{parse_decimal, parse_enum};

/// Persistence for the trading universe. Pairs are immutable after load
/// apart from admin (de)activation.
#[derive(Clone)]
pub struct PairRepository {
    pool: SqlitePool,
}

#[derive(sqlx::FromRow)]
struct PairRow {
    symbol: String,
    base_asset: String,
    quote_asset: String,
    price_precision: i64,
    quantity_precision: i64,
    min_order_size: String,
    active: i64,
    kind: String,
}

impl PairRow {
    fn into_pair(self) -> Result<TradingPair> {
        Ok(TradingPair {
            price_precision: self.price_precision as u32,
            quantity_precision: self.quantity_precision as u32,
            min_order_size: parse_decimal(&self.min_order_size)?,
            active: self.active != 0,
            kind: parse_enum(&self.kind)?,
            symbol: self.symbol,
            base_asset: self.base_asset,
            quote_asset: self.quote_asset,
        })
    }
}

impl PairRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn load_all(&self) -> Result<HashMap<String, TradingPair>> {
        let rows: Vec<PairRow> = sqlx::query_as(
            "SELECT symbol, base_asset, quote_asset, price_precision, quantity_precision, \
             min_order_size, active, kind FROM trading_pairs",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut pairs = HashMap::with_capacity(rows.len());
        for row in rows {
            let pair = row.into_pair()?;
            pairs.insert(pair.symbol.clone(), pair);
        }
        Ok(pairs)
    }

    /// Seed any configured symbol missing from `trading_pairs` as an active
    /// spot pair with conservative precision defaults. Existing rows win.
    pub async fn seed_defaults(&self, symbols: &[String], quote_asset: &str) -> Result<usize> {
        let existing = self.load_all().await?;
        let mut seeded = 0;
        for symbol in symbols {
            if existing.contains_key(symbol) {
                continue;
            }
            let base = symbol
                .strip_suffix(quote_asset)
                .unwrap_or(symbol)
                .to_string();
            info!(%symbol, %base, "seeding trading pair");
            self.insert(&TradingPair {
                symbol: symbol.clone(),
                base_asset: base,
                quote_asset: quote_asset.to_string(),
                price_precision: 8,
                quantity_precision: 8,
                min_order_size: Decimal::new(1, 5), // 0.00001 base units
                active: true,
                kind: PairKind::Spot,
            })
            .await?;
            seeded += 1;
        }
        Ok(seeded)
    }

    pub async fn insert(&self, pair: &TradingPair) -> Result<()> {
        sqlx::query(
            "INSERT INTO trading_pairs (symbol, base_asset, quote_asset, price_precision, \
             quantity_precision, min_order_size, active, kind) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8) \
             ON CONFLICT(symbol) DO NOTHING",
        )
        .bind(&pair.symbol)
        .bind(&pair.base_asset)
        .bind(&pair.quote_asset)
        .bind(pair.price_precision as i64)
        .bind(pair.quantity_precision as i64)
        .bind(pair.min_order_size.to_string())
        .bind(pair.active as i64)
        .bind(pair.kind.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
