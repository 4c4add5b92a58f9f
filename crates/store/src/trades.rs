use sqlx::SqlitePool;

use common::{Result, Trade};

use crate::{parse_decimal, parse_enum, parse_timestamp};

/// Persistence for exchange fills. Rows are immutable once written.
#[derive(Clone)]
pub struct TradeRepository {
    pool: SqlitePool,
}

#[derive(sqlx::FromRow)]
struct TradeRow {
    exchange_trade_id: String,
    symbol: String,
    side: String,
    order_type: String,
    status: String,
    price: String,
    quantity: String,
    commission: String,
    executed_at: String,
}

impl TradeRow {
    fn into_trade(self) -> Result<Trade> {
        Ok(Trade {
            side: parse_enum(&self.side)?,
            order_type: parse_enum(&self.order_type)?,
            status: parse_enum(&self.status)?,
            price: parse_decimal(&self.price)?,
            quantity: parse_decimal(&self.quantity)?,
            commission: parse_decimal(&self.commission)?,
            executed_at: parse_timestamp(&self.executed_at)?,
            exchange_trade_id: self.exchange_trade_id,
            symbol: self.symbol,
        })
    }
}

const SELECT_COLUMNS: &str = "SELECT exchange_trade_id, symbol, side, order_type, status, \
     price, quantity, commission, executed_at FROM trades";

impl TradeRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn insert(&self, trade: &Trade) -> Result<()> {
        sqlx::query(
            "INSERT INTO trades (exchange_trade_id, symbol, side, order_type, status, price, \
             quantity, commission, executed_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9) \
             ON CONFLICT(exchange_trade_id) DO NOTHING",
        )
        .bind(&trade.exchange_trade_id)
        .bind(&trade.symbol)
        .bind(trade.side.to_string())
        .bind(trade.order_type.to_string())
        .bind(trade.status.to_string())
        .bind(trade.price.to_string())
        .bind(trade.quantity.to_string())
        .bind(trade.commission.to_string())
        .bind(trade.executed_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn history(&self, symbol: Option<&str>) -> Result<Vec<Trade>> {
        let rows: Vec<TradeRow> = match symbol {
            Some(sym) => {
                sqlx::query_as(&format!(
                    "{SELECT_COLUMNS} WHERE symbol = ?1 ORDER BY executed_at DESC"
                ))
                .bind(sym)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as(&format!("{SELECT_COLUMNS} ORDER BY executed_at DESC"))
                    .fetch_all(&self.pool)
                    .await?
            }
        };
        rows.into_iter().map(TradeRow::into_trade).collect()
    }
}
