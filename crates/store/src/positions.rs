use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::SqlitePool;

use common::{CloseReason, Position, Result};

use crate::{parse_decimal, parse_enum, parse_opt_decimal, parse_opt_timestamp, parse_timestamp};

/// Persistence for the `positions` table. All mutation goes through the
/// `PositionManager`; this type only executes its statements.
#[derive(Clone)]
pub struct PositionRepository {
    pool: SqlitePool,
}

#[derive(sqlx::FromRow)]
struct PositionRow {
    id: String,
    symbol: String,
    side: String,
    quantity: String,
    entry_price: String,
    stop_loss_price: Option<String>,
    take_profit_price: Option<String>,
    trailing_stop_pct: Option<String>,
    high_watermark: Option<String>,
    active: i64,
    opened_at: String,
    closed_at: Option<String>,
    force_close_at: String,
    exit_price: Option<String>,
    pnl: Option<String>,
    close_reason: Option<String>,
}

impl PositionRow {
    fn into_position(self) -> Result<Position> {
        Ok(Position {
            side: parse_enum(&self.side)?,
            quantity: parse_decimal(&self.quantity)?,
            entry_price: parse_decimal(&self.entry_price)?,
            stop_loss_price: parse_opt_decimal(&self.stop_loss_price)?,
            take_profit_price: parse_opt_decimal(&self.take_profit_price)?,
            trailing_stop_pct: parse_opt_decimal(&self.trailing_stop_pct)?,
            high_watermark: parse_opt_decimal(&self.high_watermark)?,
            active: self.active != 0,
            opened_at: parse_timestamp(&self.opened_at)?,
            closed_at: parse_opt_timestamp(&self.closed_at)?,
            force_close_at: parse_timestamp(&self.force_close_at)?,
            exit_price: parse_opt_decimal(&self.exit_price)?,
            pnl: parse_opt_decimal(&self.pnl)?,
            close_reason: self
                .close_reason
                .as_deref()
                .map(parse_enum::<CloseReason>)
                .transpose()?,
            id: self.id,
            symbol: self.symbol,
        })
    }
}

const SELECT_COLUMNS: &str = "SELECT id, symbol, side, quantity, entry_price, stop_loss_price, \
     take_profit_price, trailing_stop_pct, high_watermark, active, opened_at, closed_at, \
     force_close_at, exit_price, pnl, close_reason FROM positions";

impl PositionRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn insert(&self, position: &Position) -> Result<()> {
        sqlx::query(
            "INSERT INTO positions (id, symbol, side, quantity, entry_price, stop_loss_price, \
             take_profit_price, trailing_stop_pct, high_watermark, active, opened_at, closed_at, \
             force_close_at, exit_price, pnl, close_reason) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
        )
        .bind(&position.id)
        .bind(&position.symbol)
        .bind(position.side.to_string())
        .bind(position.quantity.to_string())
        .bind(position.entry_price.to_string())
        .bind(position.stop_loss_price.map(|d| d.to_string()))
        .bind(position.take_profit_price.map(|d| d.to_string()))
        .bind(position.trailing_stop_pct.map(|d| d.to_string()))
        .bind(position.high_watermark.map(|d| d.to_string()))
        .bind(position.active as i64)
        .bind(position.opened_at.to_rfc3339())
        .bind(position.closed_at.map(|t| t.to_rfc3339()))
        .bind(position.force_close_at.to_rfc3339())
        .bind(position.exit_price.map(|d| d.to_string()))
        .bind(position.pnl.map(|d| d.to_string()))
        .bind(position.close_reason.map(|r| r.to_string()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get(&self, id: &str) -> Result<Option<Position>> {
        let row: Option<PositionRow> =
            sqlx::query_as(&format!("{SELECT_COLUMNS} WHERE id = ?1"))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        row.map(PositionRow::into_position).transpose()
    }

    pub async fn get_active(&self, symbol: &str) -> Result<Option<Position>> {
        let row: Option<PositionRow> =
            sqlx::query_as(&format!("{SELECT_COLUMNS} WHERE symbol = ?1 AND active = 1"))
                .bind(symbol)
                .fetch_optional(&self.pool)
                .await?;
        row.map(PositionRow::into_position).transpose()
    }

    pub async fn list_active(&self) -> Result<Vec<Position>> {
        let rows: Vec<PositionRow> =
            sqlx::query_as(&format!("{SELECT_COLUMNS} WHERE active = 1 ORDER BY opened_at"))
                .fetch_all(&self.pool)
                .await?;
        rows.into_iter().map(PositionRow::into_position).collect()
    }

    pub async fn count_active(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM positions WHERE active = 1")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Closed positions for a symbol, newest first (position history view).
    pub async fn history(&self, symbol: Option<&str>) -> Result<Vec<Position>> {
        let rows: Vec<PositionRow> = match symbol {
            Some(sym) => {
                sqlx::query_as(&format!(
                    "{SELECT_COLUMNS} WHERE symbol = ?1 AND active = 0 ORDER BY closed_at DESC"
                ))
                .bind(sym)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as(&format!(
                    "{SELECT_COLUMNS} WHERE active = 0 ORDER BY closed_at DESC"
                ))
                .fetch_all(&self.pool)
                .await?
            }
        };
        rows.into_iter().map(PositionRow::into_position).collect()
    }

    /// All closed positions ordered ascending by close time (metrics input).
    pub async fn closed_chronological(&self) -> Result<Vec<Position>> {
        let rows: Vec<PositionRow> = sqlx::query_as(&format!(
            "{SELECT_COLUMNS} WHERE active = 0 ORDER BY closed_at ASC"
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(PositionRow::into_position).collect()
    }

    /// Terminal transition: once a row goes inactive it is never mutated
    /// again. `pnl` is `None` for externally-closed positions whose exit
    /// price is unknown.
    pub async fn mark_closed(
        &self,
        id: &str,
        closed_at: DateTime<Utc>,
        exit_price: Option<Decimal>,
        pnl: Option<Decimal>,
        reason: CloseReason,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE positions SET active = 0, closed_at = ?2, exit_price = ?3, pnl = ?4, \
             close_reason = ?5 WHERE id = ?1 AND active = 1",
        )
        .bind(id)
        .bind(closed_at.to_rfc3339())
        .bind(exit_price.map(|d| d.to_string()))
        .bind(pnl.map(|d| d.to_string()))
        .bind(reason.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn update_stop(
        &self,
        id: &str,
        stop_loss_price: Decimal,
        high_watermark: Option<Decimal>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE positions SET stop_loss_price = ?2, high_watermark = ?3 \
             WHERE id = ?1 AND active = 1",
        )
        .bind(id)
        .bind(stop_loss_price.to_string())
        .bind(high_watermark.map(|d| d.to_string()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn update_quantity(&self, id: &str, quantity: Decimal) -> Result<()> {
        sqlx::query("UPDATE positions SET quantity = ?2 WHERE id = ?1 AND active = 1")
            .bind(id)
            .bind(quantity.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
