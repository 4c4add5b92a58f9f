use sqlx::SqlitePool;

use common::{Result, RiskEventRecord};

use crate::{parse_enum, parse_opt_decimal, parse_timestamp};

/// Append-only audit log of risk decisions.
#[derive(Clone)]
pub struct RiskEventRepository {
    pool: SqlitePool,
}

#[derive(sqlx::FromRow)]
struct RiskEventRow {
    position_id: Option<String>,
    symbol: String,
    kind: String,
    trigger_price: Option<String>,
    message: String,
    severity: String,
    created_at: String,
}

impl RiskEventRow {
    fn into_record(self) -> Result<RiskEventRecord> {
        Ok(RiskEventRecord {
            kind: parse_enum(&self.kind)?,
            trigger_price: parse_opt_decimal(&self.trigger_price)?,
            severity: parse_enum(&self.severity)?,
            at: parse_timestamp(&self.created_at)?,
            position_id: self.position_id,
            symbol: self.symbol,
            message: self.message,
        })
    }
}

impl RiskEventRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn append(&self, event: &RiskEventRecord) -> Result<()> {
        sqlx::query(
            "INSERT INTO risk_events (position_id, symbol, kind, trigger_price, message, \
             severity, created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )
        .bind(&event.position_id)
        .bind(&event.symbol)
        .bind(event.kind.to_string())
        .bind(event.trigger_price.map(|d| d.to_string()))
        .bind(&event.message)
        .bind(event.severity.to_string())
        .bind(event.at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn recent(&self, limit: i64) -> Result<Vec<RiskEventRecord>> {
        let rows: Vec<RiskEventRow> = sqlx::query_as(
            "SELECT position_id, symbol, kind, trigger_price, message, severity, created_at \
             FROM risk_events ORDER BY created_at DESC LIMIT ?1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(RiskEventRow::into_record).collect()
    }

    pub async fn count(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM risk_events")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}
