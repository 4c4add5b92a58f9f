use std::collections::HashMap;

use chrono::Utc;
use sqlx::SqlitePool;
use tokio::sync::RwLock;
use tracing::info;

use common::{Result, StrategyConfig};

/// Per-symbol strategy assignments, admin-managed, consumed read-only by the
/// scheduler. Reads hit an in-memory cache that is swapped atomically on
/// every write.
pub struct ConfigStore {
    pool: SqlitePool,
    cache: RwLock<HashMap<String, StrategyConfig>>,
}

#[derive(sqlx::FromRow)]
struct ConfigRow {
    symbol: String,
    strategy_name: String,
    active: i64,
    params: String,
}

impl ConfigRow {
    fn into_config(self) -> Result<StrategyConfig> {
        Ok(StrategyConfig {
            active: self.active != 0,
            params: serde_json::from_str(&self.params)?,
            symbol: self.symbol,
            strategy_name: self.strategy_name,
        })
    }
}

impl ConfigStore {
    /// Build the store and warm the cache from the database.
    pub async fn load(pool: SqlitePool) -> Result<Self> {
        let store = Self {
            pool,
            cache: RwLock::new(HashMap::new()),
        };
        store.reload().await?;
        Ok(store)
    }

    async fn reload(&self) -> Result<()> {
        let rows: Vec<ConfigRow> =
            sqlx::query_as("SELECT symbol, strategy_name, active, params FROM strategy_configs")
                .fetch_all(&self.pool)
                .await?;
        let mut fresh = HashMap::with_capacity(rows.len());
        for row in rows {
            let cfg = row.into_config()?;
            fresh.insert(cfg.symbol.clone(), cfg);
        }
        *self.cache.write().await = fresh;
        Ok(())
    }

    pub async fn get(&self, symbol: &str) -> Option<StrategyConfig> {
        self.cache.read().await.get(symbol).cloned()
    }

    pub async fn all(&self) -> Vec<StrategyConfig> {
        let mut configs: Vec<StrategyConfig> = self.cache.read().await.values().cloned().collect();
        configs.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        configs
    }

    pub async fn active(&self) -> Vec<StrategyConfig> {
        let mut configs: Vec<StrategyConfig> = self
            .cache
            .read()
            .await
            .values()
            .filter(|c| c.active)
            .cloned()
            .collect();
        configs.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        configs
    }

    pub async fn upsert(&self, config: StrategyConfig) -> Result<()> {
        let params = serde_json::to_string(&config.params)?;
        sqlx::query(
            "INSERT INTO strategy_configs (symbol, strategy_name, active, params, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5) \
             ON CONFLICT(symbol) DO UPDATE SET strategy_name = excluded.strategy_name, \
             active = excluded.active, params = excluded.params, updated_at = excluded.updated_at",
        )
        .bind(&config.symbol)
        .bind(&config.strategy_name)
        .bind(config.active as i64)
        .bind(params)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        self.cache
            .write()
            .await
            .insert(config.symbol.clone(), config);
        Ok(())
    }

    /// Returns `true` when a row was actually removed.
    pub async fn remove(&self, symbol: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM strategy_configs WHERE symbol = ?1")
            .bind(symbol)
            .execute(&self.pool)
            .await?;
        self.cache.write().await.remove(symbol);
        Ok(result.rows_affected() > 0)
    }

    /// Insert a default config for every listed symbol that has none yet.
    /// Existing rows are never touched, which keeps this idempotent.
    pub async fn seed_defaults(
        &self,
        symbols: &[String],
        strategy_name: &str,
        params: &HashMap<String, String>,
    ) -> Result<usize> {
        let mut seeded = 0;
        for symbol in symbols {
            if self.get(symbol).await.is_some() {
                continue;
            }
            info!(%symbol, strategy = %strategy_name, "seeding default strategy config");
            self.upsert(StrategyConfig {
                symbol: symbol.clone(),
                strategy_name: strategy_name.to_string(),
                active: true,
                params: params.clone(),
            })
            .await?;
            seeded += 1;
        }
        Ok(seeded)
    }
}
