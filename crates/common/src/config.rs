use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

use rust_decimal::Decimal;

use crate::TradingMode;

/// All configuration loaded from environment variables at startup.
/// Missing required variables cause an immediate panic with a clear message.
#[derive(Debug, Clone)]
pub struct Config {
    // Trading universe
    pub trading_pairs: Vec<String>,
    pub quote_asset: String,
    pub trading_mode: TradingMode,

    // Exchange selection and credentials
    pub exchange: String,
    pub binance_api_key: String,
    pub binance_secret: String,
    pub binance_recv_window_ms: u64,

    // Risk defaults (fractions: 0.015 = 1.5%)
    pub stop_loss_pct: Decimal,
    pub take_profit_pct: Decimal,
    pub trailing_stop_pct: Option<Decimal>,
    pub position_notional: Decimal,
    pub max_open_positions: usize,
    pub max_daily_loss_pct: Decimal,
    pub emergency_stop_pct: Decimal,
    pub max_holding: Duration,
    pub initial_capital: Decimal,

    // Loop intervals
    pub decision_interval: Duration,
    pub risk_interval: Duration,

    // Default strategy seeded for unconfigured pairs
    pub default_strategy: String,
    pub default_strategy_params: HashMap<String, String>,

    // Database
    pub database_url: String,

    // Admin API
    pub api_port: u16,
    pub api_token: String,

    // Notifier
    pub telegram_token: Option<String>,
    pub telegram_chat_ids: Vec<i64>,

    // Paper mode
    pub paper_slippage_bps: f64,
}

impl Config {
    /// Load all configuration from environment variables.
    /// Loads `.env` if present. Panics on any missing required variable.
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv(); // ignore error if .env not present

        let trading_mode = match required_env("TRADING_MODE").to_lowercase().as_str() {
            "paper" => TradingMode::Paper,
            "live" => TradingMode::Live,
            other => panic!("ERROR: TRADING_MODE must be 'paper' or 'live', got: '{other}'"),
        };

        let trading_pairs: Vec<String> = required_env("TRADING_PAIRS")
            .split(',')
            .map(|s| s.trim().to_uppercase())
            .filter(|s| !s.is_empty())
            .collect();
        if trading_pairs.is_empty() {
            panic!("TRADING_PAIRS must list at least one symbol");
        }

        let telegram_chat_ids = optional_env("TELEGRAM_CHAT_IDS")
            .map(|raw| {
                raw.split(',')
                    .map(|s| {
                        s.trim().parse::<i64>().unwrap_or_else(|_| {
                            panic!("TELEGRAM_CHAT_IDS contains non-numeric ID: '{}'", s.trim())
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        let default_strategy_params: HashMap<String, String> =
            optional_env("DEFAULT_STRATEGY_PARAMS")
                .map(|raw| {
                    serde_json::from_str(&raw).unwrap_or_else(|e| {
                        panic!("DEFAULT_STRATEGY_PARAMS must be a JSON string map: {e}")
                    })
                })
                .unwrap_or_default();

        Config {
            trading_pairs,
            quote_asset: optional_env("QUOTE_ASSET").unwrap_or_else(|| "USDT".to_string()),
            trading_mode,
            exchange: optional_env("EXCHANGE").unwrap_or_else(|| "binance".to_string()),
            binance_api_key: match trading_mode {
                TradingMode::Live => required_env("BINANCE_API_KEY"),
                TradingMode::Paper => optional_env("BINANCE_API_KEY").unwrap_or_default(),
            },
            binance_secret: match trading_mode {
                TradingMode::Live => required_env("BINANCE_SECRET"),
                TradingMode::Paper => optional_env("BINANCE_SECRET").unwrap_or_default(),
            },
            binance_recv_window_ms: parse_or("BINANCE_RECV_WINDOW_MS", 5_000),
            stop_loss_pct: decimal_or("STOP_LOSS_PCT", "0.015"),
            take_profit_pct: decimal_or("TAKE_PROFIT_PCT", "0.03"),
            trailing_stop_pct: optional_env("TRAILING_STOP_PCT")
                .map(|v| parse_decimal("TRAILING_STOP_PCT", &v)),
            position_notional: decimal_or("POSITION_NOTIONAL", "1000"),
            max_open_positions: parse_or("MAX_OPEN_POSITIONS", 10),
            max_daily_loss_pct: decimal_or("MAX_DAILY_LOSS_PCT", "0.02"),
            emergency_stop_pct: decimal_or("EMERGENCY_STOP_PCT", "0.018"),
            max_holding: Duration::from_secs(parse_or("MAX_HOLDING_SECS", 3_600)),
            initial_capital: decimal_or("INITIAL_CAPITAL", "10000"),
            decision_interval: Duration::from_secs(parse_or("DECISION_INTERVAL_SECS", 15)),
            risk_interval: Duration::from_millis(parse_or("RISK_INTERVAL_MS", 1_000)),
            default_strategy: optional_env("DEFAULT_STRATEGY")
                .unwrap_or_else(|| "SMA_CROSSOVER".to_string()),
            default_strategy_params,
            database_url: required_env("DATABASE_URL"),
            api_port: parse_or("API_PORT", 8080),
            api_token: required_env("API_TOKEN"),
            telegram_token: optional_env("TELEGRAM_TOKEN"),
            telegram_chat_ids,
            paper_slippage_bps: parse_or("PAPER_SLIPPAGE_BPS", 10.0),
        }
    }
}

fn required_env(key: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| {
        panic!("Required environment variable '{key}' is not set. Check your .env file.")
    })
}

fn optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

fn parse_or<T: FromStr>(key: &str, default: T) -> T {
    optional_env(key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_decimal(key: &str, raw: &str) -> Decimal {
    Decimal::from_str(raw).unwrap_or_else(|_| panic!("{key} must be a decimal, got: '{raw}'"))
}

fn decimal_or(key: &str, default: &str) -> Decimal {
    match optional_env(key) {
        Some(raw) => parse_decimal(key, &raw),
        None => Decimal::from_str(default).unwrap(),
    }
}
