use std::sync::Arc;
use std::time::Duration;

use sqlx::SqlitePool;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use common::{Config, ExchangeGateway, MarketDataEvent, NoopNotifier, Notifier, TradingMode};
use engine::{
    MetricsService, PositionDefaults, PositionManager, RiskMonitor, RiskMonitorConfig,
    StateReconciler, StrategyScheduler,
};
use gateway::{BinanceGateway, BinanceStream, MarketDataService};
use notify::TelegramNotifier;
use paper::PaperGateway;
use risk::DailyLossTracker;
use store::{
    ConfigStore, MarketDataRepository, PairRepository, PositionRepository, RiskEventRepository,
    TradeRepository,
};
use strategy::StrategyRegistry;

#[tokio::main]
async fn main() {
    // ── Logging ──────────────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse().unwrap()))
        .init();

    // ── Config ────────────────────────────────────────────────────────────────
    let cfg = Config::from_env();
    info!(mode = %cfg.trading_mode, pairs = ?cfg.trading_pairs, "scalpbot starting");

    // ── Database ──────────────────────────────────────────────────────────────
    let db = SqlitePool::connect(&cfg.database_url)
        .await
        .unwrap_or_else(|e| panic!("Failed to connect to database: {e}"));
    sqlx::migrate!("../../migrations")
        .run(&db)
        .await
        .unwrap_or_else(|e| panic!("Database migration failed: {e}"));
    info!("Database ready");

    // ── Repositories and trading universe ─────────────────────────────────────
    let positions = PositionRepository::new(db.clone());
    let trades = TradeRepository::new(db.clone());
    let events = RiskEventRepository::new(db.clone());
    let candles_repo = MarketDataRepository::new(db.clone());

    let pair_repo = PairRepository::new(db.clone());
    pair_repo
        .seed_defaults(&cfg.trading_pairs, &cfg.quote_asset)
        .await
        .unwrap_or_else(|e| panic!("Failed to seed trading pairs: {e}"));
    let pairs = Arc::new(
        pair_repo
            .load_all()
            .await
            .unwrap_or_else(|e| panic!("Failed to load trading pairs: {e}")),
    );

    let configs = Arc::new(
        ConfigStore::load(db.clone())
            .await
            .unwrap_or_else(|e| panic!("Failed to load strategy configs: {e}")),
    );

    // ── Exchange gateway (selected by TRADING_MODE) ──────────────────────────
    let binance = Arc::new(BinanceGateway::new(
        &cfg.binance_api_key,
        &cfg.binance_secret,
        cfg.binance_recv_window_ms,
    ));
    let mut paper_gateway: Option<Arc<PaperGateway>> = None;
    let exchange: Arc<dyn ExchangeGateway> = match cfg.trading_mode {
        TradingMode::Live => {
            info!("live trading mode — orders go to Binance");
            binance.clone()
        }
        TradingMode::Paper => {
            info!(slippage_bps = cfg.paper_slippage_bps, "paper trading mode — orders are simulated");
            let gw = Arc::new(PaperGateway::new(&cfg.quote_asset, cfg.paper_slippage_bps));
            paper_gateway = Some(gw.clone());
            gw
        }
    };

    // ── Notifier ──────────────────────────────────────────────────────────────
    let notifier: Arc<dyn Notifier> = match (&cfg.telegram_token, cfg.telegram_chat_ids.is_empty()) {
        (Some(token), false) => Arc::new(TelegramNotifier::new(
            token.clone(),
            cfg.telegram_chat_ids.clone(),
        )),
        _ => {
            warn!("no Telegram credentials — alerts are log-only");
            Arc::new(NoopNotifier)
        }
    };

    // ── Risk limits and the position manager ─────────────────────────────────
    let tracker = Arc::new(DailyLossTracker::new(
        cfg.initial_capital,
        cfg.emergency_stop_pct,
        cfg.max_daily_loss_pct,
    ));
    let defaults = PositionDefaults {
        notional: cfg.position_notional,
        stop_loss_pct: cfg.stop_loss_pct,
        take_profit_pct: cfg.take_profit_pct,
        trailing_stop_pct: cfg.trailing_stop_pct,
        max_holding: cfg.max_holding,
        max_open_positions: cfg.max_open_positions,
    };
    let manager = Arc::new(PositionManager::new(
        positions.clone(),
        trades.clone(),
        events.clone(),
        configs.clone(),
        pairs.clone(),
        exchange.clone(),
        notifier.clone(),
        tracker.clone(),
        defaults,
    ));

    // ── Market data: streams, candle seed, persistence ───────────────────────
    let market = Arc::new(MarketDataService::new(exchange.clone()));

    for symbol in &cfg.trading_pairs {
        let seed = match cfg.trading_mode {
            TradingMode::Live => binance.klines(symbol, 200).await,
            TradingMode::Paper => candles_repo.recent(symbol, 200).await,
        };
        match seed {
            Ok(history) => market.seed_candles(symbol, history).await,
            Err(e) => warn!(%symbol, error = %e, "could not seed candle history"),
        }
        tokio::spawn(BinanceStream::new(symbol.clone(), market.clone()).run());
    }

    // Persist closed candles; in paper mode also feed fills from the stream.
    {
        let mut market_rx = market.subscribe();
        let candles_repo = candles_repo.clone();
        let paper_gateway = paper_gateway.clone();
        tokio::spawn(async move {
            loop {
                match market_rx.recv().await {
                    Ok(MarketDataEvent::Candle { symbol, candle }) if candle.closed => {
                        if let Err(e) = candles_repo.insert(&symbol, &candle).await {
                            error!(%symbol, error = %e, "failed to persist candle");
                        }
                    }
                    Ok(MarketDataEvent::Ticker(snapshot)) => {
                        if let Some(paper) = &paper_gateway {
                            paper.set_price(&snapshot.symbol, snapshot.last_price).await;
                        }
                    }
                    Ok(_) => {}
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        warn!(dropped = n, "candle persistence lagged");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        });
    }

    // ── Control plane ─────────────────────────────────────────────────────────
    let registry = Arc::new(StrategyRegistry::with_builtins());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let reconciler = StateReconciler::new(
        manager.clone(),
        exchange.clone(),
        configs.clone(),
        pairs.clone(),
        cfg.default_strategy.clone(),
        cfg.default_strategy_params.clone(),
    );
    if let Err(e) = reconciler.startup().await {
        error!(error = %e, "startup reconciliation failed — continuing with local state");
    }

    let scheduler = StrategyScheduler::new(
        configs.clone(),
        registry.clone(),
        market.clone(),
        manager.clone(),
        pairs.clone(),
        notifier.clone(),
        cfg.decision_interval,
    );
    let monitor = RiskMonitor::new(
        manager.clone(),
        market.clone(),
        events.clone(),
        notifier.clone(),
        tracker.clone(),
        RiskMonitorConfig {
            sweep_interval: cfg.risk_interval,
            ..RiskMonitorConfig::default()
        },
    );

    // ── Admin API ─────────────────────────────────────────────────────────────
    let api_state = api::AppState {
        configs: configs.clone(),
        registry: registry.clone(),
        positions: positions.clone(),
        trades: trades.clone(),
        manager: manager.clone(),
        market: market.clone(),
        metrics: Arc::new(MetricsService::new(positions.clone(), cfg.initial_capital)),
        api_token: cfg.api_token.clone(),
    };

    // ── Spawn all loops ───────────────────────────────────────────────────────
    let mut control_handles = Vec::new();
    control_handles.push(tokio::spawn(scheduler.run(shutdown_rx.clone())));
    control_handles.push(tokio::spawn(
        monitor.run(market.subscribe(), shutdown_rx.clone()),
    ));
    control_handles.push(tokio::spawn(reconciler.run(shutdown_rx.clone())));
    tokio::spawn(api::serve(api_state, cfg.api_port));

    info!("all subsystems started");
    tokio::signal::ctrl_c().await.unwrap();
    info!("shutdown signal received — stopping loops");
    let _ = shutdown_tx.send(true);

    // In-flight work gets a bounded window to finish, then is abandoned.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(30);
    for handle in control_handles {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if tokio::time::timeout(remaining, handle).await.is_err() {
            warn!("task missed the shutdown deadline — abandoning");
        }
    }
    info!("scalpbot stopped");
}
