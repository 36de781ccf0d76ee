use std::sync::Arc;

use sqlx::SqlitePool;
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use common::{CandleWindow, Config, SignalEvent};
use decision::{DecisionConfig, DecisionEngine, SystemClock};
use engine::{DerivStream, FeedEvent, SignalPipeline};
use indicators::{ConsensusAnalyzer, IndicatorRegistry, IndicatorsFileConfig};
use store::SignalStore;
use telegram_notify::Notifier;

#[tokio::main]
async fn main() {
    // ── Logging ──────────────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse().unwrap()))
        .init();

    // ── Config ────────────────────────────────────────────────────────────────
    let cfg = Config::from_env();
    info!(
        symbol = %cfg.symbol,
        granularity = cfg.granularity_secs,
        max_candles = cfg.max_candles,
        signal_cooldown = cfg.signal_cooldown_secs,
        validate_cooldown = cfg.validate_signal_cooldown_secs,
        "RiseFall starting"
    );

    // ── Database ──────────────────────────────────────────────────────────────
    let db = SqlitePool::connect(&cfg.database_url)
        .await
        .unwrap_or_else(|e| panic!("Failed to connect to database: {e}"));
    sqlx::migrate!("../../migrations")
        .run(&db)
        .await
        .unwrap_or_else(|e| panic!("Database migration failed: {e}"));
    info!("Database ready");

    // ── Indicators & consensus ────────────────────────────────────────────────
    let indicators_cfg = IndicatorsFileConfig::load(&cfg.indicators_config_path)
        .unwrap_or_else(|e| panic!("{e}"));
    let registry = IndicatorRegistry::from_config(&indicators_cfg)
        .unwrap_or_else(|e| panic!("{e}"));
    let analyzer = ConsensusAnalyzer::from_config(&indicators_cfg);

    if registry.max_min_candles() > cfg.max_candles {
        panic!(
            "MAX_CANDLES={} is below the {} candles the configured indicators need",
            cfg.max_candles,
            registry.max_min_candles()
        );
    }

    // ── Decision engine ───────────────────────────────────────────────────────
    let decision_engine =
        DecisionEngine::new(DecisionConfig::from_config(&cfg), Arc::new(SystemClock));

    // ── Channels ──────────────────────────────────────────────────────────────
    let (feed_tx, feed_rx) = mpsc::channel::<FeedEvent>(256);
    let (notify_tx, notify_rx) = mpsc::channel::<SignalEvent>(64);
    let (store_tx, store_rx) = mpsc::channel::<SignalEvent>(64);

    // ── Subsystems ────────────────────────────────────────────────────────────
    let stream = DerivStream::new(
        &cfg.deriv_app_id,
        cfg.deriv_token.clone(),
        cfg.symbol.clone(),
        cfg.granularity_secs,
        cfg.max_candles,
        feed_tx,
    );

    let pipeline = SignalPipeline::new(
        CandleWindow::new(cfg.max_candles, cfg.granularity_secs),
        registry,
        analyzer,
        decision_engine,
        feed_rx,
        notify_tx,
        store_tx,
    );

    let notifier = Notifier::new(&cfg.telegram_token, cfg.telegram_chat_id, notify_rx);
    let signal_store = SignalStore::new(db.clone(), store_rx);

    // ── Spawn all tasks ───────────────────────────────────────────────────────
    tokio::spawn(stream.run());
    tokio::spawn(pipeline.run());
    tokio::spawn(notifier.run());
    tokio::spawn(signal_store.run());

    // Keep main alive
    info!("All subsystems started. Waiting for shutdown signal.");
    tokio::signal::ctrl_c().await.unwrap();
    info!("Shutdown signal received. Exiting.");
}
