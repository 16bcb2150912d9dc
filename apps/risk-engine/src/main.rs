//! Risk Engine Binary
//!
//! Runs the covariance updater in the background and serves the JSON lines
//! protocol on stdin/stdout until input ends or a shutdown signal arrives.
//!
//! # Usage
//!
//! ```bash
//! cargo run -p risk-engine < commands.jsonl
//! ```
//!
//! # Environment Variables
//!
//! - `RISK_ENGINE_UNIVERSE`: Comma-separated asset ids (default: AAPL,GOOG,MSFT,AMZN,TSLA)
//! - `RISK_ENGINE_SEED_PATH`: JSON seed document; its universe wins over `RISK_ENGINE_UNIVERSE`
//! - `RISK_ENGINE_VAR_LIMIT`: Dollar VaR limit (default: 5000)
//! - `RISK_ENGINE_INITIAL_CASH`: Cash when no seed is given (default: 1000000)
//! - `RISK_ENGINE_EWMA_DECAY`: EWMA λ (default: 0.94)
//! - `RISK_ENGINE_UPDATE_INTERVAL_MS`: Updater cycle (default: 2000)
//! - `RISK_ENGINE_STORE_TIMEOUT_MS`: Store call deadline (default: 500)
//! - `RISK_ENGINE_MAX_MARKET_AGE_SECS`: Staleness limit, 0 disables (default: 30).
//!   Quiet cycles republish the last market state, so only a stalled updater
//!   trips it
//! - `RISK_ENGINE_METRICS_PORT`: Prometheus port, 0 disables (default: 0)
//! - `OTEL_ENABLED`: Enable OpenTelemetry (default: false)
//! - `RUST_LOG`: Log filter (default: `risk_engine=info`); logs go to stderr

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use risk_engine::infrastructure::telemetry;
use risk_engine::{
    InMemoryStateStore, RiskEngine, RiskEngineConfig, StateSeed, StateStorePort, Tick,
    UpdaterTask, init_metrics, serve_lines,
};
use tokio::io::BufReader;
use tokio::signal;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Graceful shutdown timeout.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Ticks buffered between the reader and the updater.
const TICK_CHANNEL_CAPACITY: usize = 4096;

fn main() -> anyhow::Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    let result = runtime.block_on(run());
    // stdin reads sit on the blocking pool and would otherwise hold the process open.
    runtime.shutdown_timeout(SHUTDOWN_TIMEOUT);
    result
}

async fn run() -> anyhow::Result<()> {
    load_dotenv();

    let _telemetry_guard = telemetry::init()?;

    tracing::info!("Starting Risk Engine");

    let config = RiskEngineConfig::from_env()?;
    log_config(&config);

    if config.server.metrics_port != 0 {
        let addr = SocketAddr::from(([0, 0, 0, 0], config.server.metrics_port));
        init_metrics(addr)?;
    }

    let seed = match &config.store.seed_path {
        Some(path) => StateSeed::from_path(path)?,
        None => StateSeed::empty(config.universe.clone(), config.risk.initial_cash),
    };
    let store: Arc<dyn StateStorePort> = Arc::new(InMemoryStateStore::from_seed(seed)?);

    let engine = Arc::new(RiskEngine::connect(Arc::clone(&store), config.engine_settings()).await?);

    let shutdown_token = CancellationToken::new();
    let (tick_tx, tick_rx) = mpsc::channel::<Tick>(TICK_CHANNEL_CAPACITY);

    let updater = UpdaterTask::resume(
        engine.universe().clone(),
        Arc::clone(&store),
        tick_rx,
        config.updater_config(),
        shutdown_token.clone(),
    )
    .await?;
    let updater_handle = tokio::spawn(updater.run());

    let mut session = tokio::spawn(serve_lines(
        BufReader::new(tokio::io::stdin()),
        tokio::io::stdout(),
        Arc::clone(&engine),
        tick_tx,
        shutdown_token.clone(),
    ));

    tracing::info!("Risk engine ready");

    tokio::select! {
        () = await_shutdown_signal() => {}
        joined = &mut session => {
            match joined {
                Ok(Ok(stats)) => tracing::info!(handled = stats.handled, malformed = stats.malformed, "Session ended"),
                Ok(Err(e)) => tracing::error!(error = %e, "Session failed"),
                Err(e) => tracing::error!(error = %e, "Session task panicked"),
            }
        }
    }

    shutdown_token.cancel();
    tracing::info!(
        timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
        "Graceful shutdown started"
    );

    match tokio::time::timeout(SHUTDOWN_TIMEOUT, updater_handle).await {
        Ok(Ok(stats)) => tracing::info!(
            updated = stats.updated,
            baselines = stats.baselines,
            refreshed = stats.refreshed,
            skipped = stats.skipped,
            publish_failures = stats.publish_failures,
            "Covariance updater finished"
        ),
        Ok(Err(e)) => tracing::error!(error = %e, "Covariance updater task failed"),
        Err(_) => tracing::warn!("Covariance updater did not stop in time"),
    }

    tracing::info!("Risk engine stopped");
    Ok(())
}

/// Log the parsed configuration.
fn log_config(config: &RiskEngineConfig) {
    tracing::info!(
        assets = config.universe.len(),
        var_limit = config.risk.var_limit,
        decay = config.covariance.decay,
        update_interval_ms = config.covariance.update_interval.as_millis(),
        store_timeout_ms = config.store.timeout.as_millis(),
        seed_path = ?config.store.seed_path,
        metrics_port = config.server.metrics_port,
        "Configuration loaded"
    );
}

/// Load .env file from current directory or any ancestor directory.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Wait for SIGTERM or SIGINT.
async fn await_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }
}
