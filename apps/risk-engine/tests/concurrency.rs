//! Concurrency Integration Tests
//!
//! Racing executions, shared stores and the background updater.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rust_decimal_macros::dec;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use risk_engine::{
    AssetUniverse, ExecutionError, InMemoryStateStore, RejectionReason, RiskEngine,
    RiskEngineSettings, StateSeed, StateStorePort, Tick, TradeCommand, UpdaterConfig, UpdaterTask,
};

fn universe() -> AssetUniverse {
    AssetUniverse::new(["AAPL", "MSFT"]).unwrap()
}

fn store(cash: rust_decimal::Decimal) -> Arc<InMemoryStateStore> {
    let seed = StateSeed::from_json(
        r#"{
            "universe": ["AAPL", "MSFT"],
            "current_covariance": [[0.0004, 0.0001], [0.0001, 0.0002]],
            "last_prices": { "AAPL": 100.0, "MSFT": 50.0 },
            "cash": "0"
        }"#,
    )
    .unwrap();
    let seed = StateSeed { cash, ..seed };
    Arc::new(InMemoryStateStore::from_seed(seed).unwrap())
}

fn settings() -> RiskEngineSettings {
    RiskEngineSettings {
        max_market_age: None,
        ..RiskEngineSettings::default()
    }
}

fn is_lost_race(err: &ExecutionError) -> bool {
    err.is_retryable() || err.reason() == Some(RejectionReason::InsufficientFunds)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_executes_on_one_engine_commit_once() {
    let store = store(dec!(1_500));
    let engine = Arc::new(RiskEngine::new(store.clone(), universe(), settings()));
    let command = TradeCommand::buy("AAPL", 10);

    let (a, b) = tokio::join!(
        tokio::spawn({
            let engine = Arc::clone(&engine);
            let command = command.clone();
            async move { engine.execute_trade(&command).await }
        }),
        tokio::spawn({
            let engine = Arc::clone(&engine);
            let command = command.clone();
            async move { engine.execute_trade(&command).await }
        }),
    );
    let results = [a.unwrap(), b.unwrap()];

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    let failure = results.iter().find_map(|r| r.as_ref().err()).unwrap();
    assert_eq!(failure.reason(), Some(RejectionReason::InsufficientFunds));

    let portfolio = store.load_portfolio().await.unwrap();
    assert_eq!(portfolio.value.cash(), dec!(500));
    assert_eq!(portfolio.value.holding(0).unwrap().quantity, 10);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn engines_sharing_a_store_never_overspend() {
    let store = store(dec!(1_500));
    let first = Arc::new(RiskEngine::new(store.clone(), universe(), settings()));
    let second = Arc::new(RiskEngine::new(store.clone(), universe(), settings()));

    for _ in 0..20 {
        store
            .reset_portfolio(risk_engine::Portfolio::new(dec!(1_500), 2).unwrap())
            .unwrap();

        let (a, b) = tokio::join!(
            tokio::spawn({
                let engine = Arc::clone(&first);
                async move { engine.execute_trade(&TradeCommand::buy("AAPL", 10)).await }
            }),
            tokio::spawn({
                let engine = Arc::clone(&second);
                async move { engine.execute_trade(&TradeCommand::buy("AAPL", 10)).await }
            }),
        );
        let results = [a.unwrap(), b.unwrap()];

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results.iter().filter_map(|r| r.as_ref().err()).all(is_lost_race));

        let cash = store.load_portfolio().await.unwrap().value.cash();
        assert_eq!(cash, dec!(500));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn checks_race_the_updater_without_torn_reads() {
    let store = store(dec!(1_000_000));
    let engine = Arc::new(RiskEngine::new(store.clone(), universe(), settings()));
    let cancel = CancellationToken::new();
    let (tx, rx) = mpsc::channel(256);
    let config = UpdaterConfig {
        interval: Duration::from_millis(5),
        ..UpdaterConfig::default()
    };
    let task = UpdaterTask::resume(universe(), store.clone(), rx, config, cancel.clone())
        .await
        .unwrap();
    let updater = tokio::spawn(task.run());

    let feeder = tokio::spawn(async move {
        for i in 0..200_u32 {
            let drift = f64::from(i % 7) - 3.0;
            tx.send(Tick::new("AAPL", 100.0 + drift, Utc::now())).await.unwrap();
            tx.send(Tick::new("MSFT", 50.0 - drift / 2.0, Utc::now())).await.unwrap();
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    });

    let mut last_version = 0;
    for _ in 0..200 {
        let decision = engine
            .check_trade_impact(&TradeCommand::buy("MSFT", 5))
            .await
            .unwrap();
        assert!(decision.is_approved());
        let version = decision.market_version.unwrap();
        assert!(version >= last_version);
        last_version = version;
        assert!(decision.projected_var.unwrap() >= 0.0);
        tokio::task::yield_now().await;
    }

    feeder.await.unwrap();
    cancel.cancel();
    let stats = timeout(Duration::from_secs(2), updater).await.unwrap().unwrap();

    let market = store.load_market().await.unwrap();
    assert_eq!(market.version, 1 + stats.published());
    assert!(stats.updated > 0);
}

#[tokio::test]
async fn cancelled_updater_leaves_last_published_pair() {
    let store = store(dec!(1_000));
    let cancel = CancellationToken::new();
    let (tx, rx) = mpsc::channel(16);
    let config = UpdaterConfig {
        interval: Duration::from_millis(10),
        ..UpdaterConfig::default()
    };
    let task = UpdaterTask::resume(universe(), store.clone(), rx, config, cancel.clone())
        .await
        .unwrap();
    let updater = tokio::spawn(task.run());

    tx.send(Tick::new("AAPL", 101.0, Utc::now())).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    cancel.cancel();
    let stats = timeout(Duration::from_secs(1), updater).await.unwrap().unwrap();

    let market = store.load_market().await.unwrap();
    assert_eq!(market.version, 1 + stats.published());
    assert_eq!(market.value.prices.latest(0), Some(101.0));
    assert_eq!(market.value.prices.previous(0), Some(100.0));
    assert_eq!(market.value.covariance.dimension(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn flooded_channel_still_runs_cycles() {
    let store = store(dec!(1_000));
    let cancel = CancellationToken::new();
    let stop_feeders = CancellationToken::new();
    let (tx, rx) = mpsc::channel(4096);
    let config = UpdaterConfig {
        interval: Duration::from_millis(10),
        ..UpdaterConfig::default()
    };
    let task = UpdaterTask::resume(universe(), store.clone(), rx, config, cancel.clone())
        .await
        .unwrap();
    let updater = tokio::spawn(task.run());

    let feeders: Vec<_> = (0..3_u32)
        .map(|feeder| {
            let tx = tx.clone();
            let stop = stop_feeders.clone();
            tokio::spawn(async move {
                let mut i = 0_u32;
                while !stop.is_cancelled() {
                    let price = 100.0 + f64::from((i + feeder) % 11);
                    if tx.send(Tick::new("AAPL", price, Utc::now())).await.is_err() {
                        break;
                    }
                    i = i.wrapping_add(1);
                }
            })
        })
        .collect();
    drop(tx);

    tokio::time::sleep(Duration::from_millis(400)).await;
    let market = store.load_market().await.unwrap();
    assert!(market.version > 1, "no cycle published while the channel was busy");
    assert!(Utc::now() - market.value.as_of < chrono::Duration::seconds(1));

    cancel.cancel();
    let stats = timeout(Duration::from_secs(2), updater).await.unwrap().unwrap();
    stop_feeders.cancel();
    for feeder in feeders {
        timeout(Duration::from_secs(2), feeder).await.unwrap().unwrap();
    }

    assert!(stats.published() > 0);
    assert!(stats.updated > 0);
    let market = store.load_market().await.unwrap();
    assert_eq!(market.version, 1 + stats.published());
}
