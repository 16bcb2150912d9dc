//! Trade Gate Integration Tests
//!
//! Checks and executions against a seeded in-memory store.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::float_cmp)]

use std::sync::Arc;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use risk_engine::{
    DecisionStatus, ExecutionError, Holding, InMemoryStateStore, RejectionReason, RiskEngine,
    RiskEngineSettings, StateSeed, StateStorePort, TradeCommand,
};

const BOOK: &str = r#"{
    "universe": ["AAPL", "MSFT", "TSLA"],
    "current_covariance": [
        [0.00040, 0.00010, 0.00012],
        [0.00010, 0.00025, 0.00008],
        [0.00012, 0.00008, 0.00090]
    ],
    "stressed_covariance": [
        [0.0040, 0.0030, 0.0035],
        [0.0030, 0.0025, 0.0028],
        [0.0035, 0.0028, 0.0090]
    ],
    "last_prices": { "AAPL": 150.0, "MSFT": 300.0, "TSLA": 200.0 },
    "cash": "1000000"
}"#;

fn seed(cash: Decimal) -> StateSeed {
    let mut seed = StateSeed::from_json(BOOK).unwrap();
    seed.cash = cash;
    seed
}

fn engine_for(seed: StateSeed, settings: RiskEngineSettings) -> (RiskEngine, Arc<InMemoryStateStore>) {
    let store = Arc::new(InMemoryStateStore::from_seed(seed).unwrap());
    let universe = seed_universe();
    (RiskEngine::new(store.clone(), universe, settings), store)
}

fn seed_universe() -> risk_engine::AssetUniverse {
    StateSeed::from_json(BOOK).unwrap().universe
}

fn engine(cash: Decimal) -> (RiskEngine, Arc<InMemoryStateStore>) {
    engine_for(seed(cash), RiskEngineSettings::default())
}

#[tokio::test]
async fn empty_book_affordable_buy_is_approved() {
    let (engine, _) = engine(dec!(1_000_000));

    let decision = engine
        .check_trade_impact(&TradeCommand::buy("AAPL", 10))
        .await
        .unwrap();

    assert_eq!(decision.status, DecisionStatus::Approved);
    assert_eq!(decision.current_var, Some(0.0));
    assert!(decision.projected_var.unwrap() <= decision.limit);
    assert_eq!(decision.price, Some(150.0));
}

#[tokio::test]
async fn buy_beyond_cash_is_rejected_and_cash_unchanged() {
    let (engine, store) = engine(dec!(1_000));
    let command = TradeCommand::buy("AAPL", 10);

    let decision = engine.check_trade_impact(&command).await.unwrap();
    assert_eq!(decision.reason, Some(RejectionReason::InsufficientFunds));
    assert_eq!(decision.notional, Some(dec!(1_500)));

    let err = engine.execute_trade(&command).await.unwrap_err();
    assert_eq!(err.reason(), Some(RejectionReason::InsufficientFunds));

    let portfolio = store.load_portfolio().await.unwrap();
    assert_eq!(portfolio.value.cash(), dec!(1_000));
    assert_eq!(portfolio.version, 1);
}

#[tokio::test]
async fn sell_beyond_holding_is_rejected() {
    let mut seed = seed(dec!(10_000));
    seed.holdings
        .insert("MSFT".into(), Holding::new(10, dec!(280)));
    let (engine, store) = engine_for(seed, RiskEngineSettings::default());

    let decision = engine
        .check_trade_impact(&TradeCommand::sell("MSFT", 15))
        .await
        .unwrap();
    assert_eq!(decision.reason, Some(RejectionReason::InsufficientInventory));

    let err = engine
        .execute_trade(&TradeCommand::sell("MSFT", 15))
        .await
        .unwrap_err();
    assert!(matches!(err, ExecutionError::Rejected(_)));
    assert_eq!(
        store.load_portfolio().await.unwrap().value.holding(1),
        Some(&Holding::new(10, dec!(280)))
    );
}

#[tokio::test]
async fn buy_then_sell_restores_cash() {
    let (engine, store) = engine(dec!(100_000));

    let bought = engine
        .execute_trade(&TradeCommand::buy("TSLA", 25))
        .await
        .unwrap();
    assert_eq!(bought.cash_after, dec!(95_000));
    assert_eq!(bought.holding_after, Holding::new(25, dec!(200)));

    let sold = engine
        .execute_trade(&TradeCommand::sell("TSLA", 25))
        .await
        .unwrap();
    assert_eq!(sold.cash_after, dec!(100_000));
    assert!(sold.holding_after.is_flat());
    assert_eq!(sold.holding_after.avg_price, Decimal::ZERO);

    let portfolio = store.load_portfolio().await.unwrap();
    assert_eq!(portfolio.version, 3);
    assert_eq!(portfolio.value.cash(), dec!(100_000));
}

#[tokio::test]
async fn buy_that_breaches_limit_is_rejected() {
    let settings = RiskEngineSettings {
        var_limit: 500.0,
        ..RiskEngineSettings::default()
    };
    let (engine, _) = engine_for(seed(dec!(1_000_000)), settings);

    let small = engine
        .check_trade_impact(&TradeCommand::buy("TSLA", 10))
        .await
        .unwrap();
    assert!(small.is_approved());

    // 2_000 shares of TSLA: 1.65 * 0.03 * 400_000 = 19_800
    let large = engine
        .check_trade_impact(&TradeCommand::buy("TSLA", 2_000))
        .await
        .unwrap();
    assert_eq!(large.reason, Some(RejectionReason::RiskLimitBreached));
    assert!((large.projected_var.unwrap() - 19_800.0).abs() < 1e-6);
}

#[tokio::test]
async fn selling_reduces_risk_of_held_position() {
    let mut seed = seed(dec!(0));
    seed.holdings
        .insert("AAPL".into(), Holding::new(100, dec!(140)));
    seed.holdings
        .insert("TSLA".into(), Holding::new(50, dec!(210)));
    let (engine, _) = engine_for(seed, RiskEngineSettings::default());

    let decision = engine
        .check_trade_impact(&TradeCommand::sell("TSLA", 50))
        .await
        .unwrap();

    assert!(decision.is_approved());
    assert!(decision.incremental_var.unwrap() < 0.0);
}

#[tokio::test]
async fn report_components_sum_to_portfolio_var() {
    let mut seed = seed(dec!(50_000));
    seed.holdings
        .insert("AAPL".into(), Holding::new(100, dec!(140)));
    seed.holdings
        .insert("MSFT".into(), Holding::new(20, dec!(310)));
    let (engine, _) = engine_for(seed, RiskEngineSettings::default());

    let report = engine.portfolio_report().await.unwrap();

    assert_eq!(report.equity_value, 21_000.0);
    assert_eq!(report.total_value, 71_000.0);
    let components: f64 = report.assets.iter().map(|a| a.component_var).sum();
    assert!((components - report.portfolio_var).abs() < 1e-6);
    assert_eq!(report.assets[1].invested, dec!(6_200));
    assert_eq!(report.assets[2].market_value, 0.0);
}

#[tokio::test]
async fn stress_uses_stressed_matrix() {
    let mut seed = seed(dec!(0));
    seed.holdings
        .insert("TSLA".into(), Holding::new(100, dec!(200)));
    let (engine, _) = engine_for(seed, RiskEngineSettings::default());

    let result = engine.stress_test().await.unwrap();

    // 1.65 * sqrt(0.009) * 20_000
    let expected = 1.65 * 0.009_f64.sqrt() * 20_000.0;
    assert!((result.stressed_var - expected).abs() < 1e-6);
    assert_eq!(result.limit, 5_000.0);
    assert!(!result.breach);
}
