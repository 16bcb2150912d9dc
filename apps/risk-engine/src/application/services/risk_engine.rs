//! Risk Engine Service
//!
//! Validates trades against a consistent snapshot of market and portfolio
//! state, and commits approved trades.
//!
//! `check_trade_impact` is read-only and lock-free. `execute_trade` runs
//! behind a per-engine gate, re-validates inside it, and commits with a
//! compare-and-swap on the portfolio version so that writers outside this
//! engine instance cannot be overwritten.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use nalgebra::DVector;
use rust_decimal::Decimal;
use serde::Serialize;
use tokio::sync::Mutex;

use super::bounded;
use crate::application::ports::{StateKey, StateStorePort, StoreError, Versioned};
use crate::domain::portfolio::{notional, price_to_decimal, quantity_as_f64};
use crate::domain::report::build_report;
use crate::domain::risk_math::{
    DEFAULT_IMPACT_COEFFICIENT, DEFAULT_PERIODS_PER_DAY, IncrementalVarProbe, RiskMathError,
    liquidity_var, stress_var, weights_from_exposures,
};
use crate::domain::{
    AssetId, AssetUniverse, CommandError, Decision, Holding, MarketState, Portfolio,
    PortfolioError, RejectionReason, RiskReport, StressResult, TradeCommand, TradeSide,
};
use crate::infrastructure::metrics::{self, DecisionPath};

// =============================================================================
// Settings
// =============================================================================

/// Inputs to the liquidity cost estimate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LiquiditySettings {
    /// Market-impact coefficient.
    pub impact_coefficient: f64,
    /// Half of the assumed bid-ask spread, in basis points of price.
    pub half_spread_bps: f64,
    /// Assumed average daily volume per asset.
    pub avg_daily_volume: f64,
}

impl Default for LiquiditySettings {
    fn default() -> Self {
        Self {
            impact_coefficient: DEFAULT_IMPACT_COEFFICIENT,
            half_spread_bps: 2.0,
            avg_daily_volume: 10_000_000.0,
        }
    }
}

impl LiquiditySettings {
    /// Estimated cost to unwind `quantity` units at `price`.
    #[must_use]
    pub fn cost(&self, quantity: u64, price: f64) -> f64 {
        let half_spread = price * self.half_spread_bps / 10_000.0;
        liquidity_var(
            quantity_as_f64(quantity),
            price,
            price - half_spread,
            price + half_spread,
            self.avg_daily_volume,
            self.impact_coefficient,
        )
    }
}

/// Engine policy and timing.
#[derive(Debug, Clone, PartialEq)]
pub struct RiskEngineSettings {
    /// Dollar VaR ceiling.
    pub var_limit: f64,
    /// Deadline for each state store call.
    pub store_timeout: Duration,
    /// Oldest market state accepted; `None` disables the check.
    pub max_market_age: Option<Duration>,
    /// Bars per trading day, for daily scaling in reports.
    pub periods_per_day: u32,
    /// Liquidity cost inputs.
    pub liquidity: LiquiditySettings,
}

impl Default for RiskEngineSettings {
    fn default() -> Self {
        Self {
            var_limit: 5_000.0,
            store_timeout: Duration::from_millis(500),
            max_market_age: Some(Duration::from_secs(30)),
            periods_per_day: DEFAULT_PERIODS_PER_DAY,
            liquidity: LiquiditySettings::default(),
        }
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Why a consistent snapshot could not be assembled.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SnapshotError {
    /// Store call failed or timed out.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// Market state is older than allowed.
    #[error("market state is {age_ms}ms old, limit is {max_ms}ms")]
    Stale {
        /// Age of the state.
        age_ms: i64,
        /// Configured maximum.
        max_ms: u128,
    },
    /// Stored state does not match the universe.
    #[error("state has dimension {actual}, universe has {expected} assets")]
    ShapeMismatch {
        /// Universe size.
        expected: usize,
        /// Size found.
        actual: usize,
    },
    /// No price has been observed for an asset yet.
    #[error("no price for {0}")]
    MissingPrice(AssetId),
    /// Risk math rejected the stored values.
    #[error(transparent)]
    Math(#[from] RiskMathError),
}

/// Failure of `execute_trade`.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExecutionError {
    /// The command itself is invalid.
    #[error(transparent)]
    InvalidCommand(#[from] CommandError),
    /// State could not be read or written.
    #[error("state unavailable: {0}")]
    StateUnavailable(#[from] SnapshotError),
    /// Re-validation rejected the trade.
    #[error("trade rejected: {}", .0.reason.map_or("UNKNOWN", |r| r.as_str()))]
    Rejected(Box<Decision>),
    /// Another writer committed first.
    #[error("portfolio changed concurrently: expected version {expected}, found {found}")]
    ConcurrentConflict {
        /// Version this execution read.
        expected: u64,
        /// Version found at commit time.
        found: u64,
    },
}

impl ExecutionError {
    /// Rejection reason, when one applies.
    #[must_use]
    pub fn reason(&self) -> Option<RejectionReason> {
        match self {
            Self::Rejected(decision) => decision.reason,
            Self::StateUnavailable(_) => Some(RejectionReason::StaleOrMissingState),
            Self::InvalidCommand(_) | Self::ConcurrentConflict { .. } => None,
        }
    }

    /// Whether re-checking and retrying once may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::ConcurrentConflict { .. })
    }
}

/// Result of a committed trade.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionReceipt {
    /// Decision the trade was committed under.
    pub decision: Decision,
    /// Portfolio version after the commit.
    pub portfolio_version: u64,
    /// Cash after the commit.
    pub cash_after: Decimal,
    /// Holding of the traded asset after the commit.
    pub holding_after: Holding,
}

// =============================================================================
// Snapshot
// =============================================================================

struct Snapshot {
    market: Versioned<Arc<MarketState>>,
    prices: DVector<f64>,
    portfolio: Versioned<Portfolio>,
}

struct Evaluation {
    decision: Decision,
    next: Option<Portfolio>,
}

// =============================================================================
// Engine
// =============================================================================

/// Pre-trade risk gate over a shared state store.
pub struct RiskEngine {
    store: Arc<dyn StateStorePort>,
    universe: AssetUniverse,
    settings: RiskEngineSettings,
    execution_gate: Mutex<()>,
}

impl std::fmt::Debug for RiskEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RiskEngine")
            .field("universe", &self.universe)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl RiskEngine {
    /// Create an engine for a known universe.
    #[must_use]
    pub fn new(
        store: Arc<dyn StateStorePort>,
        universe: AssetUniverse,
        settings: RiskEngineSettings,
    ) -> Self {
        Self {
            store,
            universe,
            settings,
            execution_gate: Mutex::new(()),
        }
    }

    /// Create an engine, reading the universe from the store.
    ///
    /// # Errors
    ///
    /// Returns an error if the universe cannot be loaded in time.
    pub async fn connect(
        store: Arc<dyn StateStorePort>,
        settings: RiskEngineSettings,
    ) -> Result<Self, StoreError> {
        let universe = bounded(
            settings.store_timeout,
            StateKey::AssetUniverse,
            "load_universe",
            store.load_universe(),
        )
        .await?;
        tracing::info!(assets = universe.len(), "Risk engine connected to state store");
        Ok(Self::new(store, universe, settings))
    }

    /// The engine's asset universe.
    #[must_use]
    pub const fn universe(&self) -> &AssetUniverse {
        &self.universe
    }

    /// The engine's settings.
    #[must_use]
    pub const fn settings(&self) -> &RiskEngineSettings {
        &self.settings
    }

    /// Validate a trade without changing any state.
    ///
    /// State that cannot be read yields a `STALE_OR_MISSING_STATE` rejection.
    ///
    /// # Errors
    ///
    /// Returns an error only for an invalid command.
    pub async fn check_trade_impact(&self, command: &TradeCommand) -> Result<Decision, CommandError> {
        let started = Instant::now();
        let index = self.validate_command(command)?;

        let decision = match self.load_snapshot().await {
            Ok(snapshot) => self.evaluate_or_stale(command, index, &snapshot).decision,
            Err(e) => {
                tracing::warn!(ticker = %command.ticker, error = %e, "Trade check on unavailable state");
                Decision::stale(command, self.settings.var_limit)
            }
        };

        metrics::record_decision(DecisionPath::Check, &decision);
        metrics::record_check_duration(DecisionPath::Check, started.elapsed());
        tracing::debug!(
            ticker = %command.ticker,
            side = %command.side,
            quantity = command.quantity,
            approved = decision.is_approved(),
            projected_var = ?decision.projected_var,
            "Trade checked"
        );
        Ok(decision)
    }

    /// Re-validate and commit a trade.
    ///
    /// Executions on one engine are serialized. A commit timeout is
    /// ambiguous: callers must re-check state before retrying.
    ///
    /// # Errors
    ///
    /// Returns `Rejected` when re-validation fails, `ConcurrentConflict` when
    /// another writer committed first, and `StateUnavailable` when the store
    /// cannot be read or written.
    pub async fn execute_trade(
        &self,
        command: &TradeCommand,
    ) -> Result<ExecutionReceipt, ExecutionError> {
        let index = self.validate_command(command)?;
        let _gate = self.execution_gate.lock().await;

        let started = Instant::now();
        let snapshot = self.load_snapshot().await.inspect_err(|e| {
            tracing::warn!(ticker = %command.ticker, error = %e, "Execution on unavailable state");
        })?;
        let evaluation = self.evaluate(command, index, &snapshot)?;
        metrics::record_decision(DecisionPath::Execute, &evaluation.decision);
        metrics::record_check_duration(DecisionPath::Execute, started.elapsed());

        let Some(next) = evaluation.next else {
            tracing::info!(
                ticker = %command.ticker,
                side = %command.side,
                reason = ?evaluation.decision.reason,
                "Execution rejected on re-validation"
            );
            return Err(ExecutionError::Rejected(Box::new(evaluation.decision)));
        };

        let expected = snapshot.portfolio.version;
        let cash_after = next.cash();
        let holding_after = next.holding(index).copied().unwrap_or_default();
        let committed = bounded(
            self.settings.store_timeout,
            StateKey::Holdings,
            "compare_and_swap_portfolio",
            self.store.compare_and_swap_portfolio(expected, next),
        )
        .await;

        match committed {
            Ok(portfolio_version) => {
                metrics::record_trade_executed(command.side);
                tracing::info!(
                    ticker = %command.ticker,
                    side = %command.side,
                    quantity = command.quantity,
                    cash = %cash_after,
                    portfolio_version,
                    "Trade executed"
                );
                Ok(ExecutionReceipt {
                    decision: evaluation.decision,
                    portfolio_version,
                    cash_after,
                    holding_after,
                })
            }
            Err(StoreError::VersionConflict { expected, found }) => {
                metrics::record_execution_conflict();
                tracing::warn!(expected, found, ticker = %command.ticker, "Execution lost portfolio race");
                Err(ExecutionError::ConcurrentConflict { expected, found })
            }
            Err(e) => {
                tracing::error!(ticker = %command.ticker, error = %e, "Portfolio commit failed");
                Err(SnapshotError::from(e).into())
            }
        }
    }

    /// Risk report for the current book.
    ///
    /// # Errors
    ///
    /// Returns `StateUnavailable` if a snapshot cannot be read.
    pub async fn portfolio_report(&self) -> Result<RiskReport, ExecutionError> {
        let snapshot = self.load_snapshot().await?;
        let report = build_report(
            &self.universe,
            &snapshot.market.value,
            &snapshot.prices,
            &snapshot.portfolio.value,
            self.settings.var_limit,
            self.settings.periods_per_day,
        )
        .map_err(SnapshotError::from)?;
        Ok(report)
    }

    /// VaR of the current book under the stressed matrix.
    ///
    /// # Errors
    ///
    /// Returns `StateUnavailable` if a snapshot or the stressed matrix
    /// cannot be read.
    pub async fn stress_test(&self) -> Result<StressResult, ExecutionError> {
        let (snapshot, stressed) = tokio::join!(
            self.load_snapshot(),
            bounded(
                self.settings.store_timeout,
                StateKey::StressedCovariance,
                "load_stressed_covariance",
                self.store.load_stressed_covariance(),
            )
        );
        let snapshot = snapshot?;
        let stressed = stressed.map_err(SnapshotError::from)?;
        self.check_dimension(stressed.dimension())?;

        let exposures = snapshot.portfolio.value.exposures(&snapshot.prices);
        let equity: f64 = exposures.iter().sum();
        let weights = weights_from_exposures(&exposures, equity);
        let result = stress_var(&weights, &stressed, equity, self.settings.var_limit)
            .map_err(SnapshotError::from)?;
        if result.breach {
            tracing::warn!(stressed_var = result.stressed_var, limit = result.limit, "Stress VaR breaches limit");
        }
        Ok(result)
    }

    fn validate_command(&self, command: &TradeCommand) -> Result<usize, CommandError> {
        if command.quantity == 0 {
            return Err(CommandError::ZeroQuantity);
        }
        self.universe
            .index_of(&command.ticker)
            .ok_or_else(|| CommandError::UnknownAsset(command.ticker.clone()))
    }

    async fn load_snapshot(&self) -> Result<Snapshot, SnapshotError> {
        let timeout = self.settings.store_timeout;
        let (market, portfolio) = tokio::join!(
            bounded(timeout, StateKey::CurrentCovariance, "load_market", self.store.load_market()),
            bounded(timeout, StateKey::Holdings, "load_portfolio", self.store.load_portfolio()),
        );
        let market = market?;
        let portfolio = portfolio?;

        self.check_dimension(market.value.dimension())?;
        self.check_dimension(portfolio.value.dimension())?;

        if let Some(max_age) = self.settings.max_market_age {
            let age = Utc::now() - market.value.as_of;
            if age.to_std().is_ok_and(|age| age > max_age) {
                return Err(SnapshotError::Stale {
                    age_ms: age.num_milliseconds(),
                    max_ms: max_age.as_millis(),
                });
            }
        }

        let prices = market.value.prices.dense_latest().map_err(|i| {
            SnapshotError::MissingPrice(self.universe.get(i).cloned().unwrap_or_else(|| AssetId::new("?")))
        })?;

        Ok(Snapshot {
            market,
            prices,
            portfolio,
        })
    }

    fn check_dimension(&self, actual: usize) -> Result<(), SnapshotError> {
        let expected = self.universe.len();
        if actual == expected {
            Ok(())
        } else {
            Err(SnapshotError::ShapeMismatch { expected, actual })
        }
    }

    fn evaluate_or_stale(&self, command: &TradeCommand, index: usize, snapshot: &Snapshot) -> Evaluation {
        self.evaluate(command, index, snapshot).unwrap_or_else(|e| {
            tracing::warn!(ticker = %command.ticker, error = %e, "Trade evaluation failed");
            Evaluation {
                decision: Decision::stale(command, self.settings.var_limit),
                next: None,
            }
        })
    }

    /// Funds, then inventory, then the VaR limit.
    fn evaluate(
        &self,
        command: &TradeCommand,
        index: usize,
        snapshot: &Snapshot,
    ) -> Result<Evaluation, SnapshotError> {
        let limit = self.settings.var_limit;
        let price = snapshot.prices[index];
        let price_money = price_to_decimal(price)
            .ok_or(RiskMathError::NonFiniteInput("price"))?;
        let portfolio = &snapshot.portfolio.value;

        let mut decision = Decision::pending(command, limit);
        decision.price = Some(price);
        decision.notional = notional(command.quantity, price_money).ok();
        decision.market_version = Some(snapshot.market.version);
        decision.portfolio_version = Some(snapshot.portfolio.version);
        decision.liquidity_cost = Some(self.settings.liquidity.cost(command.quantity, price));

        let filled = match command.side {
            TradeSide::Buy => portfolio.apply_buy(index, command.quantity, price_money),
            TradeSide::Sell => portfolio.apply_sell(index, command.quantity, price_money),
        };
        let next = match filled {
            Ok(next) => next,
            Err(PortfolioError::InsufficientFunds { .. } | PortfolioError::Overflow) => {
                return Ok(rejected(decision, RejectionReason::InsufficientFunds));
            }
            Err(PortfolioError::InsufficientInventory { .. }) => {
                return Ok(rejected(decision, RejectionReason::InsufficientInventory));
            }
            Err(e) => {
                tracing::warn!(error = %e, "Portfolio does not match universe");
                return Err(SnapshotError::ShapeMismatch {
                    expected: self.universe.len(),
                    actual: portfolio.dimension(),
                });
            }
        };

        let exposures = portfolio.exposures(&snapshot.prices);
        let trade_value = command.side.sign() * quantity_as_f64(command.quantity) * price;
        let current_equity: f64 = exposures.iter().sum();
        let post_equity = current_equity + trade_value;
        let scale = if post_equity > 0.0 { post_equity } else { current_equity };

        let weights = weights_from_exposures(&exposures, scale);
        let delta = if scale > 0.0 { trade_value / scale } else { 0.0 };
        let probe = IncrementalVarProbe::new(weights, &snapshot.market.value.covariance, scale)?;
        let post = probe.single_asset(index, delta)?;

        decision.current_var = Some(post.current_var);
        decision.projected_var = Some(post.projected_var);
        decision.incremental_var = Some(post.incremental_var);

        if post.projected_var > limit {
            return Ok(rejected(decision, RejectionReason::RiskLimitBreached));
        }
        Ok(Evaluation {
            decision: decision.approve(),
            next: Some(next),
        })
    }
}

fn rejected(decision: Decision, reason: RejectionReason) -> Evaluation {
    Evaluation {
        decision: decision.reject(reason),
        next: None,
    }
}
