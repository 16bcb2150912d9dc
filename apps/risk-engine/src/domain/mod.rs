//! Domain Layer - Core risk types and math.
//!
//! Pure types and functions with no I/O: the asset universe, market state,
//! portfolio, trade decisions, the EWMA recursion and the VaR kernel.

/// EWMA covariance recursion and the per-cycle state machine.
pub mod covariance;

/// Covariance matrices, price snapshots and ticks.
pub mod market;

/// Cash and holdings.
pub mod portfolio;

/// Dashboard risk report.
pub mod report;

/// VaR, marginal/component/incremental VaR and liquidity cost.
pub mod risk_math;

/// Trade commands and decisions.
pub mod trade;

/// Asset identifiers and the ordered universe.
pub mod universe;

pub use covariance::{CovarianceUpdater, CycleOutcome, TickBuffer, TickRejection};
pub use market::{CovarianceMatrix, MarketDataError, MarketState, PriceSnapshot, Tick};
pub use portfolio::{Holding, Portfolio, PortfolioError};
pub use report::{AssetRisk, RiskReport};
pub use risk_math::{PortfolioVar, PostTradeVar, StressResult};
pub use trade::{CommandError, Decision, DecisionStatus, RejectionReason, TradeCommand, TradeSide};
pub use universe::{AssetId, AssetUniverse, UniverseError};
