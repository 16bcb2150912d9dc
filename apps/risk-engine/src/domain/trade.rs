//! Trade Commands and Decisions
//!
//! The inbound trade tuple and the decision returned by validation.

use std::fmt;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::universe::AssetId;

/// Trade side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TradeSide {
    /// Buy.
    #[serde(alias = "buy")]
    Buy,
    /// Sell.
    #[serde(alias = "sell")]
    Sell,
}

impl TradeSide {
    /// Sign applied to the traded quantity: Buy = +1, Sell = -1.
    #[must_use]
    pub const fn sign(&self) -> f64 {
        match self {
            Self::Buy => 1.0,
            Self::Sell => -1.0,
        }
    }

    /// Wire name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Buy => "BUY",
            Self::Sell => "SELL",
        }
    }
}

impl fmt::Display for TradeSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TradeSide {
    type Err = CommandError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "BUY" => Ok(Self::Buy),
            "SELL" => Ok(Self::Sell),
            other => Err(CommandError::UnknownSide(other.to_string())),
        }
    }
}

/// Errors in a trade command itself, before any state is read.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    /// Ticker is not part of the engine's universe.
    #[error("unknown asset: {0}")]
    UnknownAsset(AssetId),
    /// Quantity must be a positive integer.
    #[error("trade quantity must be positive")]
    ZeroQuantity,
    /// Side is neither BUY nor SELL.
    #[error("unknown trade side: {0}")]
    UnknownSide(String),
}

/// A proposed trade.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeCommand {
    /// Asset to trade.
    pub ticker: AssetId,
    /// Units to trade.
    #[serde(alias = "qty")]
    pub quantity: u64,
    /// Buy or sell.
    pub side: TradeSide,
}

impl TradeCommand {
    /// Create a command.
    #[must_use]
    pub fn new(ticker: impl Into<AssetId>, quantity: u64, side: TradeSide) -> Self {
        Self {
            ticker: ticker.into(),
            quantity,
            side,
        }
    }

    /// Shorthand for a buy.
    #[must_use]
    pub fn buy(ticker: impl Into<AssetId>, quantity: u64) -> Self {
        Self::new(ticker, quantity, TradeSide::Buy)
    }

    /// Shorthand for a sell.
    #[must_use]
    pub fn sell(ticker: impl Into<AssetId>, quantity: u64) -> Self {
        Self::new(ticker, quantity, TradeSide::Sell)
    }
}

// =============================================================================
// Decision
// =============================================================================

/// Outcome of a validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DecisionStatus {
    /// Trade passes every check.
    Approved,
    /// Trade fails a check; see the reason.
    Rejected,
}

/// Why a trade was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RejectionReason {
    /// Buy notional exceeds cash.
    InsufficientFunds,
    /// Sell quantity exceeds the holding.
    InsufficientInventory,
    /// Projected VaR exceeds the limit.
    RiskLimitBreached,
    /// Market or portfolio state could not be read consistently.
    StaleOrMissingState,
}

impl RejectionReason {
    /// Wire name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::InsufficientFunds => "INSUFFICIENT_FUNDS",
            Self::InsufficientInventory => "INSUFFICIENT_INVENTORY",
            Self::RiskLimitBreached => "RISK_LIMIT_BREACHED",
            Self::StaleOrMissingState => "STALE_OR_MISSING_STATE",
        }
    }
}

impl fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of validating a trade against a snapshot.
///
/// Risk figures are `None` when validation stopped before computing them
/// (stale state, or a funds/inventory rejection).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    /// Approved or rejected.
    pub status: DecisionStatus,
    /// Set when rejected.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<RejectionReason>,
    /// Traded asset.
    pub ticker: AssetId,
    /// Trade side.
    pub side: TradeSide,
    /// Trade quantity.
    pub quantity: u64,
    /// Price the trade was valued at.
    pub price: Option<f64>,
    /// Quantity × price.
    pub notional: Option<Decimal>,
    /// VaR before the trade.
    pub current_var: Option<f64>,
    /// VaR after the trade.
    pub projected_var: Option<f64>,
    /// Projected minus current VaR.
    pub incremental_var: Option<f64>,
    /// Estimated cost to liquidate the traded quantity.
    pub liquidity_cost: Option<f64>,
    /// Dollar VaR limit in force.
    pub limit: f64,
    /// Market state version the decision was computed from.
    pub market_version: Option<u64>,
    /// Portfolio version the decision was computed from.
    pub portfolio_version: Option<u64>,
}

impl Decision {
    /// Decision with only the command populated.
    #[must_use]
    pub fn pending(command: &TradeCommand, limit: f64) -> Self {
        Self {
            status: DecisionStatus::Rejected,
            reason: None,
            ticker: command.ticker.clone(),
            side: command.side,
            quantity: command.quantity,
            price: None,
            notional: None,
            current_var: None,
            projected_var: None,
            incremental_var: None,
            liquidity_cost: None,
            limit,
            market_version: None,
            portfolio_version: None,
        }
    }

    /// Rejection for state that could not be read.
    #[must_use]
    pub fn stale(command: &TradeCommand, limit: f64) -> Self {
        Self::pending(command, limit).reject(RejectionReason::StaleOrMissingState)
    }

    /// Mark approved.
    #[must_use]
    pub fn approve(mut self) -> Self {
        self.status = DecisionStatus::Approved;
        self.reason = None;
        self
    }

    /// Mark rejected with a reason.
    #[must_use]
    pub fn reject(mut self, reason: RejectionReason) -> Self {
        self.status = DecisionStatus::Rejected;
        self.reason = Some(reason);
        self
    }

    /// Whether the trade was approved.
    #[must_use]
    pub const fn is_approved(&self) -> bool {
        matches!(self.status, DecisionStatus::Approved)
    }
}
