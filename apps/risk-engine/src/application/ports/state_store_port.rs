//! State Store Port (Driven Port)
//!
//! Versioned key-value state shared by the covariance updater and the risk
//! engine. The market matrix and its prices are one atomic unit; cash and
//! holdings are one compare-and-swap unit keyed on a portfolio version.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::{AssetUniverse, CovarianceMatrix, MarketState, Portfolio};

/// Named keys of the state store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateKey {
    /// Ordered asset identifiers.
    AssetUniverse,
    /// Live covariance matrix.
    CurrentCovariance,
    /// Static stressed covariance matrix.
    StressedCovariance,
    /// Latest and previous prices.
    LastPrices,
    /// Cash and per-asset holdings.
    Holdings,
}

impl StateKey {
    /// Key name as stored.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::AssetUniverse => "universe",
            Self::CurrentCovariance => "market.covariance.current",
            Self::StressedCovariance => "market.covariance.stressed",
            Self::LastPrices => "market.prices",
            Self::Holdings => "portfolio",
        }
    }
}

impl fmt::Display for StateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A value together with the version it was read at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Versioned<T> {
    /// Monotonic version; bumps on every write.
    pub version: u64,
    /// The value.
    pub value: T,
}

impl<T> Versioned<T> {
    /// Pair a value with its version.
    pub const fn new(version: u64, value: T) -> Self {
        Self { version, value }
    }
}

/// Errors returned by a state store.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// Key has never been written.
    #[error("state key {0} is missing")]
    Missing(StateKey),
    /// Stored value cannot be decoded or fails validation.
    #[error("state key {key} is corrupt: {reason}")]
    Corrupt {
        /// Offending key.
        key: StateKey,
        /// What is wrong.
        reason: String,
    },
    /// Backend unreachable.
    #[error("state store unavailable: {0}")]
    Unavailable(String),
    /// Call did not complete within the deadline.
    #[error("state store timed out reading {0}")]
    Timeout(StateKey),
    /// Compare-and-swap lost to another writer.
    #[error("version conflict: expected {expected}, found {found}")]
    VersionConflict {
        /// Version the writer read.
        expected: u64,
        /// Version currently stored.
        found: u64,
    },
}

impl StoreError {
    /// Whether this error means the caller lost a write race rather than
    /// the store being unhealthy.
    #[must_use]
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::VersionConflict { .. })
    }
}

/// Port for the shared risk state.
///
/// Implementations must make `publish_market` replace the matrix and prices
/// as one unit, and `compare_and_swap_portfolio` replace cash and holdings
/// as one unit only when the stored version equals `expected_version`.
#[async_trait]
pub trait StateStorePort: Send + Sync {
    /// Load the asset universe.
    async fn load_universe(&self) -> Result<AssetUniverse, StoreError>;

    /// Load the current matrix and prices as one consistent pair.
    async fn load_market(&self) -> Result<Versioned<Arc<MarketState>>, StoreError>;

    /// Replace the matrix and prices atomically. Returns the new version.
    async fn publish_market(&self, state: MarketState) -> Result<u64, StoreError>;

    /// Load the stressed covariance matrix.
    async fn load_stressed_covariance(&self) -> Result<Arc<CovarianceMatrix>, StoreError>;

    /// Load cash and holdings with their version.
    async fn load_portfolio(&self) -> Result<Versioned<Portfolio>, StoreError>;

    /// Replace cash and holdings if the stored version is
    /// `expected_version`. Returns the new version.
    async fn compare_and_swap_portfolio(
        &self,
        expected_version: u64,
        portfolio: Portfolio,
    ) -> Result<u64, StoreError>;
}
