//! Market State Types
//!
//! Covariance matrices, price snapshots and the paired market state the
//! updater publishes as one atomic unit.

use chrono::{DateTime, Utc};
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use super::universe::AssetId;

/// Relative tolerance for symmetry checks on externally supplied matrices.
const SYMMETRY_TOLERANCE: f64 = 1e-9;

// =============================================================================
// Errors
// =============================================================================

/// Errors raised when constructing market state from raw values.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MarketDataError {
    /// Matrix is not square.
    #[error("covariance matrix must be square, got {rows}x{cols}")]
    NotSquare {
        /// Row count.
        rows: usize,
        /// Column count.
        cols: usize,
    },
    /// Matrix or vector dimension does not match the universe.
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Expected dimension.
        expected: usize,
        /// Actual dimension.
        actual: usize,
    },
    /// A matrix entry is NaN or infinite.
    #[error("covariance entry ({row}, {col}) is not finite")]
    NonFinite {
        /// Row index.
        row: usize,
        /// Column index.
        col: usize,
    },
    /// Matrix is not symmetric.
    #[error("covariance matrix is not symmetric at ({row}, {col})")]
    NotSymmetric {
        /// Row index.
        row: usize,
        /// Column index.
        col: usize,
    },
    /// A variance on the diagonal is negative.
    #[error("variance at index {0} is negative")]
    NegativeVariance(usize),
    /// A price is non-finite or not strictly positive.
    #[error("price at index {index} is invalid: {price}")]
    InvalidPrice {
        /// Asset index.
        index: usize,
        /// Offending price.
        price: f64,
    },
}

// =============================================================================
// Covariance Matrix
// =============================================================================

/// Symmetric N×N covariance matrix of per-period log returns.
///
/// Construction checks shape, finiteness, symmetry and non-negative
/// variances. The EWMA recursion keeps the matrix positive semi-definite.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Vec<f64>>", into = "Vec<Vec<f64>>")]
pub struct CovarianceMatrix(DMatrix<f64>);

impl CovarianceMatrix {
    /// All-zero matrix of dimension `n`.
    #[must_use]
    pub fn zeros(n: usize) -> Self {
        Self(DMatrix::zeros(n, n))
    }

    /// Diagonal matrix from per-asset variances.
    ///
    /// # Errors
    ///
    /// Returns an error if any variance is negative or non-finite.
    pub fn from_variances(variances: &[f64]) -> Result<Self, MarketDataError> {
        let n = variances.len();
        Self::from_matrix(DMatrix::from_fn(n, n, |i, j| {
            if i == j { variances[i] } else { 0.0 }
        }))
    }

    /// Build from row-major nested vectors.
    ///
    /// # Errors
    ///
    /// Returns an error if the rows do not form a valid covariance matrix.
    pub fn from_rows(rows: &[Vec<f64>]) -> Result<Self, MarketDataError> {
        let n = rows.len();
        for row in rows {
            if row.len() != n {
                return Err(MarketDataError::NotSquare {
                    rows: n,
                    cols: row.len(),
                });
            }
        }
        Self::from_matrix(DMatrix::from_fn(n, n, |i, j| rows[i][j]))
    }

    /// Wrap an existing matrix after validation.
    ///
    /// Entries within tolerance of symmetric are averaged with their mirror
    /// so the stored matrix is exactly symmetric.
    ///
    /// # Errors
    ///
    /// Returns an error if the matrix is not square, not finite, not
    /// symmetric or has a negative variance.
    pub fn from_matrix(matrix: DMatrix<f64>) -> Result<Self, MarketDataError> {
        let (rows, cols) = matrix.shape();
        if rows != cols {
            return Err(MarketDataError::NotSquare { rows, cols });
        }

        for i in 0..rows {
            for j in 0..cols {
                if !matrix[(i, j)].is_finite() {
                    return Err(MarketDataError::NonFinite { row: i, col: j });
                }
            }
            if matrix[(i, i)] < 0.0 {
                return Err(MarketDataError::NegativeVariance(i));
            }
        }

        for i in 0..rows {
            for j in (i + 1)..cols {
                let a = matrix[(i, j)];
                let b = matrix[(j, i)];
                let scale = a.abs().max(b.abs()).max(1.0);
                if (a - b).abs() > SYMMETRY_TOLERANCE * scale {
                    return Err(MarketDataError::NotSymmetric { row: i, col: j });
                }
            }
        }

        let symmetric = (&matrix + matrix.transpose()) * 0.5;
        Ok(Self(symmetric))
    }

    /// Dimension N.
    #[must_use]
    pub fn dimension(&self) -> usize {
        self.0.nrows()
    }

    /// Borrow the underlying matrix.
    #[must_use]
    pub const fn as_matrix(&self) -> &DMatrix<f64> {
        &self.0
    }

    /// Per-asset volatilities (square roots of the diagonal).
    #[must_use]
    pub fn volatilities(&self) -> DVector<f64> {
        self.0.diagonal().map(|v| v.max(0.0).sqrt())
    }

    /// Row-major nested vectors.
    #[must_use]
    pub fn to_rows(&self) -> Vec<Vec<f64>> {
        self.0
            .row_iter()
            .map(|row| row.iter().copied().collect())
            .collect()
    }
}

impl TryFrom<Vec<Vec<f64>>> for CovarianceMatrix {
    type Error = MarketDataError;

    fn try_from(rows: Vec<Vec<f64>>) -> Result<Self, Self::Error> {
        Self::from_rows(&rows)
    }
}

impl From<CovarianceMatrix> for Vec<Vec<f64>> {
    fn from(matrix: CovarianceMatrix) -> Self {
        matrix.to_rows()
    }
}

// =============================================================================
// Prices
// =============================================================================

/// Latest and immediately preceding observed price per asset.
///
/// A snapshot is replaced as a whole each cycle. An asset without any
/// observation yet has no latest price.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceSnapshot {
    latest: Vec<Option<f64>>,
    previous: Vec<Option<f64>>,
}

impl PriceSnapshot {
    /// Snapshot with no observations for `n` assets.
    #[must_use]
    pub fn empty(n: usize) -> Self {
        Self {
            latest: vec![None; n],
            previous: vec![None; n],
        }
    }

    /// Snapshot whose latest prices are given and whose previous prices are
    /// unknown (a baseline).
    ///
    /// # Errors
    ///
    /// Returns an error if any present price is non-finite or not positive.
    pub fn baseline(latest: Vec<Option<f64>>) -> Result<Self, MarketDataError> {
        validate_prices(&latest)?;
        let n = latest.len();
        Ok(Self {
            latest,
            previous: vec![None; n],
        })
    }

    /// Number of assets covered.
    #[must_use]
    pub fn dimension(&self) -> usize {
        self.latest.len()
    }

    /// Latest price of asset `index`.
    #[must_use]
    pub fn latest(&self, index: usize) -> Option<f64> {
        self.latest.get(index).copied().flatten()
    }

    /// Preceding price of asset `index`.
    #[must_use]
    pub fn previous(&self, index: usize) -> Option<f64> {
        self.previous.get(index).copied().flatten()
    }

    /// Latest prices as a dense vector, or the index of the first asset
    /// without a price.
    ///
    /// # Errors
    ///
    /// Returns the index of the first missing price.
    pub fn dense_latest(&self) -> Result<DVector<f64>, usize> {
        let mut dense = DVector::zeros(self.latest.len());
        for (i, price) in self.latest.iter().enumerate() {
            dense[i] = price.ok_or(i)?;
        }
        Ok(dense)
    }

    /// Next snapshot after a cycle of observations.
    ///
    /// Assets without an observation carry their latest price forward. The
    /// current latest prices become the previous prices.
    #[must_use]
    pub fn advance(&self, observed: &[Option<f64>]) -> Self {
        let latest = self
            .latest
            .iter()
            .zip(observed)
            .map(|(current, seen)| seen.or(*current))
            .collect();
        Self {
            latest,
            previous: self.latest.clone(),
        }
    }
}

fn validate_prices(prices: &[Option<f64>]) -> Result<(), MarketDataError> {
    for (index, price) in prices.iter().enumerate() {
        if let Some(p) = *price
            && !(p.is_finite() && p > 0.0)
        {
            return Err(MarketDataError::InvalidPrice { index, price: p });
        }
    }
    Ok(())
}

// =============================================================================
// Market State
// =============================================================================

/// The covariance/price pair published by the updater.
///
/// Readers always observe both halves from the same cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketState {
    /// Current covariance estimate.
    pub covariance: CovarianceMatrix,
    /// Prices the estimate was computed from.
    pub prices: PriceSnapshot,
    /// When the cycle that produced this state completed.
    pub as_of: DateTime<Utc>,
}

impl MarketState {
    /// Pair a matrix with a price snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error if the two halves disagree on dimension.
    pub fn new(
        covariance: CovarianceMatrix,
        prices: PriceSnapshot,
        as_of: DateTime<Utc>,
    ) -> Result<Self, MarketDataError> {
        if covariance.dimension() != prices.dimension() {
            return Err(MarketDataError::DimensionMismatch {
                expected: covariance.dimension(),
                actual: prices.dimension(),
            });
        }
        Ok(Self {
            covariance,
            prices,
            as_of,
        })
    }

    /// Dimension shared by the matrix and prices.
    #[must_use]
    pub fn dimension(&self) -> usize {
        self.covariance.dimension()
    }
}

// =============================================================================
// Ticks
// =============================================================================

/// A single price observation from the feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tick {
    /// Observed asset.
    #[serde(alias = "ticker")]
    pub asset: AssetId,
    /// Observed price.
    pub price: f64,
    /// Observation time. Defaults to receipt time when omitted.
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl Tick {
    /// Create a tick.
    #[must_use]
    pub fn new(asset: impl Into<AssetId>, price: f64, timestamp: DateTime<Utc>) -> Self {
        Self {
            asset: asset.into(),
            price,
            timestamp,
        }
    }
}
