//! Risk Math Kernel
//!
//! Pure functions over weight vectors and covariance matrices. Degenerate
//! inputs (zero portfolio value, zero standard deviation, zero volume) yield
//! zero risk instead of an error. Only shape mismatches and non-finite
//! inputs are reported, since those are caller bugs.

use nalgebra::DVector;
use serde::{Deserialize, Serialize};

use super::market::CovarianceMatrix;

/// One-tailed 95% confidence z-score.
pub const CONFIDENCE_Z_SCORE: f64 = 1.65;

/// Default market-impact coefficient for liquidity VaR.
pub const DEFAULT_IMPACT_COEFFICIENT: f64 = 0.1;

/// Default bars per trading day (one-minute bars over a 6.5 hour session).
pub const DEFAULT_PERIODS_PER_DAY: u32 = 390;

/// Errors from the risk kernel.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RiskMathError {
    /// Vector length does not match the matrix dimension.
    #[error("dimension mismatch: matrix is {expected}x{expected}, vector has {actual} entries")]
    DimensionMismatch {
        /// Matrix dimension.
        expected: usize,
        /// Vector length.
        actual: usize,
    },
    /// An input contains NaN or infinity.
    #[error("non-finite input: {0}")]
    NonFiniteInput(&'static str),
}

/// Portfolio VaR and the standard deviation it was computed from.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PortfolioVar {
    /// Dollar VaR at the confidence z-score.
    pub var_dollar: f64,
    /// Per-period standard deviation of portfolio returns.
    pub std_dev: f64,
}

impl PortfolioVar {
    /// No risk.
    pub const ZERO: Self = Self {
        var_dollar: 0.0,
        std_dev: 0.0,
    };
}

/// Stressed-scenario VaR against the limit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StressResult {
    /// VaR under the stressed matrix.
    pub stressed_var: f64,
    /// Dollar VaR limit.
    pub limit: f64,
    /// Whether the stressed VaR exceeds the limit.
    pub breach: bool,
}

// =============================================================================
// Core VaR
// =============================================================================

/// Portfolio VaR: `std = sqrt(wᵀΣw)`, `var = Z * std * value`.
///
/// # Errors
///
/// Returns an error if the weights do not match the matrix or are not finite.
pub fn portfolio_var(
    weights: &DVector<f64>,
    cov: &CovarianceMatrix,
    value: f64,
) -> Result<PortfolioVar, RiskMathError> {
    check_inputs(weights, cov, value)?;
    let std_dev = variance(weights, &(cov.as_matrix() * weights)).sqrt();
    Ok(PortfolioVar {
        var_dollar: dollar_var(std_dev, value),
        std_dev,
    })
}

/// Marginal VaR per asset: `Z * (Σw) / std`, zero when `std == 0`.
///
/// # Errors
///
/// Returns an error if the weights do not match the matrix or are not finite.
pub fn marginal_var(
    weights: &DVector<f64>,
    cov: &CovarianceMatrix,
) -> Result<DVector<f64>, RiskMathError> {
    check_inputs(weights, cov, 0.0)?;
    let sigma_w = cov.as_matrix() * weights;
    let std_dev = variance(weights, &sigma_w).sqrt();
    if std_dev == 0.0 {
        return Ok(DVector::zeros(weights.len()));
    }
    Ok(sigma_w * (CONFIDENCE_Z_SCORE / std_dev))
}

/// Component VaR per asset: `marginal_i * w_i * value`.
///
/// Components sum to the portfolio VaR.
///
/// # Errors
///
/// Returns an error if the two vectors differ in length.
pub fn component_var(
    marginal: &DVector<f64>,
    weights: &DVector<f64>,
    value: f64,
) -> Result<DVector<f64>, RiskMathError> {
    if marginal.len() != weights.len() {
        return Err(RiskMathError::DimensionMismatch {
            expected: marginal.len(),
            actual: weights.len(),
        });
    }
    if !positive_value(value) {
        return Ok(DVector::zeros(weights.len()));
    }
    Ok(marginal.component_mul(weights) * value)
}

/// Change in VaR from moving `current` by `delta` at the same portfolio value.
///
/// # Errors
///
/// Returns an error if either vector does not match the matrix.
pub fn incremental_var(
    current: &DVector<f64>,
    delta: &DVector<f64>,
    cov: &CovarianceMatrix,
    value: f64,
) -> Result<f64, RiskMathError> {
    if delta.len() != current.len() {
        return Err(RiskMathError::DimensionMismatch {
            expected: current.len(),
            actual: delta.len(),
        });
    }
    let before = portfolio_var(current, cov, value)?;
    let after = portfolio_var(&(current + delta), cov, value)?;
    Ok(after.var_dollar - before.var_dollar)
}

/// Cost of liquidating `quantity` units: half the spread plus a
/// square-root market-impact term.
///
/// A non-positive average volume drops the impact term.
#[must_use]
pub fn liquidity_var(
    quantity: f64,
    price: f64,
    bid: f64,
    ask: f64,
    avg_volume: f64,
    impact_coefficient: f64,
) -> f64 {
    let spread_cost = quantity * (ask - bid) / 2.0;
    if avg_volume <= 0.0 || !avg_volume.is_finite() {
        return spread_cost;
    }
    let impact = quantity * price * impact_coefficient * (quantity / avg_volume).sqrt();
    spread_cost + impact
}

/// Standalone VaR of each position: `Z * sqrt(Σ_ii) * position_value_i`.
///
/// # Errors
///
/// Returns an error if the positions do not match the matrix.
pub fn isolated_var(
    cov: &CovarianceMatrix,
    position_values: &DVector<f64>,
) -> Result<DVector<f64>, RiskMathError> {
    check_inputs(position_values, cov, 0.0)?;
    Ok(cov
        .volatilities()
        .zip_map(position_values, |vol, value| {
            CONFIDENCE_Z_SCORE * vol * value.abs()
        }))
}

/// VaR of the portfolio under a stressed matrix, compared to `limit`.
///
/// # Errors
///
/// Returns an error if the weights do not match the matrix.
pub fn stress_var(
    weights: &DVector<f64>,
    stressed: &CovarianceMatrix,
    value: f64,
    limit: f64,
) -> Result<StressResult, RiskMathError> {
    let stressed_var = portfolio_var(weights, stressed, value)?.var_dollar;
    Ok(StressResult {
        stressed_var,
        limit,
        breach: stressed_var > limit,
    })
}

/// Scale a per-period volatility to daily: `vol * sqrt(periods_per_day)`.
#[must_use]
pub fn scale_volatility(period_vol: f64, periods_per_day: u32) -> f64 {
    period_vol * f64::from(periods_per_day).sqrt()
}

/// Weights from dollar exposures and a portfolio value; zero weights when
/// the value is not positive.
#[must_use]
pub fn weights_from_exposures(exposures: &DVector<f64>, value: f64) -> DVector<f64> {
    if positive_value(value) {
        exposures / value
    } else {
        DVector::zeros(exposures.len())
    }
}

// =============================================================================
// Incremental VaR Probe
// =============================================================================

/// VaR before and after a hypothetical trade.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PostTradeVar {
    /// VaR of the current weights.
    pub current_var: f64,
    /// VaR of the post-trade weights.
    pub projected_var: f64,
    /// `projected_var - current_var`.
    pub incremental_var: f64,
}

/// Precomputed `Σw` and `wᵀΣw` for repeated incremental VaR queries.
///
/// A trade in a single asset `k` by `δ` changes the variance to
/// `wᵀΣw + 2δ(Σw)_k + δ²Σ_kk`, so each probe is O(1) after the O(N²) setup.
#[derive(Debug, Clone)]
pub struct IncrementalVarProbe<'a> {
    cov: &'a CovarianceMatrix,
    weights: DVector<f64>,
    sigma_w: DVector<f64>,
    base: PortfolioVar,
    value: f64,
}

impl<'a> IncrementalVarProbe<'a> {
    /// Prepare a probe for `weights` at `value`.
    ///
    /// # Errors
    ///
    /// Returns an error if the weights do not match the matrix.
    pub fn new(
        weights: DVector<f64>,
        cov: &'a CovarianceMatrix,
        value: f64,
    ) -> Result<Self, RiskMathError> {
        check_inputs(&weights, cov, value)?;
        let sigma_w = cov.as_matrix() * &weights;
        let std_dev = variance(&weights, &sigma_w).sqrt();
        Ok(Self {
            cov,
            weights,
            sigma_w,
            base: PortfolioVar {
                var_dollar: dollar_var(std_dev, value),
                std_dev,
            },
            value,
        })
    }

    /// VaR of the unchanged portfolio.
    #[must_use]
    pub const fn current(&self) -> PortfolioVar {
        self.base
    }

    /// Effect of changing the weight of asset `index` by `delta`.
    ///
    /// # Errors
    ///
    /// Returns an error if `index` is outside the matrix or `delta` is not
    /// finite.
    pub fn single_asset(&self, index: usize, delta: f64) -> Result<PostTradeVar, RiskMathError> {
        let n = self.weights.len();
        if index >= n {
            return Err(RiskMathError::DimensionMismatch {
                expected: n,
                actual: index + 1,
            });
        }
        if !delta.is_finite() {
            return Err(RiskMathError::NonFiniteInput("trade delta"));
        }
        let base_variance = self.base.std_dev * self.base.std_dev;
        let projected_variance = 2.0f64.mul_add(
            delta * self.sigma_w[index],
            delta * delta * self.cov.as_matrix()[(index, index)],
        ) + base_variance;
        Ok(self.post_trade(projected_variance.max(0.0).sqrt()))
    }

    /// Effect of an arbitrary weight change.
    ///
    /// # Errors
    ///
    /// Returns an error if `delta` does not match the matrix.
    pub fn vector(&self, delta: &DVector<f64>) -> Result<PostTradeVar, RiskMathError> {
        let projected = portfolio_var(&(&self.weights + delta), self.cov, self.value)?;
        Ok(self.post_trade(projected.std_dev))
    }

    fn post_trade(&self, projected_std: f64) -> PostTradeVar {
        let projected_var = dollar_var(projected_std, self.value);
        PostTradeVar {
            current_var: self.base.var_dollar,
            projected_var,
            incremental_var: projected_var - self.base.var_dollar,
        }
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn check_inputs(
    weights: &DVector<f64>,
    cov: &CovarianceMatrix,
    value: f64,
) -> Result<(), RiskMathError> {
    if weights.len() != cov.dimension() {
        return Err(RiskMathError::DimensionMismatch {
            expected: cov.dimension(),
            actual: weights.len(),
        });
    }
    if weights.iter().any(|w| !w.is_finite()) {
        return Err(RiskMathError::NonFiniteInput("weights"));
    }
    if !value.is_finite() {
        return Err(RiskMathError::NonFiniteInput("portfolio value"));
    }
    Ok(())
}

/// `wᵀΣw` clamped at zero against rounding.
fn variance(weights: &DVector<f64>, sigma_w: &DVector<f64>) -> f64 {
    weights.dot(sigma_w).max(0.0)
}

fn dollar_var(std_dev: f64, value: f64) -> f64 {
    if positive_value(value) {
        CONFIDENCE_Z_SCORE * std_dev * value
    } else {
        0.0
    }
}

fn positive_value(value: f64) -> bool {
    value.is_finite() && value > 0.0
}
