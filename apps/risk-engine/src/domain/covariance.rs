//! EWMA Covariance Estimation
//!
//! The recursive update `Σ_new = λ·Σ_old + (1-λ)·r rᵀ` and the cycle state
//! machine that turns a batch of ticks into the next market state.
//!
//! Ticks are folded into a `TickBuffer` as they arrive, one slot per asset.
//! The state machine is split into a pure `plan_cycle` and a `commit`, so the
//! caller can publish the planned state first and only advance on success.

use chrono::{DateTime, Utc};
use nalgebra::DVector;

use super::market::{CovarianceMatrix, MarketDataError, MarketState, PriceSnapshot, Tick};
use super::universe::{AssetId, AssetUniverse};

/// RiskMetrics decay factor.
pub const DEFAULT_EWMA_DECAY: f64 = 0.94;

/// Errors from the EWMA recursion.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CovarianceError {
    /// Decay outside (0, 1].
    #[error("EWMA decay must be in (0, 1], got {0}")]
    InvalidDecay(f64),
    /// Return vector length differs from the matrix.
    #[error("return vector has {actual} entries, matrix is {expected}x{expected}")]
    DimensionMismatch {
        /// Matrix dimension.
        expected: usize,
        /// Return vector length.
        actual: usize,
    },
    /// Resulting matrix failed validation.
    #[error(transparent)]
    Market(#[from] MarketDataError),
}

/// Validate an EWMA decay factor.
///
/// # Errors
///
/// Returns an error unless `0 < decay <= 1`.
pub fn validate_decay(decay: f64) -> Result<f64, CovarianceError> {
    if decay.is_finite() && decay > 0.0 && decay <= 1.0 {
        Ok(decay)
    } else {
        Err(CovarianceError::InvalidDecay(decay))
    }
}

/// One EWMA step: `decay * old + (1 - decay) * r rᵀ`.
///
/// # Errors
///
/// Returns an error on an invalid decay, mismatched dimensions, or a result
/// that is no longer a valid covariance matrix (non-finite returns).
pub fn update_covariance_ewma(
    old: &CovarianceMatrix,
    returns: &DVector<f64>,
    decay: f64,
) -> Result<CovarianceMatrix, CovarianceError> {
    let decay = validate_decay(decay)?;
    if returns.len() != old.dimension() {
        return Err(CovarianceError::DimensionMismatch {
            expected: old.dimension(),
            actual: returns.len(),
        });
    }
    let shock = returns * returns.transpose();
    let next = old.as_matrix() * decay + shock * (1.0 - decay);
    Ok(CovarianceMatrix::from_matrix(next)?)
}

/// Log returns `ln(latest / previous)` for a snapshot whose assets all have
/// both prices.
#[must_use]
pub fn log_returns(prices: &PriceSnapshot) -> Option<DVector<f64>> {
    let n = prices.dimension();
    let mut returns = DVector::zeros(n);
    for i in 0..n {
        let latest = prices.latest(i)?;
        let previous = prices.previous(i)?;
        returns[i] = (latest / previous).ln();
    }
    Some(returns)
}

// =============================================================================
// Cycle State Machine
// =============================================================================

/// Why a cycle's ticks were refused.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TickRejection {
    /// Tick names an asset outside the universe.
    #[error("tick for unknown asset {0}")]
    UnknownAsset(AssetId),
    /// Tick price is non-finite or not positive.
    #[error("tick for {asset} has invalid price {price}")]
    InvalidPrice {
        /// Asset.
        asset: AssetId,
        /// Offending price.
        price: f64,
    },
    /// The EWMA step itself failed.
    #[error("covariance update failed: {0}")]
    Update(#[from] CovarianceError),
}

/// Result of planning one cycle.
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    /// Matrix advanced with this cycle's returns.
    Updated(MarketState),
    /// Prices recorded; at least one asset had no previous price, so the
    /// matrix is unchanged.
    Baseline(MarketState),
    /// No ticks arrived, but a state was published before; the same pair is
    /// republished with a fresh `as_of`.
    Refreshed(MarketState),
    /// No ticks arrived and nothing was ever published.
    Idle,
    /// Malformed input; state left untouched.
    Skipped(TickRejection),
}

impl CycleOutcome {
    /// Label used in logs and metrics.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Updated(_) => "updated",
            Self::Baseline(_) => "baseline",
            Self::Refreshed(_) => "refreshed",
            Self::Idle => "idle",
            Self::Skipped(_) => "skipped",
        }
    }

    /// State to publish, if any.
    #[must_use]
    pub const fn state(&self) -> Option<&MarketState> {
        match self {
            Self::Updated(state) | Self::Baseline(state) | Self::Refreshed(state) => Some(state),
            Self::Idle | Self::Skipped(_) => None,
        }
    }
}

/// Owns the current matrix and last prices between cycles.
#[derive(Debug, Clone)]
pub struct CovarianceUpdater {
    universe: AssetUniverse,
    decay: f64,
    covariance: CovarianceMatrix,
    prices: PriceSnapshot,
    published: bool,
}

impl CovarianceUpdater {
    /// Start from `initial` when given, otherwise from a zero matrix with no
    /// price history.
    ///
    /// # Errors
    ///
    /// Returns an error on an invalid decay or if `initial` does not match
    /// the universe.
    pub fn new(
        universe: AssetUniverse,
        decay: f64,
        initial: Option<MarketState>,
    ) -> Result<Self, CovarianceError> {
        let decay = validate_decay(decay)?;
        let n = universe.len();
        let published = initial.is_some();
        let (covariance, prices) = match initial {
            Some(state) => {
                if state.dimension() != n {
                    return Err(MarketDataError::DimensionMismatch {
                        expected: n,
                        actual: state.dimension(),
                    }
                    .into());
                }
                (state.covariance, state.prices)
            }
            None => (CovarianceMatrix::zeros(n), PriceSnapshot::empty(n)),
        };
        Ok(Self {
            universe,
            decay,
            covariance,
            prices,
            published,
        })
    }

    /// Current matrix.
    #[must_use]
    pub const fn covariance(&self) -> &CovarianceMatrix {
        &self.covariance
    }

    /// Last recorded prices.
    #[must_use]
    pub const fn prices(&self) -> &PriceSnapshot {
        &self.prices
    }

    /// Decay factor λ.
    #[must_use]
    pub const fn decay(&self) -> f64 {
        self.decay
    }

    /// Empty buffer sized for this updater's universe.
    #[must_use]
    pub fn buffer(&self) -> TickBuffer {
        TickBuffer::new(self.universe.clone())
    }

    /// Compute the next state from a cycle's buffered ticks without changing
    /// `self`.
    #[must_use]
    pub fn plan_cycle(&self, ticks: &TickBuffer, as_of: DateTime<Utc>) -> CycleOutcome {
        if let Some(rejection) = ticks.rejection() {
            return CycleOutcome::Skipped(rejection.clone());
        }
        if ticks.is_empty() {
            if !self.published {
                return CycleOutcome::Idle;
            }
            return CycleOutcome::Refreshed(MarketState {
                covariance: self.covariance.clone(),
                prices: self.prices.clone(),
                as_of,
            });
        }

        let observed = ticks.observed();
        let prices = self.prices.advance(&observed);
        let Some(returns) = log_returns(&prices) else {
            return CycleOutcome::Baseline(MarketState {
                covariance: self.covariance.clone(),
                prices,
                as_of,
            });
        };

        match update_covariance_ewma(&self.covariance, &returns, self.decay) {
            Ok(covariance) => CycleOutcome::Updated(MarketState {
                covariance,
                prices,
                as_of,
            }),
            Err(e) => CycleOutcome::Skipped(e.into()),
        }
    }

    /// Adopt a state that has been published.
    pub fn commit(&mut self, state: &MarketState) {
        self.covariance = state.covariance.clone();
        self.prices = state.prices.clone();
        self.published = true;
    }
}

/// One slot per universe asset holding the freshest price seen this cycle.
///
/// Per asset the tick with the latest timestamp wins; on equal timestamps
/// the one pushed last wins. The first malformed tick is kept and every
/// later tick in the cycle is ignored.
#[derive(Debug, Clone)]
pub struct TickBuffer {
    universe: AssetUniverse,
    slots: Vec<Option<(DateTime<Utc>, f64)>>,
    rejection: Option<TickRejection>,
}

impl TickBuffer {
    /// Empty buffer with one slot per asset.
    #[must_use]
    pub fn new(universe: AssetUniverse) -> Self {
        let slots = vec![None; universe.len()];
        Self {
            universe,
            slots,
            rejection: None,
        }
    }

    /// Fold a tick into its asset's slot.
    pub fn push(&mut self, tick: &Tick) {
        if self.rejection.is_some() {
            return;
        }
        match self.slot_of(tick) {
            Ok(index) => {
                let slot = &mut self.slots[index];
                if !matches!(slot, Some((seen, _)) if *seen > tick.timestamp) {
                    *slot = Some((tick.timestamp, tick.price));
                }
            }
            Err(rejection) => self.rejection = Some(rejection),
        }
    }

    fn slot_of(&self, tick: &Tick) -> Result<usize, TickRejection> {
        let index = self
            .universe
            .index_of(&tick.asset)
            .ok_or_else(|| TickRejection::UnknownAsset(tick.asset.clone()))?;
        if !(tick.price.is_finite() && tick.price > 0.0) {
            return Err(TickRejection::InvalidPrice {
                asset: tick.asset.clone(),
                price: tick.price,
            });
        }
        Ok(index)
    }

    /// Number of slots, always the universe size.
    #[must_use]
    pub fn slots(&self) -> usize {
        self.slots.len()
    }

    /// Slots holding a price.
    #[must_use]
    pub fn filled(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    /// No tick has been pushed since the last clear.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rejection.is_none() && self.slots.iter().all(Option::is_none)
    }

    /// First malformed tick of the cycle.
    #[must_use]
    pub const fn rejection(&self) -> Option<&TickRejection> {
        self.rejection.as_ref()
    }

    /// Observed price per asset, in universe order.
    #[must_use]
    pub fn observed(&self) -> Vec<Option<f64>> {
        self.slots
            .iter()
            .map(|slot| slot.map(|(_, price)| price))
            .collect()
    }

    /// Empty every slot for the next cycle.
    pub fn clear(&mut self) {
        self.slots.fill(None);
        self.rejection = None;
    }
}
