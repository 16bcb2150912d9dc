//! In-memory state store.
//!
//! Holds the market pair behind one `Arc` swap and the portfolio behind one
//! versioned slot, so both atomicity requirements of `StateStorePort` hold
//! within a process.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};

use super::seed::{SeedError, StateSeed};
use crate::application::ports::{StateKey, StateStorePort, StoreError, Versioned};
use crate::domain::{AssetUniverse, CovarianceMatrix, MarketState, Portfolio};

#[derive(Debug, Default)]
struct MarketSlot {
    version: u64,
    state: Option<Arc<MarketState>>,
}

/// In-memory implementation of `StateStorePort`.
#[derive(Debug)]
pub struct InMemoryStateStore {
    universe: AssetUniverse,
    market: RwLock<MarketSlot>,
    stressed: RwLock<Option<Arc<CovarianceMatrix>>>,
    portfolio: Mutex<Versioned<Portfolio>>,
}

impl InMemoryStateStore {
    /// Store with a universe and portfolio and no market state yet.
    #[must_use]
    pub fn new(universe: AssetUniverse, portfolio: Portfolio) -> Self {
        Self {
            universe,
            market: RwLock::new(MarketSlot::default()),
            stressed: RwLock::new(None),
            portfolio: Mutex::new(Versioned::new(1, portfolio)),
        }
    }

    /// Store populated from a seed document.
    ///
    /// # Errors
    ///
    /// Returns an error if the seed is inconsistent.
    pub fn from_seed(seed: StateSeed) -> Result<Self, SeedError> {
        let seed = seed.validate()?;
        let store = Self::new(seed.universe, seed.portfolio);
        if let Some(market) = seed.market {
            *store.market.write() = MarketSlot {
                version: 1,
                state: Some(Arc::new(market)),
            };
        }
        if let Some(stressed) = seed.stressed {
            *store.stressed.write() = Some(Arc::new(stressed));
        }
        tracing::info!(
            assets = store.universe.len(),
            has_market = store.market.read().state.is_some(),
            "State store seeded"
        );
        Ok(store)
    }

    /// Set the stressed covariance matrix.
    ///
    /// # Errors
    ///
    /// Returns an error if the matrix does not match the universe.
    pub fn set_stressed_covariance(&self, matrix: CovarianceMatrix) -> Result<(), StoreError> {
        self.check_dimension(StateKey::StressedCovariance, matrix.dimension())?;
        *self.stressed.write() = Some(Arc::new(matrix));
        Ok(())
    }

    /// Replace the portfolio unconditionally. Returns the new version.
    ///
    /// # Errors
    ///
    /// Returns an error if the portfolio does not match the universe.
    pub fn reset_portfolio(&self, portfolio: Portfolio) -> Result<u64, StoreError> {
        self.check_dimension(StateKey::Holdings, portfolio.dimension())?;
        let mut slot = self.portfolio.lock();
        slot.version += 1;
        slot.value = portfolio;
        Ok(slot.version)
    }

    fn check_dimension(&self, key: StateKey, actual: usize) -> Result<(), StoreError> {
        let expected = self.universe.len();
        if actual == expected {
            Ok(())
        } else {
            Err(StoreError::Corrupt {
                key,
                reason: format!("dimension {actual} does not match universe of {expected}"),
            })
        }
    }
}

#[async_trait]
impl StateStorePort for InMemoryStateStore {
    async fn load_universe(&self) -> Result<AssetUniverse, StoreError> {
        Ok(self.universe.clone())
    }

    async fn load_market(&self) -> Result<Versioned<Arc<MarketState>>, StoreError> {
        let slot = self.market.read();
        slot.state
            .as_ref()
            .map(|state| Versioned::new(slot.version, Arc::clone(state)))
            .ok_or(StoreError::Missing(StateKey::CurrentCovariance))
    }

    async fn publish_market(&self, state: MarketState) -> Result<u64, StoreError> {
        self.check_dimension(StateKey::CurrentCovariance, state.covariance.dimension())?;
        self.check_dimension(StateKey::LastPrices, state.prices.dimension())?;
        let state = Arc::new(state);
        let mut slot = self.market.write();
        slot.version += 1;
        slot.state = Some(state);
        Ok(slot.version)
    }

    async fn load_stressed_covariance(&self) -> Result<Arc<CovarianceMatrix>, StoreError> {
        self.stressed
            .read()
            .clone()
            .ok_or(StoreError::Missing(StateKey::StressedCovariance))
    }

    async fn load_portfolio(&self) -> Result<Versioned<Portfolio>, StoreError> {
        Ok(self.portfolio.lock().clone())
    }

    async fn compare_and_swap_portfolio(
        &self,
        expected_version: u64,
        portfolio: Portfolio,
    ) -> Result<u64, StoreError> {
        self.check_dimension(StateKey::Holdings, portfolio.dimension())?;
        let mut slot = self.portfolio.lock();
        if slot.version != expected_version {
            return Err(StoreError::VersionConflict {
                expected: expected_version,
                found: slot.version,
            });
        }
        slot.version += 1;
        slot.value = portfolio;
        Ok(slot.version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::PriceSnapshot;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn store() -> InMemoryStateStore {
        let universe = AssetUniverse::new(["AAPL", "MSFT"]).unwrap();
        InMemoryStateStore::new(universe, Portfolio::new(dec!(1_000), 2).unwrap())
    }

    fn market(n: usize, price: f64) -> MarketState {
        MarketState::new(
            CovarianceMatrix::zeros(n),
            PriceSnapshot::baseline(vec![Some(price); n]).unwrap(),
            Utc::now(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn market_missing_until_published() {
        let store = store();
        assert_eq!(
            store.load_market().await.unwrap_err(),
            StoreError::Missing(StateKey::CurrentCovariance)
        );

        assert_eq!(store.publish_market(market(2, 10.0)).await.unwrap(), 1);
        assert_eq!(store.publish_market(market(2, 11.0)).await.unwrap(), 2);

        let loaded = store.load_market().await.unwrap();
        assert_eq!(loaded.version, 2);
        assert_eq!(loaded.value.prices.latest(0), Some(11.0));
    }

    #[tokio::test]
    async fn earlier_reads_keep_their_pair() {
        let store = store();
        store.publish_market(market(2, 10.0)).await.unwrap();
        let before = store.load_market().await.unwrap();
        store.publish_market(market(2, 12.0)).await.unwrap();

        assert_eq!(before.value.prices.latest(1), Some(10.0));
    }

    #[tokio::test]
    async fn publish_rejects_wrong_dimension() {
        let store = store();
        let err = store.publish_market(market(3, 10.0)).await.unwrap_err();
        assert!(matches!(err, StoreError::Corrupt { key: StateKey::CurrentCovariance, .. }));
    }

    #[tokio::test]
    async fn cas_detects_stale_version() {
        let store = store();
        let current = store.load_portfolio().await.unwrap();
        let next = current.value.apply_buy(0, 1, dec!(100)).unwrap();

        let version = store
            .compare_and_swap_portfolio(current.version, next.clone())
            .await
            .unwrap();
        assert_eq!(version, current.version + 1);

        let err = store
            .compare_and_swap_portfolio(current.version, next)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            StoreError::VersionConflict {
                expected: current.version,
                found: version
            }
        );
        assert_eq!(store.load_portfolio().await.unwrap().value.cash(), dec!(900));
    }

    #[tokio::test]
    async fn reset_bumps_version() {
        let store = store();
        let version = store.reset_portfolio(Portfolio::new(dec!(5), 2).unwrap()).unwrap();
        let loaded = store.load_portfolio().await.unwrap();
        assert_eq!(loaded.version, version);
        assert_eq!(loaded.value.cash(), dec!(5));
    }

    #[tokio::test]
    async fn stressed_matrix_is_optional() {
        let store = store();
        assert!(matches!(
            store.load_stressed_covariance().await,
            Err(StoreError::Missing(StateKey::StressedCovariance))
        ));
        store
            .set_stressed_covariance(CovarianceMatrix::zeros(2))
            .unwrap();
        assert!(store.load_stressed_covariance().await.is_ok());
    }
}
