//! Seed Documents
//!
//! JSON bootstrap state: the universe, an initial covariance estimate and
//! prices, the stressed matrix, and the starting portfolio.
//!
//! ```json
//! {
//!   "universe": ["AAPL", "MSFT"],
//!   "current_covariance": [[0.0004, 0.0001], [0.0001, 0.0009]],
//!   "stressed_covariance": [[0.0016, 0.0008], [0.0008, 0.0036]],
//!   "last_prices": { "AAPL": 190.0, "MSFT": 410.0 },
//!   "cash": "1000000",
//!   "holdings": { "AAPL": { "quantity": 10, "avg_price": "185.5" } }
//! }
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::{
    AssetId, AssetUniverse, CovarianceMatrix, Holding, MarketDataError, MarketState, Portfolio,
    PortfolioError, PriceSnapshot, UniverseError,
};

/// Errors loading or validating a seed.
#[derive(Debug, thiserror::Error)]
pub enum SeedError {
    /// File could not be read.
    #[error("failed to read seed {path}: {source}")]
    Io {
        /// Seed path.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },
    /// Document is not valid JSON for a seed.
    #[error("invalid seed document: {0}")]
    Parse(#[from] serde_json::Error),
    /// Universe is invalid.
    #[error(transparent)]
    Universe(#[from] UniverseError),
    /// Matrix or prices are invalid.
    #[error(transparent)]
    Market(#[from] MarketDataError),
    /// Portfolio is invalid.
    #[error(transparent)]
    Portfolio(#[from] PortfolioError),
    /// Prices or holdings reference an asset outside the universe.
    #[error("seed references unknown asset {0}")]
    UnknownAsset(AssetId),
    /// A matrix does not match the universe size.
    #[error("{matrix} matrix is {actual}x{actual}, universe has {expected} assets")]
    DimensionMismatch {
        /// Which matrix.
        matrix: &'static str,
        /// Universe size.
        expected: usize,
        /// Matrix size.
        actual: usize,
    },
}

/// Bootstrap document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateSeed {
    /// Ordered assets.
    pub universe: AssetUniverse,
    /// Initial covariance; zero when omitted.
    #[serde(default)]
    pub current_covariance: Option<CovarianceMatrix>,
    /// Stressed covariance for scenario tests.
    #[serde(default)]
    pub stressed_covariance: Option<CovarianceMatrix>,
    /// Latest known price per asset.
    #[serde(default)]
    pub last_prices: BTreeMap<AssetId, f64>,
    /// When the prices were observed; load time when omitted.
    #[serde(default)]
    pub as_of: Option<DateTime<Utc>>,
    /// Starting cash.
    pub cash: Decimal,
    /// Starting holdings; flat when omitted.
    #[serde(default)]
    pub holdings: BTreeMap<AssetId, Holding>,
}

/// Seed contents checked against the universe.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedSeed {
    /// Ordered assets.
    pub universe: AssetUniverse,
    /// Initial market state, if the seed carries a matrix or prices.
    pub market: Option<MarketState>,
    /// Stressed matrix, if given.
    pub stressed: Option<CovarianceMatrix>,
    /// Starting portfolio.
    pub portfolio: Portfolio,
}

impl StateSeed {
    /// Seed with a universe and cash only.
    #[must_use]
    pub fn empty(universe: AssetUniverse, cash: Decimal) -> Self {
        Self {
            universe,
            current_covariance: None,
            stressed_covariance: None,
            last_prices: BTreeMap::new(),
            as_of: None,
            cash,
            holdings: BTreeMap::new(),
        }
    }

    /// Parse a seed from JSON text.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not a valid seed document.
    pub fn from_json(json: &str) -> Result<Self, SeedError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Read and parse a seed file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_path(path: &Path) -> Result<Self, SeedError> {
        let text = std::fs::read_to_string(path).map_err(|source| SeedError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&text)
    }

    /// Check every part against the universe.
    ///
    /// # Errors
    ///
    /// Returns an error on unknown assets, mismatched matrices, invalid
    /// prices or an invalid portfolio.
    pub fn validate(self) -> Result<ValidatedSeed, SeedError> {
        let universe = self.universe;
        let n = universe.len();

        let mut prices = vec![None; n];
        for (asset, price) in self.last_prices {
            let index = universe
                .index_of(&asset)
                .ok_or(SeedError::UnknownAsset(asset))?;
            prices[index] = Some(price);
        }

        let mut holdings = vec![Holding::FLAT; n];
        for (asset, holding) in self.holdings {
            let index = universe
                .index_of(&asset)
                .ok_or(SeedError::UnknownAsset(asset))?;
            holdings[index] = holding;
        }
        let portfolio = Portfolio::with_holdings(self.cash, holdings)?;

        let has_prices = prices.iter().any(Option::is_some);
        let market = match (self.current_covariance, has_prices) {
            (None, false) => None,
            (covariance, _) => {
                let covariance = covariance.unwrap_or_else(|| CovarianceMatrix::zeros(n));
                check_dimension("current", n, covariance.dimension())?;
                let snapshot = PriceSnapshot::baseline(prices)?;
                Some(MarketState::new(
                    covariance,
                    snapshot,
                    self.as_of.unwrap_or_else(Utc::now),
                )?)
            }
        };

        if let Some(stressed) = &self.stressed_covariance {
            check_dimension("stressed", n, stressed.dimension())?;
        }

        Ok(ValidatedSeed {
            universe,
            market,
            stressed: self.stressed_covariance,
            portfolio,
        })
    }
}

fn check_dimension(matrix: &'static str, expected: usize, actual: usize) -> Result<(), SeedError> {
    if expected == actual {
        Ok(())
    } else {
        Err(SeedError::DimensionMismatch {
            matrix,
            expected,
            actual,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::io::Write;

    const SEED: &str = r#"{
        "universe": ["AAPL", "MSFT"],
        "current_covariance": [[0.0004, 0.0001], [0.0001, 0.0009]],
        "stressed_covariance": [[0.0016, 0.0008], [0.0008, 0.0036]],
        "last_prices": { "aapl": 190.0, "MSFT": 410.0 },
        "cash": "1000000",
        "holdings": { "AAPL": { "quantity": 10, "avg_price": "185.5" } }
    }"#;

    #[test]
    fn parses_and_validates_full_seed() {
        let seed = StateSeed::from_json(SEED).unwrap().validate().unwrap();
        assert_eq!(seed.universe.len(), 2);
        assert_eq!(seed.portfolio.cash(), dec!(1_000_000));
        assert_eq!(seed.portfolio.holding(0), Some(&Holding::new(10, dec!(185.5))));

        let market = seed.market.unwrap();
        assert_eq!(market.prices.latest(0), Some(190.0));
        assert!(seed.stressed.is_some());
    }

    #[test]
    fn empty_seed_has_no_market() {
        let universe = AssetUniverse::new(["AAPL"]).unwrap();
        let seed = StateSeed::empty(universe, dec!(500)).validate().unwrap();
        assert!(seed.market.is_none());
        assert_eq!(seed.portfolio.holdings(), &[Holding::FLAT]);
    }

    #[test]
    fn prices_without_matrix_start_from_zero_covariance() {
        let json = r#"{"universe":["AAPL"],"last_prices":{"AAPL":10.0},"cash":100}"#;
        let seed = StateSeed::from_json(json).unwrap().validate().unwrap();
        assert_eq!(seed.market.unwrap().covariance, CovarianceMatrix::zeros(1));
    }

    #[test]
    fn rejects_unknown_holding() {
        let json = r#"{"universe":["AAPL"],"cash":100,"holdings":{"TSLA":{"quantity":1}}}"#;
        let err = StateSeed::from_json(json).unwrap().validate().unwrap_err();
        assert!(matches!(err, SeedError::UnknownAsset(a) if a.as_str() == "TSLA"));
    }

    #[test]
    fn rejects_wrong_matrix_size() {
        let json = r#"{"universe":["AAPL","MSFT"],"current_covariance":[[0.1]],"cash":100}"#;
        let err = StateSeed::from_json(json).unwrap().validate().unwrap_err();
        assert!(matches!(err, SeedError::DimensionMismatch { matrix: "current", .. }));
    }

    #[test]
    fn reads_seed_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SEED.as_bytes()).unwrap();
        let seed = StateSeed::from_path(file.path()).unwrap();
        assert_eq!(seed.universe.assets()[1].as_str(), "MSFT");
    }

    #[test]
    fn missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = StateSeed::from_path(&dir.path().join("absent.json")).unwrap_err();
        assert!(matches!(err, SeedError::Io { .. }));
    }
}
