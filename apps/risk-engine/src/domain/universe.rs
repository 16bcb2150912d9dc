//! Asset Universe
//!
//! The ordered, fixed-size list of assets an engine instance is built for.
//! Every covariance matrix, price vector, weight vector and holdings table
//! is indexed against this order.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

// =============================================================================
// Asset Identifier
// =============================================================================

/// A tradable asset identifier (ticker).
///
/// Identifiers are trimmed and normalized to uppercase so that `"aapl"`
/// and `"AAPL "` name the same asset.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct AssetId(String);

impl AssetId {
    /// Create a new asset identifier.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into().trim().to_uppercase())
    }

    /// Get the identifier string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn is_blank(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AssetId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for AssetId {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<AssetId> for String {
    fn from(id: AssetId) -> Self {
        id.0
    }
}

// =============================================================================
// Universe
// =============================================================================

/// Errors raised while building an asset universe.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UniverseError {
    /// The universe contains no assets.
    #[error("asset universe cannot be empty")]
    Empty,
    /// An identifier is empty after trimming.
    #[error("asset universe contains a blank identifier at position {0}")]
    BlankId(usize),
    /// The same asset appears more than once.
    #[error("asset {0} appears more than once in the universe")]
    Duplicate(AssetId),
}

/// Ordered, fixed-size set of distinct assets.
///
/// Cloning is cheap: the asset list is shared.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<AssetId>", into = "Vec<AssetId>")]
pub struct AssetUniverse {
    assets: Arc<[AssetId]>,
}

impl AssetUniverse {
    /// Build a universe from an ordered list of identifiers.
    ///
    /// # Errors
    ///
    /// Returns an error if the list is empty, contains a blank identifier,
    /// or names the same asset twice.
    pub fn new<I, A>(assets: I) -> Result<Self, UniverseError>
    where
        I: IntoIterator<Item = A>,
        A: Into<AssetId>,
    {
        let assets: Vec<AssetId> = assets.into_iter().map(Into::into).collect();
        if assets.is_empty() {
            return Err(UniverseError::Empty);
        }

        let mut seen = HashSet::with_capacity(assets.len());
        for (position, asset) in assets.iter().enumerate() {
            if asset.is_blank() {
                return Err(UniverseError::BlankId(position));
            }
            if !seen.insert(asset) {
                return Err(UniverseError::Duplicate(asset.clone()));
            }
        }

        Ok(Self {
            assets: assets.into(),
        })
    }

    /// Number of assets (N).
    #[must_use]
    pub fn len(&self) -> usize {
        self.assets.len()
    }

    /// Always `false`; an empty universe cannot be constructed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.assets.is_empty()
    }

    /// Assets in index order.
    #[must_use]
    pub fn assets(&self) -> &[AssetId] {
        &self.assets
    }

    /// Asset at `index`.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&AssetId> {
        self.assets.get(index)
    }

    /// Index of `asset` in the universe order.
    #[must_use]
    pub fn index_of(&self, asset: &AssetId) -> Option<usize> {
        self.assets.iter().position(|a| a == asset)
    }

    /// Index of a raw ticker string, normalizing it first.
    #[must_use]
    pub fn position(&self, ticker: &str) -> Option<usize> {
        self.index_of(&AssetId::new(ticker))
    }

    /// Iterate assets with their indices.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &AssetId)> {
        self.assets.iter().enumerate()
    }
}

impl TryFrom<Vec<AssetId>> for AssetUniverse {
    type Error = UniverseError;

    fn try_from(assets: Vec<AssetId>) -> Result<Self, Self::Error> {
        Self::new(assets)
    }
}

impl From<AssetUniverse> for Vec<AssetId> {
    fn from(universe: AssetUniverse) -> Self {
        universe.assets.to_vec()
    }
}
