//! Portfolio State
//!
//! Cash and per-asset holdings. A portfolio is an immutable value: applying
//! a fill produces the next portfolio, which the engine then commits.

use nalgebra::DVector;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};

/// Decimal places kept when converting a feed price into money.
pub const PRICE_DECIMAL_PLACES: u32 = 6;

/// Convert a feed price into a money amount.
///
/// Returns `None` for non-finite prices.
#[must_use]
pub fn price_to_decimal(price: f64) -> Option<Decimal> {
    if !price.is_finite() {
        return None;
    }
    Decimal::from_f64_retain(price).map(|d| d.round_dp(PRICE_DECIMAL_PLACES))
}

/// Errors raised when a fill cannot be applied.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PortfolioError {
    /// Buying would take cash below zero.
    #[error("insufficient funds: required {required}, available {available}")]
    InsufficientFunds {
        /// Notional cost of the trade.
        required: Decimal,
        /// Cash available.
        available: Decimal,
    },
    /// Selling more than is held.
    #[error("insufficient inventory: requested {requested}, held {held}")]
    InsufficientInventory {
        /// Quantity requested.
        requested: u64,
        /// Quantity held.
        held: u64,
    },
    /// Cash balance below zero.
    #[error("cash balance cannot be negative: {0}")]
    NegativeCash(Decimal),
    /// Negative average entry price.
    #[error("average price cannot be negative at index {0}")]
    NegativeAveragePrice(usize),
    /// Asset index outside the holdings table.
    #[error("asset index {index} out of range for {len} holdings")]
    IndexOutOfRange {
        /// Requested index.
        index: usize,
        /// Number of holdings.
        len: usize,
    },
    /// Quantity or notional overflowed.
    #[error("arithmetic overflow applying fill")]
    Overflow,
}

// =============================================================================
// Holding
// =============================================================================

/// Position in a single asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Holding {
    /// Units held.
    #[serde(alias = "qty")]
    pub quantity: u64,
    /// Weighted-average entry price; zero when flat.
    #[serde(default)]
    pub avg_price: Decimal,
}

impl Holding {
    /// Flat holding.
    pub const FLAT: Self = Self {
        quantity: 0,
        avg_price: Decimal::ZERO,
    };

    /// Create a holding.
    #[must_use]
    pub const fn new(quantity: u64, avg_price: Decimal) -> Self {
        Self {
            quantity,
            avg_price,
        }
    }

    /// Whether no units are held.
    #[must_use]
    pub const fn is_flat(&self) -> bool {
        self.quantity == 0
    }

    /// Cost basis (quantity × average price).
    #[must_use]
    pub fn invested(&self) -> Decimal {
        Decimal::from(self.quantity) * self.avg_price
    }
}

// =============================================================================
// Portfolio
// =============================================================================

/// Cash plus one holding per universe asset, indexed in universe order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Portfolio {
    cash: Decimal,
    holdings: Vec<Holding>,
}

impl Portfolio {
    /// All-cash portfolio over `assets` flat holdings.
    ///
    /// # Errors
    ///
    /// Returns an error if `cash` is negative.
    pub fn new(cash: Decimal, assets: usize) -> Result<Self, PortfolioError> {
        Self::with_holdings(cash, vec![Holding::FLAT; assets])
    }

    /// Portfolio with explicit holdings.
    ///
    /// # Errors
    ///
    /// Returns an error if cash or any average price is negative.
    pub fn with_holdings(cash: Decimal, holdings: Vec<Holding>) -> Result<Self, PortfolioError> {
        if cash.is_sign_negative() && !cash.is_zero() {
            return Err(PortfolioError::NegativeCash(cash));
        }
        if let Some(index) = holdings
            .iter()
            .position(|h| h.avg_price.is_sign_negative() && !h.avg_price.is_zero())
        {
            return Err(PortfolioError::NegativeAveragePrice(index));
        }
        Ok(Self { cash, holdings })
    }

    /// Cash balance.
    #[must_use]
    pub const fn cash(&self) -> Decimal {
        self.cash
    }

    /// Holdings in universe order.
    #[must_use]
    pub fn holdings(&self) -> &[Holding] {
        &self.holdings
    }

    /// Holding at `index`.
    #[must_use]
    pub fn holding(&self, index: usize) -> Option<&Holding> {
        self.holdings.get(index)
    }

    /// Number of assets tracked.
    #[must_use]
    pub fn dimension(&self) -> usize {
        self.holdings.len()
    }

    /// Dollar exposure per asset at the given prices.
    #[must_use]
    pub fn exposures(&self, prices: &DVector<f64>) -> DVector<f64> {
        DVector::from_iterator(
            self.holdings.len(),
            self.holdings
                .iter()
                .zip(prices.iter())
                .map(|(h, p)| quantity_as_f64(h.quantity) * p),
        )
    }

    /// Apply a buy fill.
    ///
    /// The entry price becomes the quantity-weighted average of the old
    /// position and the fill.
    ///
    /// # Errors
    ///
    /// Returns `InsufficientFunds` if the notional exceeds cash.
    pub fn apply_buy(
        &self,
        index: usize,
        quantity: u64,
        price: Decimal,
    ) -> Result<Self, PortfolioError> {
        let current = self.holding_checked(index)?;
        let notional = notional(quantity, price)?;
        if notional > self.cash {
            return Err(PortfolioError::InsufficientFunds {
                required: notional,
                available: self.cash,
            });
        }

        let new_quantity = current
            .quantity
            .checked_add(quantity)
            .ok_or(PortfolioError::Overflow)?;
        let total_cost = current
            .invested()
            .checked_add(notional)
            .ok_or(PortfolioError::Overflow)?;
        let avg_price = if new_quantity == 0 {
            Decimal::ZERO
        } else {
            total_cost
                .checked_div(Decimal::from(new_quantity))
                .ok_or(PortfolioError::Overflow)?
        };

        let mut next = self.clone();
        next.cash -= notional;
        next.holdings[index] = Holding::new(new_quantity, avg_price);
        Ok(next)
    }

    /// Apply a sell fill.
    ///
    /// The entry price is unchanged unless the position is closed, in which
    /// case it resets to zero.
    ///
    /// # Errors
    ///
    /// Returns `InsufficientInventory` if more units are sold than held.
    pub fn apply_sell(
        &self,
        index: usize,
        quantity: u64,
        price: Decimal,
    ) -> Result<Self, PortfolioError> {
        let current = self.holding_checked(index)?;
        if quantity > current.quantity {
            return Err(PortfolioError::InsufficientInventory {
                requested: quantity,
                held: current.quantity,
            });
        }

        let proceeds = notional(quantity, price)?;
        let remaining = current.quantity - quantity;
        let avg_price = if remaining == 0 {
            Decimal::ZERO
        } else {
            current.avg_price
        };

        let mut next = self.clone();
        next.cash = next
            .cash
            .checked_add(proceeds)
            .ok_or(PortfolioError::Overflow)?;
        next.holdings[index] = Holding::new(remaining, avg_price);
        Ok(next)
    }

    fn holding_checked(&self, index: usize) -> Result<Holding, PortfolioError> {
        self.holdings
            .get(index)
            .copied()
            .ok_or(PortfolioError::IndexOutOfRange {
                index,
                len: self.holdings.len(),
            })
    }
}

/// Notional value of `quantity` units at `price`.
///
/// # Errors
///
/// Returns `Overflow` if the product does not fit a decimal.
pub fn notional(quantity: u64, price: Decimal) -> Result<Decimal, PortfolioError> {
    Decimal::from(quantity)
        .checked_mul(price)
        .ok_or(PortfolioError::Overflow)
}

/// Quantity as a float for risk math.
#[allow(clippy::cast_precision_loss)]
#[must_use]
pub const fn quantity_as_f64(quantity: u64) -> f64 {
    quantity as f64
}

/// Money as a float for risk math.
#[must_use]
pub fn money_as_f64(amount: Decimal) -> f64 {
    amount.to_f64().unwrap_or(0.0)
}
