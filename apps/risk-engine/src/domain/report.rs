//! Portfolio Risk Report
//!
//! Dashboard figures for the whole book: value breakdown, portfolio VaR and
//! volatility, and a per-asset decomposition. Daily scaling happens here and
//! nowhere else.

use chrono::{DateTime, Utc};
use nalgebra::DVector;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::market::MarketState;
use super::portfolio::{Portfolio, money_as_f64};
use super::risk_math::{
    RiskMathError, component_var, isolated_var, marginal_var, portfolio_var, scale_volatility,
    weights_from_exposures,
};
use super::universe::{AssetId, AssetUniverse};

/// Per-asset line of the report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetRisk {
    /// Asset.
    pub asset: AssetId,
    /// Latest price.
    pub price: f64,
    /// Units held.
    pub quantity: u64,
    /// Average entry price.
    pub avg_price: Decimal,
    /// Cost basis.
    pub invested: Decimal,
    /// Quantity × latest price.
    pub market_value: f64,
    /// Share of total value, in percent.
    pub weight_pct: f64,
    /// Daily volatility of the asset's returns.
    pub daily_volatility: f64,
    /// VaR of this position on its own.
    pub isolated_var: f64,
    /// This position's share of portfolio VaR.
    pub component_var: f64,
}

/// Portfolio-level risk figures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskReport {
    /// Cash balance.
    pub cash: Decimal,
    /// Market value of all holdings.
    pub equity_value: f64,
    /// Cash plus equity.
    pub total_value: f64,
    /// Dollar VaR of the holdings.
    pub portfolio_var: f64,
    /// Per-period volatility of the holdings.
    pub period_volatility: f64,
    /// Daily volatility of the holdings.
    pub daily_volatility: f64,
    /// Dollar VaR limit.
    pub var_limit: f64,
    /// Portfolio VaR as a percentage of the limit.
    pub limit_utilization_pct: f64,
    /// When the market state was published.
    pub market_as_of: DateTime<Utc>,
    /// Per-asset breakdown in universe order.
    pub assets: Vec<AssetRisk>,
}

/// Build a report from one consistent snapshot.
///
/// # Errors
///
/// Returns an error if the inputs disagree on dimension.
pub fn build_report(
    universe: &AssetUniverse,
    market: &MarketState,
    prices: &DVector<f64>,
    portfolio: &Portfolio,
    var_limit: f64,
    periods_per_day: u32,
) -> Result<RiskReport, RiskMathError> {
    let cov = &market.covariance;
    let exposures = portfolio.exposures(prices);
    let equity_value: f64 = exposures.iter().sum();
    let total_value = money_as_f64(portfolio.cash()) + equity_value;

    let weights = weights_from_exposures(&exposures, equity_value);
    let var = portfolio_var(&weights, cov, equity_value)?;
    let marginal = marginal_var(&weights, cov)?;
    let components = component_var(&marginal, &weights, equity_value)?;
    let isolated = isolated_var(cov, &exposures)?;
    let vols = cov.volatilities();

    let assets = universe
        .iter()
        .map(|(i, asset)| {
            let holding = portfolio.holding(i).copied().unwrap_or_default();
            AssetRisk {
                asset: asset.clone(),
                price: prices[i],
                quantity: holding.quantity,
                avg_price: holding.avg_price,
                invested: holding.invested(),
                market_value: exposures[i],
                weight_pct: percent(exposures[i], total_value),
                daily_volatility: scale_volatility(vols[i], periods_per_day),
                isolated_var: isolated[i],
                component_var: components[i],
            }
        })
        .collect();

    Ok(RiskReport {
        cash: portfolio.cash(),
        equity_value,
        total_value,
        portfolio_var: var.var_dollar,
        period_volatility: var.std_dev,
        daily_volatility: scale_volatility(var.std_dev, periods_per_day),
        var_limit,
        limit_utilization_pct: percent(var.var_dollar, var_limit),
        market_as_of: market.as_of,
        assets,
    })
}

fn percent(part: f64, whole: f64) -> f64 {
    if whole > 0.0 { part / whole * 100.0 } else { 0.0 }
}
