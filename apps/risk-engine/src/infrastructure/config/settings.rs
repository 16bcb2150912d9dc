//! Risk Engine Configuration Settings
//!
//! Configuration types for the risk engine, loaded from environment variables.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use rust_decimal::Decimal;

use crate::application::services::{LiquiditySettings, RiskEngineSettings, UpdaterConfig};
use crate::domain::covariance::{DEFAULT_EWMA_DECAY, validate_decay};
use crate::domain::risk_math::DEFAULT_PERIODS_PER_DAY;
use crate::domain::{AssetUniverse, UniverseError};

/// Default universe when none is configured.
pub const DEFAULT_UNIVERSE: &str = "AAPL,GOOG,MSFT,AMZN,TSLA";

/// Risk limit and portfolio settings.
#[derive(Debug, Clone, PartialEq)]
pub struct RiskSettings {
    /// Dollar VaR ceiling.
    pub var_limit: f64,
    /// Starting cash when no seed is given.
    pub initial_cash: Decimal,
    /// Oldest market state accepted (`None` = no staleness check).
    pub max_market_age: Option<Duration>,
    /// Bars per trading day for daily volatility.
    pub periods_per_day: u32,
}

impl Default for RiskSettings {
    fn default() -> Self {
        Self {
            var_limit: 5_000.0,
            initial_cash: Decimal::from(1_000_000),
            max_market_age: Some(Duration::from_secs(30)),
            periods_per_day: DEFAULT_PERIODS_PER_DAY,
        }
    }
}

/// Covariance updater settings.
#[derive(Debug, Clone, PartialEq)]
pub struct CovarianceSettings {
    /// EWMA decay λ.
    pub decay: f64,
    /// Time between updater cycles.
    pub update_interval: Duration,
}

impl Default for CovarianceSettings {
    fn default() -> Self {
        Self {
            decay: DEFAULT_EWMA_DECAY,
            update_interval: Duration::from_secs(2),
        }
    }
}

/// State store settings.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreSettings {
    /// Deadline for each store call.
    pub timeout: Duration,
    /// Optional JSON seed document.
    pub seed_path: Option<PathBuf>,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(500),
            seed_path: None,
        }
    }
}

/// Server port settings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerSettings {
    /// Prometheus metrics port (0 = disabled).
    pub metrics_port: u16,
}

/// Complete risk engine configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct RiskEngineConfig {
    /// Assets traded when no seed is given.
    pub universe: AssetUniverse,
    /// Risk limit and portfolio settings.
    pub risk: RiskSettings,
    /// Covariance updater settings.
    pub covariance: CovarianceSettings,
    /// Liquidity cost inputs.
    pub liquidity: LiquiditySettings,
    /// State store settings.
    pub store: StoreSettings,
    /// Server port settings.
    pub server: ServerSettings,
}

impl RiskEngineConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is malformed or out of range.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Returns an error if a value is malformed or out of range.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = EnvReader { lookup };

        let universe_list = env
            .raw("RISK_ENGINE_UNIVERSE")
            .unwrap_or_else(|| DEFAULT_UNIVERSE.to_string());
        let universe = AssetUniverse::new(
            universe_list
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty()),
        )?;

        let defaults = RiskSettings::default();
        let max_age_secs: u64 = env.parse(
            "RISK_ENGINE_MAX_MARKET_AGE_SECS",
            defaults.max_market_age.map_or(0, |d| d.as_secs()),
        )?;
        let risk = RiskSettings {
            var_limit: env.parse("RISK_ENGINE_VAR_LIMIT", defaults.var_limit)?,
            initial_cash: env.parse("RISK_ENGINE_INITIAL_CASH", defaults.initial_cash)?,
            max_market_age: (max_age_secs > 0).then(|| Duration::from_secs(max_age_secs)),
            periods_per_day: env.parse("RISK_ENGINE_PERIODS_PER_DAY", defaults.periods_per_day)?,
        };

        let covariance = CovarianceSettings {
            decay: env.parse("RISK_ENGINE_EWMA_DECAY", CovarianceSettings::default().decay)?,
            update_interval: env.duration_millis(
                "RISK_ENGINE_UPDATE_INTERVAL_MS",
                CovarianceSettings::default().update_interval,
            )?,
        };

        let liquidity_defaults = LiquiditySettings::default();
        let liquidity = LiquiditySettings {
            impact_coefficient: env.parse(
                "RISK_ENGINE_IMPACT_COEFFICIENT",
                liquidity_defaults.impact_coefficient,
            )?,
            half_spread_bps: env.parse(
                "RISK_ENGINE_HALF_SPREAD_BPS",
                liquidity_defaults.half_spread_bps,
            )?,
            avg_daily_volume: env.parse(
                "RISK_ENGINE_AVG_DAILY_VOLUME",
                liquidity_defaults.avg_daily_volume,
            )?,
        };

        let store = StoreSettings {
            timeout: env.duration_millis("RISK_ENGINE_STORE_TIMEOUT_MS", StoreSettings::default().timeout)?,
            seed_path: env.raw("RISK_ENGINE_SEED_PATH").map(PathBuf::from),
        };

        let server = ServerSettings {
            metrics_port: env.parse("RISK_ENGINE_METRICS_PORT", 0)?,
        };

        let config = Self {
            universe,
            risk,
            covariance,
            liquidity,
            store,
            server,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges.
    ///
    /// # Errors
    ///
    /// Returns the first out-of-range value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let out_of_range = |key: &str, reason: &str| ConfigError::OutOfRange {
            key: key.to_string(),
            reason: reason.to_string(),
        };

        if !(self.risk.var_limit.is_finite() && self.risk.var_limit > 0.0) {
            return Err(out_of_range("RISK_ENGINE_VAR_LIMIT", "must be positive"));
        }
        if self.risk.initial_cash.is_sign_negative() && !self.risk.initial_cash.is_zero() {
            return Err(out_of_range("RISK_ENGINE_INITIAL_CASH", "must not be negative"));
        }
        if self.risk.periods_per_day == 0 {
            return Err(out_of_range("RISK_ENGINE_PERIODS_PER_DAY", "must be positive"));
        }
        if validate_decay(self.covariance.decay).is_err() {
            return Err(out_of_range("RISK_ENGINE_EWMA_DECAY", "must be in (0, 1]"));
        }
        if self.covariance.update_interval.is_zero() {
            return Err(out_of_range("RISK_ENGINE_UPDATE_INTERVAL_MS", "must be positive"));
        }
        if self.store.timeout.is_zero() {
            return Err(out_of_range("RISK_ENGINE_STORE_TIMEOUT_MS", "must be positive"));
        }
        for (key, value) in [
            ("RISK_ENGINE_IMPACT_COEFFICIENT", self.liquidity.impact_coefficient),
            ("RISK_ENGINE_HALF_SPREAD_BPS", self.liquidity.half_spread_bps),
            ("RISK_ENGINE_AVG_DAILY_VOLUME", self.liquidity.avg_daily_volume),
        ] {
            if !(value.is_finite() && value >= 0.0) {
                return Err(out_of_range(key, "must be a non-negative number"));
            }
        }
        Ok(())
    }

    /// Settings for the risk engine service.
    #[must_use]
    pub fn engine_settings(&self) -> RiskEngineSettings {
        RiskEngineSettings {
            var_limit: self.risk.var_limit,
            store_timeout: self.store.timeout,
            max_market_age: self.risk.max_market_age,
            periods_per_day: self.risk.periods_per_day,
            liquidity: self.liquidity,
        }
    }

    /// Settings for the covariance updater task.
    #[must_use]
    pub fn updater_config(&self) -> UpdaterConfig {
        UpdaterConfig {
            interval: self.covariance.update_interval,
            decay: self.covariance.decay,
            store_timeout: self.store.timeout,
        }
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Environment variable could not be parsed.
    #[error("environment variable {key} has invalid value {value:?}")]
    InvalidValue {
        /// Variable name.
        key: String,
        /// Raw value.
        value: String,
    },
    /// Value parsed but is out of range.
    #[error("environment variable {key} {reason}")]
    OutOfRange {
        /// Variable name.
        key: String,
        /// Constraint violated.
        reason: String,
    },
    /// Universe list is invalid.
    #[error("invalid RISK_ENGINE_UNIVERSE: {0}")]
    Universe(#[from] UniverseError),
}

struct EnvReader<F> {
    lookup: F,
}

impl<F> EnvReader<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn raw(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn parse<T: FromStr>(&self, key: &str, default: T) -> Result<T, ConfigError> {
        self.raw(key).map_or(Ok(default), |value| {
            value.parse().map_err(|_| ConfigError::InvalidValue {
                key: key.to_string(),
                value,
            })
        })
    }

    fn duration_millis(&self, key: &str, default: Duration) -> Result<Duration, ConfigError> {
        self.raw(key).map_or(Ok(default), |value| {
            value
                .parse::<u64>()
                .map(Duration::from_millis)
                .map_err(|_| ConfigError::InvalidValue {
                    key: key.to_string(),
                    value,
                })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<RiskEngineConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        RiskEngineConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_when_unset() {
        let config = config(&[]).unwrap();
        assert_eq!(config.universe.len(), 5);
        assert_eq!(config.universe.position("TSLA"), Some(4));
        assert!((config.risk.var_limit - 5_000.0).abs() < f64::EPSILON);
        assert_eq!(config.risk.initial_cash, Decimal::from(1_000_000));
        assert_eq!(config.risk.max_market_age, Some(Duration::from_secs(30)));
        assert_eq!(config.covariance.update_interval, Duration::from_secs(2));
        assert_eq!(config.store.timeout, Duration::from_millis(500));
        assert_eq!(config.server.metrics_port, 0);
        assert!(config.store.seed_path.is_none());
    }

    #[test]
    fn overrides_are_applied() {
        let config = config(&[
            ("RISK_ENGINE_UNIVERSE", "spy, qqq"),
            ("RISK_ENGINE_VAR_LIMIT", "12500.5"),
            ("RISK_ENGINE_INITIAL_CASH", "2500.25"),
            ("RISK_ENGINE_EWMA_DECAY", "0.97"),
            ("RISK_ENGINE_MAX_MARKET_AGE_SECS", "0"),
            ("RISK_ENGINE_SEED_PATH", "/tmp/seed.json"),
        ])
        .unwrap();

        assert_eq!(config.universe.assets()[0].as_str(), "SPY");
        assert!((config.risk.var_limit - 12_500.5).abs() < f64::EPSILON);
        assert_eq!(config.risk.initial_cash, Decimal::new(250_025, 2));
        assert!(config.risk.max_market_age.is_none());
        assert_eq!(config.store.seed_path, Some(PathBuf::from("/tmp/seed.json")));

        let updater = config.updater_config();
        assert!((updater.decay - 0.97).abs() < f64::EPSILON);
    }

    #[test]
    fn malformed_value_is_error() {
        let err = config(&[("RISK_ENGINE_VAR_LIMIT", "lots")]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { key, .. } if key == "RISK_ENGINE_VAR_LIMIT"));
    }

    #[test]
    fn out_of_range_decay_is_error() {
        let err = config(&[("RISK_ENGINE_EWMA_DECAY", "1.5")]).unwrap_err();
        assert!(matches!(err, ConfigError::OutOfRange { key, .. } if key == "RISK_ENGINE_EWMA_DECAY"));
    }

    #[test]
    fn duplicate_universe_is_error() {
        let err = config(&[("RISK_ENGINE_UNIVERSE", "AAPL,aapl")]).unwrap_err();
        assert!(matches!(err, ConfigError::Universe(UniverseError::Duplicate(_))));
    }

    #[test]
    fn engine_settings_carry_limits() {
        let config = config(&[("RISK_ENGINE_STORE_TIMEOUT_MS", "250")]).unwrap();
        let settings = config.engine_settings();
        assert_eq!(settings.store_timeout, Duration::from_millis(250));
        assert_eq!(settings.periods_per_day, DEFAULT_PERIODS_PER_DAY);
    }
}
