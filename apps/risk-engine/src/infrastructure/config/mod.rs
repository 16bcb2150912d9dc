//! Configuration Module
//!
//! Environment-driven configuration for the risk engine binary.

mod settings;

pub use settings::{
    ConfigError, CovarianceSettings, DEFAULT_UNIVERSE, RiskEngineConfig, RiskSettings,
    ServerSettings, StoreSettings,
};
