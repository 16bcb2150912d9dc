#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::items_after_statements,
        clippy::cast_precision_loss
    )
)]

//! Risk Engine - Real-Time Pre-Trade Risk Gate
//!
//! Maintains an EWMA covariance estimate from a stream of price ticks and
//! validates every proposed trade against cash, inventory and a dollar
//! Value-at-Risk limit before it is committed.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Pure risk types and math
//!   - `risk_math`: VaR, marginal/component/incremental VaR, liquidity cost
//!   - `covariance`: EWMA recursion and the per-cycle state machine
//!   - `portfolio`, `trade`, `market`, `universe`: state and commands
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: Versioned state store contract
//!   - `services`: Risk engine and background covariance updater
//!
//! - **Infrastructure**: Adapters and process concerns
//!   - `persistence`: In-memory store and JSON seed documents
//!   - `stdio`: JSON lines command adapter
//!   - `config`, `metrics`, `telemetry`
//!
//! # Data Flow
//!
//! ```text
//! ticks ──► UpdaterTask ──publish_market──► StateStore ◄──snapshot/CAS── RiskEngine ◄── trades
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Risk types and math with no I/O.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::{
    AssetId, AssetUniverse, CovarianceMatrix, Decision, DecisionStatus, Holding, MarketState,
    Portfolio, PriceSnapshot, RejectionReason, RiskReport, StressResult, Tick, TradeCommand,
    TradeSide,
};

// Ports
pub use application::ports::{StateKey, StateStorePort, StoreError, Versioned};

// Services
pub use application::services::{
    ExecutionError, ExecutionReceipt, LiquiditySettings, RiskEngine, RiskEngineSettings,
    UpdaterConfig, UpdaterStats, UpdaterTask,
};

// Infrastructure config
pub use infrastructure::config::{ConfigError, RiskEngineConfig};

// State store adapters (for integration tests)
pub use infrastructure::persistence::{InMemoryStateStore, SeedError, StateSeed};

// Line protocol
pub use infrastructure::stdio::{InboundMessage, OutboundMessage, serve_lines};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
