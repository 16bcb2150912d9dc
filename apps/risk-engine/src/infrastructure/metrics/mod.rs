//! Prometheus Metrics Module
//!
//! Exposes engine metrics in Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Decisions**: Trade checks by status and rejection reason
//! - **Executions**: Committed trades and lost serialization races
//! - **Updater**: Covariance cycles by outcome and the published version
//! - **Latency**: Time spent validating a trade
//!
//! # Integration
//!
//! When a metrics port is configured the exporter serves `/metrics` on it.

use std::net::SocketAddr;
use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

use crate::domain::{Decision, TradeSide};

static METRICS_INSTALLED: OnceLock<SocketAddr> = OnceLock::new();

/// Install the Prometheus recorder and serve it on `addr`.
///
/// Calling this again after a successful install is a no-op.
///
/// # Errors
///
/// Returns an error if the recorder or HTTP listener cannot be installed.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    if METRICS_INSTALLED.get().is_some() {
        return Ok(());
    }
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    register_metrics();
    let _ = METRICS_INSTALLED.set(addr);
    tracing::info!(%addr, "Prometheus exporter listening");
    Ok(())
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    describe_counter!(
        "risk_engine_decisions_total",
        "Trade validations by status and rejection reason"
    );
    describe_counter!(
        "risk_engine_trades_executed_total",
        "Trades committed to the portfolio"
    );
    describe_counter!(
        "risk_engine_execution_conflicts_total",
        "Executions that lost a portfolio compare-and-swap"
    );
    describe_counter!(
        "risk_engine_updater_cycles_total",
        "Covariance updater cycles by outcome"
    );
    describe_counter!(
        "risk_engine_store_errors_total",
        "State store failures by operation"
    );
    describe_gauge!(
        "risk_engine_market_version",
        "Version of the last published market state"
    );
    describe_histogram!(
        "risk_engine_check_seconds",
        "Time to validate a trade against a snapshot"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Which path produced a decision.
#[derive(Debug, Clone, Copy)]
pub enum DecisionPath {
    /// Read-only check.
    Check,
    /// Re-validation inside execute.
    Execute,
}

impl DecisionPath {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Check => "check",
            Self::Execute => "execute",
        }
    }
}

/// Record a validation outcome.
pub fn record_decision(path: DecisionPath, decision: &Decision) {
    let reason = decision.reason.map_or("none", |r| r.as_str());
    let status = if decision.is_approved() {
        "approved"
    } else {
        "rejected"
    };
    counter!(
        "risk_engine_decisions_total",
        "path" => path.as_str(),
        "status" => status,
        "reason" => reason
    )
    .increment(1);
}

/// Record a committed trade.
pub fn record_trade_executed(side: TradeSide) {
    counter!(
        "risk_engine_trades_executed_total",
        "side" => side.as_str()
    )
    .increment(1);
}

/// Record a lost compare-and-swap.
pub fn record_execution_conflict() {
    counter!("risk_engine_execution_conflicts_total").increment(1);
}

/// Record an updater cycle.
pub fn record_updater_cycle(outcome: &'static str) {
    counter!(
        "risk_engine_updater_cycles_total",
        "outcome" => outcome
    )
    .increment(1);
}

/// Record a failed store call.
pub fn record_store_error(operation: &'static str) {
    counter!(
        "risk_engine_store_errors_total",
        "operation" => operation
    )
    .increment(1);
}

/// Update the published market version.
#[allow(clippy::cast_precision_loss)]
pub fn set_market_version(version: u64) {
    gauge!("risk_engine_market_version").set(version as f64);
}

/// Record how long a validation took.
pub fn record_check_duration(path: DecisionPath, duration: Duration) {
    histogram!(
        "risk_engine_check_seconds",
        "path" => path.as_str()
    )
    .record(duration.as_secs_f64());
}

// =============================================================================
// Tests
// =============================================================================
