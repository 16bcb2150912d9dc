//! Application Services
//!
//! Services that orchestrate domain logic over the state store port.
//!
//! - `RiskEngine`: Trade validation, execution, reports and stress tests
//! - `UpdaterTask`: Background EWMA covariance updater

use std::future::Future;
use std::time::Duration;

use crate::application::ports::{StateKey, StoreError};
use crate::infrastructure::metrics;

mod risk_engine;
mod updater;

pub use risk_engine::{
    ExecutionError, ExecutionReceipt, LiquiditySettings, RiskEngine, RiskEngineSettings,
    SnapshotError,
};
pub use updater::{UpdaterConfig, UpdaterError, UpdaterStats, UpdaterTask};

/// Run a store call with a deadline, mapping expiry to `StoreError::Timeout`.
pub(crate) async fn bounded<T, F>(
    timeout: Duration,
    key: StateKey,
    operation: &'static str,
    call: F,
) -> Result<T, StoreError>
where
    F: Future<Output = Result<T, StoreError>>,
{
    let result = tokio::time::timeout(timeout, call)
        .await
        .unwrap_or(Err(StoreError::Timeout(key)));
    if let Err(e) = &result
        && !e.is_conflict()
    {
        metrics::record_store_error(operation);
    }
    result
}
