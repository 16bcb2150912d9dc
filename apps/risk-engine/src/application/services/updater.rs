//! Covariance Updater Task
//!
//! Background task that folds ticks into a per-asset buffer and, once per
//! interval, plans the next market state, publishes it to the store, and only
//! then adopts it. A quiet interval republishes the last pair with a fresh
//! `as_of` so readers can tell a quiet feed from a dead updater.
//!
//! # Cancellation
//!
//! The cancellation token is checked between cycles. A cycle that has
//! started publishing runs to completion, so the store never holds a
//! half-written matrix/price pair.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::bounded;
use crate::application::ports::{StateKey, StateStorePort, StoreError};
use crate::domain::covariance::{CovarianceError, DEFAULT_EWMA_DECAY};
use crate::domain::{AssetUniverse, CovarianceUpdater, CycleOutcome, Tick, TickBuffer};
use crate::infrastructure::metrics;

/// Updater timing and model parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdaterConfig {
    /// Time between cycles.
    pub interval: Duration,
    /// EWMA decay λ.
    pub decay: f64,
    /// Deadline for each store call.
    pub store_timeout: Duration,
}

impl Default for UpdaterConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            decay: DEFAULT_EWMA_DECAY,
            store_timeout: Duration::from_millis(500),
        }
    }
}

/// Errors starting the updater.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum UpdaterError {
    /// Invalid decay or mismatched stored state.
    #[error(transparent)]
    Covariance(#[from] CovarianceError),
    /// Stored market state could not be read.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Cycle counts accumulated over the task's lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdaterStats {
    /// Cycles that advanced the matrix.
    pub updated: u64,
    /// Cycles that only recorded baseline prices.
    pub baselines: u64,
    /// Quiet cycles that republished the last pair.
    pub refreshed: u64,
    /// Quiet cycles with nothing to republish.
    pub idle: u64,
    /// Cycles skipped on malformed ticks.
    pub skipped: u64,
    /// Cycles whose publish failed.
    pub publish_failures: u64,
}

impl UpdaterStats {
    /// Cycles that reached the store.
    #[must_use]
    pub const fn published(&self) -> u64 {
        self.updated + self.baselines + self.refreshed
    }
}

/// Owns a `CovarianceUpdater` and drives it from a tick channel.
pub struct UpdaterTask {
    updater: CovarianceUpdater,
    store: Arc<dyn StateStorePort>,
    ticks: mpsc::Receiver<Tick>,
    pending: TickBuffer,
    config: UpdaterConfig,
    cancel: CancellationToken,
    stats: UpdaterStats,
}

impl UpdaterTask {
    /// Create a task around an existing updater.
    #[must_use]
    pub fn new(
        updater: CovarianceUpdater,
        store: Arc<dyn StateStorePort>,
        ticks: mpsc::Receiver<Tick>,
        config: UpdaterConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            pending: updater.buffer(),
            updater,
            store,
            ticks,
            config,
            cancel,
            stats: UpdaterStats::default(),
        }
    }

    /// Create a task that continues from the store's market state, or from
    /// scratch when none has been published.
    ///
    /// # Errors
    ///
    /// Returns an error if the stored state cannot be read or does not fit
    /// the universe.
    pub async fn resume(
        universe: AssetUniverse,
        store: Arc<dyn StateStorePort>,
        ticks: mpsc::Receiver<Tick>,
        config: UpdaterConfig,
        cancel: CancellationToken,
    ) -> Result<Self, UpdaterError> {
        let initial = match bounded(
            config.store_timeout,
            StateKey::CurrentCovariance,
            "load_market",
            store.load_market(),
        )
        .await
        {
            Ok(market) => {
                tracing::info!(version = market.version, "Updater resuming from stored market state");
                Some(market.value.as_ref().clone())
            }
            Err(StoreError::Missing(_)) => {
                tracing::info!("No market state stored, updater starting from zero covariance");
                None
            }
            Err(e) => return Err(e.into()),
        };
        let updater = CovarianceUpdater::new(universe, config.decay, initial)?;
        Ok(Self::new(updater, store, ticks, config, cancel))
    }

    /// Counts so far.
    #[must_use]
    pub const fn stats(&self) -> UpdaterStats {
        self.stats
    }

    /// The in-memory updater state.
    #[must_use]
    pub const fn updater(&self) -> &CovarianceUpdater {
        &self.updater
    }

    /// Fold a tick into the next cycle.
    pub fn enqueue(&mut self, tick: &Tick) {
        self.pending.push(tick);
    }

    /// Run until cancelled or the tick channel closes.
    ///
    /// A due interval always runs its cycle before more ticks are taken, so a
    /// busy channel cannot hold cycles back. A closed channel flushes the
    /// buffered ticks as a final cycle.
    pub async fn run(mut self) -> UpdaterStats {
        let mut interval = tokio::time::interval(self.config.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        interval.tick().await;

        tracing::info!(
            interval_ms = self.config.interval.as_millis(),
            decay = self.updater.decay(),
            "Covariance updater started"
        );

        loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => {
                    tracing::info!(pending = self.pending.filled(), "Covariance updater cancelled");
                    break;
                }
                _ = interval.tick() => {
                    self.run_cycle().await;
                }
                tick = self.ticks.recv() => {
                    if let Some(tick) = tick {
                        self.enqueue(&tick);
                    } else {
                        tracing::info!("Tick channel closed, flushing final cycle");
                        self.run_cycle().await;
                        break;
                    }
                }
            }
        }

        tracing::info!(stats = ?self.stats, "Covariance updater stopped");
        self.stats
    }

    /// Plan, publish and commit one cycle from the buffered ticks.
    ///
    /// On a failed publish the in-memory state is left as it was and the
    /// cycle's ticks are discarded.
    pub async fn run_cycle(&mut self) -> CycleOutcome {
        let outcome = self.updater.plan_cycle(&self.pending, Utc::now());
        let assets = self.pending.filled();
        self.pending.clear();
        metrics::record_updater_cycle(outcome.label());

        match &outcome {
            CycleOutcome::Idle => self.stats.idle += 1,
            CycleOutcome::Skipped(rejection) => {
                self.stats.skipped += 1;
                tracing::warn!(assets, %rejection, "Skipping malformed covariance cycle");
            }
            CycleOutcome::Updated(state)
            | CycleOutcome::Baseline(state)
            | CycleOutcome::Refreshed(state) => {
                let published = bounded(
                    self.config.store_timeout,
                    StateKey::CurrentCovariance,
                    "publish_market",
                    self.store.publish_market(state.clone()),
                )
                .await;
                match published {
                    Ok(version) => {
                        self.updater.commit(state);
                        metrics::set_market_version(version);
                        match &outcome {
                            CycleOutcome::Updated(_) => self.stats.updated += 1,
                            CycleOutcome::Baseline(_) => self.stats.baselines += 1,
                            _ => self.stats.refreshed += 1,
                        }
                        tracing::debug!(version, kind = outcome.label(), assets, "Published market state");
                    }
                    Err(e) => {
                        self.stats.publish_failures += 1;
                        tracing::error!(error = %e, "Failed to publish market state");
                    }
                }
            }
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Portfolio, PriceSnapshot};
    use crate::infrastructure::persistence::InMemoryStateStore;
    use chrono::DateTime;
    use rust_decimal::Decimal;

    fn universe() -> AssetUniverse {
        AssetUniverse::new(["AAPL", "MSFT"]).unwrap()
    }

    fn store() -> Arc<InMemoryStateStore> {
        let universe = universe();
        let portfolio = Portfolio::new(Decimal::from(1_000), universe.len()).unwrap();
        Arc::new(InMemoryStateStore::new(universe, portfolio))
    }

    fn tick(asset: &str, price: f64, secs: i64) -> Tick {
        Tick::new(asset, price, DateTime::from_timestamp(secs, 0).unwrap())
    }

    async fn new_task(store: Arc<InMemoryStateStore>) -> (UpdaterTask, mpsc::Sender<Tick>, CancellationToken) {
        let (tx, rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();
        let task = UpdaterTask::resume(universe(), store, rx, UpdaterConfig::default(), cancel.clone())
            .await
            .unwrap();
        (task, tx, cancel)
    }

    #[tokio::test]
    async fn baseline_then_update_publishes_both() {
        let store = store();
        let (mut task, _tx, _cancel) = new_task(store.clone()).await;

        task.enqueue(&tick("AAPL", 100.0, 1));
        task.enqueue(&tick("MSFT", 50.0, 1));
        assert_eq!(task.run_cycle().await.label(), "baseline");

        task.enqueue(&tick("AAPL", 101.0, 2));
        assert_eq!(task.run_cycle().await.label(), "updated");

        let market = store.load_market().await.unwrap();
        assert_eq!(market.version, 2);
        assert!(market.value.covariance.as_matrix()[(0, 0)] > 0.0);
        assert_eq!(market.value.prices.latest(1), Some(50.0));
        assert_eq!(task.stats().published(), 2);
    }

    #[tokio::test]
    async fn malformed_cycle_leaves_store_untouched() {
        let store = store();
        let (mut task, _tx, _cancel) = new_task(store.clone()).await;

        task.enqueue(&tick("AAPL", 100.0, 1));
        task.enqueue(&tick("AAPL", f64::NAN, 2));
        assert_eq!(task.run_cycle().await.label(), "skipped");

        assert!(matches!(store.load_market().await, Err(StoreError::Missing(_))));
        assert_eq!(task.stats().skipped, 1);
    }

    #[tokio::test]
    async fn quiet_cycle_republishes_with_fresh_as_of() {
        let store = store();
        let (mut task, _tx, _cancel) = new_task(store.clone()).await;

        task.enqueue(&tick("AAPL", 100.0, 1));
        assert_eq!(task.run_cycle().await.label(), "baseline");
        let before = store.load_market().await.unwrap();

        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(task.run_cycle().await.label(), "refreshed");

        let after = store.load_market().await.unwrap();
        assert_eq!(after.version, before.version + 1);
        assert!(after.value.as_of > before.value.as_of);
        assert_eq!(after.value.prices, before.value.prices);
        assert_eq!(after.value.covariance, before.value.covariance);
        assert_eq!(task.stats().refreshed, 1);
        assert_eq!(task.stats().published(), 2);
    }

    #[tokio::test]
    async fn idle_cycle_publishes_nothing() {
        let store = store();
        let (mut task, _tx, _cancel) = new_task(store.clone()).await;
        assert_eq!(task.run_cycle().await, CycleOutcome::Idle);
        assert_eq!(task.stats().idle, 1);
    }

    #[tokio::test]
    async fn resume_continues_from_stored_prices() {
        let store = store();
        let seeded = crate::domain::MarketState::new(
            crate::domain::CovarianceMatrix::zeros(2),
            PriceSnapshot::baseline(vec![Some(100.0), Some(50.0)]).unwrap(),
            Utc::now(),
        )
        .unwrap();
        store.publish_market(seeded).await.unwrap();

        let (mut task, _tx, _cancel) = new_task(store.clone()).await;
        task.enqueue(&tick("MSFT", 55.0, 1));
        assert_eq!(task.run_cycle().await.label(), "updated");
    }

    #[tokio::test]
    async fn closed_channel_flushes_and_stops() {
        let store = store();
        let (task, tx, _cancel) = new_task(store.clone()).await;
        let handle = tokio::spawn(task.run());

        tx.send(tick("AAPL", 100.0, 1)).await.unwrap();
        tx.send(tick("MSFT", 50.0, 1)).await.unwrap();
        drop(tx);

        let stats = tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stats.baselines, 1);
        assert!(store.load_market().await.is_ok());
    }

    #[tokio::test]
    async fn cancellation_stops_task() {
        let store = store();
        let (task, _tx, cancel) = new_task(store).await;
        let handle = tokio::spawn(task.run());

        cancel.cancel();
        let result = tokio::time::timeout(Duration::from_millis(500), handle).await;
        assert!(result.is_ok());
    }
}
