//! JSON Lines Command Adapter
//!
//! Reads one JSON message per line and writes one JSON response per line.
//! Messages are tagged by `"type"`:
//!
//! ```text
//! {"type":"tick","asset":"AAPL","price":187.2,"timestamp":"2024-01-02T15:30:00Z"}
//! {"type":"check","ticker":"AAPL","quantity":10,"side":"BUY"}
//! {"type":"execute","ticker":"AAPL","quantity":10,"side":"BUY"}
//! {"type":"report"}
//! {"type":"stress"}
//! ```
//!
//! Ticks are forwarded to the covariance updater; everything else is
//! answered by the risk engine. Requests are handled in arrival order.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::application::services::{ExecutionError, ExecutionReceipt, RiskEngine};
use crate::domain::{AssetId, Decision, RejectionReason, RiskReport, StressResult, Tick, TradeCommand};

/// Errors that end the session.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Reading or writing the stream failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// A response could not be encoded.
    #[error("failed to encode response: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Inbound request.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundMessage {
    /// Price observation for the updater.
    Tick(Tick),
    /// Validate a trade without committing.
    Check(TradeCommand),
    /// Validate and commit a trade.
    Execute(TradeCommand),
    /// Portfolio risk report.
    Report,
    /// Stress VaR of the current book.
    Stress,
}

/// Outbound response, one per inbound line.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundMessage {
    /// Tick queued for the next cycle.
    TickAccepted {
        /// Observed asset.
        asset: AssetId,
    },
    /// Result of a check.
    Decision(Decision),
    /// Trade committed.
    Executed(ExecutionReceipt),
    /// Trade not committed.
    ExecutionFailed {
        /// Rejection reason, when one applies.
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<RejectionReason>,
        /// Whether re-checking and retrying may succeed.
        retryable: bool,
        /// Human-readable cause.
        message: String,
        /// Re-validation decision, when the trade was rejected.
        #[serde(skip_serializing_if = "Option::is_none")]
        decision: Option<Box<Decision>>,
    },
    /// Risk report.
    Report(RiskReport),
    /// Stress test result.
    Stress(StressResult),
    /// Malformed or unanswerable request.
    Error {
        /// Human-readable cause.
        message: String,
    },
}

impl OutboundMessage {
    fn error(message: impl ToString) -> Self {
        Self::Error {
            message: message.to_string(),
        }
    }
}

impl From<ExecutionError> for OutboundMessage {
    fn from(error: ExecutionError) -> Self {
        let reason = error.reason();
        let retryable = error.is_retryable();
        let message = error.to_string();
        let decision = match error {
            ExecutionError::Rejected(decision) => Some(decision),
            _ => None,
        };
        Self::ExecutionFailed {
            reason,
            retryable,
            message,
            decision,
        }
    }
}

/// Counts for a finished session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    /// Lines answered.
    pub handled: u64,
    /// Lines that could not be parsed.
    pub malformed: u64,
}

/// Serve requests until the input ends or `cancel` fires.
///
/// # Errors
///
/// Returns an error if the stream cannot be read or written.
pub async fn serve_lines<R, W>(
    reader: R,
    mut writer: W,
    engine: Arc<RiskEngine>,
    ticks: mpsc::Sender<Tick>,
    cancel: CancellationToken,
) -> Result<SessionStats, ProtocolError>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = reader.lines();
    let mut stats = SessionStats::default();

    loop {
        let line = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                tracing::info!("Line protocol cancelled");
                break;
            }
            line = lines.next_line() => line?,
        };
        let Some(line) = line else {
            tracing::info!(handled = stats.handled, "Input closed");
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let response = match serde_json::from_str::<InboundMessage>(line) {
            Ok(message) => handle(&engine, &ticks, message).await,
            Err(e) => {
                stats.malformed += 1;
                tracing::warn!(error = %e, "Malformed request line");
                OutboundMessage::error(format!("malformed request: {e}"))
            }
        };

        let mut encoded = serde_json::to_vec(&response)?;
        encoded.push(b'\n');
        writer.write_all(&encoded).await?;
        writer.flush().await?;
        stats.handled += 1;
    }

    Ok(stats)
}

/// Answer one request.
pub async fn handle(
    engine: &RiskEngine,
    ticks: &mpsc::Sender<Tick>,
    message: InboundMessage,
) -> OutboundMessage {
    match message {
        InboundMessage::Tick(tick) => {
            if engine.universe().index_of(&tick.asset).is_none() {
                return OutboundMessage::error(format!("unknown asset: {}", tick.asset));
            }
            let asset = tick.asset.clone();
            match ticks.send(tick).await {
                Ok(()) => OutboundMessage::TickAccepted { asset },
                Err(_) => OutboundMessage::error("covariance updater is not running"),
            }
        }
        InboundMessage::Check(command) => match engine.check_trade_impact(&command).await {
            Ok(decision) => OutboundMessage::Decision(decision),
            Err(e) => OutboundMessage::error(e),
        },
        InboundMessage::Execute(command) => match engine.execute_trade(&command).await {
            Ok(receipt) => OutboundMessage::Executed(receipt),
            Err(e) => e.into(),
        },
        InboundMessage::Report => match engine.portfolio_report().await {
            Ok(report) => OutboundMessage::Report(report),
            Err(e) => OutboundMessage::error(e),
        },
        InboundMessage::Stress => match engine.stress_test().await {
            Ok(result) => OutboundMessage::Stress(result),
            Err(e) => OutboundMessage::error(e),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ports::StateStorePort;
    use crate::application::services::RiskEngineSettings;
    use crate::domain::{AssetUniverse, CovarianceMatrix, MarketState, Portfolio, PriceSnapshot};
    use crate::infrastructure::persistence::InMemoryStateStore;
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use serde_json::Value;

    async fn engine() -> Arc<RiskEngine> {
        let universe = AssetUniverse::new(["AAPL", "MSFT"]).unwrap();
        let store = Arc::new(InMemoryStateStore::new(
            universe.clone(),
            Portfolio::new(dec!(10_000), 2).unwrap(),
        ));
        let market = MarketState::new(
            CovarianceMatrix::from_variances(&[0.0004, 0.0001]).unwrap(),
            PriceSnapshot::baseline(vec![Some(100.0), Some(50.0)]).unwrap(),
            Utc::now(),
        )
        .unwrap();
        store.publish_market(market).await.unwrap();
        let settings = RiskEngineSettings {
            max_market_age: None,
            ..RiskEngineSettings::default()
        };
        Arc::new(RiskEngine::new(store, universe, settings))
    }

    async fn run(input: &str) -> (Vec<Value>, SessionStats, mpsc::Receiver<Tick>) {
        let (tx, rx) = mpsc::channel(8);
        let mut out = Vec::new();
        let stats = serve_lines(input.as_bytes(), &mut out, engine().await, tx, CancellationToken::new())
            .await
            .unwrap();
        let responses = String::from_utf8(out)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        (responses, stats, rx)
    }

    #[test]
    fn inbound_messages_parse_by_type() {
        let tick: InboundMessage =
            serde_json::from_str(r#"{"type":"tick","ticker":"AAPL","price":101.5}"#).unwrap();
        assert!(matches!(tick, InboundMessage::Tick(t) if t.price == 101.5));

        let check: InboundMessage =
            serde_json::from_str(r#"{"type":"check","ticker":"MSFT","qty":3,"side":"sell"}"#).unwrap();
        assert_eq!(check, InboundMessage::Check(TradeCommand::sell("MSFT", 3)));

        let report: InboundMessage = serde_json::from_str(r#"{"type":"report"}"#).unwrap();
        assert_eq!(report, InboundMessage::Report);
    }

    #[tokio::test]
    async fn one_response_per_line() {
        let input = concat!(
            r#"{"type":"check","ticker":"AAPL","quantity":10,"side":"BUY"}"#, "\n",
            "\n",
            "not json\n",
            r#"{"type":"tick","asset":"MSFT","price":51.0}"#, "\n",
            r#"{"type":"report"}"#, "\n",
        );
        let (responses, stats, mut rx) = run(input).await;

        assert_eq!(responses.len(), 4);
        assert_eq!(stats, SessionStats { handled: 4, malformed: 1 });
        assert_eq!(responses[0]["type"], "decision");
        assert_eq!(responses[0]["status"], "APPROVED");
        assert_eq!(responses[1]["type"], "error");
        assert_eq!(responses[2]["type"], "tick_accepted");
        assert_eq!(responses[3]["type"], "report");
        assert_eq!(rx.recv().await.unwrap().asset, AssetId::new("MSFT"));
    }

    #[tokio::test]
    async fn execute_reports_rejection_reason() {
        let input = concat!(
            r#"{"type":"execute","ticker":"MSFT","quantity":5,"side":"SELL"}"#, "\n",
            r#"{"type":"execute","ticker":"AAPL","quantity":1,"side":"BUY"}"#, "\n",
        );
        let (responses, _, _) = run(input).await;

        assert_eq!(responses[0]["type"], "execution_failed");
        assert_eq!(responses[0]["reason"], "INSUFFICIENT_INVENTORY");
        assert_eq!(responses[0]["retryable"], false);
        assert_eq!(responses[1]["type"], "executed");
        assert_eq!(responses[1]["holding_after"]["quantity"], 1);
    }

    #[tokio::test]
    async fn stress_without_matrix_is_an_error() {
        let (responses, _, _) = run("{\"type\":\"stress\"}\n").await;
        assert_eq!(responses[0]["type"], "error");
    }

    #[tokio::test]
    async fn tick_for_unknown_asset_is_refused() {
        let (responses, _, mut rx) = run("{\"type\":\"tick\",\"asset\":\"TSLA\",\"price\":1.0}\n").await;
        assert_eq!(responses[0]["type"], "error");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn closed_updater_channel_is_reported() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let engine = engine().await;
        let response = handle(&engine, &tx, InboundMessage::Tick(Tick::new("AAPL", 1.0, Utc::now()))).await;
        assert!(matches!(response, OutboundMessage::Error { .. }));
    }
}
