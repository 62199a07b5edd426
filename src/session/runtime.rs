// =============================================================================
// Session Runtime — connector subscribers that feed the confluence engine
// =============================================================================
//
// Candle batches replace the buffered trade series (sorted, last
// `retention` bars) on the connector's loop, so the series has a single
// writer.  Live updates only nudge a dedicated evaluator task through a
// one-slot channel: the connector never awaits the validator, evaluations
// run one at a time, and updates that arrive while one is pending collapse
// into a single follow-up evaluation.
// =============================================================================

use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::engine::{ConfluenceEngine, EvaluationContext, Signal};
use crate::feed::Subscriber;
use crate::market_data::{aggregate, higher_timeframe, to_series, truncate, Candle};
use crate::types::MarketType;
use crate::validator::AiValidator;

use super::report::format_signal;

/// Where accepted signals go.
#[async_trait]
pub trait SignalSink: Send + Sync {
    async fn deliver(&self, signal: &Signal, market: MarketType) -> Result<()>;
}

/// Prints the text report to stdout.
pub struct ConsoleSink;

#[async_trait]
impl SignalSink for ConsoleSink {
    async fn deliver(&self, signal: &Signal, market: MarketType) -> Result<()> {
        println!("\n{}\n", format_signal(signal, market));
        Ok(())
    }
}

/// Shared, bounded trade series for one session.
pub type SharedSeries = Arc<RwLock<Vec<Candle>>>;

/// Replaces the trade series with each fetched batch.
pub struct SeriesWriter {
    series: SharedSeries,
    retention: usize,
}

impl SeriesWriter {
    pub fn new(series: SharedSeries, retention: usize) -> Self {
        Self { series, retention }
    }
}

#[async_trait]
impl Subscriber<Vec<Candle>> for SeriesWriter {
    async fn notify(&self, batch: &Vec<Candle>) -> Result<()> {
        let fresh = truncate(to_series(batch.iter().cloned()), self.retention);
        debug!(bars = fresh.len(), "trade series refreshed");
        *self.series.write() = fresh;
        Ok(())
    }
}

/// Runs one evaluation per live update and forwards accepted signals.
pub struct Evaluator {
    ctx: EvaluationContext,
    series: SharedSeries,
    engine: Arc<ConfluenceEngine>,
    validator: Arc<AiValidator>,
    sink: Arc<dyn SignalSink>,
    stop: watch::Receiver<bool>,
}

impl Evaluator {
    pub fn new(
        ctx: EvaluationContext,
        series: SharedSeries,
        engine: Arc<ConfluenceEngine>,
        validator: Arc<AiValidator>,
        sink: Arc<dyn SignalSink>,
        stop: watch::Receiver<bool>,
    ) -> Self {
        Self {
            ctx,
            series,
            engine,
            validator,
            sink,
            stop,
        }
    }

    /// Evaluate the current series once; delivers at most one signal.
    pub async fn evaluate_once(&self) -> Result<Option<Signal>> {
        let trade = self.series.read().clone();
        if trade.is_empty() {
            return Ok(None);
        }
        let confirm = aggregate(&trade, higher_timeframe(self.ctx.expiry_seconds));

        let Some(signal) = self
            .engine
            .evaluate(&self.ctx, &trade, &confirm, &self.validator)
            .await
        else {
            return Ok(None);
        };

        if *self.stop.borrow() {
            info!(id = %signal.id, "session stopped during validation, signal discarded");
            return Ok(None);
        }

        self.sink.deliver(&signal, self.ctx.market).await?;
        Ok(Some(signal))
    }

    /// Move the evaluator onto its own task.  The returned trigger is the
    /// update subscriber; the task ends on the stop signal or once every
    /// trigger is dropped.
    pub fn spawn(self) -> (EvaluationTrigger, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(1);
        let task = tokio::spawn(self.run(rx));
        (EvaluationTrigger { tx }, task)
    }

    async fn run(self, mut triggers: mpsc::Receiver<()>) {
        let mut stop = self.stop.clone();
        loop {
            if *stop.borrow() {
                break;
            }
            tokio::select! {
                biased;
                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
                        break;
                    }
                }
                trigger = triggers.recv() => {
                    if trigger.is_none() {
                        break;
                    }
                    if let Err(e) = self.evaluate_once().await {
                        error!(asset = %self.ctx.asset, error = %e, "evaluation failed");
                    }
                }
            }
        }
        debug!(asset = %self.ctx.asset, "evaluator stopped");
    }
}

/// Update subscriber that requests an evaluation without waiting for it.
pub struct EvaluationTrigger {
    tx: mpsc::Sender<()>,
}

#[async_trait]
impl Subscriber<serde_json::Value> for EvaluationTrigger {
    async fn notify(&self, _update: &serde_json::Value) -> Result<()> {
        match self.tx.try_send(()) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(())) => {
                debug!("evaluation already pending, update coalesced");
                Ok(())
            }
            Err(TrySendError::Closed(())) => Err(anyhow!("evaluator task has stopped")),
        }
    }
}
