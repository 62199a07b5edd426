// =============================================================================
// Stream Connector — keeps one asset/timeframe feed alive and fresh
// =============================================================================
//
// State machine:
//
//   Disconnected → Connecting → Connected → Streaming
//                                              │  ▲
//                               (disconnected) ▼  │ (reconnect ok)
//                                           Reconnecting
//
//   Any state → Stopped once the stop signal is observed.
//
// While streaming the connector requests the latest N bars every
// clamp(timeframe / 2, 2, 10) seconds and forwards every non-empty batch to
// the candle subscribers.  Fetch failures are logged and the loop keeps its
// cadence; they never change the connection state.  Update subscribers run
// on the same loop and must hand long work off to their own task.
// =============================================================================

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::{broadcast, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use super::publisher::{Publisher, Subscriber};
use super::{FeedEvent, MarketFeed};
use crate::market_data::{Candle, SeriesKey};

/// Default number of bars requested per refresh.
pub const DEFAULT_HISTORY_COUNT: u32 = 200;

const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Streaming,
    Reconnecting,
    Stopped,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Streaming => "streaming",
            Self::Reconnecting => "reconnecting",
            Self::Stopped => "stopped",
        };
        f.write_str(label)
    }
}

/// Refresh cadence for a bar interval: half the timeframe, clamped to 2–10 s.
pub fn refresh_interval(timeframe_seconds: u32) -> Duration {
    Duration::from_secs(u64::from((timeframe_seconds / 2).clamp(2, 10)))
}

/// Owns the live connection for one (asset, timeframe) pair.
pub struct StreamConnector {
    feed: Arc<dyn MarketFeed>,
    key: SeriesKey,
    history_count: u32,
    refresh_every: Duration,
    reconnect_delay: Duration,
    state: Arc<RwLock<ConnectionState>>,
    candle_subscribers: Publisher<Vec<Candle>>,
    update_subscribers: Publisher<serde_json::Value>,
}

impl StreamConnector {
    pub fn new(feed: Arc<dyn MarketFeed>, asset: impl Into<String>, timeframe_seconds: u32) -> Self {
        Self {
            feed,
            key: SeriesKey::new(asset, timeframe_seconds),
            history_count: DEFAULT_HISTORY_COUNT,
            refresh_every: refresh_interval(timeframe_seconds),
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            candle_subscribers: Publisher::new("candles"),
            update_subscribers: Publisher::new("updates"),
        }
    }

    pub fn with_history_count(mut self, count: u32) -> Self {
        self.history_count = count;
        self
    }

    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    pub fn add_candle_subscriber(&mut self, subscriber: Arc<dyn Subscriber<Vec<Candle>>>) {
        self.candle_subscribers.add(subscriber);
    }

    pub fn add_update_subscriber(&mut self, subscriber: Arc<dyn Subscriber<serde_json::Value>>) {
        self.update_subscribers.add(subscriber);
    }

    pub fn key(&self) -> &SeriesKey {
        &self.key
    }

    pub fn refresh_every(&self) -> Duration {
        self.refresh_every
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    /// Shared read handle so other tasks can report the connection state.
    pub fn state_handle(&self) -> Arc<RwLock<ConnectionState>> {
        self.state.clone()
    }

    fn set_state(&self, next: ConnectionState) {
        let prev = std::mem::replace(&mut *self.state.write(), next);
        if prev != next {
            debug!(series = %self.key, from = %prev, to = %next, "connection state changed");
        }
    }

    // -------------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------------

    /// Open the feed.  A failure leaves the connector `Disconnected` and is
    /// not retried here.
    pub async fn connect(&self) -> Result<()> {
        self.set_state(ConnectionState::Connecting);
        match self.feed.connect().await {
            Ok(true) => {
                self.set_state(ConnectionState::Connected);
                info!(series = %self.key, "feed connected");
                Ok(())
            }
            Ok(false) => {
                self.set_state(ConnectionState::Disconnected);
                error!(series = %self.key, "feed refused connection");
                bail!("market feed refused connection for {}", self.key)
            }
            Err(e) => {
                self.set_state(ConnectionState::Disconnected);
                error!(series = %self.key, error = %e, "feed connection failed");
                Err(e.context(format!("market feed connection failed for {}", self.key)))
            }
        }
    }

    /// Release the transport.  Idempotent.
    pub async fn disconnect(&self) {
        self.feed.disconnect().await;
        self.set_state(ConnectionState::Disconnected);
    }

    /// Connect, stream until stopped, then disconnect.
    pub async fn run(&self, mut stop: watch::Receiver<bool>) -> Result<()> {
        if let Err(e) = self.connect().await {
            self.disconnect().await;
            return Err(e);
        }
        self.stream_until_stopped(&mut stop).await;
        Ok(())
    }

    /// Stream on an already connected feed, then disconnect and mark the
    /// connector `Stopped`.
    pub async fn stream_until_stopped(&self, stop: &mut watch::Receiver<bool>) {
        self.subscribe(stop).await;
        self.disconnect().await;
        self.set_state(ConnectionState::Stopped);
        info!(series = %self.key, "stream stopped");
    }

    /// Refresh loop.  Returns when the stop signal is observed (or its sender
    /// is dropped).
    pub async fn subscribe(&self, stop: &mut watch::Receiver<bool>) {
        if self.state() != ConnectionState::Connected {
            warn!(series = %self.key, state = %self.state(), "subscribe called without a connection");
            return;
        }

        let mut events = self.feed.events();
        let mut events_open = true;
        let mut ticker = tokio::time::interval(self.refresh_every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.set_state(ConnectionState::Streaming);

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
                _ = ticker.tick() => self.refresh().await,
                event = events.recv(), if events_open => match event {
                    Ok(FeedEvent::StreamUpdate(payload)) => {
                        self.update_subscribers.publish(&payload).await;
                    }
                    Ok(FeedEvent::CandlesReceived { count }) => {
                        debug!(series = %self.key, count, "candles received");
                    }
                    Ok(FeedEvent::Disconnected { reason }) => {
                        warn!(series = %self.key, reason = %reason, "feed disconnected");
                        if !self.reconnect(stop).await {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(series = %self.key, skipped, "feed events lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        warn!(series = %self.key, "feed event channel closed; polling only");
                        events_open = false;
                    }
                },
            }
        }
    }

    /// One history request; non-empty batches go to the candle subscribers.
    async fn refresh(&self) {
        match self
            .feed
            .get_candles(&self.key.asset, self.key.timeframe, self.history_count)
            .await
        {
            Ok(candles) if candles.is_empty() => {
                debug!(series = %self.key, "empty candle batch");
            }
            Ok(candles) => {
                let failures = self.candle_subscribers.publish(&candles).await;
                debug!(series = %self.key, count = candles.len(), failures, "candle batch delivered");
            }
            Err(e) => {
                warn!(series = %self.key, error = %e, "candle fetch failed; will retry");
            }
        }
    }

    /// Re-open the feed after a transport drop.  Retries until it succeeds
    /// (returns `true`) or the stop signal arrives (returns `false`).
    async fn reconnect(&self, stop: &mut watch::Receiver<bool>) -> bool {
        self.set_state(ConnectionState::Reconnecting);
        loop {
            tokio::select! {
                biased;
                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
                        return false;
                    }
                    continue;
                }
                _ = tokio::time::sleep(self.reconnect_delay) => {}
            }

            match self.feed.connect().await {
                Ok(true) => {
                    info!(series = %self.key, "feed reconnected");
                    self.set_state(ConnectionState::Streaming);
                    return true;
                }
                Ok(false) => warn!(series = %self.key, "feed refused reconnection; retrying"),
                Err(e) => warn!(series = %self.key, error = %e, "reconnect failed; retrying"),
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
