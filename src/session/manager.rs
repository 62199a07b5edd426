// =============================================================================
// Session Manager — one typed session per user, explicit start / stop
// =============================================================================
//
// `start` builds a feed, connector and evaluator for a `SessionSpec`,
// connects (a failure is returned to the caller, never retried) and spawns
// the streaming loop next to the evaluator task.  `stop` signals both, waits
// briefly for each to unwind and aborts it otherwise.  Sessions share only
// the validator and its rate limiter.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, instrument, warn};

use crate::config::Settings;
use crate::engine::{ConfluenceEngine, EvaluationContext};
use crate::feed::{BinanceFeed, ConnectionState, MarketFeed, StreamConnector};
use crate::validator::AiValidator;

use super::runtime::{Evaluator, SeriesWriter, SharedSeries, SignalSink};
use super::wizard::SessionSpec;

pub type UserId = i64;

/// Grace period for a stopping loop before it is aborted.
const STOP_GRACE: Duration = Duration::from_secs(2);

// =============================================================================
// Feed construction
// =============================================================================

/// Builds the transport for one session.
pub trait FeedFactory: Send + Sync {
    fn create(&self, asset: &str, timeframe_seconds: u32) -> Result<Arc<dyn MarketFeed>>;
}

impl<F> FeedFactory for F
where
    F: Fn(&str, u32) -> Result<Arc<dyn MarketFeed>> + Send + Sync,
{
    fn create(&self, asset: &str, timeframe_seconds: u32) -> Result<Arc<dyn MarketFeed>> {
        self(asset, timeframe_seconds)
    }
}

/// Binance feeds from the endpoint settings.
pub struct BinanceFeedFactory {
    rest_url: String,
    ws_url: String,
    credential: Option<String>,
}

impl BinanceFeedFactory {
    pub fn from_settings(settings: &Settings) -> Self {
        let (rest_url, ws_url) = settings.feed_endpoints();
        Self {
            rest_url,
            ws_url,
            credential: settings.feed_ssid.clone(),
        }
    }
}

impl FeedFactory for BinanceFeedFactory {
    fn create(&self, asset: &str, timeframe_seconds: u32) -> Result<Arc<dyn MarketFeed>> {
        let feed = BinanceFeed::new(
            self.rest_url.clone(),
            self.ws_url.clone(),
            self.credential.clone(),
            asset,
            timeframe_seconds,
        )?;
        Ok(Arc::new(feed) as Arc<dyn MarketFeed>)
    }
}

// =============================================================================
// Sessions
// =============================================================================

struct ActiveSession {
    spec: SessionSpec,
    series: SharedSeries,
    state: Arc<RwLock<ConnectionState>>,
    feed: Arc<dyn MarketFeed>,
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
    evaluator: JoinHandle<()>,
}

/// What `/status` reports.
#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    pub spec: SessionSpec,
    pub candles: usize,
    pub state: ConnectionState,
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Session: {} {} @ {}s | candles={} | state={}",
            self.spec.asset, self.spec.market, self.spec.expiry_seconds, self.candles, self.state
        )
    }
}

pub struct SessionManager {
    factory: Arc<dyn FeedFactory>,
    engine: Arc<ConfluenceEngine>,
    validator: Arc<AiValidator>,
    sink: Arc<dyn SignalSink>,
    history_count: u32,
    retention: usize,
    reconnect_delay: Duration,
    sessions: Mutex<HashMap<UserId, ActiveSession>>,
}

impl SessionManager {
    pub fn new(
        settings: &Settings,
        factory: Arc<dyn FeedFactory>,
        validator: Arc<AiValidator>,
        sink: Arc<dyn SignalSink>,
    ) -> Self {
        Self {
            factory,
            engine: Arc::new(ConfluenceEngine::new(settings.engine.clone())),
            validator,
            sink,
            history_count: settings.history_count,
            retention: settings.retention_bars,
            reconnect_delay: settings.reconnect_delay(),
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Start streaming `spec` for `user`, replacing any running session.
    #[instrument(skip(self, spec), name = "session::start", fields(asset = %spec.asset, class = %spec.asset_class, expiry = spec.expiry_seconds))]
    pub async fn start(&self, user: UserId, spec: SessionSpec) -> Result<()> {
        self.stop(user).await;

        let feed = self
            .factory
            .create(&spec.asset, spec.expiry_seconds)
            .context("failed to create market feed")?;

        let series: SharedSeries = Arc::default();
        let (stop_tx, mut stop_rx) = watch::channel(false);

        let ctx = EvaluationContext {
            market: spec.market,
            asset: spec.asset.clone(),
            expiry_seconds: spec.expiry_seconds,
        };

        let mut connector = StreamConnector::new(feed.clone(), spec.asset.clone(), spec.expiry_seconds)
            .with_history_count(self.history_count)
            .with_reconnect_delay(self.reconnect_delay);
        let (trigger, evaluator) = Evaluator::new(
            ctx,
            series.clone(),
            self.engine.clone(),
            self.validator.clone(),
            self.sink.clone(),
            stop_rx.clone(),
        )
        .spawn();
        connector.add_candle_subscriber(Arc::new(SeriesWriter::new(series.clone(), self.retention)));
        connector.add_update_subscriber(Arc::new(trigger));

        if let Err(e) = connector.connect().await {
            evaluator.abort();
            return Err(e.context("failed to connect to market feed"));
        }

        info!(
            user,
            series = %connector.key(),
            refresh_secs = connector.refresh_every().as_secs(),
            "session started"
        );
        let state = connector.state_handle();
        let task = tokio::spawn(async move {
            connector.stream_until_stopped(&mut stop_rx).await;
        });

        self.sessions.lock().insert(
            user,
            ActiveSession {
                spec,
                series,
                state,
                feed,
                stop_tx,
                task,
                evaluator,
            },
        );
        Ok(())
    }

    /// Stop `user`'s session.  Returns `false` when there was none.
    #[instrument(skip(self), name = "session::stop")]
    pub async fn stop(&self, user: UserId) -> bool {
        let Some(mut session) = self.sessions.lock().remove(&user) else {
            return false;
        };

        let _ = session.stop_tx.send(true);
        if tokio::time::timeout(STOP_GRACE, &mut session.task).await.is_err() {
            warn!(user, "session loop did not stop in time, aborting");
            session.task.abort();
            session.feed.disconnect().await;
        }
        if tokio::time::timeout(STOP_GRACE, &mut session.evaluator).await.is_err() {
            info!(user, "evaluation still in flight, aborting");
            session.evaluator.abort();
        }

        info!(user, asset = %session.spec.asset, "session stopped");
        true
    }

    pub fn status(&self, user: UserId) -> Option<SessionStatus> {
        self.sessions.lock().get(&user).map(|s| SessionStatus {
            spec: s.spec.clone(),
            candles: s.series.read().len(),
            state: *s.state.read(),
        })
    }

    pub async fn stop_all(&self) {
        let users: Vec<UserId> = self.sessions.lock().keys().copied().collect();
        for user in users {
            self.stop(user).await;
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::connector::tests::FakeFeed;
    use crate::session::runtime::tests::{rising_bars, RecordingSink};
    use crate::feed::FeedEvent;
    use crate::types::{AssetClass, MarketType};
    use crate::validator::tests::FakeCompletion;
    use std::sync::atomic::Ordering;

    struct Harness {
        manager: SessionManager,
        feeds: Arc<Mutex<Vec<Arc<FakeFeed>>>>,
        sink: Arc<RecordingSink>,
    }

    fn harness(connect_ok: bool, reply: &str) -> Harness {
        harness_with(connect_ok, FakeCompletion::replying(reply))
    }

    fn harness_with(connect_ok: bool, completion: FakeCompletion) -> Harness {
        let feeds: Arc<Mutex<Vec<Arc<FakeFeed>>>> = Arc::default();
        let made = feeds.clone();
        let factory = move |_asset: &str, _tf: u32| -> Result<Arc<dyn MarketFeed>> {
            let feed = Arc::new(FakeFeed::new(connect_ok));
            feed.push_batch(Ok(rising_bars(80)));
            made.lock().push(feed.clone());
            Ok(feed as Arc<dyn MarketFeed>)
        };
        let validator = AiValidator::new(
            Arc::new(completion),
            Duration::from_secs(3),
            Duration::from_secs(30),
        )
        .unwrap();
        let sink = Arc::new(RecordingSink::default());
        let manager = SessionManager::new(
            &Settings::default(),
            Arc::new(factory),
            Arc::new(validator),
            sink.clone(),
        );
        Harness { manager, feeds, sink }
    }

    fn spec() -> SessionSpec {
        SessionSpec {
            market: MarketType::Real,
            asset_class: AssetClass::Crypto,
            asset: "BTCUSD".to_string(),
            expiry_seconds: 60,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn start_status_stop() {
        let h = harness(true, "CALL|82");
        h.manager.start(7, spec()).await.unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        let status = h.manager.status(7).expect("status");
        assert_eq!(status.candles, 80);
        assert_eq!(status.state, ConnectionState::Streaming);
        assert_eq!(
            status.to_string(),
            "Session: BTCUSD REAL @ 60s | candles=80 | state=streaming"
        );

        assert!(h.manager.stop(7).await);
        assert!(h.manager.status(7).is_none());
        assert!(!h.manager.stop(7).await);
        assert_eq!(h.feeds.lock()[0].disconnects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn connect_failure_is_reported() {
        let h = harness(false, "CALL|82");
        let err = h.manager.start(1, spec()).await.unwrap_err();
        assert!(format!("{err:#}").contains("failed to connect"));
        assert!(h.manager.status(1).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn live_update_produces_signal() {
        let h = harness(true, "CALL|82");
        h.manager.start(3, spec()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let feed = h.feeds.lock()[0].clone();
        feed.events.send(FeedEvent::StreamUpdate(serde_json::json!({ "k": {} }))).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let signals = h.sink.signals.lock().clone();
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].asset, "BTCUSD");

        h.manager.stop_all().await;
    }

    #[tokio::test(start_paused = true)]
    async fn stop_during_validation_discards_signal() {
        let h = harness_with(true, FakeCompletion::replying("CALL|82").with_delay(Duration::from_secs(20)));
        h.manager.start(4, spec()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let feed = h.feeds.lock()[0].clone();
        feed.events.send(FeedEvent::StreamUpdate(serde_json::json!({ "k": {} }))).unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;

        let t0 = tokio::time::Instant::now();
        assert!(h.manager.stop(4).await);
        assert!(tokio::time::Instant::now() - t0 < STOP_GRACE + Duration::from_millis(500));
        assert_eq!(feed.disconnects.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(h.sink.signals.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn restart_replaces_previous_session() {
        let h = harness(true, "NO_TRADE|0");
        h.manager.start(9, spec()).await.unwrap();
        let mut other = spec();
        other.asset = "ETHUSD".to_string();
        h.manager.start(9, other).await.unwrap();

        assert_eq!(h.manager.status(9).unwrap().spec.asset, "ETHUSD");
        assert_eq!(h.feeds.lock().len(), 2);
        assert_eq!(h.feeds.lock()[0].disconnects.load(Ordering::SeqCst), 1);

        h.manager.stop_all().await;
    }
}
