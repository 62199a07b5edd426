// =============================================================================
// Binance Feed — REST klines for history, kline WebSocket for live updates
// =============================================================================
//
// Timeframes that are not native Binance intervals (5 s, 15 s, 30 s, ...)
// are fetched on the largest native interval that divides them and bucketed
// locally with the series aggregator.  Such requests need `count × factor`
// raw rows, more than one klines call returns, so history is paged backwards
// with `endTime`.
//
// SECURITY: the credential is sent as the X-MBX-APIKEY header and never
// logged or serialized.
// =============================================================================

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures_util::StreamExt;
use parking_lot::Mutex;
use reqwest::header::{HeaderMap, HeaderValue};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tracing::{debug, error, info, instrument, warn};

use super::{FeedEvent, MarketFeed};
use crate::market_data::{aggregate, Candle};

/// Native kline intervals, (seconds, Binance code), ascending.
const NATIVE_INTERVALS: &[(u32, &str)] = &[
    (1, "1s"),
    (60, "1m"),
    (180, "3m"),
    (300, "5m"),
    (900, "15m"),
    (1800, "30m"),
    (3600, "1h"),
];

/// Binance caps a klines request at this many rows.
const MAX_KLINES_LIMIT: u32 = 1000;

/// Upper bound on klines requests per history fetch.
const MAX_KLINES_PAGES: usize = 10;

const EVENT_CAPACITY: usize = 256;

/// Largest native interval that evenly divides `timeframe_seconds`.
pub fn native_interval(timeframe_seconds: u32) -> Option<(u32, &'static str)> {
    if timeframe_seconds == 0 {
        return None;
    }
    NATIVE_INTERVALS
        .iter()
        .rev()
        .find(|(secs, _)| timeframe_seconds % secs == 0)
        .copied()
}

/// Map a menu asset label to a Binance symbol.
///
/// `"BTCUSD"` → `"BTCUSDT"`, `"EURUSD OTC"` → `"EURUSDT"`.
pub fn feed_symbol(asset: &str) -> String {
    let mut symbol: String = asset
        .trim()
        .trim_end_matches("OTC")
        .trim_end_matches("otc")
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect::<String>()
        .to_uppercase();
    if symbol.ends_with("USD") {
        symbol.push('T');
    }
    symbol
}

/// Binance REST + WebSocket market feed.
pub struct BinanceFeed {
    rest_url: String,
    ws_url: String,
    credential: Option<String>,
    asset: String,
    timeframe: u32,
    client: reqwest::Client,
    events: broadcast::Sender<FeedEvent>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl BinanceFeed {
    /// Create a feed bound to one asset/timeframe.  The live stream follows
    /// this pair; history requests may name any pair.
    pub fn new(
        rest_url: impl Into<String>,
        ws_url: impl Into<String>,
        credential: Option<String>,
        asset: impl Into<String>,
        timeframe_seconds: u32,
    ) -> Result<Self> {
        let credential = credential.filter(|c| !c.trim().is_empty());

        let mut default_headers = HeaderMap::new();
        if let Some(key) = &credential {
            if let Ok(val) = HeaderValue::from_str(key) {
                default_headers.insert("X-MBX-APIKEY", val);
            }
        }

        let client = reqwest::Client::builder()
            .default_headers(default_headers)
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .context("failed to build reqwest client")?;

        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        Ok(Self {
            rest_url: rest_url.into().trim_end_matches('/').to_string(),
            ws_url: ws_url.into().trim_end_matches('/').to_string(),
            credential,
            asset: asset.into(),
            timeframe: timeframe_seconds,
            client,
            events,
            reader: Mutex::new(None),
        })
    }

    fn stream_url(&self) -> Result<String> {
        let (_, interval) = native_interval(self.timeframe)
            .with_context(|| format!("unsupported timeframe {}s", self.timeframe))?;
        Ok(format!(
            "{}/{}@kline_{}",
            self.ws_url,
            feed_symbol(&self.asset).to_lowercase(),
            interval
        ))
    }

    fn stop_reader(&self) {
        if let Some(handle) = self.reader.lock().take() {
            handle.abort();
        }
    }

    /// GET /api/v3/klines (public) on a native interval, optionally ending
    /// at `end_time_ms` (inclusive).
    #[instrument(skip(self), name = "binance::get_klines")]
    async fn get_klines(
        &self,
        symbol: &str,
        interval: &str,
        limit: u32,
        end_time_ms: Option<i64>,
    ) -> Result<Vec<Candle>> {
        let mut url = format!(
            "{}/api/v3/klines?symbol={}&interval={}&limit={}",
            self.rest_url, symbol, interval, limit
        );
        if let Some(end) = end_time_ms {
            url.push_str(&format!("&endTime={end}"));
        }

        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .context("GET /api/v3/klines request failed")?;

        let status = resp.status();
        let body: serde_json::Value = resp
            .json()
            .await
            .context("failed to parse klines response")?;

        if !status.is_success() {
            anyhow::bail!("Binance GET /api/v3/klines returned {}: {}", status, body);
        }

        let candles = parse_klines(symbol, &body)?;
        debug!(symbol, interval, count = candles.len(), "klines fetched");
        Ok(candles)
    }

    /// Collect the latest `wanted` rows, newest page first.  Stops early
    /// when the exchange runs out of history or after `MAX_KLINES_PAGES`.
    async fn get_klines_paged(&self, symbol: &str, interval: &str, wanted: u32) -> Result<Vec<Candle>> {
        let mut rows: Vec<Candle> = Vec::new();
        let mut end_time_ms: Option<i64> = None;

        for _ in 0..MAX_KLINES_PAGES {
            let remaining = wanted.saturating_sub(rows.len() as u32);
            if remaining == 0 {
                break;
            }
            let limit = remaining.min(MAX_KLINES_LIMIT);
            let mut page = self.get_klines(symbol, interval, limit, end_time_ms).await?;
            let exhausted = (page.len() as u32) < limit;
            let Some(oldest) = page.first() else {
                break;
            };
            end_time_ms = Some(oldest.timestamp * 1000 - 1);

            page.append(&mut rows);
            rows = page;
            if exhausted {
                break;
            }
        }

        if (rows.len() as u32) < wanted {
            debug!(symbol, interval, wanted, got = rows.len(), "klines history shorter than requested");
        }
        Ok(rows)
    }
}

#[async_trait]
impl MarketFeed for BinanceFeed {
    async fn connect(&self) -> Result<bool> {
        if self.credential.is_none() {
            error!("missing feed credential (FEED_SSID or ssid.txt)");
            return Ok(false);
        }

        self.stop_reader();
        let url = self.stream_url()?;
        info!(url = %url, asset = %self.asset, "connecting to kline WebSocket");

        let (ws_stream, _response) = connect_async(&url)
            .await
            .context("failed to connect to kline WebSocket")?;

        let events = self.events.clone();
        let asset = self.asset.clone();
        let handle = tokio::spawn(async move {
            let (_write, mut read) = ws_stream.split();
            let reason = loop {
                match read.next().await {
                    Some(Ok(tokio_tungstenite::tungstenite::Message::Text(text))) => {
                        match parse_kline_message(&text) {
                            Ok(candle) => {
                                let payload = serde_json::to_value(&candle).unwrap_or_default();
                                // No receivers just means nobody is listening yet.
                                let _ = events.send(FeedEvent::StreamUpdate(payload));
                            }
                            Err(e) => warn!(error = %e, "failed to parse kline message"),
                        }
                    }
                    Some(Ok(tokio_tungstenite::tungstenite::Message::Close(_))) => {
                        break "server closed the stream".to_string();
                    }
                    // Ping / Pong / Binary frames; tungstenite answers pings.
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        error!(asset = %asset, error = %e, "kline WebSocket read error");
                        break e.to_string();
                    }
                    None => break "stream ended".to_string(),
                }
            };
            warn!(asset = %asset, reason = %reason, "kline WebSocket disconnected");
            let _ = events.send(FeedEvent::Disconnected { reason });
        });
        *self.reader.lock() = Some(handle);

        info!(asset = %self.asset, "kline WebSocket connected");
        Ok(true)
    }

    async fn get_candles(&self, asset: &str, timeframe_seconds: u32, count: u32) -> Result<Vec<Candle>> {
        let (base_secs, interval) = native_interval(timeframe_seconds)
            .with_context(|| format!("unsupported timeframe {timeframe_seconds}s"))?;
        let factor = timeframe_seconds / base_secs;
        let wanted = count.saturating_mul(factor).max(1);

        let raw = self.get_klines_paged(&feed_symbol(asset), interval, wanted).await?;
        let mut candles = if factor > 1 {
            aggregate(&raw, timeframe_seconds)
        } else {
            raw
        };
        for c in &mut candles {
            c.asset = asset.to_string();
        }
        let excess = candles.len().saturating_sub(count as usize);
        candles.drain(..excess);

        let _ = self.events.send(FeedEvent::CandlesReceived { count: candles.len() });
        Ok(candles)
    }

    fn events(&self) -> broadcast::Receiver<FeedEvent> {
        self.events.subscribe()
    }

    async fn disconnect(&self) {
        self.stop_reader();
    }
}

impl Drop for BinanceFeed {
    fn drop(&mut self) {
        self.stop_reader();
    }
}

impl std::fmt::Debug for BinanceFeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BinanceFeed")
            .field("credential", &"<redacted>")
            .field("rest_url", &self.rest_url)
            .field("asset", &self.asset)
            .field("timeframe", &self.timeframe)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Parse Binance's array-of-arrays klines body.
///
/// Array indices: [0] openTime (ms), [1] open, [2] high, [3] low, [4] close,
/// [5] volume.  Short rows are skipped.
fn parse_klines(symbol: &str, body: &serde_json::Value) -> Result<Vec<Candle>> {
    let raw = body.as_array().context("klines response is not an array")?;

    let mut candles = Vec::with_capacity(raw.len());
    for entry in raw {
        let arr = entry.as_array().context("kline entry is not an array")?;
        if arr.len() < 6 {
            warn!("skipping malformed kline entry with {} elements", arr.len());
            continue;
        }

        let open_time_ms = arr[0].as_i64().context("kline open time is not an integer")?;
        candles.push(Candle::new(
            symbol,
            open_time_ms.div_euclid(1000),
            parse_string_f64(&arr[1], "open")?,
            parse_string_f64(&arr[2], "high")?,
            parse_string_f64(&arr[3], "low")?,
            parse_string_f64(&arr[4], "close")?,
            parse_string_f64(&arr[5], "volume")?,
        ));
    }
    Ok(candles)
}

/// Parse a kline stream message (single-stream or combined envelope).
///
/// ```json
/// { "e": "kline", "s": "BTCUSDT", "k": { "t": 1700000000000, "o": "1.0", ... } }
/// ```
fn parse_kline_message(text: &str) -> Result<Candle> {
    let root: serde_json::Value = serde_json::from_str(text).context("failed to parse kline JSON")?;

    let data = if root.get("data").is_some() {
        &root["data"]
    } else {
        &root
    };

    let symbol = data["s"].as_str().context("missing field s")?.to_uppercase();
    let k = &data["k"];
    let open_time_ms = k["t"].as_i64().context("missing field k.t")?;

    Ok(Candle::new(
        symbol,
        open_time_ms.div_euclid(1000),
        parse_string_f64(&k["o"], "k.o")?,
        parse_string_f64(&k["h"], "k.h")?,
        parse_string_f64(&k["l"], "k.l")?,
        parse_string_f64(&k["c"], "k.c")?,
        parse_string_f64(&k["v"], "k.v")?,
    ))
}

/// Binance sends numeric values as JSON strings.
fn parse_string_f64(val: &serde_json::Value, name: &str) -> Result<f64> {
    match val {
        serde_json::Value::String(s) => s
            .parse::<f64>()
            .with_context(|| format!("failed to parse {name} as f64: {s}")),
        serde_json::Value::Number(n) => n
            .as_f64()
            .with_context(|| format!("field {name} is not a valid f64")),
        _ => anyhow::bail!("field {name} has unexpected JSON type"),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
