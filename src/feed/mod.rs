// =============================================================================
// Market Feed — transport contract, connector, subscriber fan-out
// =============================================================================
//
// `MarketFeed` is the seam to whatever delivers candles.  The connector owns
// one feed per session, polls it for history on a fixed cadence and fans
// batches / live updates out to ordered subscriber lists.  Reconnection
// internals (regions, handshakes) stay inside the feed; the connector only
// reacts to `FeedEvent::Disconnected`.

pub mod binance;
pub mod connector;
pub mod publisher;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::market_data::Candle;

pub use binance::BinanceFeed;
pub use connector::{ConnectionState, StreamConnector};
pub use publisher::Subscriber;

/// Out-of-band notifications raised by a feed.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedEvent {
    /// A history request was answered.
    CandlesReceived { count: usize },
    /// Live tick / bar update pushed by the source.
    StreamUpdate(serde_json::Value),
    /// The transport dropped.
    Disconnected { reason: String },
}

/// Contract every market-data transport fulfils.
#[async_trait]
pub trait MarketFeed: Send + Sync {
    /// Open the transport.  `Ok(false)` means a precondition failed (for
    /// example the credential is missing) and retrying will not help.
    async fn connect(&self) -> Result<bool>;

    /// Latest `count` bars for `asset` on `timeframe_seconds` bars.
    async fn get_candles(&self, asset: &str, timeframe_seconds: u32, count: u32) -> Result<Vec<Candle>>;

    /// A fresh receiver for feed events.
    fn events(&self) -> broadcast::Receiver<FeedEvent>;

    /// Release the transport.  Safe to call more than once.
    async fn disconnect(&self);
}
