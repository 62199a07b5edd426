// =============================================================================
// Snapshot & Signal — audit record handed to the validator and the sink
// =============================================================================

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::indicators::Trend;
use crate::market_data::Candle;
use crate::types::{Direction, MarketType, Vote};

/// Trade bars retained on a snapshot.
pub const SNAPSHOT_BARS: usize = 20;

/// Immutable view of every indicator output for one evaluation.
#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    pub market: MarketType,
    pub asset: String,
    pub expiry_seconds: u32,
    /// Latest trade close.
    pub price: f64,
    /// Most recent trade bars, oldest first.
    pub recent: Vec<Candle>,
    pub trend: Trend,
    pub trend_strength: f64,
    pub rsi: f64,
    pub atr_relative: f64,
    pub breakout: bool,
    pub rejection: bool,
    /// Votes that took part in the tally, in evaluation order.
    pub votes: Vec<Vote>,
}

/// A validated recommendation.  Created once, never mutated.
#[derive(Debug, Clone, Serialize)]
pub struct Signal {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub asset: String,
    pub expiry_seconds: u32,
    pub direction: Direction,
    /// Validator confidence, 0-100.
    pub confidence: f64,
    pub snapshot: Snapshot,
}

impl Signal {
    pub fn new(direction: Direction, confidence: f64, snapshot: Snapshot) -> Self {
        Self {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            asset: snapshot.asset.clone(),
            expiry_seconds: snapshot.expiry_seconds,
            direction,
            confidence,
            snapshot,
        }
    }
}
