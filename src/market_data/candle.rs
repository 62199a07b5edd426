use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Data types
// ---------------------------------------------------------------------------

/// A single OHLCV bar as delivered by the market feed.
///
/// `timestamp` is the bar open time in whole seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub timestamp: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    #[serde(default)]
    pub volume: f64,
    #[serde(default)]
    pub asset: String,
}

impl Candle {
    pub fn new(
        asset: impl Into<String>,
        timestamp: i64,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: f64,
    ) -> Self {
        Self {
            timestamp,
            open,
            high,
            low,
            close,
            volume,
            asset: asset.into(),
        }
    }

    /// `true` when every price field is a finite number.
    pub fn is_finite(&self) -> bool {
        self.open.is_finite() && self.high.is_finite() && self.low.is_finite() && self.close.is_finite()
    }
}

/// Composite key that identifies a unique candle series.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct SeriesKey {
    pub asset: String,
    /// Bar interval in seconds.
    pub timeframe: u32,
}

impl SeriesKey {
    pub fn new(asset: impl Into<String>, timeframe: u32) -> Self {
        Self {
            asset: asset.into(),
            timeframe,
        }
    }
}

impl std::fmt::Display for SeriesKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}s", self.asset, self.timeframe)
    }
}

/// Close column of a series (oldest first).
pub fn closes(series: &[Candle]) -> Vec<f64> {
    series.iter().map(|c| c.close).collect()
}
