// =============================================================================
// Series Aggregator — ordered, bounded candle series and derived timeframes
// =============================================================================
//
// A series is a plain `Vec<Candle>` sorted ascending by timestamp.  It is
// rebuilt from every fetched batch, trimmed to a retention window, and a
// coarser confirmation series is recomputed from scratch on each update.
// =============================================================================

use std::collections::BTreeMap;

use super::candle::Candle;

/// Build an ordered series from a raw (possibly out-of-order) batch.
///
/// The sort is stable, so bars sharing a timestamp keep their delivery order.
pub fn to_series(raw: impl IntoIterator<Item = Candle>) -> Vec<Candle> {
    let mut series: Vec<Candle> = raw.into_iter().collect();
    series.sort_by_key(|c| c.timestamp);
    series
}

/// Keep only the most recent `n` bars (sliding window).
pub fn truncate(mut series: Vec<Candle>, n: usize) -> Vec<Candle> {
    if series.len() > n {
        series.drain(..series.len() - n);
    }
    series
}

/// Bucket start for `timestamp` on a `bucket_seconds` grid.
pub fn bucket_start(timestamp: i64, bucket_seconds: i64) -> i64 {
    timestamp.div_euclid(bucket_seconds) * bucket_seconds
}

/// Derive a coarser series by grouping bars into `bucket_seconds` intervals.
///
/// Each bucket takes the chronologically first open, the last close, the
/// extreme high/low and the summed volume.  Output is ordered by bucket start.
/// Empty input or a zero bucket yields an empty series.
pub fn aggregate(series: &[Candle], bucket_seconds: u32) -> Vec<Candle> {
    if series.is_empty() || bucket_seconds == 0 {
        return Vec::new();
    }
    let width = i64::from(bucket_seconds);

    let mut ordered: Vec<&Candle> = series.iter().collect();
    ordered.sort_by_key(|c| c.timestamp);

    let mut buckets: BTreeMap<i64, Candle> = BTreeMap::new();
    for c in ordered {
        let start = bucket_start(c.timestamp, width);
        buckets
            .entry(start)
            .and_modify(|bar| {
                bar.high = bar.high.max(c.high);
                bar.low = bar.low.min(c.low);
                bar.close = c.close;
                bar.volume += c.volume;
            })
            .or_insert_with(|| Candle {
                timestamp: start,
                open: c.open,
                high: c.high,
                low: c.low,
                close: c.close,
                volume: c.volume,
                asset: c.asset.clone(),
            });
    }

    buckets.into_values().collect()
}

/// Confirmation timeframe used to filter the dominant trend for a given expiry.
pub fn higher_timeframe(expiry_seconds: u32) -> u32 {
    match expiry_seconds {
        0..=5 => 15,
        6..=15 => 30,
        16..=30 => 60,
        31..=180 => 300,
        _ => 900,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
