// =============================================================================
// Exponential Moving Average (EMA) and the 50/200 trend filter
// =============================================================================
//
// Formula:
//   multiplier = 2 / (period + 1)
//   EMA_t      = close_t * multiplier + EMA_{t-1} * (1 - multiplier)
//
// The recursion is seeded with the first close, so every input bar gets an
// EMA value.  Confirmation series are often shorter than the slow period and
// must still produce a trend reading.
// =============================================================================

use serde::{Deserialize, Serialize};

/// Fast EMA period of the trend filter.
pub const FAST_PERIOD: usize = 50;
/// Slow EMA period of the trend filter.
pub const SLOW_PERIOD: usize = 200;

/// Guard added to the slow EMA before dividing.
const EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Trend {
    Up,
    Down,
}

impl std::fmt::Display for Trend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Up => write!(f, "up"),
            Self::Down => write!(f, "down"),
        }
    }
}

/// Latest reading of the 50/200 trend filter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EmaTrend {
    pub fast: f64,
    pub slow: f64,
    pub trend: Trend,
    /// Relative separation `|fast - slow| / slow`.
    pub strength: f64,
}

/// Compute the EMA series for `closes` with look-back `period`.
///
/// Returns one value per close.  `period == 0` or empty input gives an empty
/// vec; a non-finite intermediate value truncates the series.
pub fn calculate_ema(closes: &[f64], period: usize) -> Vec<f64> {
    let Some(&first) = closes.first() else {
        return Vec::new();
    };
    if period == 0 || !first.is_finite() {
        return Vec::new();
    }

    let multiplier = 2.0 / (period as f64 + 1.0);
    let mut result = Vec::with_capacity(closes.len());
    result.push(first);

    let mut prev = first;
    for &close in &closes[1..] {
        let ema = close * multiplier + prev * (1.0 - multiplier);
        if !ema.is_finite() {
            break;
        }
        result.push(ema);
        prev = ema;
    }

    result
}

/// Trend direction of the confirmation timeframe.
///
/// `Up` when EMA50 > EMA200, otherwise `Down`.  Returns `None` for empty or
/// non-finite input.
pub fn ema_trend(closes: &[f64]) -> Option<EmaTrend> {
    let fast_series = calculate_ema(closes, FAST_PERIOD);
    let slow_series = calculate_ema(closes, SLOW_PERIOD);
    if fast_series.len() != closes.len() || slow_series.len() != closes.len() {
        return None;
    }

    let fast = *fast_series.last()?;
    let slow = *slow_series.last()?;
    let trend = if fast > slow { Trend::Up } else { Trend::Down };
    let strength = (fast - slow).abs() / (slow + EPSILON);
    if !strength.is_finite() {
        return None;
    }

    Some(EmaTrend {
        fast,
        slow,
        trend,
        strength,
    })
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn ascending(n: usize) -> Vec<f64> {
        (1..=n).map(|i| i as f64).collect()
    }

    #[test]
    fn ema_empty_input() {
        assert!(calculate_ema(&[], 5).is_empty());
    }

    #[test]
    fn ema_period_zero() {
        assert!(calculate_ema(&[1.0, 2.0, 3.0], 0).is_empty());
    }

    #[test]
    fn ema_seeded_with_first_close() {
        let ema = calculate_ema(&[10.0, 20.0], 3);
        assert_eq!(ema.len(), 2);
        assert!((ema[0] - 10.0).abs() < 1e-12);
        // multiplier = 0.5
        assert!((ema[1] - 15.0).abs() < 1e-12);
    }

    #[test]
    fn ema_known_values() {
        let closes: Vec<f64> = (1..=10).map(|x| x as f64).collect();
        let ema = calculate_ema(&closes, 5);
        assert_eq!(ema.len(), closes.len());

        let mult = 2.0 / 6.0;
        let mut expected = 1.0;
        for (i, &c) in closes.iter().enumerate().skip(1) {
            expected = c * mult + expected * (1.0 - mult);
            assert!((ema[i] - expected).abs() < 1e-10);
        }
    }

    #[test]
    fn ema_stops_on_nan() {
        let ema = calculate_ema(&[1.0, 2.0, f64::NAN, 4.0], 3);
        assert_eq!(ema.len(), 2);
    }

    #[test]
    fn trend_up_on_rising_series() {
        let t = ema_trend(&ascending(300)).unwrap();
        assert_eq!(t.trend, Trend::Up);
        assert!(t.fast > t.slow);
        assert!(t.strength > 0.0);
    }

    #[test]
    fn trend_up_on_short_series() {
        // Fewer bars than the slow period still give a reading.
        let t = ema_trend(&ascending(12)).unwrap();
        assert_eq!(t.trend, Trend::Up);
    }

    #[test]
    fn trend_down_on_falling_series() {
        let closes: Vec<f64> = (1..=300).rev().map(|x| x as f64).collect();
        assert_eq!(ema_trend(&closes).unwrap().trend, Trend::Down);
    }

    #[test]
    fn flat_series_is_down_with_zero_strength() {
        let t = ema_trend(&vec![100.0; 50]).unwrap();
        assert_eq!(t.trend, Trend::Down);
        assert!(t.strength.abs() < 1e-12);
    }

    #[test]
    fn trend_none_on_empty_or_nan() {
        assert!(ema_trend(&[]).is_none());
        assert!(ema_trend(&[1.0, f64::NAN]).is_none());
    }
}
