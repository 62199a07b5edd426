// =============================================================================
// Price structure — recent breakout and rejection wick
// =============================================================================

use serde::{Deserialize, Serialize};

use crate::market_data::Candle;
use crate::types::Vote;

/// Default wick-to-body ratio for a rejection.
pub const DEFAULT_WICK_RATIO: f64 = 1.5;

const BODY_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Breakout {
    pub broke: bool,
    pub vote: Vote,
}

impl Breakout {
    const NONE: Self = Self {
        broke: false,
        vote: Vote::None,
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rejection {
    pub rejected: bool,
    pub vote: Vote,
}

impl Rejection {
    const NONE: Self = Self {
        rejected: false,
        vote: Vote::None,
    };
}

/// Did the latest bar close beyond the closing range of the prior `lookback`
/// bars (current bar excluded)?
///
/// A call-break needs close > prior max close and close > open; a put-break
/// needs close < prior min close and close < open.  Fewer than
/// `lookback + 1` bars never break.
pub fn recent_breakout(series: &[Candle], lookback: usize) -> Breakout {
    if lookback == 0 || series.len() < lookback + 1 {
        return Breakout::NONE;
    }
    let Some((last, prior)) = series.split_last() else {
        return Breakout::NONE;
    };
    let window = &prior[prior.len() - lookback..];

    let max_close = window.iter().map(|c| c.close).fold(f64::NEG_INFINITY, f64::max);
    let min_close = window.iter().map(|c| c.close).fold(f64::INFINITY, f64::min);

    let call_break = last.close > max_close && last.close > last.open;
    let put_break = last.close < min_close && last.close < last.open;

    let vote = if call_break {
        Vote::Call
    } else if put_break {
        Vote::Put
    } else {
        Vote::None
    };

    Breakout {
        broke: call_break || put_break,
        vote,
    }
}

/// Wick rejection on the latest bar.
///
/// Bullish when lowerWick / body ≥ `min_ratio` and the bar closed up; bearish
/// when upperWick / body ≥ `min_ratio` and the bar closed down.  Body and
/// wicks carry a small ε so doji bars do not divide by zero.
pub fn rejection_wick(series: &[Candle], min_ratio: f64) -> Rejection {
    let Some(last) = series.last() else {
        return Rejection::NONE;
    };
    if !last.is_finite() {
        return Rejection::NONE;
    }

    let body = (last.close - last.open).abs() + BODY_EPSILON;
    let upper_wick = last.high - last.close.max(last.open) + BODY_EPSILON;
    let lower_wick = last.close.min(last.open) - last.low + BODY_EPSILON;

    let bullish = lower_wick / body >= min_ratio && last.close > last.open;
    let bearish = upper_wick / body >= min_ratio && last.close < last.open;

    let vote = if bullish {
        Vote::Call
    } else if bearish {
        Vote::Put
    } else {
        Vote::None
    };

    Rejection {
        rejected: bullish || bearish,
        vote,
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn candle(open: f64, high: f64, low: f64, close: f64) -> Candle {
        Candle::new("EURUSD", 0, open, high, low, close, 1.0)
    }

    fn flat(n: usize, close: f64) -> Vec<Candle> {
        (0..n).map(|_| candle(close, close + 0.5, close - 0.5, close)).collect()
    }

    #[test]
    fn breakout_needs_lookback_plus_one_bars() {
        for len in 0..=20 {
            let mut series = flat(len, 100.0);
            if let Some(last) = series.last_mut() {
                *last = candle(100.0, 200.0, 100.0, 200.0);
            }
            assert_eq!(recent_breakout(&series, 20), Breakout::NONE, "len={len}");
        }
    }

    #[test]
    fn breakout_call_above_prior_max_close() {
        let mut series = flat(20, 100.0);
        series.push(candle(100.1, 101.5, 100.0, 101.0));
        let b = recent_breakout(&series, 20);
        assert!(b.broke);
        assert_eq!(b.vote, Vote::Call);
    }

    #[test]
    fn breakout_uses_closes_not_highs() {
        // Prior highs are at 100.5; closing at 100.3 still clears the closes.
        let mut series = flat(20, 100.0);
        series.push(candle(100.1, 100.4, 100.0, 100.3));
        assert_eq!(recent_breakout(&series, 20).vote, Vote::Call);
    }

    #[test]
    fn breakout_requires_bar_direction() {
        // Closes above the range but below its own open.
        let mut series = flat(20, 100.0);
        series.push(candle(102.0, 102.5, 100.5, 101.0));
        assert_eq!(recent_breakout(&series, 20), Breakout::NONE);
    }

    #[test]
    fn breakout_put_below_prior_min_close() {
        let mut series = flat(10, 100.0);
        series.push(candle(99.9, 100.0, 98.5, 99.0));
        let b = recent_breakout(&series, 10);
        assert!(b.broke);
        assert_eq!(b.vote, Vote::Put);
    }

    #[test]
    fn breakout_ignores_bars_outside_lookback() {
        let mut series = vec![candle(150.0, 151.0, 149.0, 150.0)];
        series.extend(flat(5, 100.0));
        series.push(candle(100.1, 101.5, 100.0, 101.0));
        assert_eq!(recent_breakout(&series, 5).vote, Vote::Call);
        assert_eq!(recent_breakout(&series, 6).vote, Vote::None);
    }

    #[test]
    fn bullish_rejection_on_long_lower_wick() {
        let r = rejection_wick(&[candle(100.0, 100.25, 99.0, 100.2)], DEFAULT_WICK_RATIO);
        assert!(r.rejected);
        assert_eq!(r.vote, Vote::Call);
    }

    #[test]
    fn bearish_rejection_on_long_upper_wick() {
        let r = rejection_wick(&[candle(100.2, 101.5, 99.95, 100.0)], DEFAULT_WICK_RATIO);
        assert!(r.rejected);
        assert_eq!(r.vote, Vote::Put);
    }

    #[test]
    fn long_lower_wick_on_down_bar_is_not_bullish() {
        let r = rejection_wick(&[candle(100.2, 100.25, 99.0, 100.0)], DEFAULT_WICK_RATIO);
        assert_eq!(r.vote, Vote::None);
    }

    #[test]
    fn doji_does_not_divide_by_zero() {
        let r = rejection_wick(&[candle(100.0, 101.0, 99.0, 100.0)], DEFAULT_WICK_RATIO);
        // Neither closed up nor down.
        assert_eq!(r, Rejection::NONE);
    }

    #[test]
    fn rejection_empty_series() {
        assert_eq!(rejection_wick(&[], DEFAULT_WICK_RATIO), Rejection::NONE);
    }
}
