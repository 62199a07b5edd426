// =============================================================================
// Average True Range (ATR) — rolling mean of the true range
// =============================================================================
//
// True Range (TR) for each bar:
//   TR = max(H - L, |H - prevClose|, |L - prevClose|)
// The first bar has no previous close, so its TR is H - L.
//
// ATR_t = mean(TR over the last `period` bars)
//
// The volatility gate accepts only 0.0005 < ATR / close < 0.02.  Below the
// band the market is flat or illiquid; above it the bars are gapping.
// =============================================================================

use serde::{Deserialize, Serialize};

use crate::market_data::Candle;

/// Default look-back.
pub const DEFAULT_PERIOD: usize = 14;

/// Exclusive lower bound of accepted relative ATR.
pub const MIN_RELATIVE_ATR: f64 = 0.0005;
/// Exclusive upper bound of accepted relative ATR.
pub const MAX_RELATIVE_ATR: f64 = 0.02;

/// Result of the volatility gate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AtrFilter {
    pub atr: f64,
    pub relative: f64,
    pub valid: bool,
}

/// True range of every bar (oldest first).
pub fn true_ranges(candles: &[Candle]) -> Vec<f64> {
    let mut prev_close: Option<f64> = None;
    candles
        .iter()
        .map(|c| {
            let hl = c.high - c.low;
            let tr = match prev_close {
                Some(pc) => hl.max((c.high - pc).abs()).max((c.low - pc).abs()),
                None => hl,
            };
            prev_close = Some(c.close);
            tr
        })
        .collect()
}

/// Compute the ATR series; one value per bar starting at index `period - 1`.
///
/// Empty when `period == 0` or fewer than `period` bars exist.  A non-finite
/// window truncates the series.
pub fn calculate_atr(candles: &[Candle], period: usize) -> Vec<f64> {
    if period == 0 || candles.len() < period {
        return Vec::new();
    }

    let period_f = period as f64;
    let mut result = Vec::with_capacity(candles.len() - period + 1);
    for window in true_ranges(candles).windows(period) {
        let atr = window.iter().sum::<f64>() / period_f;
        if !atr.is_finite() {
            break;
        }
        result.push(atr);
    }
    result
}

/// Apply the relative-volatility gate to the latest ATR value.
///
/// Returns an invalid filter when either input is empty or non-finite, or
/// the close is not positive.
pub fn atr_filter(atr_series: &[f64], closes: &[f64]) -> AtrFilter {
    let (Some(&atr), Some(&close)) = (atr_series.last(), closes.last()) else {
        return AtrFilter {
            atr: 0.0,
            relative: 0.0,
            valid: false,
        };
    };
    if close <= 0.0 {
        return AtrFilter {
            atr,
            relative: 0.0,
            valid: false,
        };
    }

    let relative = atr / close;
    let valid = relative.is_finite() && relative > MIN_RELATIVE_ATR && relative < MAX_RELATIVE_ATR;

    AtrFilter {
        atr,
        relative,
        valid,
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn candle(open: f64, high: f64, low: f64, close: f64) -> Candle {
        Candle::new("EURUSD", 0, open, high, low, close, 100.0)
    }

    #[test]
    fn atr_period_zero() {
        let candles = vec![candle(100.0, 105.0, 95.0, 102.0); 20];
        assert!(calculate_atr(&candles, 0).is_empty());
    }

    #[test]
    fn atr_insufficient_data() {
        let candles = vec![candle(100.0, 105.0, 95.0, 102.0); 10];
        assert!(calculate_atr(&candles, 14).is_empty());
    }

    #[test]
    fn first_true_range_is_high_minus_low() {
        let trs = true_ranges(&[candle(100.0, 104.0, 99.0, 101.0)]);
        assert_eq!(trs, vec![5.0]);
    }

    #[test]
    fn true_range_uses_prev_close_on_gap() {
        let candles = vec![
            candle(100.0, 105.0, 95.0, 95.0),
            candle(110.0, 115.0, 108.0, 112.0), // |115-95| = 20 > 7
        ];
        assert_eq!(true_ranges(&candles)[1], 20.0);
    }

    #[test]
    fn atr_is_rolling_mean() {
        let candles = vec![
            candle(10.0, 11.0, 10.0, 10.5), // TR 1
            candle(10.5, 12.5, 10.5, 12.0), // TR 2
            candle(12.0, 13.0, 11.0, 12.0), // TR 2
            candle(12.0, 16.0, 12.0, 15.0), // TR 4
        ];
        let atr = calculate_atr(&candles, 2);
        assert_eq!(atr, vec![1.5, 2.0, 3.0]);
    }

    #[test]
    fn atr_constant_range() {
        let candles: Vec<Candle> = (0..30)
            .map(|i| {
                let base = 100.0 + i as f64 * 0.1;
                candle(base, base + 5.0, base - 5.0, base)
            })
            .collect();
        let atr = *calculate_atr(&candles, 14).last().unwrap();
        assert!((atr - 10.0).abs() < 0.5, "expected ATR near 10.0, got {atr}");
    }

    #[test]
    fn filter_accepts_inside_band() {
        let f = atr_filter(&[1.0], &[100.0]);
        assert!(f.valid);
        assert!((f.relative - 0.01).abs() < 1e-9);
    }

    #[test]
    fn filter_rejects_at_and_beyond_bounds() {
        assert!(!atr_filter(&[0.04], &[100.0]).valid); // 0.0004
        assert!(!atr_filter(&[0.05], &[100.0]).valid); // 0.0005
        assert!(!atr_filter(&[2.1], &[100.0]).valid); // 0.021
        assert!(!atr_filter(&[10.0], &[100.0]).valid); // 0.1
        assert!(atr_filter(&[0.06], &[100.0]).valid);
        assert!(atr_filter(&[1.9], &[100.0]).valid);
    }

    #[test]
    fn filter_band_edges_are_exclusive() {
        let upper = atr_filter(&[2.0], &[100.0]);
        assert_eq!(upper.relative, MAX_RELATIVE_ATR);
        assert!(!upper.valid);

        let lower = atr_filter(&[0.0005], &[1.0]);
        assert_eq!(lower.relative, MIN_RELATIVE_ATR);
        assert!(!lower.valid);
    }

    #[test]
    fn filter_invalid_on_non_positive_close() {
        assert!(!atr_filter(&[1.0], &[0.0]).valid);
        assert!(!atr_filter(&[1.0], &[-100.0]).valid);
    }

    #[test]
    fn filter_invalid_on_missing_or_nan() {
        assert!(!atr_filter(&[], &[100.0]).valid);
        assert!(!atr_filter(&[1.0], &[]).valid);
        assert!(!atr_filter(&[f64::NAN], &[100.0]).valid);
    }
}
