// =============================================================================
// Relative Strength Index (RSI) — rolling-mean variant
// =============================================================================
//
// Step 1 — Compute price changes (deltas) from consecutive closes.
// Step 2 — Average gain / average loss = simple mean over the last `period`
//          deltas (a rolling window, recomputed for every bar).
// Step 3 — RS  = avg_gain / (avg_loss + ε)
//          RSI = 100 - 100 / (1 + RS)
//
// The ε on the loss term keeps an all-gains window finite (RSI → 100).
// =============================================================================

use serde::{Deserialize, Serialize};

use crate::types::Vote;

/// Default look-back.
pub const DEFAULT_PERIOD: usize = 14;

const LOSS_EPSILON: f64 = 1e-9;

/// Momentum reading for the latest bar.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RsiSignal {
    pub rsi: f64,
    pub vote: Vote,
}

/// Compute the RSI series for `closes`.
///
/// The returned vector has one value for each close starting at index
/// `period`.  `period == 0` or fewer than `period + 1` closes give an empty
/// vec; a non-finite value truncates the series.
pub fn calculate_rsi(closes: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || closes.len() < period + 1 {
        return Vec::new();
    }

    let deltas: Vec<f64> = closes.windows(2).map(|w| w[1] - w[0]).collect();
    let period_f = period as f64;

    let mut result = Vec::with_capacity(deltas.len() - period + 1);
    for window in deltas.windows(period) {
        let (gain, loss) = window.iter().fold((0.0_f64, 0.0_f64), |(g, l), &d| {
            if d > 0.0 {
                (g + d, l)
            } else {
                (g, l - d)
            }
        });
        let rs = (gain / period_f) / (loss / period_f + LOSS_EPSILON);
        let rsi = 100.0 - 100.0 / (1.0 + rs);
        if !rsi.is_finite() {
            break;
        }
        result.push(rsi);
    }

    result
}

/// Momentum vote from an RSI series.
///
/// `Call` when the latest value is above 50 and rising versus the prior bar,
/// `Put` when below 50 and falling, otherwise `None`.  Returns `None` when
/// fewer than two values exist.
pub fn rsi_signal(rsi_series: &[f64]) -> Option<RsiSignal> {
    let [.., prev, last] = rsi_series else {
        return None;
    };
    let (prev, last) = (*prev, *last);

    let vote = if last > 50.0 && last > prev {
        Vote::Call
    } else if last < 50.0 && last < prev {
        Vote::Put
    } else {
        Vote::None
    };

    Some(RsiSignal { rsi: last, vote })
}
