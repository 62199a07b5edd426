// =============================================================================
// Technical Indicators Module
// =============================================================================
//
// Pure, side-effect-free indicator functions over a candle series.  Identical
// input always gives identical output.  Insufficient or non-finite data
// produces the inert result (no vote, invalid filter) instead of an error.

pub mod atr;
pub mod ema;
pub mod price_action;
pub mod rsi;

pub use atr::{atr_filter, calculate_atr};
pub use ema::{ema_trend, Trend};
pub use price_action::{recent_breakout, rejection_wick};
pub use rsi::{calculate_rsi, rsi_signal};
