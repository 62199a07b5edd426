pub mod candle;
pub mod series;

pub use candle::{closes, Candle, SeriesKey};
pub use series::{aggregate, higher_timeframe, to_series, truncate};
