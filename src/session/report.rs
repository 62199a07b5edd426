// =============================================================================
// Signal Report — fixed multi-line text for the presentation layer
// =============================================================================

use crate::engine::Signal;
use crate::types::{Direction, MarketType};

/// `N SEC` below one minute, whole `N MIN` from one minute up.
pub fn format_expiry(seconds: u32) -> String {
    if seconds >= 60 {
        format!("{} MIN", seconds / 60)
    } else {
        format!("{seconds} SEC")
    }
}

fn direction_label(direction: Direction) -> &'static str {
    match direction {
        Direction::Call => "📈 CALL",
        Direction::Put => "📉 PUT",
    }
}

pub fn format_signal(signal: &Signal, market: MarketType) -> String {
    [
        "📊 BINARY OPTION SIGNAL".to_string(),
        format!("Market: {market}"),
        format!("Asset: {}", signal.asset),
        format!("Expiry: {}", format_expiry(signal.expiry_seconds)),
        format!("Direction: {}", direction_label(signal.direction)),
        format!("Confidence: {}%", signal.confidence as u32),
        String::new(),
        "Strategy Confluence:".to_string(),
        "✔ EMA Trend".to_string(),
        "✔ RSI Momentum".to_string(),
        "✔ ATR Volatility".to_string(),
        "✔ Price Action Breakout".to_string(),
        "✔ AI Confirmation".to_string(),
        String::new(),
        format!("⏰ Signal Time: {} UTC", signal.created_at.format("%H:%M:%S")),
    ]
    .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Snapshot;
    use crate::indicators::Trend;
    use chrono::TimeZone;

    fn signal(expiry_seconds: u32, direction: Direction, confidence: f64) -> Signal {
        let snapshot = Snapshot {
            market: MarketType::Otc,
            asset: "EURUSD OTC".to_string(),
            expiry_seconds,
            price: 1.1,
            recent: Vec::new(),
            trend: Trend::Down,
            trend_strength: 0.0,
            rsi: 40.0,
            atr_relative: 0.001,
            breakout: true,
            rejection: true,
            votes: Vec::new(),
        };
        let mut s = Signal::new(direction, confidence, snapshot);
        s.created_at = chrono::Utc.with_ymd_and_hms(2024, 3, 1, 14, 5, 9).unwrap();
        s
    }

    #[test]
    fn expiry_units() {
        assert_eq!(format_expiry(5), "5 SEC");
        assert_eq!(format_expiry(59), "59 SEC");
        assert_eq!(format_expiry(60), "1 MIN");
        assert_eq!(format_expiry(300), "5 MIN");
    }

    #[test]
    fn report_layout() {
        let text = format_signal(&signal(120, Direction::Put, 87.9), MarketType::Otc);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 15);
        assert_eq!(lines[1], "Market: OTC");
        assert_eq!(lines[2], "Asset: EURUSD OTC");
        assert_eq!(lines[3], "Expiry: 2 MIN");
        assert_eq!(lines[4], "Direction: 📉 PUT");
        assert_eq!(lines[5], "Confidence: 87%");
        assert_eq!(lines[7], "Strategy Confluence:");
        assert_eq!(lines[14], "⏰ Signal Time: 14:05:09 UTC");
    }

    #[test]
    fn call_label() {
        let text = format_signal(&signal(15, Direction::Call, 70.0), MarketType::Real);
        assert!(text.contains("Direction: 📈 CALL"));
        assert!(text.contains("Expiry: 15 SEC"));
    }
}
