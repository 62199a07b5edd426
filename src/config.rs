// =============================================================================
// Settings — file defaults, environment overrides, atomic save
// =============================================================================
//
// Every tunable lives here.  Loading is layered:
//   1. serde defaults (every field carries `#[serde(default)]`, so older files
//      missing new fields still load),
//   2. the optional JSON file,
//   3. environment variables (populated from `.env` by `dotenv` in main).
//
// Credentials are handed to the feed and validator constructors explicitly;
// nothing reads them from globals after startup.
// =============================================================================

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::indicators::price_action::DEFAULT_WICK_RATIO;

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_true() -> bool {
    true
}

fn default_feed_rest_url() -> String {
    "https://api.binance.com".to_string()
}

fn default_feed_ws_url() -> String {
    "wss://stream.binance.com:9443/ws".to_string()
}

const TESTNET_REST_URL: &str = "https://testnet.binance.vision";
const TESTNET_WS_URL: &str = "wss://testnet.binance.vision/ws";

fn default_ai_base_url() -> String {
    "https://openrouter.ai/api/v1".to_string()
}

fn default_ai_model() -> String {
    "deepseek/deepseek-chat".to_string()
}

fn default_ai_qps() -> f64 {
    0.33
}

fn default_ai_timeout_secs() -> u64 {
    30
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_history_count() -> u32 {
    200
}

fn default_retention_bars() -> usize {
    300
}

fn default_reconnect_delay_secs() -> u64 {
    5
}

fn default_min_trade_bars() -> usize {
    60
}

fn default_breakout_lookback() -> usize {
    20
}

fn default_wick_ratio() -> f64 {
    DEFAULT_WICK_RATIO
}

fn default_min_votes() -> usize {
    3
}

fn default_min_confidence() -> f64 {
    70.0
}

// =============================================================================
// EngineParams
// =============================================================================

/// Gate thresholds for the confluence engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineParams {
    /// Trade bars required before any evaluation.
    #[serde(default = "default_min_trade_bars")]
    pub min_trade_bars: usize,

    /// Breakout look-back on the trade timeframe.
    #[serde(default = "default_breakout_lookback")]
    pub breakout_lookback: usize,

    /// Wick-to-body ratio for a rejection vote.
    #[serde(default = "default_wick_ratio")]
    pub wick_ratio: f64,

    /// Votes the winning side needs (the other side must have none).
    #[serde(default = "default_min_votes")]
    pub min_votes: usize,

    /// Validator confidence (0-100) required to emit a signal.
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f64,
}

impl Default for EngineParams {
    fn default() -> Self {
        Self {
            min_trade_bars: default_min_trade_bars(),
            breakout_lookback: default_breakout_lookback(),
            wick_ratio: default_wick_ratio(),
            min_votes: default_min_votes(),
            min_confidence: default_min_confidence(),
        }
    }
}

// =============================================================================
// Settings
// =============================================================================

/// Top-level configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct Settings {
    // --- Market feed --------------------------------------------------------

    /// Session credential for the market feed.  `None` makes every connect
    /// attempt fail.
    #[serde(default)]
    pub feed_ssid: Option<String>,

    /// Demo mode streams from the exchange testnet unless the endpoints
    /// were overridden.
    #[serde(default = "default_true")]
    pub feed_is_demo: bool,

    #[serde(default = "default_feed_rest_url")]
    pub feed_rest_url: String,

    #[serde(default = "default_feed_ws_url")]
    pub feed_ws_url: String,

    /// Bars requested on every refresh.
    #[serde(default = "default_history_count")]
    pub history_count: u32,

    /// Rolling window kept per session.
    #[serde(default = "default_retention_bars")]
    pub retention_bars: usize,

    /// Pause between reconnect attempts after the stream drops.
    #[serde(default = "default_reconnect_delay_secs")]
    pub reconnect_delay_secs: u64,

    // --- Validator ----------------------------------------------------------

    #[serde(default)]
    pub ai_api_key: String,

    #[serde(default = "default_ai_base_url")]
    pub ai_base_url: String,

    #[serde(default = "default_ai_model")]
    pub ai_model: String,

    /// Allowed validator calls per second; the limiter enforces `1 / qps`.
    #[serde(default = "default_ai_qps")]
    pub ai_qps: f64,

    #[serde(default = "default_ai_timeout_secs")]
    pub ai_timeout_secs: u64,

    // --- Misc ---------------------------------------------------------------

    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub engine: EngineParams,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            feed_ssid: None,
            feed_is_demo: true,
            feed_rest_url: default_feed_rest_url(),
            feed_ws_url: default_feed_ws_url(),
            history_count: default_history_count(),
            retention_bars: default_retention_bars(),
            reconnect_delay_secs: default_reconnect_delay_secs(),
            ai_api_key: String::new(),
            ai_base_url: default_ai_base_url(),
            ai_model: default_ai_model(),
            ai_qps: default_ai_qps(),
            ai_timeout_secs: default_ai_timeout_secs(),
            log_level: default_log_level(),
            engine: EngineParams::default(),
        }
    }
}

impl Settings {
    /// Load settings from a JSON file at `path`.
    ///
    /// A missing file is an error so the caller can fall back to defaults
    /// with a warning.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read settings from {}", path.display()))?;

        let settings: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse settings from {}", path.display()))?;

        info!(path = %path.display(), model = %settings.ai_model, "settings loaded");
        Ok(settings)
    }

    /// Persist the settings using an atomic write (tmp file, then rename).
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let content =
            serde_json::to_string_pretty(self).context("failed to serialise settings to JSON")?;

        let tmp_path = path.with_extension("json.tmp");

        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp settings to {}", tmp_path.display()))?;

        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp settings to {}", path.display()))?;

        info!(path = %path.display(), "settings saved (atomic)");
        Ok(())
    }

    /// Overlay values from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_vars(|name| std::env::var(name).ok());
    }

    /// Overlay values from `lookup`.  Empty values are ignored.
    pub fn apply_vars(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(ssid) = get("FEED_SSID") {
            self.feed_ssid = Some(ssid);
        }
        if let Some(demo) = get("FEED_IS_DEMO") {
            self.feed_is_demo = matches!(demo.to_lowercase().as_str(), "1" | "true" | "yes");
        }
        if let Some(url) = get("FEED_REST_URL") {
            self.feed_rest_url = url;
        }
        if let Some(url) = get("FEED_WS_URL") {
            self.feed_ws_url = url;
        }
        if let Some(key) = get("OPENROUTER_API_KEY").or_else(|| get("DEEPSEEK_API_KEY")) {
            self.ai_api_key = key;
        }
        if let Some(url) = get("OPENROUTER_BASE_URL").or_else(|| get("DEEPSEEK_BASE_URL")) {
            self.ai_base_url = url;
        }
        if let Some(model) = get("DEEPSEEK_MODEL") {
            self.ai_model = model;
        }
        if let Some(qps) = get("AI_QPS") {
            match qps.parse::<f64>() {
                Ok(v) if v > 0.0 && v.is_finite() => self.ai_qps = v,
                _ => warn!(value = %qps, "ignoring invalid AI_QPS"),
            }
        }
        if let Some(level) = get("LOG_LEVEL") {
            self.log_level = level.to_lowercase();
        }
    }

    /// Fill `feed_ssid` from the first non-empty line of `path` when it is
    /// still unset.
    pub fn load_ssid_file(&mut self, path: impl AsRef<Path>) {
        if self.feed_ssid.is_some() {
            return;
        }
        let Ok(content) = std::fs::read_to_string(path.as_ref()) else {
            return;
        };
        self.feed_ssid = content
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .map(str::to_string);
    }

    /// (REST, WebSocket) endpoints the feed should use.
    pub fn feed_endpoints(&self) -> (String, String) {
        let untouched =
            self.feed_rest_url == default_feed_rest_url() && self.feed_ws_url == default_feed_ws_url();
        if self.feed_is_demo && untouched {
            (TESTNET_REST_URL.to_string(), TESTNET_WS_URL.to_string())
        } else {
            (self.feed_rest_url.clone(), self.feed_ws_url.clone())
        }
    }

    /// Minimum gap between validator calls.
    pub fn ai_min_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.ai_qps.max(1e-6))
    }

    pub fn ai_timeout(&self) -> Duration {
        Duration::from_secs(self.ai_timeout_secs)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }
}

impl std::fmt::Debug for Settings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Settings")
            .field("feed_ssid", &self.feed_ssid.as_ref().map(|_| "<redacted>"))
            .field("feed_is_demo", &self.feed_is_demo)
            .field("feed_rest_url", &self.feed_rest_url)
            .field("ai_api_key", &"<redacted>")
            .field("ai_base_url", &self.ai_base_url)
            .field("ai_model", &self.ai_model)
            .field("ai_qps", &self.ai_qps)
            .field("engine", &self.engine)
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn default_settings_have_expected_values() {
        let s = Settings::default();
        assert!(s.feed_ssid.is_none());
        assert!(s.feed_is_demo);
        assert_eq!(s.history_count, 200);
        assert_eq!(s.retention_bars, 300);
        assert_eq!(s.reconnect_delay(), Duration::from_secs(5));
        assert_eq!(s.engine.min_trade_bars, 60);
        assert_eq!(s.engine.breakout_lookback, 20);
        assert!((s.engine.min_confidence - 70.0).abs() < f64::EPSILON);
    }

    #[test]
    fn default_qps_gives_roughly_three_seconds() {
        let gap = Settings::default().ai_min_interval();
        assert!(gap >= Duration::from_secs(3));
        assert!(gap < Duration::from_millis(3100));
    }

    #[test]
    fn deserialise_empty_json_uses_defaults() {
        let s: Settings = serde_json::from_str("{}").unwrap();
        assert_eq!(s.engine, EngineParams::default());
        assert_eq!(s.ai_model, "deepseek/deepseek-chat");
    }

    #[test]
    fn deserialise_partial_json_fills_defaults() {
        let json = r#"{ "ai_qps": 1.0, "engine": { "min_confidence": 80.0 } }"#;
        let s: Settings = serde_json::from_str(json).unwrap();
        assert_eq!(s.ai_min_interval(), Duration::from_secs(1));
        assert!((s.engine.min_confidence - 80.0).abs() < f64::EPSILON);
        assert_eq!(s.engine.min_votes, 3);
    }

    #[test]
    fn env_overrides_and_fallbacks() {
        let mut s = Settings::default();
        s.apply_vars(vars(&[
            ("FEED_SSID", " abc "),
            ("FEED_IS_DEMO", "no"),
            ("DEEPSEEK_API_KEY", "sk-1"),
            ("DEEPSEEK_BASE_URL", "https://example.test/v1"),
            ("AI_QPS", "0.5"),
            ("LOG_LEVEL", "DEBUG"),
        ]));
        assert_eq!(s.feed_ssid.as_deref(), Some("abc"));
        assert!(!s.feed_is_demo);
        assert_eq!(s.ai_api_key, "sk-1");
        assert_eq!(s.ai_base_url, "https://example.test/v1");
        assert_eq!(s.ai_min_interval(), Duration::from_secs(2));
        assert_eq!(s.log_level, "debug");
    }

    #[test]
    fn demo_mode_selects_testnet_unless_overridden() {
        let mut s = Settings::default();
        assert_eq!(s.feed_endpoints().0, TESTNET_REST_URL);

        s.feed_is_demo = false;
        assert_eq!(s.feed_endpoints().0, "https://api.binance.com");

        s.feed_is_demo = true;
        s.feed_rest_url = "http://localhost:8080".to_string();
        let (rest, ws) = s.feed_endpoints();
        assert_eq!(rest, "http://localhost:8080");
        assert_eq!(ws, "wss://stream.binance.com:9443/ws");
    }

    #[test]
    fn openrouter_key_wins_over_deepseek_key() {
        let mut s = Settings::default();
        s.apply_vars(vars(&[("OPENROUTER_API_KEY", "or"), ("DEEPSEEK_API_KEY", "ds")]));
        assert_eq!(s.ai_api_key, "or");
    }

    #[test]
    fn invalid_qps_is_ignored() {
        let mut s = Settings::default();
        s.apply_vars(vars(&[("AI_QPS", "zero"), ("FEED_SSID", "   ")]));
        assert!((s.ai_qps - 0.33).abs() < f64::EPSILON);
        assert!(s.feed_ssid.is_none());
    }

    #[test]
    fn ssid_file_first_non_empty_line() {
        let path = std::env::temp_dir().join(format!("ssid-{}.txt", uuid::Uuid::new_v4()));
        std::fs::write(&path, "\n  \n  token-123  \nother\n").unwrap();
        let mut s = Settings::default();
        s.load_ssid_file(&path);
        assert_eq!(s.feed_ssid.as_deref(), Some("token-123"));
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn save_then_load() {
        let path = std::env::temp_dir().join(format!("settings-{}.json", uuid::Uuid::new_v4()));
        let mut s = Settings::default();
        s.ai_model = "custom/model".into();
        s.save(&path).unwrap();
        let loaded = Settings::load(&path).unwrap();
        assert_eq!(loaded.ai_model, "custom/model");
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn debug_redacts_secrets() {
        let mut s = Settings::default();
        s.ai_api_key = "sk-secret".into();
        s.feed_ssid = Some("ssid-secret".into());
        let out = format!("{s:?}");
        assert!(!out.contains("sk-secret"));
        assert!(!out.contains("ssid-secret"));
    }
}
