// =============================================================================
// AI Validator — rate-limited second opinion on a confluence candidate
// =============================================================================
//
// `confirm` never returns an error.  Transport failures, timeouts, panics in
// the client and unparseable replies all collapse to (NO_TRADE, 0) so the
// pipeline fails closed.
//
// Reply parsing is permissive.  The direction is the first of CALL, PUT,
// NO_TRADE (checked in that order) found anywhere in the upper-cased reply.
// The confidence is the first 2-3 digit number followed by `%`, else the
// number right after `|`, else 0.  A confidence above 100 makes the whole
// reply (NO_TRADE, 0).
// =============================================================================

pub mod client;
pub mod rate_limit;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use regex::Regex;
use tracing::{error, info, instrument};

use crate::engine::Snapshot;
use crate::types::Verdict;

pub use client::{CompletionClient, OpenRouterClient};
pub use rate_limit::RateLimiter;

/// Fail-closed answer.
pub const NO_TRADE: (Verdict, f64) = (Verdict::NoTrade, 0.0);

// =============================================================================
// Reply parsing
// =============================================================================

#[derive(Debug)]
pub struct ReplyParser {
    percent: Regex,
    delimited: Regex,
}

impl ReplyParser {
    pub fn new() -> Result<Self> {
        Ok(Self {
            percent: Regex::new(r"(\d{2,3})\s*%").context("invalid percent pattern")?,
            delimited: Regex::new(r"\|\s*(\d{2,3})\b").context("invalid delimiter pattern")?,
        })
    }

    pub fn parse(&self, reply: &str) -> (Verdict, f64) {
        let text = reply.trim().to_uppercase();

        let verdict = if text.contains("CALL") {
            Verdict::Call
        } else if text.contains("PUT") {
            Verdict::Put
        } else {
            Verdict::NoTrade
        };

        let confidence = self
            .percent
            .captures(&text)
            .or_else(|| self.delimited.captures(&text))
            .and_then(|caps| caps.get(1))
            .and_then(|m| m.as_str().parse::<f64>().ok())
            .unwrap_or(0.0);

        if confidence > 100.0 {
            return NO_TRADE;
        }
        (verdict, confidence)
    }
}

// =============================================================================
// Prompt
// =============================================================================

/// Fixed-format description of a snapshot.
pub fn format_prompt(s: &Snapshot) -> String {
    format!(
        "Market: {}\n\
         Asset: {}\n\
         Expiry: {}s\n\
         Price: {}\n\
         Volatility: ATR_rel={:.6}\n\
         EMA Trend: {} strength={:.4}\n\
         RSI: {:.2}\n\
         Structure: breakout={} reject={}\n\
         Task: Validate direction (CALL/PUT/NO_TRADE) for a binary option. \
         Reject choppy/manipulated conditions. Return confidence percent (0-100).",
        s.market,
        s.asset,
        s.expiry_seconds,
        s.price,
        s.atr_relative,
        s.trend,
        s.trend_strength,
        s.rsi,
        s.breakout,
        s.rejection,
    )
}

// =============================================================================
// AiValidator
// =============================================================================

pub struct AiValidator {
    client: Arc<dyn CompletionClient>,
    limiter: RateLimiter,
    timeout: Duration,
    parser: ReplyParser,
}

impl AiValidator {
    pub fn new(client: Arc<dyn CompletionClient>, min_interval: Duration, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client,
            limiter: RateLimiter::new(min_interval),
            timeout,
            parser: ReplyParser::new()?,
        })
    }

    /// Ask the external model for a verdict on `snapshot`.
    ///
    /// The request runs on its own task, which owns the limiter turn until
    /// the request finishes or is aborted on timeout.  Dropping the caller
    /// therefore never lets a second request start while one is in flight.
    #[instrument(skip(self, snapshot), name = "validator::confirm", fields(asset = %snapshot.asset))]
    pub async fn confirm(&self, snapshot: &Snapshot) -> (Verdict, f64) {
        let turn = self.limiter.acquire().await;

        let prompt = format_prompt(snapshot);
        let client = self.client.clone();
        let mut call = tokio::spawn(async move {
            let _turn = turn;
            client.complete(&prompt).await
        });

        let reply = match tokio::time::timeout(self.timeout, &mut call).await {
            Ok(Ok(Ok(text))) => text,
            Ok(Ok(Err(e))) => {
                error!(error = %e, "validator request failed");
                return NO_TRADE;
            }
            Ok(Err(e)) => {
                error!(error = %e, "validator task aborted");
                return NO_TRADE;
            }
            Err(_) => {
                call.abort();
                error!(timeout_secs = self.timeout.as_secs_f64(), "validator request timed out");
                return NO_TRADE;
            }
        };

        let (verdict, confidence) = self.parser.parse(&reply);
        info!(%verdict, confidence, "validator verdict");
        (verdict, confidence)
    }
}

impl std::fmt::Debug for AiValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AiValidator")
            .field("limiter", &self.limiter)
            .field("timeout", &self.timeout)
            .finish()
    }
}
