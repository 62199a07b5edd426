// =============================================================================
// Confluence Engine — indicator votes gated by volatility and a validator
// =============================================================================
//
// Pipeline per evaluation:
//   1. Require `min_trade_bars` trade bars
//   2. EMA trend on the confirmation series; RSI, ATR, breakout and
//      rejection on the trade series
//   3. Volatility gate: an invalid ATR filter ends the evaluation
//   4. Tally votes (trend always votes; the others only when not `None`)
//   5. Candidate only when one side has `min_votes` and the other has none
//   6. Snapshot → validator; accept on matching direction and confidence
//      ≥ `min_confidence`
//
// Steps 1-5 are pure (`decide_candidate`).  Every skip is "no signal this
// cycle", logged at debug and never raised.
// =============================================================================

use tracing::{debug, info, instrument};

use super::decision::{Candidate, Decision, SkipReason};
use super::snapshot::{Signal, Snapshot, SNAPSHOT_BARS};
use crate::config::EngineParams;
use crate::indicators::{atr, rsi};
use crate::indicators::{
    atr_filter, calculate_atr, calculate_rsi, ema_trend, recent_breakout, rejection_wick, rsi_signal, Trend,
};
use crate::market_data::{closes, Candle};
use crate::types::{Direction, MarketType, Verdict, Vote};
use crate::validator::AiValidator;

/// Session parameters an evaluation runs under.
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationContext {
    pub market: MarketType,
    pub asset: String,
    pub expiry_seconds: u32,
}

#[derive(Debug, Clone, Default)]
pub struct ConfluenceEngine {
    params: EngineParams,
}

impl ConfluenceEngine {
    pub fn new(params: EngineParams) -> Self {
        Self { params }
    }

    /// Indicator stage: candidate direction or the reason there is none.
    pub fn decide_candidate(&self, ctx: &EvaluationContext, trade: &[Candle], confirm: &[Candle]) -> Decision {
        // ── 1. History gate ──────────────────────────────────────────────
        if trade.len() < self.params.min_trade_bars {
            return Decision::Skip(SkipReason::InsufficientData);
        }

        // ── 2. Indicators ────────────────────────────────────────────────
        let Some(trend) = ema_trend(&closes(confirm)) else {
            return Decision::Skip(SkipReason::InsufficientData);
        };

        let trade_closes = closes(trade);
        let momentum = rsi_signal_or_flat(&trade_closes);
        let volatility = atr_filter(&calculate_atr(trade, atr::DEFAULT_PERIOD), &trade_closes);
        let breakout = recent_breakout(trade, self.params.breakout_lookback);
        let rejection = rejection_wick(trade, self.params.wick_ratio);

        // ── 3. Volatility gate ───────────────────────────────────────────
        if !volatility.valid {
            debug!(
                asset = %ctx.asset,
                atr_relative = volatility.relative,
                "volatility outside tradeable band"
            );
            return Decision::Skip(SkipReason::VolatilityOutOfRange);
        }

        // ── 4. Votes ─────────────────────────────────────────────────────
        let trend_vote = match trend.trend {
            Trend::Up => Vote::Call,
            Trend::Down => Vote::Put,
        };
        let votes: Vec<Vote> = std::iter::once(trend_vote)
            .chain([momentum.1, breakout.vote, rejection.vote])
            .filter(|v| *v != Vote::None)
            .collect();

        let call_votes = votes.iter().filter(|v| **v == Vote::Call).count();
        let put_votes = votes.iter().filter(|v| **v == Vote::Put).count();

        // ── 5. Unanimity threshold ───────────────────────────────────────
        let direction = if call_votes >= self.params.min_votes && put_votes == 0 {
            Direction::Call
        } else if put_votes >= self.params.min_votes && call_votes == 0 {
            Direction::Put
        } else {
            debug!(asset = %ctx.asset, call_votes, put_votes, "no unanimous side");
            return Decision::Skip(SkipReason::MixedVotes);
        };

        let recent_start = trade.len().saturating_sub(SNAPSHOT_BARS);
        let snapshot = Snapshot {
            market: ctx.market,
            asset: ctx.asset.clone(),
            expiry_seconds: ctx.expiry_seconds,
            price: trade_closes.last().copied().unwrap_or_default(),
            recent: trade[recent_start..].to_vec(),
            trend: trend.trend,
            trend_strength: trend.strength,
            rsi: momentum.0,
            atr_relative: volatility.relative,
            breakout: breakout.broke,
            rejection: rejection.rejected,
            votes,
        };

        Decision::Candidate(Candidate {
            direction,
            call_votes,
            put_votes,
            snapshot,
        })
    }

    /// Validator stage: accept only a matching verdict at or above the
    /// confidence floor.  A confidence outside 0-100 is rejected, never
    /// clamped.
    pub fn judge(&self, candidate: Candidate, verdict: Verdict, confidence: f64) -> Result<Signal, SkipReason> {
        if verdict.direction() != Some(candidate.direction) {
            return Err(SkipReason::ValidatorDisagreed);
        }
        if !(0.0..=100.0).contains(&confidence) {
            return Err(SkipReason::InvalidConfidence);
        }
        if confidence < self.params.min_confidence {
            return Err(SkipReason::LowConfidence);
        }
        Ok(Signal::new(candidate.direction, confidence, candidate.snapshot))
    }

    /// Full evaluation.  `None` is the normal "nothing this cycle" outcome.
    #[instrument(skip_all, name = "confluence::evaluate", fields(asset = %ctx.asset, bars = trade.len()))]
    pub async fn evaluate(
        &self,
        ctx: &EvaluationContext,
        trade: &[Candle],
        confirm: &[Candle],
        validator: &AiValidator,
    ) -> Option<Signal> {
        let candidate = match self.decide_candidate(ctx, trade, confirm) {
            Decision::Candidate(c) => c,
            Decision::Skip(reason) => {
                debug!(%reason, "no candidate");
                return None;
            }
        };

        info!(
            direction = %candidate.direction,
            call_votes = candidate.call_votes,
            put_votes = candidate.put_votes,
            "candidate found, asking validator"
        );

        // ── 6. External validation ───────────────────────────────────────
        let (verdict, confidence) = validator.confirm(&candidate.snapshot).await;
        match self.judge(candidate, verdict, confidence) {
            Ok(signal) => {
                info!(
                    id = %signal.id,
                    direction = %signal.direction,
                    confidence = signal.confidence,
                    "signal accepted"
                );
                Some(signal)
            }
            Err(reason) => {
                debug!(%reason, %verdict, confidence, "candidate rejected by validator");
                None
            }
        }
    }
}

/// (latest RSI, vote); a flat 50 with no vote when the series is too short.
fn rsi_signal_or_flat(closes: &[f64]) -> (f64, Vote) {
    match rsi_signal(&calculate_rsi(closes, rsi::DEFAULT_PERIOD)) {
        Some(s) => (s.rsi, s.vote),
        None => (50.0, Vote::None),
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::market_data::{aggregate, higher_timeframe};
    use crate::validator::tests::FakeCompletion;
    use std::sync::Arc;
    use std::time::Duration;

    const TF: i64 = 60;
    const EXPIRY: u32 = 60;

    fn ctx() -> EvaluationContext {
        EvaluationContext {
            market: MarketType::Real,
            asset: "BTCUSD".to_string(),
            expiry_seconds: EXPIRY,
        }
    }

    fn engine() -> ConfluenceEngine {
        ConfluenceEngine::new(EngineParams::default())
    }

    /// Accelerating uptrend; `half_range` sets the bar range and so the ATR.
    fn rising_series(n: usize, half_range: f64) -> Vec<Candle> {
        (0..n)
            .map(|i| {
                let x = i as f64;
                let close = 100.0 + 0.01 * x + 0.0005 * x * x;
                Candle::new(
                    "BTCUSD",
                    i as i64 * TF,
                    close - 0.02,
                    close + half_range,
                    close - half_range,
                    close,
                    1.0,
                )
            })
            .collect()
    }

    /// Mirror image of `rising_series`.
    fn falling_series(n: usize, half_range: f64) -> Vec<Candle> {
        (0..n)
            .map(|i| {
                let x = i as f64;
                let close = 200.0 - 0.01 * x - 0.0005 * x * x;
                Candle::new(
                    "BTCUSD",
                    i as i64 * TF,
                    close + 0.02,
                    close + half_range,
                    close - half_range,
                    close,
                    1.0,
                )
            })
            .collect()
    }

    fn confirmation(trade: &[Candle]) -> Vec<Candle> {
        aggregate(trade, higher_timeframe(EXPIRY))
    }

    fn validator(reply: &str) -> AiValidator {
        AiValidator::new(
            Arc::new(FakeCompletion::replying(reply)),
            Duration::from_secs(3),
            Duration::from_secs(30),
        )
        .unwrap()
    }

    #[test]
    fn short_history_never_signals() {
        let trade = rising_series(59, 0.5);
        let decision = engine().decide_candidate(&ctx(), &trade, &confirmation(&trade));
        assert_eq!(decision.skip_reason(), Some(SkipReason::InsufficientData));
    }

    #[test]
    fn rising_market_gives_call_candidate() {
        let trade = rising_series(60, 0.5);
        let decision = engine().decide_candidate(&ctx(), &trade, &confirmation(&trade));
        let candidate = decision.candidate().expect("candidate");

        assert_eq!(candidate.direction, Direction::Call);
        assert_eq!(candidate.call_votes, 4);
        assert_eq!(candidate.put_votes, 0);

        let snap = &candidate.snapshot;
        assert!((snap.atr_relative - 0.01).abs() < 0.001);
        assert!(snap.rsi > 50.0);
        assert!(snap.breakout);
        assert_eq!(snap.trend, Trend::Up);
        assert_eq!(snap.recent.len(), SNAPSHOT_BARS);
        assert_eq!(snap.recent.last(), trade.last());
        assert_eq!(snap.price, trade[59].close);
    }

    #[test]
    fn falling_market_gives_put_candidate() {
        let trade = falling_series(60, 0.5);
        let decision = engine().decide_candidate(&ctx(), &trade, &confirmation(&trade));
        let candidate = decision.candidate().expect("candidate");
        assert_eq!(candidate.direction, Direction::Put);
        assert_eq!(candidate.call_votes, 0);
    }

    #[test]
    fn excessive_volatility_blocks_everything() {
        let trade = rising_series(60, 5.0);
        let decision = engine().decide_candidate(&ctx(), &trade, &confirmation(&trade));
        assert_eq!(decision.skip_reason(), Some(SkipReason::VolatilityOutOfRange));
    }

    #[test]
    fn opposing_trend_is_mixed() {
        let trade = rising_series(60, 0.5);
        let confirm = confirmation(&falling_series(60, 0.5));
        let decision = engine().decide_candidate(&ctx(), &trade, &confirm);
        assert_eq!(decision.skip_reason(), Some(SkipReason::MixedVotes));
    }

    #[test]
    fn empty_confirmation_is_insufficient() {
        let trade = rising_series(60, 0.5);
        let decision = engine().decide_candidate(&ctx(), &trade, &[]);
        assert_eq!(decision.skip_reason(), Some(SkipReason::InsufficientData));
    }

    #[test]
    fn judge_rules() {
        let trade = rising_series(60, 0.5);
        let e = engine();
        let candidate = || {
            e.decide_candidate(&ctx(), &trade, &confirmation(&trade))
                .candidate()
                .cloned()
                .expect("candidate")
        };

        assert_eq!(
            e.judge(candidate(), Verdict::Put, 90.0).unwrap_err(),
            SkipReason::ValidatorDisagreed
        );
        assert_eq!(
            e.judge(candidate(), Verdict::NoTrade, 90.0).unwrap_err(),
            SkipReason::ValidatorDisagreed
        );
        assert_eq!(
            e.judge(candidate(), Verdict::Call, 69.9).unwrap_err(),
            SkipReason::LowConfidence
        );
        assert_eq!(
            e.judge(candidate(), Verdict::Call, 100.5).unwrap_err(),
            SkipReason::InvalidConfidence
        );
        assert_eq!(
            e.judge(candidate(), Verdict::Call, f64::NAN).unwrap_err(),
            SkipReason::InvalidConfidence
        );
        let signal = e.judge(candidate(), Verdict::Call, 70.0).unwrap();
        assert_eq!(signal.confidence, 70.0);
        assert_eq!(e.judge(candidate(), Verdict::Call, 100.0).unwrap().confidence, 100.0);
    }

    #[tokio::test(start_paused = true)]
    async fn out_of_range_confidence_gives_no_signal() {
        let trade = rising_series(60, 0.5);
        let signal = engine()
            .evaluate(&ctx(), &trade, &confirmation(&trade), &validator("CALL 999%"))
            .await;
        assert!(signal.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn validator_mismatch_gives_no_signal() {
        let trade = rising_series(60, 0.5);
        let signal = engine()
            .evaluate(&ctx(), &trade, &confirmation(&trade), &validator("PUT|55"))
            .await;
        assert!(signal.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn validator_agreement_gives_signal() {
        let trade = rising_series(60, 0.5);
        let signal = engine()
            .evaluate(&ctx(), &trade, &confirmation(&trade), &validator("CALL|82"))
            .await
            .expect("signal");

        assert_eq!(signal.direction, Direction::Call);
        assert_eq!(signal.confidence, 82.0);
        assert_eq!(signal.asset, "BTCUSD");
        assert_eq!(signal.expiry_seconds, EXPIRY);
        assert_eq!(signal.snapshot.market, MarketType::Real);
    }

    #[tokio::test(start_paused = true)]
    async fn validator_not_called_without_candidate() {
        let fake = Arc::new(FakeCompletion::replying("CALL|99"));
        let v = AiValidator::new(fake.clone(), Duration::from_secs(3), Duration::from_secs(30)).unwrap();
        let trade = rising_series(60, 5.0);

        assert!(engine().evaluate(&ctx(), &trade, &confirmation(&trade), &v).await.is_none());
        assert!(fake.starts.lock().is_empty());
    }
}
