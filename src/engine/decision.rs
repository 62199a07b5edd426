// =============================================================================
// Decision — outcome of one confluence evaluation
// =============================================================================
//
// A skip is a normal outcome, not a fault.  The reason exists for logs and
// tests only; callers treat every skip as "no signal this cycle".

use serde::Serialize;

use super::snapshot::Snapshot;
use crate::types::Direction;

/// Why an evaluation produced no signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SkipReason {
    /// Too few trade bars, or an indicator had nothing to work with.
    InsufficientData,
    /// Relative ATR outside the tradeable band.
    VolatilityOutOfRange,
    /// Neither side reached the vote threshold unopposed.
    MixedVotes,
    /// Validator answered the other side or NO_TRADE.
    ValidatorDisagreed,
    /// Validator agreed but below the confidence floor.
    LowConfidence,
    /// Validator confidence outside 0-100.
    InvalidConfidence,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::InsufficientData => "insufficient_data",
            Self::VolatilityOutOfRange => "volatility_out_of_range",
            Self::MixedVotes => "mixed_votes",
            Self::ValidatorDisagreed => "validator_disagreed",
            Self::LowConfidence => "low_confidence",
            Self::InvalidConfidence => "invalid_confidence",
        };
        f.write_str(s)
    }
}

/// Direction agreed by the indicators, awaiting validation.
#[derive(Debug, Clone, Serialize)]
pub struct Candidate {
    pub direction: Direction,
    pub call_votes: usize,
    pub put_votes: usize,
    pub snapshot: Snapshot,
}

#[derive(Debug, Clone, Serialize)]
pub enum Decision {
    Candidate(Candidate),
    Skip(SkipReason),
}

impl Decision {
    pub fn candidate(&self) -> Option<&Candidate> {
        match self {
            Self::Candidate(c) => Some(c),
            Self::Skip(_) => None,
        }
    }

    pub fn skip_reason(&self) -> Option<SkipReason> {
        match self {
            Self::Candidate(_) => None,
            Self::Skip(r) => Some(*r),
        }
    }
}
