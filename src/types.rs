// =============================================================================
// Shared types used across the confluence pipeline
// =============================================================================

use serde::{Deserialize, Serialize};

/// Direction of a binary-option recommendation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Call,
    Put,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Call => write!(f, "CALL"),
            Self::Put => write!(f, "PUT"),
        }
    }
}

/// A single indicator's opinion. `None` means the indicator abstains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Vote {
    Call,
    Put,
    None,
}

impl Vote {
    pub fn direction(self) -> Option<Direction> {
        match self {
            Self::Call => Some(Direction::Call),
            Self::Put => Some(Direction::Put),
            Self::None => None,
        }
    }
}

impl Default for Vote {
    fn default() -> Self {
        Self::None
    }
}

impl std::fmt::Display for Vote {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Call => write!(f, "call"),
            Self::Put => write!(f, "put"),
            Self::None => write!(f, "none"),
        }
    }
}

/// Answer returned by the external reasoning validator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Verdict {
    Call,
    Put,
    NoTrade,
}

impl Verdict {
    pub fn direction(self) -> Option<Direction> {
        match self {
            Self::Call => Some(Direction::Call),
            Self::Put => Some(Direction::Put),
            Self::NoTrade => None,
        }
    }
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Call => write!(f, "CALL"),
            Self::Put => write!(f, "PUT"),
            Self::NoTrade => write!(f, "NO_TRADE"),
        }
    }
}

/// Real exchange hours or the broker's synthetic over-the-counter feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MarketType {
    Real,
    Otc,
}

impl Default for MarketType {
    fn default() -> Self {
        Self::Real
    }
}

impl std::fmt::Display for MarketType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Real => write!(f, "REAL"),
            Self::Otc => write!(f, "OTC"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AssetClass {
    Forex,
    Crypto,
}

impl std::fmt::Display for AssetClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Forex => write!(f, "Forex"),
            Self::Crypto => write!(f, "Crypto"),
        }
    }
}
