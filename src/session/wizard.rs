// =============================================================================
// Setup Wizard — market → asset class → asset → expiry
// =============================================================================
//
// Front-end agnostic finite-state machine.  Each state names the menu it
// shows; `transition` is the whole table.  A choice is either a 1-based
// index into the menu or the option label (case-insensitive).
// =============================================================================

use anyhow::Result;
use serde::Serialize;

use crate::types::{AssetClass, MarketType};

pub const REAL_FOREX: &[&str] = &[
    "EURUSD", "GBPUSD", "USDJPY", "AUDUSD", "USDCAD", "USDCHF", "EURGBP", "EURJPY", "GBPJPY", "NZDUSD",
];

pub const OTC_FOREX: &[&str] = &[
    "EURUSD OTC",
    "GBPUSD OTC",
    "USDJPY OTC",
    "AUDUSD OTC",
    "USDCAD OTC",
    "USDCHF OTC",
    "EURGBP OTC",
    "EURJPY OTC",
    "GBPJPY OTC",
    "NZDUSD OTC",
];

pub const CRYPTO: &[&str] = &[
    "BTCUSD", "ETHUSD", "BNBUSD", "SOLUSD", "XRPUSD", "ADAUSD", "DOGEUSD", "LTCUSD", "DOTUSD", "AVAXUSD",
];

/// (label, seconds)
pub const EXPIRIES: &[(&str, u32)] = &[
    ("5 seconds", 5),
    ("15 seconds", 15),
    ("30 seconds", 30),
    ("1 minute", 60),
    ("2 minutes", 120),
    ("3 minutes", 180),
    ("5 minutes", 300),
];

const MARKETS: &[(&str, MarketType)] = &[("REAL", MarketType::Real), ("OTC", MarketType::Otc)];
const CLASSES: &[(&str, AssetClass)] = &[("Forex", AssetClass::Forex), ("Crypto", AssetClass::Crypto)];

/// Assets offered for a market/class pair.
pub fn catalog(market: MarketType, class: AssetClass) -> &'static [&'static str] {
    match (class, market) {
        (AssetClass::Forex, MarketType::Real) => REAL_FOREX,
        (AssetClass::Forex, MarketType::Otc) => OTC_FOREX,
        (AssetClass::Crypto, _) => CRYPTO,
    }
}

/// Everything a session needs to start.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSpec {
    pub market: MarketType,
    pub asset_class: AssetClass,
    pub asset: String,
    pub expiry_seconds: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum WizardState {
    MarketType,
    AssetClass {
        market: MarketType,
    },
    Asset {
        market: MarketType,
        class: AssetClass,
    },
    Expiry {
        market: MarketType,
        class: AssetClass,
        asset: String,
    },
    Complete(SessionSpec),
}

impl WizardState {
    pub fn title(&self) -> &'static str {
        match self {
            Self::MarketType => "STEP 1 - Market Type",
            Self::AssetClass { .. } => "STEP 2 - Asset Class",
            Self::Asset { .. } => "STEP 3 - Asset Selection",
            Self::Expiry { .. } => "STEP 4 - Expiry Selection",
            Self::Complete(_) => "Setup complete",
        }
    }

    /// Menu labels for this step; empty once complete.
    pub fn options(&self) -> Vec<&'static str> {
        match self {
            Self::MarketType => MARKETS.iter().map(|(l, _)| *l).collect(),
            Self::AssetClass { .. } => CLASSES.iter().map(|(l, _)| *l).collect(),
            Self::Asset { market, class } => catalog(*market, *class).to_vec(),
            Self::Expiry { .. } => EXPIRIES.iter().map(|(l, _)| *l).collect(),
            Self::Complete(_) => Vec::new(),
        }
    }

    /// Title followed by a numbered menu.
    pub fn render(&self) -> String {
        let mut out = self.title().to_string();
        for (i, label) in self.options().iter().enumerate() {
            out.push_str(&format!("\n  {}. {}", i + 1, label));
        }
        out
    }
}

/// Resolve `input` against `options`, by 1-based index or label.
fn pick<T: Copy>(options: &[(&str, T)], input: &str) -> Option<T> {
    let input = input.trim();
    if let Ok(n) = input.parse::<usize>() {
        return n.checked_sub(1).and_then(|i| options.get(i)).map(|(_, v)| *v);
    }
    options
        .iter()
        .find(|(label, _)| label.eq_ignore_ascii_case(input))
        .map(|(_, v)| *v)
}

/// The transition table.  `None` means the choice is not on the menu and
/// the state is unchanged.
pub fn transition(state: &WizardState, input: &str) -> Option<WizardState> {
    match state {
        WizardState::MarketType => pick(MARKETS, input).map(|market| WizardState::AssetClass { market }),
        WizardState::AssetClass { market } => pick(CLASSES, input).map(|class| WizardState::Asset {
            market: *market,
            class,
        }),
        WizardState::Asset { market, class } => {
            let assets: Vec<(&str, &str)> = catalog(*market, *class).iter().map(|a| (*a, *a)).collect();
            pick(&assets, input).map(|asset| WizardState::Expiry {
                market: *market,
                class: *class,
                asset: asset.to_string(),
            })
        }
        WizardState::Expiry { market, class, asset } => pick(EXPIRIES, input).map(|expiry_seconds| {
            WizardState::Complete(SessionSpec {
                market: *market,
                asset_class: *class,
                asset: asset.clone(),
                expiry_seconds,
            })
        }),
        WizardState::Complete(_) => None,
    }
}

/// One user's walk through the setup menus.
#[derive(Debug, Clone)]
pub struct Wizard {
    state: WizardState,
}

impl Default for Wizard {
    fn default() -> Self {
        Self::new()
    }
}

impl Wizard {
    pub fn new() -> Self {
        Self {
            state: WizardState::MarketType,
        }
    }

    pub fn state(&self) -> &WizardState {
        &self.state
    }

    /// Apply one choice.  An invalid choice is an error and leaves the state
    /// untouched so the menu can be shown again.
    pub fn choose(&mut self, input: &str) -> Result<&WizardState> {
        match transition(&self.state, input) {
            Some(next) => {
                self.state = next;
                Ok(&self.state)
            }
            None => anyhow::bail!("'{}' is not an option for {}", input.trim(), self.state.title()),
        }
    }

    /// The finished spec, if the last step has been answered.
    pub fn spec(&self) -> Option<&SessionSpec> {
        match &self.state {
            WizardState::Complete(spec) => Some(spec),
            _ => None,
        }
    }
}
