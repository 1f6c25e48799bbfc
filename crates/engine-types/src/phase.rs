use serde::{Deserialize, Serialize};

/// Categorical classification of the current moment relative to U.S. equity
/// market hours in America/New_York.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Closed,
    PreMarket,
    Regular,
    AfterHours,
}

impl Phase {
    pub fn is_tradeable(&self) -> bool {
        matches!(self, Phase::Regular)
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Phase::Closed => "closed",
            Phase::PreMarket => "pre_market",
            Phase::Regular => "regular",
            Phase::AfterHours => "after_hours",
        };
        f.write_str(s)
    }
}
