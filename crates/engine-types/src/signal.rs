use crate::Symbol;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Categorical measure of consensus among independent strategy evaluators on
/// the same symbol in the same evaluation round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Agreement {
    None,
    Low,
    Medium,
    High,
}

impl Agreement {
    /// Additive position-size bonus used by the sizing formula.
    pub fn sizing_bonus(&self) -> Decimal {
        match self {
            Agreement::None => Decimal::ZERO,
            Agreement::Low => Decimal::ZERO,
            Agreement::Medium => Decimal::new(25, 2),
            Agreement::High => Decimal::new(50, 2),
        }
    }

    /// Confidence bonus applied during gating (LOW->0, MEDIUM->0.05, HIGH->0.10).
    pub fn confidence_bonus(&self) -> f64 {
        match self {
            Agreement::None => 0.0,
            Agreement::Low => 0.0,
            Agreement::Medium => 0.05,
            Agreement::High => 0.10,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
}

/// Decision artifact emitted by the signal generator (C6). Consumed once by
/// the risk manager (C7) then discarded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub symbol: Symbol,
    pub side: Side,
    pub confidence: f64,
    pub expected_return_pct: f64,
    pub quality_score: f64,
    pub strategy_agreement: Agreement,
    pub entry_reference_price: Decimal,
    pub created_at: DateTime<Utc>,
}

impl Signal {
    pub fn confidence_is_valid(&self) -> bool {
        (0.0..=1.0).contains(&self.confidence)
    }
}

/// Trading mode selecting confidence & sizing defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyMode {
    Standard,
    Advanced,
    Quantum,
}

impl StrategyMode {
    pub fn min_signal_confidence(&self) -> f64 {
        match self {
            StrategyMode::Standard => 0.90,
            StrategyMode::Advanced => 0.92,
            StrategyMode::Quantum => 0.95,
        }
    }

    pub fn default_max_positions(&self) -> u32 {
        match self {
            StrategyMode::Standard => 20,
            StrategyMode::Advanced => 15,
            StrategyMode::Quantum => 10,
        }
    }
}

/// If `SignalOnly`, the trade executor simulates orders; positions are still
/// tracked and monitored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SystemMode {
    SignalOnly,
    FullTrading,
}

/// Which token set the OAuth token manager treats as primary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EtradeMode {
    Live,
    Sandbox,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agreement_sizing_bonuses_match_spec_table() {
        assert_eq!(Agreement::None.sizing_bonus(), Decimal::ZERO);
        assert_eq!(Agreement::Low.sizing_bonus(), Decimal::ZERO);
        assert_eq!(Agreement::Medium.sizing_bonus(), Decimal::new(25, 2));
        assert_eq!(Agreement::High.sizing_bonus(), Decimal::new(50, 2));
    }

    #[test]
    fn min_signal_confidence_matches_mode_table() {
        assert_eq!(StrategyMode::Standard.min_signal_confidence(), 0.90);
        assert_eq!(StrategyMode::Advanced.min_signal_confidence(), 0.92);
        assert_eq!(StrategyMode::Quantum.min_signal_confidence(), 0.95);
    }
}
