use engine_types::Signal;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Pre-gate rejection codes. Order of evaluation is G1..G5; the first
/// gate that fails wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    SafeMode,
    PositionLimit,
    DailyLossLimit,
    DrawdownLimit,
    InsufficientCash,
    MinSizeGate,
}

/// Output of `RiskManager::evaluate`: either an approved sizing or a
/// typed rejection. Never panics; every rejection carries a reason code so
/// the caller (and `/status`) can report why a signal did not become a
/// position.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RiskDecision {
    Approved {
        quantity: u64,
        position_value: Decimal,
        stop_price: Decimal,
        take_profit_price: Decimal,
    },
    Rejected {
        reason: RejectReason,
    },
}

impl RiskDecision {
    pub fn is_approved(&self) -> bool {
        matches!(self, RiskDecision::Approved { .. })
    }
}

/// Every input `evaluate` needs, snapshotted by the caller so the sizing
/// formula is a pure function of its arguments: same
/// inputs -> bit-identical output.
#[derive(Debug, Clone)]
pub struct RiskContext {
    pub signal: Signal,
    pub available_cash: Decimal,
    /// Sum of entry values of currently open managed positions, the
    /// `trading_cash - already_open` term.
    pub open_managed_value: Decimal,
    pub open_positions_count: u32,
    /// Positive magnitude, e.g. `5.5` for a 5.5% loss today.
    pub daily_realized_loss_pct: f64,
    pub drawdown_vs_peak_pct: f64,
    /// Lifetime realized return, used by the profit-scaling tier.
    pub lifetime_realized_return_pct: f64,
    /// Reserved win-streak hook; identity mapping in v1.
    pub consecutive_winning_trades: u32,
}

/// A safe-mode state transition, kept for the `/status` event log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SafeModeEvent {
    pub at: chrono::DateTime<chrono::Utc>,
    pub active: bool,
    pub reason: String,
}
