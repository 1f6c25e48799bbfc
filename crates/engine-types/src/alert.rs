use crate::{ExitReason, Symbol};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Emitted by the trade executor on a successful open.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryAlert {
    pub symbol: Symbol,
    pub quantity: u64,
    pub entry_price: Decimal,
    pub simulated: bool,
    pub stop_price: Decimal,
    pub take_profit_price: Decimal,
    pub confidence: f64,
    pub expected_return_pct: f64,
    pub at: DateTime<Utc>,
}

/// Emitted by the trade executor / position monitor on a close.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExitAlert {
    pub symbol: Symbol,
    pub exit_price: Decimal,
    pub pnl_abs: Decimal,
    pub pnl_pct: Decimal,
    pub duration_secs: i64,
    pub exit_reason: ExitReason,
    pub simulated: bool,
    pub at: DateTime<Utc>,
}

/// Heartbeat / daily-summary alerts, kept in the same taxonomy so the
/// notification service's throttle and transport apply uniformly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Heartbeat {
    pub cycle: u64,
    pub open_positions: u32,
    pub safe_mode: bool,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DailyReport {
    pub date: chrono::NaiveDate,
    pub trades_closed: u32,
    pub wins: u32,
    pub losses: u32,
    pub realized_pnl_abs: Decimal,
    pub realized_pnl_pct: f64,
}

/// One outbound notification, tagged by kind. The notification service
/// throttles and routes on this enum rather than on free-form strings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Alert {
    Entry(EntryAlert),
    Exit(ExitAlert),
    SafeModeTripped { reason: String, at: DateTime<Utc> },
    SafeModeCleared { reason: String, at: DateTime<Utc> },
    OrderRejected { symbol: Symbol, reason: String, at: DateTime<Utc> },
    CloseFailed { symbol: Symbol, at: DateTime<Utc> },
    /// The active E*TRADE token environment moved to EXPIRED, whether from
    /// a keepalive exhausting its retries or an ordinary call hitting a 401.
    /// Real ordering is disabled until it clears.
    TokenExpired { reason: String, at: DateTime<Utc> },
    Heartbeat(Heartbeat),
    DailyReport(DailyReport),
}
