use crate::Symbol;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Stealth-trailing state machine states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionState {
    Initial,
    BreakevenArmed,
    Trailing,
    Closed,
}

/// Exit classification (Open Question #2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    StopHit,
    Breakeven,
    TrailingStop,
    TakeProfit,
    TakeProfitExtended,
    RsiExhaustion,
    TimeExit,
    VolumeReversal,
    DataStarved,
}

/// An open long exposure owned by this engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub symbol: Symbol,
    pub entry_price: Decimal,
    pub quantity: u64,
    pub entry_time: DateTime<Utc>,
    pub stop_price: Decimal,
    pub take_profit_price: Decimal,
    /// Initial take-profit distance, used to classify TakeProfitExtended.
    pub initial_take_profit_price: Decimal,
    pub high_water_price: Decimal,
    pub state: PositionState,
    pub simulated: bool,
    pub client_tag: String,
    pub exit_reason: Option<ExitReason>,
    pub exit_price: Option<Decimal>,
    pub exit_time: Option<DateTime<Utc>>,
    /// Set after a close attempt fails and is retried on subsequent ticks.
    pub close_attempt_failed: bool,
    /// Consecutive ticks this tick loop could not obtain a fresh quote.
    pub consecutive_missed_quotes: u32,
}

impl Position {
    pub fn is_open(&self) -> bool {
        self.state != PositionState::Closed
    }

    pub fn unrealized_return_pct(&self, last: Decimal) -> Decimal {
        if self.entry_price.is_zero() {
            return Decimal::ZERO;
        }
        (last - self.entry_price) / self.entry_price
    }

    /// Invariant P1/P2: stop and high-water price are monotonically
    /// non-decreasing once set; callers must route all mutation through this
    /// helper rather than assigning the fields directly.
    pub fn raise_stop_to(&mut self, candidate: Decimal) {
        if candidate > self.stop_price {
            self.stop_price = candidate;
        }
    }

    pub fn raise_high_water_to(&mut self, candidate: Decimal) {
        if candidate > self.high_water_price {
            self.high_water_price = candidate;
        }
    }
}

/// Immutable close-out artifact appended to a bounded in-memory history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRecord {
    pub symbol: Symbol,
    pub entry_price: Decimal,
    pub exit_price: Decimal,
    pub quantity: u64,
    pub entry_time: DateTime<Utc>,
    pub exit_time: DateTime<Utc>,
    pub pnl_abs: Decimal,
    pub pnl_pct: Decimal,
    pub exit_reason: ExitReason,
    pub simulated: bool,
}

impl TradeRecord {
    pub fn duration(&self) -> chrono::Duration {
        self.exit_time - self.entry_time
    }

    pub fn is_win(&self) -> bool {
        self.pnl_abs > Decimal::ZERO
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn sample_position() -> Position {
        Position {
            symbol: Symbol::new("AAPL").unwrap(),
            entry_price: dec!(150.00),
            quantity: 10,
            entry_time: Utc::now(),
            stop_price: dec!(145.50),
            take_profit_price: dec!(157.50),
            initial_take_profit_price: dec!(157.50),
            high_water_price: dec!(150.00),
            state: PositionState::Initial,
            simulated: false,
            client_tag: "tag".to_string(),
            exit_reason: None,
            exit_price: None,
            exit_time: None,
            close_attempt_failed: false,
            consecutive_missed_quotes: 0,
        }
    }

    #[test]
    fn stop_never_moves_down() {
        let mut p = sample_position();
        p.raise_stop_to(dec!(150.30));
        assert_eq!(p.stop_price, dec!(150.30));
        p.raise_stop_to(dec!(149.00));
        assert_eq!(p.stop_price, dec!(150.30), "stop must not lower");
    }

    #[test]
    fn high_water_never_moves_down() {
        let mut p = sample_position();
        p.raise_high_water_to(dec!(152.00));
        p.raise_high_water_to(dec!(151.00));
        assert_eq!(p.high_water_price, dec!(152.00));
    }
}
