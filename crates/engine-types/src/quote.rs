use crate::Symbol;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Snapshot of a symbol at a point in time. All prices are exact decimals —
/// never binary float — so P&L math never drifts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quote {
    pub symbol: Symbol,
    pub last: Option<Decimal>,
    pub bid: Option<Decimal>,
    pub ask: Option<Decimal>,
    pub volume: u64,
    pub day_high: Option<Decimal>,
    pub day_low: Option<Decimal>,
    pub prev_close: Option<Decimal>,
    pub captured_at: DateTime<Utc>,
}

impl Quote {
    /// `bid <= last <= ask` unless a leg is missing. Missing legs are unknown,
    /// never treated as zero.
    pub fn respects_bid_ask_invariant(&self) -> bool {
        match (self.bid, self.last, self.ask) {
            (Some(bid), Some(last), Some(ask)) => bid <= last && last <= ask,
            _ => true,
        }
    }

    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.captured_at
    }

    pub fn is_fresh(&self, now: DateTime<Utc>, ttl: chrono::Duration) -> bool {
        self.age(now) <= ttl
    }
}

/// Account state as reported by the broker, narrowed to what the engine needs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountSnapshot {
    pub available_cash: Decimal,
    pub total_account_value: Decimal,
    /// Sum of current market value of positions this engine opened.
    pub managed_position_value: Decimal,
    /// High-water mark of total_account_value over process lifetime.
    pub peak_capital: Decimal,
    pub captured_at: DateTime<Utc>,
}

impl AccountSnapshot {
    pub fn is_valid(&self) -> bool {
        self.available_cash >= Decimal::ZERO
            && self.total_account_value >= self.managed_position_value
    }

    pub fn drawdown_vs_peak_pct(&self) -> Decimal {
        if self.peak_capital <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        ((self.peak_capital - self.total_account_value) / self.peak_capital) * Decimal::from(100)
    }
}

/// A broker-reported position, used only informationally by C3 to compute
/// `managed_position_value`; positions opened outside the engine are never
/// touched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerPosition {
    pub symbol: Symbol,
    pub quantity: Decimal,
    pub market_value: Decimal,
    pub unrealized_pl: Decimal,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn sample_quote(bid: Option<Decimal>, last: Option<Decimal>, ask: Option<Decimal>) -> Quote {
        Quote {
            symbol: Symbol::new("AAPL").unwrap(),
            last,
            bid,
            ask,
            volume: 1000,
            day_high: None,
            day_low: None,
            prev_close: None,
            captured_at: Utc::now(),
        }
    }

    #[test]
    fn bid_ask_invariant_holds_when_all_present() {
        let q = sample_quote(Some(dec!(10.00)), Some(dec!(10.05)), Some(dec!(10.10)));
        assert!(q.respects_bid_ask_invariant());
    }

    #[test]
    fn bid_ask_invariant_tolerates_missing_legs() {
        let q = sample_quote(None, Some(dec!(10.05)), None);
        assert!(q.respects_bid_ask_invariant());
    }

    #[test]
    fn drawdown_is_zero_when_at_peak() {
        let snap = AccountSnapshot {
            available_cash: dec!(1000),
            total_account_value: dec!(10000),
            managed_position_value: dec!(0),
            peak_capital: dec!(10000),
            captured_at: Utc::now(),
        };
        assert_eq!(snap.drawdown_vs_peak_pct(), Decimal::ZERO);
    }
}
