use std::collections::BTreeMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use engine_types::{EngineConfig, Position, Quote, Symbol};
use rust_decimal::Decimal;

use crate::machine::{self, ExitDecision, TickFeatures};

struct Slot {
    position: Position,
    last_known_price: Decimal,
}

/// Stealth Trailing Monitor: owns the single position-map mutex.
/// `TradeExecutor::open` hands a new `Position` here via `register`; this
/// monitor's tick loop is the only thing that removes one.
pub struct PositionMonitor {
    slots: Mutex<BTreeMap<Symbol, Slot>>,
}

/// Output of one closed position: the final state (for alerting) and why.
pub struct ClosedPosition {
    pub position: Position,
    pub decision: ExitDecision,
}

impl Default for PositionMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl PositionMonitor {
    pub fn new() -> Self {
        Self { slots: Mutex::new(BTreeMap::new()) }
    }

    /// Registers a freshly-opened position. Idempotency of the open itself
    /// is the trade executor's job; this just takes ownership.
    pub fn register(&self, position: Position) {
        let last_known_price = position.entry_price;
        let symbol = position.symbol.clone();
        self.slots.lock().expect("position map poisoned").insert(symbol, Slot { position, last_known_price });
    }

    /// Reinserts a position whose close attempt failed twice:
    /// stays OPEN, flagged, and will be retried on the next tick.
    pub fn reopen(&self, mut position: Position) {
        position.close_attempt_failed = true;
        position.exit_reason = None;
        position.exit_price = None;
        position.exit_time = None;
        let last_known_price = position.entry_price;
        let symbol = position.symbol.clone();
        self.slots.lock().expect("position map poisoned").insert(symbol, Slot { position, last_known_price });
    }

    pub fn open_positions_count(&self) -> usize {
        self.slots.lock().expect("position map poisoned").len()
    }

    /// Sum of entry value (not current market value) of every open
    /// position, the `open_managed_value` term the risk manager sizes
    /// against: trading_cash minus the sum of open managed values.
    pub fn open_managed_value(&self) -> Decimal {
        self.slots
            .lock()
            .expect("position map poisoned")
            .values()
            .map(|slot| slot.position.entry_price * Decimal::from(slot.position.quantity))
            .sum()
    }

    pub fn symbols(&self) -> Vec<Symbol> {
        self.slots.lock().expect("position map poisoned").keys().cloned().collect()
    }

    pub fn snapshot(&self) -> Vec<Position> {
        self.slots.lock().expect("position map poisoned").values().map(|slot| slot.position.clone()).collect()
    }

    /// Unconditional removal outside the normal tick exit path, for a forced
    /// close on shutdown where the caller has already settled the position
    /// with the broker and just needs the map to reflect it.
    pub fn remove(&self, symbol: &Symbol) -> Option<Position> {
        self.slots.lock().expect("position map poisoned").remove(symbol).map(|slot| slot.position)
    }

    /// The tick loop. Steps 1+2 (snapshot, quote fetch) are the
    /// caller's job — `quotes`/`features` are already fetched by the time
    /// this is called. This method does step 3 (pure state-machine advance,
    /// no lock held) then step 4 (lock, apply, remove exits).
    pub fn tick(
        &self,
        quotes: &BTreeMap<Symbol, Quote>,
        features: &BTreeMap<Symbol, TickFeatures>,
        now: DateTime<Utc>,
        minutes_to_close: Option<i64>,
        config: &EngineConfig,
    ) -> Vec<ClosedPosition> {
        let snapshot: Vec<(Symbol, Position, Decimal)> = {
            let slots = self.slots.lock().expect("position map poisoned");
            slots.iter().map(|(sym, slot)| (sym.clone(), slot.position.clone(), slot.last_known_price)).collect()
        };

        let results: Vec<(Symbol, machine::TickResult)> = snapshot
            .into_iter()
            .map(|(symbol, position, last_known_price)| {
                let quote = quotes.get(&symbol);
                let feats = features.get(&symbol);
                let result = machine::tick(position, last_known_price, quote, feats, now, minutes_to_close, config);
                (symbol, result)
            })
            .collect();

        let mut closed = Vec::new();
        let mut slots = self.slots.lock().expect("position map poisoned");
        for (symbol, result) in results {
            if !slots.contains_key(&symbol) {
                // Removed between snapshot and apply (shouldn't happen with
                // a single monitor instance, but guards against misuse).
                continue;
            }
            match result.exit {
                Some(decision) => {
                    slots.remove(&symbol);
                    closed.push(ClosedPosition { position: result.position, decision });
                }
                None => {
                    slots.insert(symbol, Slot { position: result.position, last_known_price: result.last_known_price });
                }
            }
        }
        closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use engine_types::{ExitReason, PositionState};
    use rust_decimal_macros::dec;

    fn sample_position(symbol: &str) -> Position {
        Position {
            symbol: Symbol::new(symbol).unwrap(),
            entry_price: dec!(100.00),
            quantity: 10,
            entry_time: Utc::now() - chrono::Duration::minutes(20),
            stop_price: dec!(97.00),
            take_profit_price: dec!(105.00),
            initial_take_profit_price: dec!(105.00),
            high_water_price: dec!(100.00),
            state: PositionState::Initial,
            simulated: true,
            client_tag: "tag".to_string(),
            exit_reason: None,
            exit_price: None,
            exit_time: None,
            close_attempt_failed: false,
            consecutive_missed_quotes: 0,
        }
    }

    fn quote_at(symbol: &str, price: Decimal) -> Quote {
        Quote {
            symbol: Symbol::new(symbol).unwrap(),
            last: Some(price),
            bid: Some(price),
            ask: Some(price),
            volume: 100_000,
            day_high: None,
            day_low: None,
            prev_close: None,
            captured_at: Utc::now(),
        }
    }

    #[test]
    fn register_then_tick_with_no_exit_keeps_position_open() {
        let monitor = PositionMonitor::new();
        monitor.register(sample_position("AAPL"));
        let mut quotes = BTreeMap::new();
        quotes.insert(Symbol::new("AAPL").unwrap(), quote_at("AAPL", dec!(100.10)));
        let closed = monitor.tick(&quotes, &BTreeMap::new(), Utc::now(), None, &EngineConfig::default());
        assert!(closed.is_empty());
        assert_eq!(monitor.open_positions_count(), 1);
    }

    #[test]
    fn stop_hit_removes_position_from_map() {
        let monitor = PositionMonitor::new();
        monitor.register(sample_position("AAPL"));
        let mut quotes = BTreeMap::new();
        quotes.insert(Symbol::new("AAPL").unwrap(), quote_at("AAPL", dec!(96.00)));
        let closed = monitor.tick(&quotes, &BTreeMap::new(), Utc::now(), None, &EngineConfig::default());
        assert_eq!(closed.len(), 1);
        assert_eq!(closed[0].decision.reason, ExitReason::StopHit);
        assert_eq!(monitor.open_positions_count(), 0);
    }

    #[test]
    fn reopen_after_failed_close_restores_open_state() {
        let monitor = PositionMonitor::new();
        monitor.register(sample_position("AAPL"));
        let mut quotes = BTreeMap::new();
        quotes.insert(Symbol::new("AAPL").unwrap(), quote_at("AAPL", dec!(96.00)));
        let mut closed = monitor.tick(&quotes, &BTreeMap::new(), Utc::now(), None, &EngineConfig::default());
        assert_eq!(monitor.open_positions_count(), 0);
        let failed = closed.remove(0).position;
        monitor.reopen(failed);
        assert_eq!(monitor.open_positions_count(), 1);
        assert!(monitor.snapshot()[0].close_attempt_failed);
    }

    #[test]
    fn open_managed_value_sums_entry_values() {
        let monitor = PositionMonitor::new();
        monitor.register(sample_position("AAPL"));
        monitor.register(sample_position("MSFT"));
        assert_eq!(monitor.open_managed_value(), dec!(2000.00));
    }
}
