use chrono::{DateTime, Utc};
use engine_types::{EngineConfig, ExitReason, Position, PositionState, Quote};
use rust_decimal::Decimal;

/// Technical features the state machine needs beyond the raw quote.
/// Supplied by whatever bar source the position monitor's caller already
/// maintains for the open symbols.
#[derive(Debug, Clone, Copy)]
pub struct TickFeatures {
    pub rsi_14: f64,
    pub volume_5min: u64,
    pub volume_20period_avg: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct ExitDecision {
    pub reason: ExitReason,
    pub price: Decimal,
}

fn pct(value: f64) -> Decimal {
    use rust_decimal::prelude::FromPrimitive;
    Decimal::from_f64(value).unwrap_or_default() / Decimal::from(100)
}

/// Result of advancing one position by one tick. Pure
/// function of its inputs: no lock, no I/O, no clock reads beyond `now`.
pub struct TickResult {
    pub position: Position,
    pub last_known_price: Decimal,
    pub exit: Option<ExitDecision>,
}

/// Advances `position` by one tick. `quote` missing means the symbol could
/// not be priced this round; `minutes_to_close` is `None` outside REGULAR
/// hours or when the clock doesn't apply a forced close.
pub fn tick(
    mut position: Position,
    last_known_price: Decimal,
    quote: Option<&Quote>,
    features: Option<&TickFeatures>,
    now: DateTime<Utc>,
    minutes_to_close: Option<i64>,
    config: &EngineConfig,
) -> TickResult {
    let Some(quote) = quote else {
        position.consecutive_missed_quotes += 1;
        let open_minutes = (now - position.entry_time).num_minutes();
        if position.consecutive_missed_quotes >= 3 && open_minutes > 10 {
            let mut closed = position.clone();
            closed.state = PositionState::Closed;
            closed.exit_reason = Some(ExitReason::DataStarved);
            closed.exit_price = Some(last_known_price);
            closed.exit_time = Some(now);
            return TickResult {
                position: closed,
                last_known_price,
                exit: Some(ExitDecision { reason: ExitReason::DataStarved, price: last_known_price }),
            };
        }
        return TickResult { position, last_known_price, exit: None };
    };

    let Some(p) = quote.last else {
        // No last trade this tick; treat the same as a missing quote.
        return tick(position, last_known_price, None, features, now, minutes_to_close, config);
    };

    position.consecutive_missed_quotes = 0;
    let stale = !quote.is_fresh(now, chrono::Duration::seconds(config.quote_cache_ttl_intraday_sec));
    let e = position.entry_price;
    let ret = if e.is_zero() { Decimal::ZERO } else { (p - e) / e };

    advance_state(&mut position, p, ret, config);

    let exit = find_exit(&position, p, ret, stale, last_known_price, features, now, minutes_to_close, config);
    let last_known_price = p;
    if let Some(exit) = &exit {
        position.state = PositionState::Closed;
        position.exit_reason = Some(exit.reason);
        position.exit_price = Some(exit.price);
        position.exit_time = Some(now);
        tracing::info!(symbol = %position.symbol, reason = ?exit.reason, price = %exit.price, "position exit triggered");
    }

    TickResult { position, last_known_price, exit }
}

fn advance_state(position: &mut Position, p: Decimal, ret: Decimal, config: &EngineConfig) {
    let e = position.entry_price;
    match position.state {
        PositionState::Initial => {
            position.raise_high_water_to(p);
            if ret >= pct(config.breakeven_activation_pct) {
                position.raise_stop_to(e * (Decimal::ONE + pct(config.breakeven_offset_pct)));
                position.state = PositionState::BreakevenArmed;
            }
        }
        PositionState::BreakevenArmed => {
            position.raise_high_water_to(p);
            if ret >= pct(config.trailing_activation_pct) {
                position.raise_stop_to(p * (Decimal::ONE - pct(config.trailing_distance_pct)));
                position.state = PositionState::Trailing;
            }
        }
        PositionState::Trailing => {
            position.raise_high_water_to(p);
            let h = position.high_water_price;
            position.raise_stop_to(h * (Decimal::ONE - pct(config.trailing_distance_pct)));
        }
        PositionState::Closed => {}
    }
}

/// Priority order: the earliest-listed condition that matches
/// wins, evaluated top to bottom every tick.
///
/// `stale` marks a quote C3 served from its over-TTL cache fallback under
/// budget pressure. A stale price is non-authoritative for every
/// price/feature-derived exit (stop, take-profit, RSI, volume) unless it has
/// moved past 2x the current stop distance from `last_known_price` — close
/// enough to trust even without a fresh read. Time exit is never gated: it
/// depends on the clock, not the price.
fn find_exit(
    position: &Position,
    p: Decimal,
    ret: Decimal,
    stale: bool,
    last_known_price: Decimal,
    features: Option<&TickFeatures>,
    now: DateTime<Utc>,
    minutes_to_close: Option<i64>,
    config: &EngineConfig,
) -> Option<ExitDecision> {
    let stop_distance = (position.entry_price - position.stop_price).abs();
    let price_moved_enough = (p - last_known_price).abs() >= stop_distance * Decimal::from(2);
    let price_authoritative = !stale || price_moved_enough;

    // 1. Stop hit.
    if price_authoritative && p <= position.stop_price {
        let reason = match position.state {
            PositionState::Trailing => ExitReason::TrailingStop,
            PositionState::BreakevenArmed => ExitReason::Breakeven,
            _ => ExitReason::StopHit,
        };
        return Some(ExitDecision { reason, price: p });
    }

    // 2. Take-profit, with the extended classification.
    if price_authoritative && p >= position.take_profit_price {
        let initial_distance = position.initial_take_profit_price - position.entry_price;
        let extended_target = position.entry_price + initial_distance * Decimal::from(2);
        let reason = if p >= extended_target { ExitReason::TakeProfitExtended } else { ExitReason::TakeProfit };
        return Some(ExitDecision { reason, price: p });
    }

    // 3. RSI exhaustion.
    if price_authoritative {
        if let Some(features) = features {
            if features.rsi_14 >= 85.0 && ret >= pct(1.0) {
                return Some(ExitDecision { reason: ExitReason::RsiExhaustion, price: p });
            }
        }
    }

    // 4. Time exit. Clock-driven, not price-driven: never gated by staleness.
    let held_hours = (now - position.entry_time).num_minutes() as f64 / 60.0;
    let forced_by_close = minutes_to_close.map(|m| m <= 10).unwrap_or(false);
    if held_hours >= config.max_hold_hours as f64 || forced_by_close {
        return Some(ExitDecision { reason: ExitReason::TimeExit, price: p });
    }

    // 5. Volume reversal.
    if price_authoritative {
        if let Some(features) = features {
            if features.volume_20period_avg > 0.0 {
                let surge = features.volume_5min as f64 > 3.0 * features.volume_20period_avg;
                let dropped = p <= position.high_water_price * (Decimal::ONE - pct(0.3));
                if surge && dropped {
                    return Some(ExitDecision { reason: ExitReason::VolumeReversal, price: p });
                }
            }
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use engine_types::Symbol;
    use rust_decimal_macros::dec;

    fn base_position() -> Position {
        Position {
            symbol: Symbol::new("AAPL").unwrap(),
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

    fn quote_at(price: Decimal) -> Quote {
        quote_aged(price, Utc::now())
    }

    fn quote_aged(price: Decimal, captured_at: DateTime<Utc>) -> Quote {
        Quote {
            symbol: Symbol::new("AAPL").unwrap(),
            last: Some(price),
            bid: Some(price),
            ask: Some(price),
            volume: 100_000,
            day_high: None,
            day_low: None,
            prev_close: None,
            captured_at,
        }
    }

    #[test]
    fn initial_arms_breakeven_at_activation_threshold() {
        let config = EngineConfig::default();
        let position = base_position();
        let q = quote_at(dec!(100.60)); // 0.6% >= 0.5% activation
        let result = tick(position, dec!(100.00), Some(&q), None, Utc::now(), None, &config);
        assert_eq!(result.position.state, PositionState::BreakevenArmed);
        assert!(result.position.stop_price > dec!(100.00));
    }

    #[test]
    fn breakeven_armed_moves_to_trailing_at_activation() {
        let config = EngineConfig::default();
        let mut position = base_position();
        position.state = PositionState::BreakevenArmed;
        position.stop_price = dec!(100.20);
        let q = quote_at(dec!(100.90)); // 0.9% >= 0.8% trailing activation
        let result = tick(position, dec!(100.60), Some(&q), None, Utc::now(), None, &config);
        assert_eq!(result.position.state, PositionState::Trailing);
    }

    #[test]
    fn stop_never_lowers_across_ticks() {
        let config = EngineConfig::default();
        let mut position = base_position();
        position.state = PositionState::Trailing;
        position.stop_price = dec!(103.00);
        position.high_water_price = dec!(104.00);
        let q = quote_at(dec!(102.00)); // pulls back, stop must not fall
        let result = tick(position, dec!(104.00), Some(&q), None, Utc::now(), None, &config);
        // 102 <= 103 triggers a stop-hit exit, but the stop itself never lowered.
        assert!(result.exit.is_some());
        assert_eq!(result.position.stop_price, dec!(103.00));
    }

    #[test]
    fn take_profit_extended_classification() {
        let config = EngineConfig::default();
        let position = base_position(); // entry 100, initial TP 105 -> distance 5, extended target 110
        let q = quote_at(dec!(110.50));
        let result = tick(position, dec!(100.00), Some(&q), None, Utc::now(), None, &config);
        assert!(matches!(result.exit.unwrap().reason, ExitReason::TakeProfitExtended));
    }

    #[test]
    fn missing_quote_three_times_after_ten_minutes_triggers_data_starved() {
        let config = EngineConfig::default();
        let mut position = base_position();
        position.consecutive_missed_quotes = 2;
        let result = tick(position, dec!(101.00), None, None, Utc::now(), None, &config);
        assert!(matches!(result.exit.unwrap().reason, ExitReason::DataStarved));
    }

    #[test]
    fn missing_quote_within_first_ten_minutes_does_not_exit() {
        let config = EngineConfig::default();
        let mut position = base_position();
        position.entry_time = Utc::now();
        position.consecutive_missed_quotes = 5;
        let result = tick(position, dec!(101.00), None, None, Utc::now(), None, &config);
        assert!(result.exit.is_none());
    }

    #[test]
    fn time_exit_after_max_hold() {
        let config = EngineConfig::default();
        let mut position = base_position();
        position.entry_time = Utc::now() - chrono::Duration::hours(config.max_hold_hours + 1);
        let q = quote_at(dec!(100.50));
        let result = tick(position, dec!(100.00), Some(&q), None, Utc::now(), None, &config);
        assert!(matches!(result.exit.unwrap().reason, ExitReason::TimeExit));
    }

    #[test]
    fn forced_close_within_ten_minutes_of_market_close() {
        let config = EngineConfig::default();
        let position = base_position();
        let q = quote_at(dec!(100.10));
        let result = tick(position, dec!(100.00), Some(&q), None, Utc::now(), Some(5), &config);
        assert!(matches!(result.exit.unwrap().reason, ExitReason::TimeExit));
    }

    #[test]
    fn rsi_exhaustion_requires_both_overbought_and_minimum_return() {
        let config = EngineConfig::default();
        let position = base_position();
        let q = quote_at(dec!(101.20)); // 1.2% >= 1%
        let features = TickFeatures { rsi_14: 90.0, volume_5min: 0, volume_20period_avg: 0.0 };
        let result = tick(position, dec!(100.00), Some(&q), Some(&features), Utc::now(), None, &config);
        assert!(matches!(result.exit.unwrap().reason, ExitReason::RsiExhaustion));
    }

    #[test]
    fn stale_quote_near_stop_does_not_trigger_exit() {
        let config = EngineConfig::default();
        let position = base_position(); // entry 100, stop 97
        let stale_at = Utc::now() - chrono::Duration::seconds(config.quote_cache_ttl_intraday_sec + 5);
        // 96.50 is below the 97 stop but within 2x stop distance (6.00) of last_known_price.
        let q = quote_aged(dec!(96.50), stale_at);
        let result = tick(position, dec!(100.00), Some(&q), None, Utc::now(), None, &config);
        assert!(result.exit.is_none());
    }

    #[test]
    fn stale_quote_past_twice_stop_distance_still_triggers_exit() {
        let config = EngineConfig::default();
        let position = base_position(); // entry 100, stop 97, stop distance 3.00
        let stale_at = Utc::now() - chrono::Duration::seconds(config.quote_cache_ttl_intraday_sec + 5);
        // 93.50 is more than 2x the stop distance (6.00) away from last_known_price of 100.00.
        let q = quote_aged(dec!(93.50), stale_at);
        let result = tick(position, dec!(100.00), Some(&q), None, Utc::now(), None, &config);
        assert!(matches!(result.exit.unwrap().reason, ExitReason::StopHit));
    }

    #[test]
    fn volume_reversal_needs_surge_and_pullback_from_high_water() {
        let config = EngineConfig::default();
        let mut position = base_position();
        position.state = PositionState::Trailing;
        position.stop_price = dec!(95.00);
        position.high_water_price = dec!(103.00);
        let q = quote_at(dec!(102.50)); // 0.49% below high water, > 0.3% threshold
        let features = TickFeatures { rsi_14: 50.0, volume_5min: 400_000, volume_20period_avg: 100_000.0 };
        let result = tick(position, dec!(103.00), Some(&q), Some(&features), Utc::now(), None, &config);
        assert!(matches!(result.exit.unwrap().reason, ExitReason::VolumeReversal));
    }
}
