//! Clock & Phase Oracle (C1): maps wall-clock time to a `Phase` against
//! America/New_York market hours, with a static holiday/early-close table.
//! Pure function of inputs — no failure mode beyond a logged warning for a
//! stale holiday table.

mod holidays;

pub use holidays::{is_stale, DayKind};

use chrono::{DateTime, Datelike, Duration, NaiveTime, TimeZone, Utc, Weekday};
use chrono_tz::US::Eastern;
use engine_types::Phase;

const PRE_MARKET_OPEN_MIN: i64 = 4 * 60;
const REGULAR_OPEN_MIN: i64 = 9 * 60 + 30;
const REGULAR_CLOSE_MIN: i64 = 16 * 60;
const EARLY_CLOSE_MIN: i64 = 13 * 60;
const AFTER_HOURS_CLOSE_MIN: i64 = 20 * 60;
const EARLY_AFTER_HOURS_CLOSE_MIN: i64 = 17 * 60;

/// Stateless phase oracle. Cheap to construct; holds no mutable state.
#[derive(Debug, Default, Clone, Copy)]
pub struct MarketClock;

impl MarketClock {
    pub fn new() -> Self {
        Self
    }

    /// Deterministic: `now_utc` and the holiday table are the only inputs.
    pub fn phase(&self, now_utc: DateTime<Utc>) -> Phase {
        let et = now_utc.with_timezone(&Eastern);
        if matches!(et.weekday(), Weekday::Sat | Weekday::Sun) {
            return Phase::Closed;
        }
        self.warn_if_stale(et.date_naive());
        let early_close = holidays::lookup(et.date_naive()) == Some(DayKind::EarlyClose);
        if holidays::lookup(et.date_naive()) == Some(DayKind::Holiday) {
            return Phase::Closed;
        }

        let minute_of_day = et.hour() as i64 * 60 + et.minute() as i64;
        let regular_close = if early_close {
            EARLY_CLOSE_MIN
        } else {
            REGULAR_CLOSE_MIN
        };
        let after_hours_close = if early_close {
            EARLY_AFTER_HOURS_CLOSE_MIN
        } else {
            AFTER_HOURS_CLOSE_MIN
        };

        if minute_of_day >= PRE_MARKET_OPEN_MIN && minute_of_day < REGULAR_OPEN_MIN {
            Phase::PreMarket
        } else if minute_of_day >= REGULAR_OPEN_MIN && minute_of_day < regular_close {
            Phase::Regular
        } else if minute_of_day >= regular_close && minute_of_day < after_hours_close {
            Phase::AfterHours
        } else {
            Phase::Closed
        }
    }

    pub fn is_trading_day(&self, date_et: chrono::NaiveDate) -> bool {
        if matches!(date_et.weekday(), Weekday::Sat | Weekday::Sun) {
            return false;
        }
        holidays::lookup(date_et) != Some(DayKind::Holiday)
    }

    /// Earliest future instant at which the phase changes, used as a sleep
    /// target by the scheduler.
    pub fn next_transition(&self, now_utc: DateTime<Utc>) -> (Phase, DateTime<Utc>) {
        let current = self.phase(now_utc);
        let mut probe = now_utc;
        // Coarse-step in one-minute increments; the horizon is bounded by a
        // week so weekends/holidays resolve without an unbounded loop.
        let horizon = now_utc + Duration::days(7);
        while probe < horizon {
            probe += Duration::minutes(1);
            let candidate = self.phase(probe);
            if candidate != current {
                return (candidate, probe);
            }
        }
        (current, horizon)
    }

    fn warn_if_stale(&self, date: chrono::NaiveDate) {
        if holidays::is_stale(date) {
            tracing::warn!(
                date = %date,
                "holiday table has no entry for this date; treating as a normal weekday"
            );
        }
    }
}

/// Minutes before the effective regular-session close at which the position
/// monitor must force a final sweep (used by the scheduler for B2's 12:50 ET
/// boundary on early-close days and the analogous 15:50 ET on normal days).
pub fn minutes_before_close(now_utc: DateTime<Utc>, early_close: bool) -> i64 {
    let et = now_utc.with_timezone(&Eastern);
    let minute_of_day = et.hour() as i64 * 60 + et.minute() as i64;
    let close = if early_close {
        EARLY_CLOSE_MIN
    } else {
        REGULAR_CLOSE_MIN
    };
    close - minute_of_day
}

/// Builds a UTC instant for a given ET wall-clock time on a given ET date —
/// a small helper used extensively by tests and by the scheduler's
/// watchlist-build/daily-report gates.
pub fn et_instant(date: chrono::NaiveDate, hour: u32, minute: u32) -> DateTime<Utc> {
    let naive_time = NaiveTime::from_hms_opt(hour, minute, 0).expect("valid time");
    let naive = date.and_time(naive_time);
    Eastern
        .from_local_datetime(&naive)
        .single()
        .expect("unambiguous local time")
        .with_timezone(&Utc)
}
