use chrono::{DateTime, Utc};
use chrono_tz_compat::et_date;
use std::collections::VecDeque;
use std::sync::Mutex;

mod chrono_tz_compat {
    use chrono::{DateTime, NaiveDate, Utc};
    use chrono_tz::US::Eastern;

    pub fn et_date(now: DateTime<Utc>) -> NaiveDate {
        now.with_timezone(&Eastern).date_naive()
    }
}

/// Rolling daily/hourly call budget, the budget-smoothing algorithm.
/// Calls are allowed if `used_today < budget` AND `used_last_hour < budget/6`.
pub struct ApiCallBudget {
    daily_budget: u64,
    state: Mutex<BudgetState>,
}

struct BudgetState {
    used_today: u64,
    reset_date: chrono::NaiveDate,
    call_timestamps: VecDeque<DateTime<Utc>>,
}

impl ApiCallBudget {
    pub fn new(daily_budget: u64, now: DateTime<Utc>) -> Self {
        Self {
            daily_budget,
            state: Mutex::new(BudgetState {
                used_today: 0,
                reset_date: et_date(now),
                call_timestamps: VecDeque::new(),
            }),
        }
    }

    fn maybe_reset(&self, state: &mut BudgetState, now: DateTime<Utc>) {
        let today = et_date(now);
        if today != state.reset_date {
            state.used_today = 0;
            state.reset_date = today;
            state.call_timestamps.clear();
        }
    }

    fn used_last_hour(state: &mut BudgetState, now: DateTime<Utc>) -> u64 {
        let cutoff = now - chrono::Duration::hours(1);
        while state.call_timestamps.front().map(|t| *t < cutoff).unwrap_or(false) {
            state.call_timestamps.pop_front();
        }
        state.call_timestamps.len() as u64
    }

    /// True if at least one more call is allowed under both the daily budget
    /// and the hourly smoothing cap (`budget / 6`).
    pub fn allows_call(&self, now: DateTime<Utc>) -> bool {
        let mut state = self.state.lock().expect("budget lock poisoned");
        self.maybe_reset(&mut state, now);
        let hourly_cap = self.daily_budget / 6;
        state.used_today < self.daily_budget && Self::used_last_hour(&mut state, now) < hourly_cap
    }

    pub fn record_call(&self, now: DateTime<Utc>) {
        let mut state = self.state.lock().expect("budget lock poisoned");
        self.maybe_reset(&mut state, now);
        state.used_today += 1;
        state.call_timestamps.push_back(now);
    }

    pub fn used_today(&self, now: DateTime<Utc>) -> u64 {
        let mut state = self.state.lock().expect("budget lock poisoned");
        self.maybe_reset(&mut state, now);
        state.used_today
    }

    pub fn available_calls_today(&self, now: DateTime<Utc>) -> u64 {
        self.daily_budget.saturating_sub(self.used_today(now))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_calls_under_budget() {
        let now = Utc::now();
        let budget = ApiCallBudget::new(60, now);
        assert!(budget.allows_call(now));
    }

    #[test]
    fn blocks_calls_once_hourly_cap_reached() {
        let now = Utc::now();
        let budget = ApiCallBudget::new(60, now); // hourly cap = 10
        for _ in 0..10 {
            budget.record_call(now);
        }
        assert!(!budget.allows_call(now));
    }

    #[test]
    fn daily_counter_resets_on_new_et_day() {
        let now = Utc::now();
        let budget = ApiCallBudget::new(60, now);
        budget.record_call(now);
        assert_eq!(budget.used_today(now), 1);
        let next_day = now + chrono::Duration::days(2);
        assert_eq!(budget.used_today(next_day), 0);
    }
}
