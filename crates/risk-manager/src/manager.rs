use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;

use engine_types::EngineConfig;

use crate::models::{RejectReason, RiskContext, RiskDecision, SafeModeEvent};

fn pct(value: f64) -> Decimal {
    Decimal::from_f64(value).unwrap_or_default() / Decimal::from(100)
}

/// Risk Manager: turns a `Signal` + account state + open-position set
/// into an `Approved{..}` or `Rejected{..}` decision via the deterministic
/// sizing formula. Owns exactly one piece of mutable state —
/// the safe-mode latch — guarded independently from the position map.
pub struct RiskManager {
    config: EngineConfig,
    safe_mode: AtomicBool,
    events: Mutex<Vec<SafeModeEvent>>,
    last_auto_clear: Mutex<Option<NaiveDate>>,
}

impl RiskManager {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            safe_mode: AtomicBool::new(false),
            events: Mutex::new(Vec::new()),
            last_auto_clear: Mutex::new(None),
        }
    }

    pub fn is_safe_mode(&self) -> bool {
        self.safe_mode.load(Ordering::SeqCst)
    }

    pub fn safe_mode_events(&self) -> Vec<SafeModeEvent> {
        self.events.lock().expect("safe-mode log poisoned").clone()
    }

    fn trip_safe_mode(&self, reason: &str, now: DateTime<Utc>) {
        let was_active = self.safe_mode.swap(true, Ordering::SeqCst);
        if !was_active {
            tracing::warn!(reason, "safe mode tripped");
            self.events.lock().expect("safe-mode log poisoned").push(SafeModeEvent {
                at: now,
                active: true,
                reason: reason.to_string(),
            });
        }
    }

    /// Explicit operator clear (cleared only by operator action or auto-recovery).
    pub fn clear_safe_mode_operator(&self, now: DateTime<Utc>) {
        self.safe_mode.store(false, Ordering::SeqCst);
        self.events.lock().expect("safe-mode log poisoned").push(SafeModeEvent {
            at: now,
            active: false,
            reason: "operator clear".to_string(),
        });
    }

    /// Half-threshold auto-recovery rule (Open Question #4): realized
    /// P&L recovers above `-max_daily_loss_pct/2` AND drawdown falls below
    /// `max_drawdown_pct/2`. Applies at most once per ET calendar day.
    fn maybe_auto_clear(&self, ctx: &RiskContext, now: DateTime<Utc>) {
        if !self.is_safe_mode() {
            return;
        }
        let recovered = ctx.daily_realized_loss_pct < self.config.max_daily_loss_pct / 2.0
            && ctx.drawdown_vs_peak_pct < self.config.max_drawdown_pct / 2.0;
        if !recovered {
            return;
        }
        let today = now.date_naive();
        let mut last = self.last_auto_clear.lock().expect("auto-clear lock poisoned");
        if *last == Some(today) {
            return;
        }
        *last = Some(today);
        drop(last);
        self.safe_mode.store(false, Ordering::SeqCst);
        self.events.lock().expect("safe-mode log poisoned").push(SafeModeEvent {
            at: now,
            active: false,
            reason: "auto-recovery: daily loss and drawdown both below half-threshold".to_string(),
        });
        tracing::info!("safe mode auto-cleared after recovery");
    }

    fn confidence_multiplier(&self, confidence: f64) -> f64 {
        if confidence >= self.config.ultra_high_conf_threshold {
            self.config.ultra_high_conf_mult
        } else if confidence >= self.config.high_conf_threshold {
            self.config.high_conf_mult
        } else if confidence >= self.config.medium_conf_threshold {
            self.config.medium_conf_mult
        } else {
            1.0
        }
    }

    fn profit_scale_multiplier(&self, lifetime_realized_return_pct: f64) -> f64 {
        if lifetime_realized_return_pct >= 200.0 {
            self.config.profit_scaling_200_mult
        } else if lifetime_realized_return_pct >= 100.0 {
            self.config.profit_scaling_100_mult
        } else if lifetime_realized_return_pct >= 50.0 {
            self.config.profit_scaling_50_mult
        } else if lifetime_realized_return_pct >= 25.0 {
            self.config.profit_scaling_25_mult
        } else {
            1.0
        }
    }

    /// Win-streak multiplier hook. Identity in v1: the input is named
    /// and threaded through but the mapping is fixed at `win_streak_mult`
    /// (default 1.0) regardless of `consecutive_winning_trades`.
    fn win_streak_multiplier(&self, _consecutive_winning_trades: u32) -> f64 {
        self.config.win_streak_mult
    }

    /// `evaluate(signal, account, open positions) -> Approved | Rejected`.
    /// Gates G1-G5 run in order; the sizing formula runs only if all
    /// gates pass.
    pub fn evaluate(&self, ctx: &RiskContext, now: DateTime<Utc>) -> RiskDecision {
        self.maybe_auto_clear(ctx, now);

        if self.is_safe_mode() {
            return RiskDecision::Rejected { reason: RejectReason::SafeMode };
        }
        if ctx.open_positions_count >= self.config.max_positions {
            return RiskDecision::Rejected { reason: RejectReason::PositionLimit };
        }
        if ctx.daily_realized_loss_pct >= self.config.max_daily_loss_pct {
            self.trip_safe_mode("daily loss limit reached", now);
            return RiskDecision::Rejected { reason: RejectReason::DailyLossLimit };
        }
        if ctx.drawdown_vs_peak_pct >= self.config.max_drawdown_pct {
            self.trip_safe_mode("drawdown vs peak capital reached", now);
            return RiskDecision::Rejected { reason: RejectReason::DrawdownLimit };
        }
        let min_position_value = Decimal::from_f64(self.config.min_position_value_usd).unwrap_or_default();
        if ctx.available_cash < min_position_value {
            return RiskDecision::Rejected { reason: RejectReason::InsufficientCash };
        }

        self.size(ctx)
    }

    fn size(&self, ctx: &RiskContext) -> RiskDecision {
        let trading_cash = ctx.available_cash * pct(self.config.trading_cash_pct);
        let base_value = ctx.available_cash * pct(self.config.base_position_pct);

        let conf_mult = Decimal::from_f64(self.confidence_multiplier(ctx.signal.confidence)).unwrap_or(Decimal::ONE);
        let agree_bonus = ctx
            .signal
            .strategy_agreement
            .sizing_bonus()
            .min(Decimal::from_f64(self.config.agreement_max_bonus).unwrap_or(Decimal::ONE));
        let profit_scale =
            Decimal::from_f64(self.profit_scale_multiplier(ctx.lifetime_realized_return_pct)).unwrap_or(Decimal::ONE);
        let win_streak_mult =
            Decimal::from_f64(self.win_streak_multiplier(ctx.consecutive_winning_trades)).unwrap_or(Decimal::ONE);

        let raw_value = base_value * conf_mult * (Decimal::ONE + agree_bonus) * profit_scale * win_streak_mult;
        let cap_value = ctx.available_cash * pct(self.config.max_position_pct);
        let remaining_trading_cash = trading_cash - ctx.open_managed_value;

        let position_value = raw_value.min(cap_value).min(remaining_trading_cash).max(Decimal::ZERO);

        let min_position_value = Decimal::from_f64(self.config.min_position_value_usd).unwrap_or_default();
        if position_value < min_position_value {
            return RiskDecision::Rejected { reason: RejectReason::MinSizeGate };
        }

        let entry_ref = ctx.signal.entry_reference_price;
        if entry_ref <= Decimal::ZERO {
            return RiskDecision::Rejected { reason: RejectReason::MinSizeGate };
        }
        let quantity = (position_value / entry_ref).floor();
        let quantity_u64 = quantity.to_u64().unwrap_or(0);
        if quantity_u64 == 0 {
            return RiskDecision::Rejected { reason: RejectReason::MinSizeGate };
        }

        let stop_price = (entry_ref * (Decimal::ONE - pct(self.config.stop_loss_pct))).round_dp(2);
        let take_profit_pct = self.config.take_profit_pct.max(ctx.signal.expected_return_pct);
        let take_profit_price = (entry_ref * (Decimal::ONE + pct(take_profit_pct))).round_dp(2);

        RiskDecision::Approved {
            quantity: quantity_u64,
            position_value: quantity * entry_ref,
            stop_price,
            take_profit_price,
        }
    }
}
