use chrono::Utc;
use engine_types::{Agreement, EngineConfig, Side, Signal};
use rust_decimal_macros::dec;

use crate::manager::RiskManager;
use crate::models::{RejectReason, RiskContext, RiskDecision};

fn signal(confidence: f64, agreement: Agreement, entry_ref: rust_decimal::Decimal, expected_return_pct: f64) -> Signal {
    Signal {
        symbol: engine_types::Symbol::new("AAPL").unwrap(),
        side: Side::Buy,
        confidence,
        expected_return_pct,
        quality_score: 80.0,
        strategy_agreement: agreement,
        entry_reference_price: entry_ref,
        created_at: Utc::now(),
    }
}

fn base_ctx(signal: Signal, available_cash: rust_decimal::Decimal, open_managed_value: rust_decimal::Decimal) -> RiskContext {
    RiskContext {
        signal,
        available_cash,
        open_managed_value,
        open_positions_count: 0,
        daily_realized_loss_pct: 0.0,
        drawdown_vs_peak_pct: 0.0,
        lifetime_realized_return_pct: 0.0,
        consecutive_winning_trades: 0,
    }
}

#[test]
fn s2_medium_agreement_high_confidence_sizing() {
    let manager = RiskManager::new(EngineConfig::default());
    let ctx = base_ctx(
        signal(0.92, Agreement::Medium, dec!(50.00), 0.0),
        dec!(10000),
        dec!(0),
    );
    let decision = manager.evaluate(&ctx, Utc::now());
    match decision {
        RiskDecision::Approved { quantity, stop_price, take_profit_price, position_value } => {
            assert_eq!(quantity, 50);
            assert_eq!(position_value, dec!(2500.00));
            assert_eq!(stop_price, dec!(48.50));
            assert_eq!(take_profit_price, dec!(52.50));
        }
        other => panic!("expected Approved, got {other:?}"),
    }
}

#[test]
fn b3_sizing_capped_by_remaining_trading_cash_not_base_pct() {
    let manager = RiskManager::new(EngineConfig::default());
    // Ultra-high confidence + full agreement would push raw_value far above
    // $100, but trading_cash (80% of 1000 = 800) minus the $700 already open
    // leaves only $100 of headroom.
    let ctx = base_ctx(
        signal(0.99, Agreement::High, dec!(10.00), 0.0),
        dec!(1000),
        dec!(700),
    );
    let decision = manager.evaluate(&ctx, Utc::now());
    match decision {
        RiskDecision::Approved { position_value, .. } => {
            assert!(position_value <= dec!(100.00), "position_value {position_value} exceeds remaining headroom");
        }
        RiskDecision::Rejected { reason } => {
            // Also acceptable: position under min_position_value_usd gate.
            assert_eq!(reason, RejectReason::MinSizeGate);
        }
    }
}

#[test]
fn g2_position_limit_gate_rejects_at_cap() {
    let manager = RiskManager::new(EngineConfig::default());
    let mut ctx = base_ctx(signal(0.95, Agreement::High, dec!(50.00), 0.0), dec!(10000), dec!(0));
    ctx.open_positions_count = EngineConfig::default().max_positions;
    let decision = manager.evaluate(&ctx, Utc::now());
    assert!(matches!(decision, RiskDecision::Rejected { reason: RejectReason::PositionLimit }));
}

#[test]
fn g5_insufficient_cash_gate() {
    let manager = RiskManager::new(EngineConfig::default());
    let ctx = base_ctx(signal(0.95, Agreement::High, dec!(50.00), 0.0), dec!(10.00), dec!(0));
    let decision = manager.evaluate(&ctx, Utc::now());
    assert!(matches!(decision, RiskDecision::Rejected { reason: RejectReason::InsufficientCash }));
}

#[test]
fn s3_daily_loss_limit_trips_safe_mode() {
    let manager = RiskManager::new(EngineConfig::default());
    let mut ctx = base_ctx(signal(0.95, Agreement::High, dec!(50.00), 0.0), dec!(10000), dec!(0));
    ctx.daily_realized_loss_pct = 5.5; // exceeds default 5.0% max_daily_loss_pct
    let decision = manager.evaluate(&ctx, Utc::now());
    assert!(matches!(decision, RiskDecision::Rejected { reason: RejectReason::DailyLossLimit }));
    assert!(manager.is_safe_mode());

    // Subsequent signals are rejected with SafeMode until cleared, even if
    // the daily-loss number itself is no longer breached.
    ctx.daily_realized_loss_pct = 0.0;
    let decision2 = manager.evaluate(&ctx, Utc::now());
    assert!(matches!(decision2, RiskDecision::Rejected { reason: RejectReason::SafeMode }));
}

#[test]
fn g4_drawdown_gate_latches_safe_mode() {
    let manager = RiskManager::new(EngineConfig::default());
    let mut ctx = base_ctx(signal(0.95, Agreement::High, dec!(50.00), 0.0), dec!(10000), dec!(0));
    ctx.drawdown_vs_peak_pct = 12.0; // exceeds default 10.0% max_drawdown_pct
    let decision = manager.evaluate(&ctx, Utc::now());
    assert!(matches!(decision, RiskDecision::Rejected { reason: RejectReason::DrawdownLimit }));
    assert!(manager.is_safe_mode());
}

#[test]
fn operator_clear_unlatches_safe_mode() {
    let manager = RiskManager::new(EngineConfig::default());
    let mut ctx = base_ctx(signal(0.95, Agreement::High, dec!(50.00), 0.0), dec!(10000), dec!(0));
    ctx.daily_realized_loss_pct = 6.0;
    manager.evaluate(&ctx, Utc::now());
    assert!(manager.is_safe_mode());

    manager.clear_safe_mode_operator(Utc::now());
    assert!(!manager.is_safe_mode());

    ctx.daily_realized_loss_pct = 0.0;
    let decision = manager.evaluate(&ctx, Utc::now());
    assert!(decision.is_approved());
}

#[test]
fn auto_recovery_clears_once_conditions_met() {
    let manager = RiskManager::new(EngineConfig::default());
    let mut ctx = base_ctx(signal(0.95, Agreement::High, dec!(50.00), 0.0), dec!(10000), dec!(0));
    ctx.drawdown_vs_peak_pct = 12.0;
    manager.evaluate(&ctx, Utc::now());
    assert!(manager.is_safe_mode());

    // Recovery: drawdown and daily loss both below half their thresholds.
    ctx.drawdown_vs_peak_pct = 2.0;
    ctx.daily_realized_loss_pct = 1.0;
    let decision = manager.evaluate(&ctx, Utc::now());
    assert!(!manager.is_safe_mode());
    assert!(decision.is_approved());
}

#[test]
fn r2_identical_inputs_produce_identical_decisions() {
    let manager = RiskManager::new(EngineConfig::default());
    let ctx = base_ctx(signal(0.92, Agreement::Medium, dec!(50.00), 0.0), dec!(10000), dec!(0));
    let now = Utc::now();
    let d1 = manager.evaluate(&ctx, now);
    let d2 = manager.evaluate(&ctx, now);
    match (d1, d2) {
        (
            RiskDecision::Approved { quantity: q1, position_value: v1, stop_price: s1, take_profit_price: t1 },
            RiskDecision::Approved { quantity: q2, position_value: v2, stop_price: s2, take_profit_price: t2 },
        ) => {
            assert_eq!((q1, v1, s1, t1), (q2, v2, s2, t2));
        }
        other => panic!("expected two Approved decisions, got {other:?}"),
    }
}

#[test]
fn min_size_gate_rejects_small_positions() {
    let manager = RiskManager::new(EngineConfig::default());
    // Low confidence, low base, low cash -> raw_value well under $50 floor.
    let ctx = base_ctx(signal(0.80, Agreement::Low, dec!(50.00), 0.0), dec!(100), dec!(0));
    let decision = manager.evaluate(&ctx, Utc::now());
    assert!(matches!(decision, RiskDecision::Rejected { reason: RejectReason::MinSizeGate }));
}
