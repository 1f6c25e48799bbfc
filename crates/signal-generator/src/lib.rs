//! Signal Generator (C6): turns one symbol's cross-validator agreement into
//! at most one `Signal`, applying the final quality gates.

use chrono::Utc;
use engine_types::{Agreement, Quote, Side, Signal, StrategyMode, Symbol};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use strategy_validator::{AgreementResult, HistoricalFeatures};

/// Why a candidate did not become a `Signal`. Not an error — every
/// rejection is treated as a normal "no signal" outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoSignalReason {
    NoAgreement,
    ConfidenceBelowThreshold,
    QualityBelowFloor,
    StaleEntry,
    MissingQuote,
}

/// Everything the generator needs for one symbol, gathered from C5's output
/// plus the quote/feature data it was computed from.
pub struct SignalCandidate<'a> {
    pub symbol: Symbol,
    pub quote: &'a Quote,
    pub agreement: &'a AgreementResult,
    pub features: &'a HistoricalFeatures,
    /// Price at the moment the working set / agreement was computed; used
    /// by the stale-signal guard (step 7).
    pub reference_entry_price: Decimal,
}

const QUALITY_FLOOR: f64 = 40.0;
const EXPECTED_RETURN_FLOOR_PCT: f64 = 2.0;
const STALE_ENTRY_DRIFT_PCT: f64 = 1.0;

pub struct SignalGenerator {
    strategy_mode: StrategyMode,
}

impl SignalGenerator {
    pub fn new(strategy_mode: StrategyMode) -> Self {
        Self { strategy_mode }
    }

    /// Runs the 8-step pipeline for one symbol. Returns `Ok(Signal)`
    /// or `Err(reason)`; a reason is never surfaced to the operator as an
    /// error, only logged at debug level.
    pub fn generate(&self, candidate: &SignalCandidate) -> Result<Signal, NoSignalReason> {
        // Step 1: reject NONE agreement.
        if candidate.agreement.agreement == Agreement::None {
            return Err(NoSignalReason::NoAgreement);
        }

        let Some(last) = candidate.quote.last else {
            return Err(NoSignalReason::MissingQuote);
        };

        // Step 2: confidence = clamp(composite * (1 + bonus), 0, 0.999).
        let bonus = candidate.agreement.agreement.confidence_bonus();
        let confidence = (candidate.agreement.composite_score * (1.0 + bonus)).clamp(0.0, 0.999);

        // Step 3: reject below the strategy-mode floor.
        if confidence < self.strategy_mode.min_signal_confidence() {
            return Err(NoSignalReason::ConfidenceBelowThreshold);
        }

        // Step 4: expected_return_pct, floored at 2%.
        let momentum_target = candidate.features.momentum_1h_pct.max(0.0) * 2.0;
        let strategy_target = candidate.agreement.composite_score * 6.0;
        let expected_return_pct = ((momentum_target + strategy_target) / 2.0).max(EXPECTED_RETURN_FLOOR_PCT);

        // Step 5: quality_score, weighted liquidity + volatility-band-fit + confidence.
        let quality_score = self.quality_score(candidate.quote, candidate.features, confidence);

        // Step 6: reject below the quality floor.
        if quality_score < QUALITY_FLOOR {
            return Err(NoSignalReason::QualityBelowFloor);
        }

        // Step 7: stale-signal guard — price already ran more than 1% above reference.
        if candidate.reference_entry_price > Decimal::ZERO {
            let drift_pct = ((last - candidate.reference_entry_price) / candidate.reference_entry_price
                * Decimal::from(100))
            .to_f64()
            .unwrap_or(0.0);
            if drift_pct > STALE_ENTRY_DRIFT_PCT {
                return Err(NoSignalReason::StaleEntry);
            }
        }

        // Step 8: emit.
        Ok(Signal {
            symbol: candidate.symbol.clone(),
            side: Side::Buy,
            confidence,
            expected_return_pct,
            quality_score,
            strategy_agreement: candidate.agreement.agreement,
            entry_reference_price: last,
            created_at: Utc::now(),
        })
    }

    fn quality_score(&self, quote: &Quote, features: &HistoricalFeatures, confidence: f64) -> f64 {
        let liquidity_score = match quote.last {
            Some(last) => {
                let dollar_volume = last.to_f64().unwrap_or(0.0) * quote.volume as f64;
                (dollar_volume / 5_000_000.0 * 100.0).clamp(0.0, 100.0)
            }
            None => 0.0,
        };

        // Volatility-band fit: RSI near the middle of its range scores
        // highest, same shape as the symbol selector's relative-volume band.
        let rsi_distance = (features.rsi_14 - 50.0).abs();
        let volatility_band_score = (100.0 - rsi_distance * 2.0).clamp(0.0, 100.0);

        let confidence_score = confidence * 100.0;

        (liquidity_score * 0.35 + volatility_band_score * 0.35 + confidence_score * 0.30).clamp(0.0, 100.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn quote(last: Decimal) -> Quote {
        Quote {
            symbol: Symbol::new("AAPL").unwrap(),
            last: Some(last),
            bid: Some(last - dec!(0.01)),
            ask: Some(last + dec!(0.01)),
            volume: 500_000,
            day_high: None,
            day_low: None,
            prev_close: None,
            captured_at: Utc::now(),
        }
    }

    fn high_agreement() -> AgreementResult {
        AgreementResult {
            agreement: Agreement::High,
            strategy_scores: vec![],
            composite_score: 0.95,
        }
    }

    #[test]
    fn none_agreement_is_rejected_without_computation() {
        let gen = SignalGenerator::new(StrategyMode::Standard);
        let agreement = AgreementResult { agreement: Agreement::None, strategy_scores: vec![], composite_score: 0.0 };
        let features = HistoricalFeatures { rsi_14: 50.0, momentum_1h_pct: 1.0, trend_slope_pct: 0.5, volume_ratio: 1.0, recent_high: dec!(101) };
        let q = quote(dec!(100));
        let candidate = SignalCandidate {
            symbol: Symbol::new("AAPL").unwrap(),
            quote: &q,
            agreement: &agreement,
            features: &features,
            reference_entry_price: dec!(100),
        };
        assert_eq!(gen.generate(&candidate).unwrap_err(), NoSignalReason::NoAgreement);
    }

    #[test]
    fn high_agreement_high_liquidity_emits_signal() {
        let gen = SignalGenerator::new(StrategyMode::Standard);
        let agreement = high_agreement();
        let features = HistoricalFeatures { rsi_14: 50.0, momentum_1h_pct: 1.5, trend_slope_pct: 0.5, volume_ratio: 2.5, recent_high: dec!(99) };
        let q = quote(dec!(100));
        let candidate = SignalCandidate {
            symbol: Symbol::new("AAPL").unwrap(),
            quote: &q,
            agreement: &agreement,
            features: &features,
            reference_entry_price: dec!(100),
        };
        let signal = gen.generate(&candidate).expect("expected a signal");
        assert!(signal.confidence >= StrategyMode::Standard.min_signal_confidence());
        assert!(signal.expected_return_pct >= EXPECTED_RETURN_FLOOR_PCT);
        assert!(signal.quality_score >= QUALITY_FLOOR);
    }

    #[test]
    fn stale_entry_guard_rejects_price_that_already_ran() {
        let gen = SignalGenerator::new(StrategyMode::Standard);
        let agreement = high_agreement();
        let features = HistoricalFeatures { rsi_14: 50.0, momentum_1h_pct: 1.5, trend_slope_pct: 0.5, volume_ratio: 2.5, recent_high: dec!(99) };
        let q = quote(dec!(102.50)); // >1% above the reference of 100
        let candidate = SignalCandidate {
            symbol: Symbol::new("AAPL").unwrap(),
            quote: &q,
            agreement: &agreement,
            features: &features,
            reference_entry_price: dec!(100),
        };
        assert_eq!(gen.generate(&candidate).unwrap_err(), NoSignalReason::StaleEntry);
    }

    #[test]
    fn low_liquidity_fails_quality_floor() {
        let gen = SignalGenerator::new(StrategyMode::Standard);
        let agreement = AgreementResult { agreement: Agreement::Low, strategy_scores: vec![], composite_score: 0.91 };
        let features = HistoricalFeatures { rsi_14: 20.0, momentum_1h_pct: 0.1, trend_slope_pct: 0.2, volume_ratio: 1.0, recent_high: dec!(101) };
        let mut q = quote(dec!(100));
        q.volume = 10;
        let candidate = SignalCandidate {
            symbol: Symbol::new("AAPL").unwrap(),
            quote: &q,
            agreement: &agreement,
            features: &features,
            reference_entry_price: dec!(100),
        };
        assert_eq!(gen.generate(&candidate).unwrap_err(), NoSignalReason::QualityBelowFloor);
    }
}
