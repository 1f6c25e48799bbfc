//! Multi-Strategy Cross-Validator (C5): runs K independent strategy
//! evaluators over the working set and blends their votes into a per-symbol
//! agreement score.

use std::collections::BTreeMap;

use engine_types::{Agreement, Quote, Symbol};

/// Technical features the evaluators need that a quote alone doesn't carry.
/// Supplied by whatever historical-bars source feeds the watchlist builder;
/// treated here as opaque scoring inputs, same convention as the symbol
/// selector's `AuxiliaryFeatures`.
#[derive(Debug, Clone, Copy)]
pub struct HistoricalFeatures {
    pub rsi_14: f64,
    pub momentum_1h_pct: f64,
    /// Linear slope of the last 20 daily closes, expressed as %/day.
    pub trend_slope_pct: f64,
    /// Current volume divided by the 20-period average (1.0 = in line).
    pub volume_ratio: f64,
    pub recent_high: rust_decimal::Decimal,
}

/// A single strategy's verdict on a symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Vote {
    Buy,
    Neutral,
    Avoid,
}

#[derive(Debug, Clone, Copy)]
pub struct StrategyVote {
    pub vote: Vote,
    /// Internal score in [0, 1], only meaningful when `vote == Buy`.
    pub score: f64,
}

fn neutral() -> StrategyVote {
    StrategyVote { vote: Vote::Neutral, score: 0.0 }
}

fn avoid() -> StrategyVote {
    StrategyVote { vote: Vote::Avoid, score: 0.0 }
}

/// One of the K independent evaluators (default K=3).
pub trait StrategyEvaluator {
    fn name(&self) -> &'static str;
    fn evaluate(&self, quote: &Quote, features: &HistoricalFeatures) -> StrategyVote;
}

/// Rides an established uptrend: BUY when the recent slope and short-term
/// momentum agree, AVOID when the slope is sharply negative (don't fight the
/// trend), NEUTRAL otherwise.
pub struct TrendFollowing {
    pub min_slope_pct: f64,
    pub strong_downtrend_pct: f64,
}

impl Default for TrendFollowing {
    fn default() -> Self {
        Self { min_slope_pct: 0.15, strong_downtrend_pct: -0.5 }
    }
}

impl StrategyEvaluator for TrendFollowing {
    fn name(&self) -> &'static str {
        "trend_following"
    }

    fn evaluate(&self, _quote: &Quote, features: &HistoricalFeatures) -> StrategyVote {
        if features.trend_slope_pct <= self.strong_downtrend_pct {
            return avoid();
        }
        if features.trend_slope_pct >= self.min_slope_pct && features.momentum_1h_pct > 0.0 {
            let slope_component = (features.trend_slope_pct / 2.0).clamp(0.0, 1.0);
            let momentum_component = (features.momentum_1h_pct / 3.0).clamp(0.0, 1.0);
            let score = (slope_component * 0.6 + momentum_component * 0.4).clamp(0.0, 1.0);
            return StrategyVote { vote: Vote::Buy, score };
        }
        neutral()
    }
}

/// Buys an oversold bounce but refuses to catch a falling knife: BUY only
/// when RSI is deep in oversold territory AND short-term momentum has
/// already turned up; AVOID when the underlying trend is still collapsing.
pub struct MeanReversionRejectionGuard {
    pub oversold_rsi: f64,
    pub strong_downtrend_pct: f64,
}

impl Default for MeanReversionRejectionGuard {
    fn default() -> Self {
        Self { oversold_rsi: 32.0, strong_downtrend_pct: -1.0 }
    }
}

impl StrategyEvaluator for MeanReversionRejectionGuard {
    fn name(&self) -> &'static str {
        "mean_reversion_rejection_guard"
    }

    fn evaluate(&self, _quote: &Quote, features: &HistoricalFeatures) -> StrategyVote {
        if features.trend_slope_pct <= self.strong_downtrend_pct {
            return avoid();
        }
        if features.rsi_14 <= self.oversold_rsi && features.momentum_1h_pct > 0.0 {
            let depth_component = ((self.oversold_rsi - features.rsi_14) / self.oversold_rsi).clamp(0.0, 1.0);
            let rejection_component = (features.momentum_1h_pct / 2.0).clamp(0.0, 1.0);
            let score = (depth_component * 0.5 + rejection_component * 0.5).clamp(0.0, 1.0);
            return StrategyVote { vote: Vote::Buy, score };
        }
        neutral()
    }
}

/// Buys confirmed breakouts: BUY when volume surges well above its
/// baseline and price clears the recent high on that volume. AVOID when
/// the surge is accompanied by a price drop below the recent high (a
/// distribution day, not a breakout).
pub struct VolumeBreakout {
    pub breakout_volume_ratio: f64,
}

impl Default for VolumeBreakout {
    fn default() -> Self {
        Self { breakout_volume_ratio: 2.0 }
    }
}

impl StrategyEvaluator for VolumeBreakout {
    fn name(&self) -> &'static str {
        "volume_breakout"
    }

    fn evaluate(&self, quote: &Quote, features: &HistoricalFeatures) -> StrategyVote {
        let Some(last) = quote.last else { return neutral() };
        if features.volume_ratio < self.breakout_volume_ratio {
            return neutral();
        }
        if last >= features.recent_high {
            let surge_component = ((features.volume_ratio - self.breakout_volume_ratio) / 3.0).clamp(0.0, 1.0);
            let score = (0.5 + surge_component * 0.5).clamp(0.0, 1.0);
            StrategyVote { vote: Vote::Buy, score }
        } else if last < features.recent_high {
            avoid()
        } else {
            neutral()
        }
    }
}

/// (agreement, per-strategy scores, blended composite ∈ [0,1]) for one symbol.
#[derive(Debug, Clone)]
pub struct AgreementResult {
    pub agreement: Agreement,
    pub strategy_scores: Vec<(&'static str, StrategyVote)>,
    pub composite_score: f64,
}

/// Runs the configured evaluators over the working set. Deterministic:
/// a pure function of `(working_set, quotes, features)`, no RNG.
pub struct CrossValidator {
    evaluators: Vec<Box<dyn StrategyEvaluator + Send + Sync>>,
}

impl Default for CrossValidator {
    fn default() -> Self {
        Self {
            evaluators: vec![
                Box::new(TrendFollowing::default()),
                Box::new(MeanReversionRejectionGuard::default()),
                Box::new(VolumeBreakout::default()),
            ],
        }
    }
}

impl CrossValidator {
    pub fn new(evaluators: Vec<Box<dyn StrategyEvaluator + Send + Sync>>) -> Self {
        Self { evaluators }
    }

    /// `evaluate(working_set, quotes) -> map[Symbol]AgreementResult`.
    /// Symbols missing a quote or feature set are omitted, not errored —
    /// the signal generator treats an absent entry as "no signal".
    pub fn evaluate(
        &self,
        working_set: &[Symbol],
        quotes: &BTreeMap<Symbol, Quote>,
        features: &BTreeMap<Symbol, HistoricalFeatures>,
    ) -> BTreeMap<Symbol, AgreementResult> {
        let mut out = BTreeMap::new();
        for symbol in working_set {
            let (Some(quote), Some(feats)) = (quotes.get(symbol), features.get(symbol)) else {
                tracing::debug!(%symbol, "skipping cross-validation: missing quote or features");
                continue;
            };
            out.insert(symbol.clone(), self.evaluate_one(quote, feats));
        }
        out
    }

    fn evaluate_one(&self, quote: &Quote, features: &HistoricalFeatures) -> AgreementResult {
        let votes: Vec<(&'static str, StrategyVote)> = self
            .evaluators
            .iter()
            .map(|e| (e.name(), e.evaluate(quote, features)))
            .collect();

        let any_avoid = votes.iter().any(|(_, v)| v.vote == Vote::Avoid);
        let buy_count = votes.iter().filter(|(_, v)| v.vote == Vote::Buy).count();

        let agreement = if any_avoid {
            Agreement::None
        } else {
            match buy_count {
                0 => Agreement::None,
                1 => Agreement::Low,
                2 => Agreement::Medium,
                _ => Agreement::High,
            }
        };

        let composite_score = if any_avoid || buy_count == 0 {
            0.0
        } else {
            let sum: f64 = votes
                .iter()
                .filter(|(_, v)| v.vote == Vote::Buy)
                .map(|(_, v)| v.score)
                .sum();
            (sum / buy_count as f64).clamp(0.0, 1.0)
        };

        AgreementResult { agreement, strategy_scores: votes, composite_score }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use engine_types::Symbol;
    use rust_decimal_macros::dec;

    fn quote(last: rust_decimal::Decimal) -> Quote {
        Quote {
            symbol: Symbol::new("AAPL").unwrap(),
            last: Some(last),
            bid: Some(last - dec!(0.01)),
            ask: Some(last + dec!(0.01)),
            volume: 500_000,
            day_high: None,
            day_low: None,
            prev_close: None,
            captured_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn three_buys_yield_high_agreement() {
        let validator = CrossValidator::default();
        let features = HistoricalFeatures {
            rsi_14: 28.0,
            momentum_1h_pct: 0.5,
            trend_slope_pct: 0.4,
            volume_ratio: 3.0,
            recent_high: dec!(99.00),
        };
        let result = validator.evaluate_one(&quote(dec!(100.00)), &features);
        assert_eq!(result.agreement, Agreement::High);
        assert!(result.composite_score > 0.0);
    }

    #[test]
    fn any_avoid_short_circuits_to_none() {
        let validator = CrossValidator::default();
        // Strong downtrend trips the trend-following and mean-reversion
        // guards to AVOID even though volume breakout alone would say BUY.
        let features = HistoricalFeatures {
            rsi_14: 28.0,
            momentum_1h_pct: 0.5,
            trend_slope_pct: -2.0,
            volume_ratio: 3.0,
            recent_high: dec!(99.00),
        };
        let result = validator.evaluate_one(&quote(dec!(100.00)), &features);
        assert_eq!(result.agreement, Agreement::None);
        assert_eq!(result.composite_score, 0.0);
    }

    #[test]
    fn no_votes_yield_none_agreement() {
        let validator = CrossValidator::default();
        let features = HistoricalFeatures {
            rsi_14: 55.0,
            momentum_1h_pct: 0.0,
            trend_slope_pct: 0.0,
            volume_ratio: 1.0,
            recent_high: dec!(105.00),
        };
        let result = validator.evaluate_one(&quote(dec!(100.00)), &features);
        assert_eq!(result.agreement, Agreement::None);
    }

    #[test]
    fn missing_data_skips_symbol_without_error() {
        let validator = CrossValidator::default();
        let working_set = vec![Symbol::new("AAPL").unwrap(), Symbol::new("MSFT").unwrap()];
        let mut quotes = BTreeMap::new();
        quotes.insert(Symbol::new("AAPL").unwrap(), quote(dec!(100.00)));
        let features = BTreeMap::new();
        let result = validator.evaluate(&working_set, &quotes, &features);
        assert!(result.is_empty());
    }
}
