//! Symbol Selector (C4): each hour, ranks the daily watchlist to a working
//! set of size <= N by a weighted quality score.

use engine_types::{Quote, Symbol};
use rust_decimal::prelude::ToPrimitive;
use std::collections::BTreeMap;

/// Auxiliary technical features needed for scoring that the quote/account
/// data layer (C3) does not itself provide (C3 is quotes + account only).
/// These are supplied by whatever historical-bars source the
/// watchlist builder already uses upstream; the selector treats them as
/// opaque scoring inputs.
#[derive(Debug, Clone, Copy)]
pub struct AuxiliaryFeatures {
    pub avg_20d_volume: u64,
    pub rsi_14: f64,
    pub momentum_1h_pct: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct SelectorWeights {
    pub relative_volume: f64,
    pub rsi_band_fit: f64,
    pub momentum: f64,
    pub spread: f64,
}

impl Default for SelectorWeights {
    fn default() -> Self {
        Self {
            relative_volume: 0.30,
            rsi_band_fit: 0.25,
            momentum: 0.25,
            spread: 0.20,
        }
    }
}

pub const RSI_BAND_LOW: f64 = 40.0;
pub const RSI_BAND_HIGH: f64 = 70.0;

pub struct SymbolSelector {
    weights: SelectorWeights,
    min_dollar_volume: f64,
}

pub struct Candidate {
    pub symbol: Symbol,
    pub quote: Quote,
    pub features: AuxiliaryFeatures,
}

pub struct ScoredCandidate {
    pub symbol: Symbol,
    pub score: f64,
}

#[derive(Debug)]
pub struct RefreshOutcome {
    pub working_set: Vec<Symbol>,
    pub scored_count: usize,
    pub rejected_for_data: usize,
}

impl SymbolSelector {
    pub fn new(min_dollar_volume: f64) -> Self {
        Self {
            weights: SelectorWeights::default(),
            min_dollar_volume,
        }
    }

    pub fn with_weights(mut self, weights: SelectorWeights) -> Self {
        self.weights = weights;
        self
    }

    /// `refresh() -> WorkingSet`. Ranks descending, takes the top
    /// `working_set_size`. If fewer than half of `candidates` could be
    /// scored, the caller should keep the previous working set instead of
    /// using this result (that decision lives in the scheduler, which knows
    /// the previous set; see `RefreshOutcome::scored_count`).
    pub fn refresh(
        &self,
        candidates: &[Candidate],
        watchlist_len: usize,
        working_set_size: usize,
    ) -> RefreshOutcome {
        let mut scored = Vec::with_capacity(candidates.len());
        let mut rejected_for_data = 0usize;

        for candidate in candidates {
            match self.score(candidate) {
                Some(score) => scored.push(ScoredCandidate {
                    symbol: candidate.symbol.clone(),
                    score,
                }),
                None => rejected_for_data += 1,
            }
        }

        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        let working_set = scored
            .into_iter()
            .take(working_set_size)
            .map(|c| c.symbol)
            .collect();

        RefreshOutcome {
            working_set,
            scored_count: watchlist_len - rejected_for_data,
            rejected_for_data,
        }
    }

    /// Returns `None` if the candidate fails the absolute dollar-volume
    /// floor or lacks the data needed to score.
    fn score(&self, candidate: &Candidate) -> Option<f64> {
        let last = candidate.quote.last?;
        let last_f64: f64 = last.to_f64()?;
        let dollar_volume = last_f64 * candidate.quote.volume as f64;
        if dollar_volume < self.min_dollar_volume {
            return None;
        }

        let relative_volume_score = if candidate.features.avg_20d_volume == 0 {
            0.0
        } else {
            (candidate.quote.volume as f64 / candidate.features.avg_20d_volume as f64).min(5.0) / 5.0 * 100.0
        };

        let rsi = candidate.features.rsi_14;
        let rsi_band_score = if (RSI_BAND_LOW..=RSI_BAND_HIGH).contains(&rsi) {
            100.0
        } else {
            let distance = if rsi < RSI_BAND_LOW {
                RSI_BAND_LOW - rsi
            } else {
                rsi - RSI_BAND_HIGH
            };
            (100.0 - distance * 3.0).max(0.0)
        };

        let momentum_score = (candidate.features.momentum_1h_pct.clamp(-5.0, 5.0) + 5.0) / 10.0 * 100.0;

        let spread_pct = match (candidate.quote.bid, candidate.quote.ask) {
            (Some(bid), Some(ask)) if last > rust_decimal::Decimal::ZERO => {
                ((ask - bid) / last * rust_decimal::Decimal::from(100))
                    .to_f64()
                    .unwrap_or(1.0)
            }
            _ => 1.0,
        };
        let spread_score = (100.0 - spread_pct * 20.0).clamp(0.0, 100.0);

        let total = relative_volume_score * self.weights.relative_volume
            + rsi_band_score * self.weights.rsi_band_fit
            + momentum_score * self.weights.momentum
            + spread_score * self.weights.spread;

        Some(total)
    }
}

/// Convenience to build a `BTreeMap` view keyed by symbol, used by callers
/// that already hold quotes in that shape.
pub fn candidates_from_quotes(
    quotes: &BTreeMap<Symbol, Quote>,
    features: &BTreeMap<Symbol, AuxiliaryFeatures>,
) -> Vec<Candidate> {
    quotes
        .iter()
        .filter_map(|(symbol, quote)| {
            features.get(symbol).map(|f| Candidate {
                symbol: symbol.clone(),
                quote: quote.clone(),
                features: *f,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn candidate(symbol: &str, volume: u64, avg_volume: u64, rsi: f64, momentum: f64) -> Candidate {
        Candidate {
            symbol: Symbol::new(symbol).unwrap(),
            quote: Quote {
                symbol: Symbol::new(symbol).unwrap(),
                last: Some(dec!(50.00)),
                bid: Some(dec!(49.95)),
                ask: Some(dec!(50.05)),
                volume,
                day_high: None,
                day_low: None,
                prev_close: None,
                captured_at: Utc::now(),
            },
            features: AuxiliaryFeatures {
                avg_20d_volume: avg_volume,
                rsi_14: rsi,
                momentum_1h_pct: momentum,
            },
        }
    }

    #[test]
    fn ranks_higher_relative_volume_above_lower() {
        let selector = SymbolSelector::new(100_000.0);
        let candidates = vec![
            candidate("AAA", 100_000, 100_000, 55.0, 0.5),
            candidate("BBB", 500_000, 100_000, 55.0, 0.5),
        ];
        let outcome = selector.refresh(&candidates, 2, 50);
        assert_eq!(outcome.working_set[0].as_str(), "BBB");
    }

    #[test]
    fn rejects_below_dollar_volume_floor() {
        let selector = SymbolSelector::new(1_000_000_000.0);
        let candidates = vec![candidate("AAA", 100_000, 100_000, 55.0, 0.5)];
        let outcome = selector.refresh(&candidates, 1, 50);
        assert_eq!(outcome.working_set.len(), 0);
        assert_eq!(outcome.rejected_for_data, 1);
    }

    #[test]
    fn working_set_never_exceeds_requested_size() {
        let selector = SymbolSelector::new(0.0);
        let candidates: Vec<Candidate> = (0..80)
            .map(|i| candidate(&format!("S{:04}", i)[..5], 200_000, 100_000, 55.0, 0.5))
            .collect();
        let outcome = selector.refresh(&candidates, 80, 50);
        assert_eq!(outcome.working_set.len(), 50);
    }
}
