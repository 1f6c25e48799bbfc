use std::collections::{BTreeMap, VecDeque};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use engine_types::{Quote, Symbol};
use position_monitor::TickFeatures;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use strategy_validator::HistoricalFeatures;
use symbol_selector::AuxiliaryFeatures;

const SAMPLE_WINDOW: usize = 30;
const VOLUME_EMA_ALPHA: f64 = 0.05;

struct Sample {
    at: DateTime<Utc>,
    price: Decimal,
    volume: u64,
}

struct SymbolStats {
    volume_ema: f64,
    recent_high: Decimal,
    samples: VecDeque<Sample>,
}

impl SymbolStats {
    fn new(quote: &Quote) -> Self {
        Self {
            volume_ema: quote.volume as f64,
            recent_high: quote.last.or(quote.day_high).unwrap_or_default(),
            samples: VecDeque::with_capacity(SAMPLE_WINDOW),
        }
    }
}

/// Derives the technical features the selector, validator, and monitor need
/// from nothing but the quote stream itself, updated one observation per
/// tick. No historical-bars ingestion pipeline runs alongside this engine,
/// so these are rolling proxies built from what the quote and account layer
/// actually returns rather than a true 14-period RSI or 20-day average
/// volume.
pub struct FeatureTracker {
    stats: Mutex<BTreeMap<Symbol, SymbolStats>>,
}

impl Default for FeatureTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl FeatureTracker {
    pub fn new() -> Self {
        Self { stats: Mutex::new(BTreeMap::new()) }
    }

    pub fn observe_all(&self, quotes: &BTreeMap<Symbol, Quote>, now: DateTime<Utc>) {
        let mut stats = self.stats.lock().expect("feature stats poisoned");
        for (symbol, quote) in quotes {
            let Some(last) = quote.last else { continue };
            let entry = stats.entry(symbol.clone()).or_insert_with(|| SymbolStats::new(quote));
            entry.volume_ema = entry.volume_ema * (1.0 - VOLUME_EMA_ALPHA) + quote.volume as f64 * VOLUME_EMA_ALPHA;
            if last > entry.recent_high {
                entry.recent_high = last;
            }
            if entry.samples.len() == SAMPLE_WINDOW {
                entry.samples.pop_front();
            }
            entry.samples.push_back(Sample { at: now, price: last, volume: quote.volume });
        }
    }

    pub fn auxiliary(&self, symbol: &Symbol) -> AuxiliaryFeatures {
        let stats = self.stats.lock().expect("feature stats poisoned");
        match stats.get(symbol) {
            Some(s) => AuxiliaryFeatures {
                avg_20d_volume: s.volume_ema.round() as u64,
                rsi_14: rsi_proxy(&s.samples),
                momentum_1h_pct: momentum_proxy(&s.samples),
            },
            None => AuxiliaryFeatures { avg_20d_volume: 0, rsi_14: 50.0, momentum_1h_pct: 0.0 },
        }
    }

    pub fn historical(&self, symbol: &Symbol) -> HistoricalFeatures {
        let stats = self.stats.lock().expect("feature stats poisoned");
        match stats.get(symbol) {
            Some(s) => HistoricalFeatures {
                rsi_14: rsi_proxy(&s.samples),
                momentum_1h_pct: momentum_proxy(&s.samples),
                trend_slope_pct: slope_proxy(&s.samples),
                volume_ratio: volume_ratio(s.samples.back(), s.volume_ema),
                recent_high: s.recent_high,
            },
            None => HistoricalFeatures { rsi_14: 50.0, momentum_1h_pct: 0.0, trend_slope_pct: 0.0, volume_ratio: 1.0, recent_high: Decimal::ZERO },
        }
    }

    pub fn tick_features(&self, symbol: &Symbol, latest_volume: u64) -> TickFeatures {
        let stats = self.stats.lock().expect("feature stats poisoned");
        match stats.get(symbol) {
            Some(s) => TickFeatures { rsi_14: rsi_proxy(&s.samples), volume_5min: latest_volume, volume_20period_avg: s.volume_ema },
            None => TickFeatures { rsi_14: 50.0, volume_5min: latest_volume, volume_20period_avg: 0.0 },
        }
    }
}

/// Gain/loss ratio over the sample window, same shape as a Wilder RSI but
/// computed over whatever ticks have accumulated rather than 14 daily bars.
fn rsi_proxy(samples: &VecDeque<Sample>) -> f64 {
    if samples.len() < 2 {
        return 50.0;
    }
    let (mut gain, mut loss) = (0.0, 0.0);
    for pair in samples.iter().collect::<Vec<_>>().windows(2) {
        let delta = (pair[1].price - pair[0].price).to_f64().unwrap_or(0.0);
        if delta >= 0.0 {
            gain += delta;
        } else {
            loss -= delta;
        }
    }
    if gain + loss == 0.0 {
        return 50.0;
    }
    100.0 - (100.0 / (1.0 + gain / loss.max(1e-9)))
}

/// Percent change from the oldest sample at least one hour old to the
/// latest; falls back to the oldest available sample when the window is
/// younger than an hour.
fn momentum_proxy(samples: &VecDeque<Sample>) -> f64 {
    let Some(last) = samples.back() else { return 0.0 };
    let anchor = samples
        .iter()
        .find(|s| last.at - s.at >= chrono::Duration::minutes(60))
        .or_else(|| samples.front())
        .unwrap_or(last);
    if anchor.price.is_zero() {
        return 0.0;
    }
    ((last.price - anchor.price) / anchor.price * Decimal::from(100)).to_f64().unwrap_or(0.0)
}

/// Percent-per-day slope across the full sample window, the same
/// terminology the cross-validator's `trend_slope_pct` expects.
fn slope_proxy(samples: &VecDeque<Sample>) -> f64 {
    let (Some(first), Some(last)) = (samples.front(), samples.back()) else { return 0.0 };
    if first.price.is_zero() || first.at == last.at {
        return 0.0;
    }
    let pct_change = ((last.price - first.price) / first.price * Decimal::from(100)).to_f64().unwrap_or(0.0);
    let span_days = (last.at - first.at).num_minutes() as f64 / (60.0 * 24.0);
    if span_days <= 0.0 {
        0.0
    } else {
        pct_change / span_days
    }
}

fn volume_ratio(latest: Option<&Sample>, volume_ema: f64) -> f64 {
    match latest {
        Some(sample) if volume_ema > 0.0 => sample.volume as f64 / volume_ema,
        _ => 1.0,
    }
}
