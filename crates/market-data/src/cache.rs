use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use engine_types::{Quote, Symbol};

/// Per-symbol TTL cache owned exclusively by the quote/account data access
/// layer. Fine-grained: reads of different symbols never contend.
#[derive(Default)]
pub struct QuoteCache {
    entries: DashMap<Symbol, Quote>,
}

impl QuoteCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_fresh(&self, symbol: &Symbol, now: DateTime<Utc>, ttl: Duration) -> Option<Quote> {
        self.entries
            .get(symbol)
            .filter(|q| q.is_fresh(now, ttl))
            .map(|q| q.clone())
    }

    /// Returns a cached quote even if stale, up to `max_age`, for budget-
    /// pressure fallback.
    pub fn get_within(&self, symbol: &Symbol, now: DateTime<Utc>, max_age: Duration) -> Option<Quote> {
        self.entries
            .get(symbol)
            .filter(|q| q.age(now) <= max_age)
            .map(|q| q.clone())
    }

    pub fn insert(&self, quote: Quote) {
        self.entries.insert(quote.symbol.clone(), quote);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn quote_at(symbol: &str, captured_at: DateTime<Utc>) -> Quote {
        Quote {
            symbol: Symbol::new(symbol).unwrap(),
            last: Some(dec!(10.00)),
            bid: Some(dec!(9.99)),
            ask: Some(dec!(10.01)),
            volume: 1,
            day_high: None,
            day_low: None,
            prev_close: None,
            captured_at,
        }
    }

    #[test]
    fn stale_entries_are_not_returned_as_fresh() {
        let cache = QuoteCache::new();
        let now = Utc::now();
        cache.insert(quote_at("AAPL", now - Duration::seconds(60)));
        let sym = Symbol::new("AAPL").unwrap();
        assert!(cache.get_fresh(&sym, now, Duration::seconds(30)).is_none());
        assert!(cache.get_within(&sym, now, Duration::seconds(120)).is_some());
    }
}
