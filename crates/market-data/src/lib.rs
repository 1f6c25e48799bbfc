//! Quote & Account Data Access (C3): batched quote fetch, account balance,
//! a TTL cache, and a daily/hourly call budget.

mod budget;
mod cache;

pub use budget::ApiCallBudget;
pub use cache::QuoteCache;

use chrono::{DateTime, Duration, Utc};
use engine_types::{AccountSnapshot, EngineError, Phase, Position, Quote, Symbol};
use oauth_broker::BrokerClient;
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};
use tracing::{debug, warn};

pub struct MarketDataService {
    broker: Arc<dyn BrokerClient>,
    account_key: RwLock<Option<String>>,
    cache: QuoteCache,
    budget: ApiCallBudget,
    account_cache: RwLock<Option<(AccountSnapshot, DateTime<Utc>)>>,
    peak_capital: RwLock<Decimal>,
    batch_size: usize,
    ttl_intraday: Duration,
    ttl_idle: Duration,
}

/// Result of a `quotes` call: symbols that could not be resolved are omitted
/// and counted, never alerted individually (`EngineError::DataUnavailable`).
pub struct QuotesResult {
    pub quotes: BTreeMap<Symbol, Quote>,
    pub unavailable: Vec<Symbol>,
    pub batches_issued: u64,
}

impl MarketDataService {
    pub fn new(
        broker: Arc<dyn BrokerClient>,
        daily_budget: u64,
        batch_size: usize,
        ttl_intraday_sec: i64,
        ttl_idle_sec: i64,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            broker,
            account_key: RwLock::new(None),
            cache: QuoteCache::new(),
            budget: ApiCallBudget::new(daily_budget, now),
            account_cache: RwLock::new(None),
            peak_capital: RwLock::new(Decimal::ZERO),
            batch_size,
            ttl_intraday: Duration::seconds(ttl_intraday_sec),
            ttl_idle: Duration::seconds(ttl_idle_sec),
        }
    }

    pub async fn resolve_account_key(&self) -> Result<String, EngineError> {
        if let Some(key) = self.account_key.read().expect("lock poisoned").clone() {
            return Ok(key);
        }
        let accounts = self.broker.list_accounts().await?;
        let key = accounts
            .first()
            .map(|a| a.account_key.clone())
            .ok_or_else(|| EngineError::BrokerPermanent("broker returned no accounts".into()))?;
        *self.account_key.write().expect("lock poisoned") = Some(key.clone());
        Ok(key)
    }

    fn ttl_for_phase(&self, phase: Phase) -> Duration {
        if phase == Phase::Regular || phase == Phase::PreMarket {
            self.ttl_intraday
        } else {
            self.ttl_idle
        }
    }

    /// Fetches fresh quotes (cache bypass), used by the symbol selector's
    /// hourly `refresh()`. Always partitions into `batch_size`
    /// batches; does not consult the TTL cache for staleness.
    pub async fn quotes_bypass_cache(&self, symbols: &[Symbol], now: DateTime<Utc>) -> QuotesResult {
        self.quotes_inner(symbols, now, Phase::Regular, true).await
    }

    /// `quotes(symbols) -> map[Symbol]Quote`. Serves fresh cache
    /// entries; issues one signed batch per remaining partition, subject to
    /// the daily/hourly budget. Under budget pressure, returns stale cache
    /// (up to 4x TTL) instead of issuing.
    pub async fn quotes(&self, symbols: &[Symbol], now: DateTime<Utc>, phase: Phase) -> QuotesResult {
        self.quotes_inner(symbols, now, phase, false).await
    }

    async fn quotes_inner(&self, symbols: &[Symbol], now: DateTime<Utc>, phase: Phase, bypass_cache: bool) -> QuotesResult {
        let ttl = self.ttl_for_phase(phase);
        let mut resolved = BTreeMap::new();
        let mut to_fetch = Vec::new();

        if bypass_cache {
            to_fetch = symbols.to_vec();
        } else {
            for symbol in symbols {
                if let Some(quote) = self.cache.get_fresh(symbol, now, ttl) {
                    resolved.insert(symbol.clone(), quote);
                } else {
                    to_fetch.push(symbol.clone());
                }
            }
        }

        let mut unavailable = Vec::new();
        let mut batches_issued = 0u64;

        for batch in to_fetch.chunks(self.batch_size) {
            if !self.budget.allows_call(now) {
                warn!("quote call budget under pressure; falling back to stale cache");
                for symbol in batch {
                    match self.cache.get_within(symbol, now, ttl * 4) {
                        Some(quote) => {
                            resolved.insert(symbol.clone(), quote);
                        }
                        None => unavailable.push(symbol.clone()),
                    }
                }
                continue;
            }

            match self.fetch_batch_with_retry(batch, now).await {
                Ok(fetched) => {
                    batches_issued += 1;
                    self.budget.record_call(now);
                    for symbol in batch {
                        if let Some(raw) = fetched.get(symbol) {
                            let quote = Quote {
                                symbol: symbol.clone(),
                                last: raw.last,
                                bid: raw.bid,
                                ask: raw.ask,
                                volume: raw.volume,
                                day_high: raw.day_high,
                                day_low: raw.day_low,
                                prev_close: raw.prev_close,
                                captured_at: now,
                            };
                            self.cache.insert(quote.clone());
                            resolved.insert(symbol.clone(), quote);
                        } else if let Some(stale) = self.cache.get_within(symbol, now, ttl * 4) {
                            resolved.insert(symbol.clone(), stale);
                        } else {
                            unavailable.push(symbol.clone());
                        }
                    }
                }
                Err(e) => {
                    warn!(error = %e, "quote batch failed after retry");
                    for symbol in batch {
                        match self.cache.get_within(symbol, now, ttl) {
                            Some(stale) => {
                                resolved.insert(symbol.clone(), stale);
                            }
                            None => unavailable.push(symbol.clone()),
                        }
                    }
                }
            }
        }

        QuotesResult {
            quotes: resolved,
            unavailable,
            batches_issued,
        }
    }

    /// Network error on a batch: retry once after 500ms; on second failure
    /// the caller falls back to cache.
    async fn fetch_batch_with_retry(
        &self,
        batch: &[Symbol],
        _now: DateTime<Utc>,
    ) -> Result<BTreeMap<Symbol, oauth_broker::RawQuote>, EngineError> {
        match self.broker.batch_quotes(batch).await {
            Ok(result) => Ok(result),
            Err(EngineError::BrokerTransient(_)) => {
                tokio::time::sleep(std::time::Duration::from_millis(500)).await;
                self.broker.batch_quotes(batch).await
            }
            Err(other) => Err(other),
        }
    }

    /// `account_snapshot() -> AccountSnapshot`, cached for 60s. The
    /// "managed position value" is computed from the engine's own open
    /// positions rather than a separate broker RPC, since listing positions
    /// is not one of the four broker operations this engine is scoped to.
    pub async fn account_snapshot(
        &self,
        open_positions: &[Position],
        quotes: &BTreeMap<Symbol, Quote>,
        now: DateTime<Utc>,
    ) -> Result<AccountSnapshot, EngineError> {
        if let Some((snap, at)) = self.account_cache.read().expect("lock poisoned").clone() {
            if now - at <= Duration::seconds(60) {
                debug!("serving account snapshot from 60s cache");
                return Ok(snap);
            }
        }

        let account_key = self.resolve_account_key().await?;
        let balance = self.broker.get_balance(&account_key).await?;

        let managed_position_value = open_positions
            .iter()
            .map(|p| {
                let last = quotes
                    .get(&p.symbol)
                    .and_then(|q| q.last)
                    .unwrap_or(p.entry_price);
                last * Decimal::from(p.quantity)
            })
            .sum();

        let mut peak = self.peak_capital.write().expect("lock poisoned");
        if balance.total_account_value > *peak {
            *peak = balance.total_account_value;
        }

        let snapshot = AccountSnapshot {
            available_cash: balance.available_cash,
            total_account_value: balance.total_account_value,
            managed_position_value,
            peak_capital: *peak,
            captured_at: now,
        };

        *self.account_cache.write().expect("lock poisoned") = Some((snapshot.clone(), now));
        Ok(snapshot)
    }

    pub fn available_calls_today(&self, now: DateTime<Utc>) -> u64 {
        self.budget.available_calls_today(now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use oauth_broker::{BrokerAccountRecord, BrokerBalance, BrokerOrder, BrokerOrderRequest};
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicU64, Ordering};

    struct FakeBroker {
        quote_calls: AtomicU64,
    }

    #[async_trait]
    impl BrokerClient for FakeBroker {
        async fn list_accounts(&self) -> Result<Vec<BrokerAccountRecord>, EngineError> {
            Ok(vec![BrokerAccountRecord {
                account_id: "1".into(),
                account_key: "key1".into(),
            }])
        }

        async fn get_balance(&self, _account_key: &str) -> Result<BrokerBalance, EngineError> {
            Ok(BrokerBalance {
                available_cash: dec!(10000),
                total_account_value: dec!(10000),
            })
        }

        async fn batch_quotes(&self, symbols: &[Symbol]) -> Result<BTreeMap<Symbol, oauth_broker::RawQuote>, EngineError> {
            self.quote_calls.fetch_add(1, Ordering::SeqCst);
            let mut out = BTreeMap::new();
            for s in symbols {
                out.insert(
                    s.clone(),
                    oauth_broker::RawQuote {
                        symbol: s.clone(),
                        last: Some(dec!(10.00)),
                        bid: Some(dec!(9.99)),
                        ask: Some(dec!(10.01)),
                        volume: 100,
                        day_high: None,
                        day_low: None,
                        prev_close: None,
                        captured_at: Utc::now(),
                    },
                );
            }
            Ok(out)
        }

        async fn place_order(&self, _request: &BrokerOrderRequest) -> Result<BrokerOrder, EngineError> {
            unimplemented!()
        }

        async fn get_order(&self, _account_key: &str, _order_id: &str) -> Result<BrokerOrder, EngineError> {
            unimplemented!()
        }

        fn is_paper(&self) -> bool {
            true
        }

        fn broker_name(&self) -> &str {
            "fake"
        }
    }

    #[tokio::test]
    async fn working_set_of_60_issues_three_batches_of_25() {
        let broker = Arc::new(FakeBroker {
            quote_calls: AtomicU64::new(0),
        });
        let service = MarketDataService::new(broker.clone(), 10_000, 25, 30, 300, Utc::now());
        let symbols: Vec<Symbol> = (0..60)
            .map(|i| Symbol::new(format!("S{:04}", i).chars().take(5).collect::<String>()).unwrap_or(Symbol::new("SPY").unwrap()))
            .collect();
        let now = Utc::now();
        let result = service.quotes(&symbols, now, Phase::Regular).await;
        assert_eq!(result.batches_issued, 3);
        assert_eq!(broker.quote_calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn second_call_within_ttl_serves_from_cache() {
        let broker = Arc::new(FakeBroker {
            quote_calls: AtomicU64::new(0),
        });
        let service = MarketDataService::new(broker.clone(), 10_000, 25, 30, 300, Utc::now());
        let symbols = vec![Symbol::new("AAPL").unwrap()];
        let now = Utc::now();
        service.quotes(&symbols, now, Phase::Regular).await;
        service.quotes(&symbols, now, Phase::Regular).await;
        assert_eq!(broker.quote_calls.load(Ordering::SeqCst), 1);
    }
}
