//! Trade Executor (C8): turns an approved sizing decision into a broker
//! order (or a simulated fill), and turns a monitor exit decision into a
//! close.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sha2::{Digest, Sha256};

use engine_types::{EngineError, EntryAlert, ExitAlert, ExitReason, Position, PositionState, Side, Signal, SystemMode, Symbol, TradeRecord};
use oauth_broker::{BrokerClient, BrokerOrderRequest, BrokerOrderStatus};

/// Derives the idempotency tag from `(symbol, signal.created_at, process
/// instance)`, so a retried `open()` for the same signal reuses the
/// same client-order id instead of double-filling.
pub fn client_tag(symbol: &Symbol, signal_created_at: DateTime<Utc>, process_start_id: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(symbol.as_str().as_bytes());
    hasher.update(signal_created_at.to_rfc3339().as_bytes());
    hasher.update(process_start_id.as_bytes());
    let digest = hasher.finalize();
    hex::encode(digest)[..32].to_string()
}

pub struct OpenRequest<'a> {
    pub signal: &'a Signal,
    pub quantity: u64,
    pub stop_price: Decimal,
    pub take_profit_price: Decimal,
    /// Current ask (or last) used as the simulated fill price in
    /// `signal_only` mode, and as the fallback entry price if the broker's
    /// fill report omits an average price.
    pub reference_price: Decimal,
    pub account_key: String,
}

const PARTIAL_FILL_WINDOW_SECS: u64 = 30;
const FILL_POLL_INTERVAL_MS: u64 = 500;

pub struct TradeExecutor<B: BrokerClient> {
    broker: Arc<B>,
    configured_mode: SystemMode,
    /// Set whenever the active E*TRADE token environment is EXPIRED; forces
    /// every `open()` into simulated fills regardless of `configured_mode`
    /// until the token is restored. Checked fresh on every call so a
    /// mid-session token expiry (or a midnight-ET rollover) takes effect on
    /// the very next signal, not just at startup.
    forced_signal_only: AtomicBool,
    process_start_id: String,
    placed_tags: Mutex<HashSet<String>>,
}

impl<B: BrokerClient> TradeExecutor<B> {
    pub fn new(broker: Arc<B>, system_mode: SystemMode, process_start_id: impl Into<String>) -> Self {
        Self {
            broker,
            configured_mode: system_mode,
            forced_signal_only: AtomicBool::new(false),
            process_start_id: process_start_id.into(),
            placed_tags: Mutex::new(HashSet::new()),
        }
    }

    /// Called by the scheduler on every tick once it has read the current
    /// E*TRADE token state; `true` once the token is EXPIRED, `false` once
    /// it is valid again.
    pub fn set_forced_signal_only(&self, forced: bool) {
        self.forced_signal_only.store(forced, Ordering::SeqCst);
    }

    /// The mode this call to `open()` will actually use: `configured_mode`
    /// unless a token expiry is currently forcing simulated fills.
    pub fn effective_system_mode(&self) -> SystemMode {
        if self.forced_signal_only.load(Ordering::SeqCst) {
            SystemMode::SignalOnly
        } else {
            self.configured_mode
        }
    }

    /// `open(signal, decision) -> PositionRef | Error`. The idempotency tag
    /// is reserved only once the order is actually filled, so a retry after
    /// a transient failure on the first attempt (network timeout, broker
    /// 5xx) reaches the broker again instead of being rejected as a
    /// duplicate of an order that was never placed.
    pub async fn open(&self, request: OpenRequest<'_>, now: DateTime<Utc>) -> Result<(Position, EntryAlert), EngineError> {
        let tag = client_tag(&request.signal.symbol, request.signal.created_at, &self.process_start_id);

        {
            let placed = self.placed_tags.lock().expect("idempotency table poisoned");
            if placed.contains(&tag) {
                tracing::warn!(%tag, symbol = %request.signal.symbol, "duplicate open suppressed by idempotency tag");
                return Err(EngineError::BrokerPermanent(format!("duplicate open for tag {tag}")));
            }
        }

        let (entry_price, filled_quantity, simulated) = match self.effective_system_mode() {
            SystemMode::SignalOnly => (request.reference_price, request.quantity, true),
            SystemMode::FullTrading => {
                let order_request = BrokerOrderRequest::buy(
                    request.account_key.clone(),
                    request.signal.symbol.clone(),
                    request.quantity,
                    tag.clone(),
                );
                let placed = self.broker.place_order(&order_request).await?;
                let filled = self.await_fill(&request.account_key, &placed.order_id, placed.clone()).await?;
                let fill_price = filled.filled_avg_price.unwrap_or(request.reference_price);
                (fill_price, filled.filled_quantity, false)
            }
        };

        if filled_quantity == 0 {
            return Err(EngineError::BrokerPermanent("order filled zero quantity".into()));
        }

        self.placed_tags.lock().expect("idempotency table poisoned").insert(tag.clone());

        let position = Position {
            symbol: request.signal.symbol.clone(),
            entry_price,
            quantity: filled_quantity,
            entry_time: now,
            stop_price: request.stop_price,
            take_profit_price: request.take_profit_price,
            initial_take_profit_price: request.take_profit_price,
            high_water_price: entry_price,
            state: PositionState::Initial,
            simulated,
            client_tag: tag,
            exit_reason: None,
            exit_price: None,
            exit_time: None,
            close_attempt_failed: false,
            consecutive_missed_quotes: 0,
        };

        let alert = EntryAlert {
            symbol: position.symbol.clone(),
            quantity: position.quantity,
            entry_price: position.entry_price,
            simulated: position.simulated,
            stop_price: position.stop_price,
            take_profit_price: position.take_profit_price,
            confidence: request.signal.confidence,
            expected_return_pct: request.signal.expected_return_pct,
            at: now,
        };

        Ok((position, alert))
    }

    /// Polls the broker for up to `PARTIAL_FILL_WINDOW_SECS` after a buy is
    /// placed. A partial fill that stops growing within the window is
    /// accepted as final (partial fills).
    async fn await_fill(
        &self,
        account_key: &str,
        order_id: &str,
        mut last: oauth_broker::BrokerOrder,
    ) -> Result<oauth_broker::BrokerOrder, EngineError> {
        let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(PARTIAL_FILL_WINDOW_SECS);
        loop {
            match last.status {
                BrokerOrderStatus::Executed => return Ok(last),
                BrokerOrderStatus::Canceled | BrokerOrderStatus::Rejected | BrokerOrderStatus::Expired => {
                    return Err(EngineError::BrokerPermanent(format!("order {order_id} ended in {:?}", last.status)));
                }
                _ => {}
            }
            if tokio::time::Instant::now() >= deadline {
                return Ok(last);
            }
            tokio::time::sleep(std::time::Duration::from_millis(FILL_POLL_INTERVAL_MS)).await;
            last = self.broker.get_order(account_key, order_id).await?;
        }
    }

    /// `close(position, reason, ref_price) -> CloseResult | Error`.
    pub async fn close(
        &self,
        position: &Position,
        reason: ExitReason,
        ref_price: Decimal,
        account_key: &str,
        now: DateTime<Utc>,
    ) -> Result<(TradeRecord, ExitAlert), EngineError> {
        let exit_price = if position.simulated {
            ref_price
        } else {
            let tag = format!("{}-close", position.client_tag);
            let order_request = BrokerOrderRequest::sell(account_key.to_string(), position.symbol.clone(), position.quantity, tag);
            let placed = self.broker.place_order(&order_request).await?;
            placed.filled_avg_price.unwrap_or(ref_price)
        };

        let pnl_abs = (exit_price - position.entry_price) * Decimal::from(position.quantity);
        let pnl_pct = if position.entry_price.is_zero() {
            Decimal::ZERO
        } else {
            (exit_price - position.entry_price) / position.entry_price * Decimal::from(100)
        };

        let record = TradeRecord {
            symbol: position.symbol.clone(),
            entry_price: position.entry_price,
            exit_price,
            quantity: position.quantity,
            entry_time: position.entry_time,
            exit_time: now,
            pnl_abs,
            pnl_pct,
            exit_reason: reason,
            simulated: position.simulated,
        };

        let alert = ExitAlert {
            symbol: position.symbol.clone(),
            exit_price,
            pnl_abs,
            pnl_pct,
            duration_secs: (now - position.entry_time).num_seconds(),
            exit_reason: reason,
            simulated: position.simulated,
            at: now,
        };

        Ok((record, alert))
    }
}

/// `Side::Buy` is the only side the engine ever takes on entry (longs only);
/// kept as a const assertion so a future `Side::Sell` addition can't
/// silently slip through `open()` unnoticed.
#[allow(dead_code)]
fn assert_buy_only(side: Side) -> bool {
    matches!(side, Side::Buy)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use engine_types::{Agreement, Symbol};
    use oauth_broker::{BrokerAccountRecord, BrokerBalance, BrokerOrder, RawQuote};
    use rust_decimal_macros::dec;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FakeBroker {
        fill_calls: AtomicU32,
    }

    #[async_trait]
    impl BrokerClient for FakeBroker {
        async fn list_accounts(&self) -> Result<Vec<BrokerAccountRecord>, EngineError> {
            Ok(vec![])
        }
        async fn get_balance(&self, _account_key: &str) -> Result<BrokerBalance, EngineError> {
            Ok(BrokerBalance { available_cash: dec!(0), total_account_value: dec!(0) })
        }
        async fn batch_quotes(&self, _symbols: &[Symbol]) -> Result<BTreeMap<Symbol, RawQuote>, EngineError> {
            Ok(BTreeMap::new())
        }
        async fn place_order(&self, request: &BrokerOrderRequest) -> Result<BrokerOrder, EngineError> {
            Ok(BrokerOrder {
                order_id: "order-1".to_string(),
                status: BrokerOrderStatus::Executed,
                filled_quantity: request.quantity,
                filled_avg_price: Some(dec!(100.05)),
            })
        }
        async fn get_order(&self, _account_key: &str, _order_id: &str) -> Result<BrokerOrder, EngineError> {
            self.fill_calls.fetch_add(1, Ordering::SeqCst);
            Ok(BrokerOrder { order_id: "order-1".to_string(), status: BrokerOrderStatus::Executed, filled_quantity: 10, filled_avg_price: Some(dec!(100.05)) })
        }
        fn is_paper(&self) -> bool {
            true
        }
        fn broker_name(&self) -> &str {
            "fake"
        }
    }

    fn sample_signal() -> Signal {
        Signal {
            symbol: Symbol::new("AAPL").unwrap(),
            side: Side::Buy,
            confidence: 0.95,
            expected_return_pct: 3.0,
            quality_score: 80.0,
            strategy_agreement: Agreement::High,
            entry_reference_price: dec!(100.00),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn signal_only_mode_synthesizes_simulated_position() {
        let broker = Arc::new(FakeBroker { fill_calls: AtomicU32::new(0) });
        let executor = TradeExecutor::new(broker, SystemMode::SignalOnly, "proc-1");
        let signal = sample_signal();
        let request = OpenRequest {
            signal: &signal,
            quantity: 10,
            stop_price: dec!(97.00),
            take_profit_price: dec!(105.00),
            reference_price: dec!(100.10),
            account_key: "acct".to_string(),
        };
        let (position, alert) = executor.open(request, Utc::now()).await.expect("open should succeed");
        assert!(position.simulated);
        assert_eq!(position.entry_price, dec!(100.10));
        assert_eq!(position.quantity, 10);
        assert!(alert.simulated);
    }

    #[tokio::test]
    async fn full_trading_mode_uses_broker_fill_price() {
        let broker = Arc::new(FakeBroker { fill_calls: AtomicU32::new(0) });
        let executor = TradeExecutor::new(broker, SystemMode::FullTrading, "proc-1");
        let signal = sample_signal();
        let request = OpenRequest {
            signal: &signal,
            quantity: 10,
            stop_price: dec!(97.00),
            take_profit_price: dec!(105.00),
            reference_price: dec!(100.10),
            account_key: "acct".to_string(),
        };
        let (position, _alert) = executor.open(request, Utc::now()).await.expect("open should succeed");
        assert!(!position.simulated);
        assert_eq!(position.entry_price, dec!(100.05));
    }

    #[tokio::test]
    async fn duplicate_open_with_same_signal_is_rejected() {
        let broker = Arc::new(FakeBroker { fill_calls: AtomicU32::new(0) });
        let executor = TradeExecutor::new(broker, SystemMode::SignalOnly, "proc-1");
        let signal = sample_signal();
        let request = || OpenRequest {
            signal: &signal,
            quantity: 10,
            stop_price: dec!(97.00),
            take_profit_price: dec!(105.00),
            reference_price: dec!(100.10),
            account_key: "acct".to_string(),
        };
        let now = Utc::now();
        assert!(executor.open(request(), now).await.is_ok());
        assert!(executor.open(request(), now).await.is_err());
    }

    #[tokio::test]
    async fn close_simulated_position_computes_pnl() {
        let broker = Arc::new(FakeBroker { fill_calls: AtomicU32::new(0) });
        let executor = TradeExecutor::new(broker, SystemMode::SignalOnly, "proc-1");
        let position = Position {
            symbol: Symbol::new("AAPL").unwrap(),
            entry_price: dec!(100.00),
            quantity: 10,
            entry_time: Utc::now(),
            stop_price: dec!(97.00),
            take_profit_price: dec!(105.00),
            initial_take_profit_price: dec!(105.00),
            high_water_price: dec!(100.00),
            state: PositionState::Trailing,
            simulated: true,
            client_tag: "tag".to_string(),
            exit_reason: None,
            exit_price: None,
            exit_time: None,
            close_attempt_failed: false,
            consecutive_missed_quotes: 0,
        };
        let (record, alert) = executor
            .close(&position, ExitReason::TakeProfit, dec!(105.50), "acct", Utc::now())
            .await
            .expect("close should succeed");
        assert_eq!(record.pnl_abs, dec!(55.00));
        assert_eq!(alert.exit_reason, ExitReason::TakeProfit);
    }

    struct FlakyBroker {
        place_calls: AtomicU32,
    }

    #[async_trait]
    impl BrokerClient for FlakyBroker {
        async fn list_accounts(&self) -> Result<Vec<BrokerAccountRecord>, EngineError> {
            Ok(vec![])
        }
        async fn get_balance(&self, _account_key: &str) -> Result<BrokerBalance, EngineError> {
            Ok(BrokerBalance { available_cash: dec!(0), total_account_value: dec!(0) })
        }
        async fn batch_quotes(&self, _symbols: &[Symbol]) -> Result<BTreeMap<Symbol, RawQuote>, EngineError> {
            Ok(BTreeMap::new())
        }
        async fn place_order(&self, request: &BrokerOrderRequest) -> Result<BrokerOrder, EngineError> {
            if self.place_calls.fetch_add(1, Ordering::SeqCst) == 0 {
                return Err(EngineError::BrokerTransient("timed out".to_string()));
            }
            Ok(BrokerOrder {
                order_id: "order-1".to_string(),
                status: BrokerOrderStatus::Executed,
                filled_quantity: request.quantity,
                filled_avg_price: Some(dec!(100.05)),
            })
        }
        async fn get_order(&self, _account_key: &str, _order_id: &str) -> Result<BrokerOrder, EngineError> {
            Ok(BrokerOrder { order_id: "order-1".to_string(), status: BrokerOrderStatus::Executed, filled_quantity: 10, filled_avg_price: Some(dec!(100.05)) })
        }
        fn is_paper(&self) -> bool {
            true
        }
        fn broker_name(&self) -> &str {
            "flaky"
        }
    }

    #[tokio::test]
    async fn retry_after_transient_place_order_failure_still_opens() {
        let broker = Arc::new(FlakyBroker { place_calls: AtomicU32::new(0) });
        let executor = TradeExecutor::new(broker, SystemMode::FullTrading, "proc-1");
        let signal = sample_signal();
        let request = || OpenRequest {
            signal: &signal,
            quantity: 10,
            stop_price: dec!(97.00),
            take_profit_price: dec!(105.00),
            reference_price: dec!(100.10),
            account_key: "acct".to_string(),
        };
        let now = Utc::now();
        assert!(executor.open(request(), now).await.is_err());
        let (position, _alert) = executor.open(request(), now).await.expect("retry with the same tag should succeed");
        assert_eq!(position.quantity, 10);
    }

    #[tokio::test]
    async fn forced_signal_only_overrides_full_trading() {
        let broker = Arc::new(FakeBroker { fill_calls: AtomicU32::new(0) });
        let executor = TradeExecutor::new(broker, SystemMode::FullTrading, "proc-1");
        executor.set_forced_signal_only(true);
        assert_eq!(executor.effective_system_mode(), SystemMode::SignalOnly);
        let signal = sample_signal();
        let request = OpenRequest {
            signal: &signal,
            quantity: 10,
            stop_price: dec!(97.00),
            take_profit_price: dec!(105.00),
            reference_price: dec!(100.10),
            account_key: "acct".to_string(),
        };
        let (position, _alert) = executor.open(request, Utc::now()).await.expect("open should succeed");
        assert!(position.simulated);
        executor.set_forced_signal_only(false);
        assert_eq!(executor.effective_system_mode(), SystemMode::FullTrading);
    }
}
