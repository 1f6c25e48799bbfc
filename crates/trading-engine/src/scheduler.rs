//! Cooperative scheduler: one logical event loop that drives every
//! cadence the engine runs on, so at most one pass ever touches the
//! position map or account cache at a time. A single `tick`
//! every five seconds decides, per cadence, whether enough wall-clock time
//! has passed to run that pass; passes run sequentially within a tick, which
//! is what gives the mutual-exclusion guarantee for free rather than through
//! explicit locking between components.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, Utc};
use chrono_tz::US::Eastern;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

use engine_types::{Alert, DailyReport, EngineConfig, EngineError, ExitAlert, ExitReason, Heartbeat, Phase, Position, Signal, Symbol, TradeRecord};
use market_clock::MarketClock;
use market_data::MarketDataService;
use notification_service::NotificationService;
use oauth_broker::client::etrade::EtradeClient;
use oauth_broker::tokens::{keepalive_backoff_schedule, Environment, TokenManager, TokenState};
use oauth_broker::BrokerClient;
use position_monitor::PositionMonitor;
use risk_manager::{RiskContext, RiskDecision, RiskManager};
use signal_generator::{SignalCandidate, SignalGenerator};
use strategy_validator::CrossValidator;
use symbol_selector::{candidates_from_quotes, SymbolSelector};
use trade_executor::{OpenRequest, TradeExecutor};

use crate::features::FeatureTracker;
use crate::journal::TradeJournal;
use crate::metrics::{Metrics, MetricsSnapshot};
use crate::watchlist::WatchlistStore;

const TICK_INTERVAL: std::time::Duration = std::time::Duration::from_secs(5);
const AFTER_HOURS_SETTLE_MINUTES: i64 = 5;
const TOKEN_KEEPALIVE_INTERVAL: ChronoDuration = ChronoDuration::minutes(55);
const CLOSE_RETRY_DELAY: std::time::Duration = std::time::Duration::from_secs(5);
/// Minimum average dollar volume a watchlist candidate needs to be
/// considered liquid enough to size a position into.
const MIN_DOLLAR_VOLUME: f64 = 500_000.0;

#[derive(Default)]
struct PerformanceState {
    daily_date: Option<NaiveDate>,
    daily_pnl_abs: Decimal,
    lifetime_pnl_abs: Decimal,
    todays_trades: Vec<TradeRecord>,
}

pub struct Scheduler {
    config: EngineConfig,
    process_start_id: String,
    account_key: String,

    clock: MarketClock,
    market_data: Arc<MarketDataService>,
    broker: Arc<EtradeClient>,
    tokens: Arc<TokenManager>,
    etrade_env: Environment,

    selector: SymbolSelector,
    validator: CrossValidator,
    generator: SignalGenerator,
    risk: Arc<RiskManager>,
    executor: Arc<TradeExecutor<EtradeClient>>,
    monitor: Arc<PositionMonitor>,
    notifications: Arc<NotificationService>,

    features: FeatureTracker,
    metrics: Metrics,
    journal: TradeJournal,
    watchlist_store: WatchlistStore,

    daily_watchlist: RwLock<Vec<Symbol>>,
    working_set: RwLock<Vec<Symbol>>,
    reference_prices: RwLock<BTreeMap<Symbol, Decimal>>,
    performance: Mutex<PerformanceState>,
    consecutive_wins: std::sync::atomic::AtomicU32,

    alive: AtomicBool,
    watchlist_build_requested: AtomicBool,
    seen_regular_since_start: AtomicBool,

    last_token_keepalive: Mutex<Option<DateTime<Utc>>>,
    last_working_set_refresh: Mutex<Option<DateTime<Utc>>>,
    last_signal_pass: Mutex<Option<DateTime<Utc>>>,
    last_monitor_pass: Mutex<Option<DateTime<Utc>>>,
    last_watchlist_build_date: Mutex<Option<NaiveDate>>,
    last_daily_report_date: Mutex<Option<NaiveDate>>,
    final_ah_sweep_date: Mutex<Option<NaiveDate>>,
    ah_entered_at: Mutex<Option<DateTime<Utc>>>,
    last_heartbeat_cycle: Mutex<Option<u64>>,
    safe_mode_events_seen: std::sync::atomic::AtomicUsize,
    last_token_state: Mutex<Option<TokenState>>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct StatusResponse {
    pub trading_thread_active: bool,
    pub phase: String,
    pub open_positions: usize,
    pub working_set_size: usize,
    pub safe_mode: bool,
    pub cycles_run: u64,
    pub etrade_token: TokenState,
    pub metrics: MetricsSnapshot,
}

#[allow(clippy::too_many_arguments)]
impl Scheduler {
    pub fn new(
        config: EngineConfig,
        process_start_id: String,
        account_key: String,
        market_data: Arc<MarketDataService>,
        broker: Arc<EtradeClient>,
        tokens: Arc<TokenManager>,
        etrade_env: Environment,
        risk: Arc<RiskManager>,
        executor: Arc<TradeExecutor<EtradeClient>>,
        monitor: Arc<PositionMonitor>,
        notifications: Arc<NotificationService>,
        data_dir: &str,
        initial_watchlist: Vec<Symbol>,
    ) -> Self {
        Self {
            selector: SymbolSelector::new(MIN_DOLLAR_VOLUME),
            validator: CrossValidator::default(),
            generator: SignalGenerator::new(config.strategy_mode),
            risk,
            executor,
            monitor,
            notifications,
            features: FeatureTracker::new(),
            metrics: Metrics::new(),
            journal: TradeJournal::new(data_dir),
            watchlist_store: WatchlistStore::new(data_dir),
            daily_watchlist: RwLock::new(initial_watchlist),
            working_set: RwLock::new(Vec::new()),
            reference_prices: RwLock::new(BTreeMap::new()),
            performance: Mutex::new(PerformanceState::default()),
            consecutive_wins: std::sync::atomic::AtomicU32::new(0),
            alive: AtomicBool::new(false),
            watchlist_build_requested: AtomicBool::new(false),
            seen_regular_since_start: AtomicBool::new(false),
            last_token_keepalive: Mutex::new(None),
            last_working_set_refresh: Mutex::new(None),
            last_signal_pass: Mutex::new(None),
            last_monitor_pass: Mutex::new(None),
            last_watchlist_build_date: Mutex::new(None),
            last_daily_report_date: Mutex::new(None),
            final_ah_sweep_date: Mutex::new(None),
            ah_entered_at: Mutex::new(None),
            last_heartbeat_cycle: Mutex::new(None),
            safe_mode_events_seen: std::sync::atomic::AtomicUsize::new(0),
            last_token_state: Mutex::new(None),
            config,
            process_start_id,
            account_key,
            clock: MarketClock::new(),
            market_data,
            broker,
            tokens,
            etrade_env,
        }
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    pub fn request_watchlist_build(&self) {
        self.watchlist_build_requested.store(true, Ordering::SeqCst);
    }

    pub fn status(&self) -> StatusResponse {
        let now = Utc::now();
        StatusResponse {
            trading_thread_active: self.is_alive(),
            phase: self.clock.phase(now).to_string(),
            open_positions: self.monitor.open_positions_count(),
            working_set_size: self.working_set.read().expect("working set lock poisoned").len(),
            safe_mode: self.risk.is_safe_mode(),
            cycles_run: self.metrics.cycles_run(),
            etrade_token: self.tokens.state(self.etrade_env),
            metrics: self.metrics.snapshot(),
        }
    }

    /// Runs the tick loop until `shutdown` resolves, then performs the
    /// shutdown sequence: stop new passes, one final bounded monitor
    /// pass, optionally force-close everything, then return.
    pub async fn run(self: Arc<Self>, shutdown: impl std::future::Future<Output = ()>) {
        self.alive.store(true, Ordering::SeqCst);
        tokio::pin!(shutdown);
        let mut ticker = tokio::time::interval(TICK_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.clone().tick(Utc::now()).await;
                }
                _ = &mut shutdown => {
                    tracing::info!("shutdown signal received, draining scheduler");
                    break;
                }
            }
        }
        self.shutdown().await;
    }

    async fn shutdown(self: Arc<Self>) {
        self.alive.store(false, Ordering::SeqCst);
        let now = Utc::now();
        let phase = self.clock.phase(now);
        let final_pass = self.clone().monitor_pass(now, phase);
        if tokio::time::timeout(std::time::Duration::from_secs(10), final_pass).await.is_err() {
            tracing::warn!("final monitor pass on shutdown timed out");
        }
        if self.config.close_on_shutdown {
            self.force_close_all(Utc::now()).await;
        }
        tracing::info!("scheduler shutdown complete");
    }

    async fn force_close_all(&self, now: DateTime<Utc>) {
        for position in self.monitor.snapshot() {
            let quotes = self.market_data.quotes(&[position.symbol.clone()], now, Phase::AfterHours).await;
            let ref_price = quotes.quotes.get(&position.symbol).and_then(|q| q.last).unwrap_or(position.entry_price);
            match self.executor.close(&position, ExitReason::TimeExit, ref_price, &self.account_key, now).await {
                Ok((record, alert)) => {
                    self.monitor.remove(&position.symbol);
                    self.record_closed_trade(record.clone(), now);
                    self.journal.append(&record).await;
                    self.notifications.send_alert_async(Alert::Exit(alert)).await;
                }
                Err(e) => {
                    tracing::error!(symbol = %position.symbol, error = %e, "force-close on shutdown failed, position left open");
                }
            }
        }
    }

    async fn tick(self: Arc<Self>, now: DateTime<Utc>) {
        self.metrics.record_cycle();
        let phase = self.clock.phase(now);
        let et_date = now.with_timezone(&Eastern).date_naive();
        let ah_elapsed_min = self.track_after_hours_entry(now, phase);

        self.sync_token_state(now);
        Self::run_guarded("token_keepalive", self.clone().token_keepalive_pass(now, phase)).await;

        if self.watchlist_build_due(now, et_date) {
            Self::run_guarded("watchlist_build", self.clone().watchlist_build_pass(now)).await;
        }

        if self.working_set_due(now, phase) {
            Self::run_guarded("working_set_refresh", self.clone().working_set_refresh_pass(now)).await;
        }

        if phase == Phase::Regular && self.signal_pass_due(now) {
            Self::run_guarded("signal_pass", self.clone().signal_pass(now)).await;
        }

        if self.monitor_pass_due(now, phase, et_date, ah_elapsed_min) {
            Self::run_guarded("monitor_pass", self.clone().monitor_pass(now, phase)).await;
        }

        self.relay_safe_mode_events();
        self.maybe_heartbeat(now).await;
        self.maybe_daily_report(now, et_date, ah_elapsed_min).await;
    }

    /// Reads the live token state every tick and forces the executor into
    /// simulated fills for as long as it reads EXPIRED — covers both a
    /// keepalive exhausting its retries and an ordinary call hitting a 401,
    /// and a midnight-ET token-age rollover takes effect on the very next
    /// tick rather than waiting for a restart. Alerts once on the
    /// non-expired -> EXPIRED transition, not on every tick it stays expired.
    fn sync_token_state(&self, now: DateTime<Utc>) {
        let current = self.tokens.state(self.etrade_env);
        self.executor.set_forced_signal_only(current == TokenState::Expired);

        let mut last = self.last_token_state.lock().expect("token state lock poisoned");
        if current == TokenState::Expired && *last != Some(TokenState::Expired) {
            self.notifications.send_alert(Alert::TokenExpired {
                reason: format!("{:?} token state is EXPIRED", self.etrade_env),
                at: now,
            });
        }
        *last = Some(current);
    }

    /// `RiskManager` only records safe-mode transitions; turning new ones
    /// into alerts is the scheduler's job, same as every other operator
    /// notification.
    fn relay_safe_mode_events(&self) {
        let events = self.risk.safe_mode_events();
        let seen = self.safe_mode_events_seen.load(Ordering::SeqCst);
        if events.len() <= seen {
            return;
        }
        for event in &events[seen..] {
            let alert = if event.active {
                Alert::SafeModeTripped { reason: event.reason.clone(), at: event.at }
            } else {
                Alert::SafeModeCleared { reason: event.reason.clone(), at: event.at }
            };
            self.notifications.send_alert(alert);
        }
        self.safe_mode_events_seen.store(events.len(), Ordering::SeqCst);
    }

    /// Every pass runs in its own task so a panic in one cadence is
    /// contained rather than taking the whole tick loop down with it;
    /// `std::panic::catch_unwind` doesn't compose across `.await` points,
    /// so a spawned task's `JoinError` is the thing to inspect instead.
    async fn run_guarded(label: &'static str, fut: impl std::future::Future<Output = ()> + Send + 'static) {
        match tokio::spawn(fut).await {
            Ok(()) => {}
            Err(e) if e.is_panic() => tracing::error!(pass = label, "pass panicked, continuing to next cycle"),
            Err(e) => tracing::warn!(pass = label, error = %e, "pass task did not complete"),
        }
    }

    fn track_after_hours_entry(&self, now: DateTime<Utc>, phase: Phase) -> Option<i64> {
        let mut entered = self.ah_entered_at.lock().expect("ah entry lock poisoned");
        if phase != Phase::AfterHours {
            *entered = None;
            return None;
        }
        if entered.is_none() {
            *entered = Some(now);
        }
        Some((now - entered.unwrap()).num_minutes())
    }

    fn working_set_due(&self, now: DateTime<Utc>, phase: Phase) -> bool {
        let mut last = self.last_working_set_refresh.lock().expect("refresh cadence lock poisoned");
        let interval_elapsed = last
            .map(|t| now - t >= ChronoDuration::seconds(self.config.symbol_refresh_interval_sec as i64))
            .unwrap_or(true);
        let first_regular_tick = phase == Phase::Regular && !self.seen_regular_since_start.swap(true, Ordering::SeqCst);
        let due = interval_elapsed || first_regular_tick;
        if due {
            *last = Some(now);
        }
        due
    }

    fn signal_pass_due(&self, now: DateTime<Utc>) -> bool {
        let mut last = self.last_signal_pass.lock().expect("signal cadence lock poisoned");
        let due = last
            .map(|t| now - t >= ChronoDuration::seconds(self.config.watchlist_scan_interval_sec as i64))
            .unwrap_or(true);
        if due {
            *last = Some(now);
        }
        due
    }

    fn monitor_pass_due(&self, now: DateTime<Utc>, phase: Phase, et_date: NaiveDate, ah_elapsed_min: Option<i64>) -> bool {
        let mut last = self.last_monitor_pass.lock().expect("monitor cadence lock poisoned");
        let interval_elapsed = last
            .map(|t| now - t >= ChronoDuration::seconds(self.config.position_monitor_interval_sec as i64))
            .unwrap_or(true);

        let mut sweep_date = self.final_ah_sweep_date.lock().expect("ah sweep lock poisoned");
        let final_sweep_due = phase == Phase::AfterHours
            && ah_elapsed_min.unwrap_or(0) >= AFTER_HOURS_SETTLE_MINUTES
            && *sweep_date != Some(et_date);
        if final_sweep_due {
            *sweep_date = Some(et_date);
        }

        let due = interval_elapsed || final_sweep_due;
        if due {
            *last = Some(now);
        }
        due
    }

    /// The candidate-universe build that would normally seed this (screening
    /// an exchange-wide symbol list) lives outside the four broker
    /// operations this engine is scoped to, so this cadence persists
    /// whatever watchlist is already in memory rather than sourcing a new
    /// one from a market-wide scan.
    fn watchlist_build_due(&self, now: DateTime<Utc>, et_date: NaiveDate) -> bool {
        let requested = self.watchlist_build_requested.swap(false, Ordering::SeqCst);
        let mut last = self.last_watchlist_build_date.lock().expect("watchlist cadence lock poisoned");
        let scheduled = now >= market_clock::et_instant(et_date, 7, 0) && *last != Some(et_date);
        if scheduled {
            *last = Some(et_date);
        }
        scheduled || requested
    }

    async fn watchlist_build_pass(self: Arc<Self>, _now: DateTime<Utc>) {
        let watchlist = self.daily_watchlist.read().expect("watchlist lock poisoned").clone();
        tracing::info!(count = watchlist.len(), "watchlist build cycle");
        self.watchlist_store.save(&watchlist);
    }

    async fn token_keepalive_pass(self: Arc<Self>, now: DateTime<Utc>, phase: Phase) {
        if !matches!(phase, Phase::PreMarket | Phase::Regular) {
            return;
        }
        let mut last = self.last_token_keepalive.lock().expect("keepalive cadence lock poisoned");
        let due = last.map(|t| now - t >= TOKEN_KEEPALIVE_INTERVAL).unwrap_or(true);
        if !due {
            return;
        }
        *last = Some(now);
        drop(last);

        let backoff = keepalive_backoff_schedule();
        for (attempt, delay) in std::iter::once(None).chain(backoff.into_iter().map(Some)).enumerate() {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            match self.broker.get_balance(&self.account_key).await {
                Ok(_) => {
                    tracing::debug!("token keepalive succeeded");
                    return;
                }
                Err(e) => {
                    tracing::warn!(attempt, error = %e, "token keepalive attempt failed");
                }
            }
        }
        tracing::error!("token keepalive exhausted every retry; marking token expired");
        self.tokens.mark_expired(self.etrade_env);
    }

    async fn working_set_refresh_pass(self: Arc<Self>, now: DateTime<Utc>) {
        let watchlist = self.daily_watchlist.read().expect("watchlist lock poisoned").clone();
        if watchlist.is_empty() {
            return;
        }
        let quotes_result = self.market_data.quotes_bypass_cache(&watchlist, now).await;
        self.features.observe_all(&quotes_result.quotes, now);

        let aux: BTreeMap<Symbol, symbol_selector::AuxiliaryFeatures> =
            watchlist.iter().map(|s| (s.clone(), self.features.auxiliary(s))).collect();
        let candidates = candidates_from_quotes(&quotes_result.quotes, &aux);
        let outcome = self.selector.refresh(&candidates, watchlist.len(), self.config.working_set_size);

        if outcome.scored_count < watchlist.len() / 2 {
            tracing::warn!(
                scored = outcome.scored_count,
                total = watchlist.len(),
                "fewer than half the watchlist scored this refresh; keeping previous working set"
            );
            return;
        }

        {
            let mut refs = self.reference_prices.write().expect("reference price lock poisoned");
            refs.clear();
            for symbol in &outcome.working_set {
                if let Some(last) = quotes_result.quotes.get(symbol).and_then(|q| q.last) {
                    refs.insert(symbol.clone(), last);
                }
            }
        }

        tracing::info!(size = outcome.working_set.len(), rejected_for_data = outcome.rejected_for_data, "working set refreshed");
        *self.working_set.write().expect("working set lock poisoned") = outcome.working_set;
    }

    async fn signal_pass(self: Arc<Self>, now: DateTime<Utc>) {
        let phase = self.clock.phase(now);
        let working_set = self.working_set.read().expect("working set lock poisoned").clone();
        if working_set.is_empty() {
            return;
        }

        let quotes_result = self.market_data.quotes(&working_set, now, phase).await;
        self.features.observe_all(&quotes_result.quotes, now);
        if !quotes_result.unavailable.is_empty() {
            tracing::debug!(count = quotes_result.unavailable.len(), "symbols unavailable this signal pass");
        }

        let historical: BTreeMap<Symbol, strategy_validator::HistoricalFeatures> =
            working_set.iter().map(|s| (s.clone(), self.features.historical(s))).collect();

        let agreements = self.validator.evaluate(&working_set, &quotes_result.quotes, &historical);
        let reference_prices = self.reference_prices.read().expect("reference price lock poisoned").clone();

        for (symbol, agreement) in &agreements {
            let Some(quote) = quotes_result.quotes.get(symbol) else { continue };
            let features = &historical[symbol];
            let reference_entry_price = reference_prices.get(symbol).copied().or(quote.last).unwrap_or_default();
            let candidate = SignalCandidate {
                symbol: symbol.clone(),
                quote,
                agreement,
                features,
                reference_entry_price,
            };
            match self.generator.generate(&candidate) {
                Ok(signal) => {
                    self.metrics.record_signal_generated();
                    self.handle_signal(signal, &quotes_result.quotes, now).await;
                }
                Err(reason) => {
                    tracing::debug!(%symbol, ?reason, "no signal this pass");
                }
            }
        }
    }

    async fn handle_signal(&self, signal: Signal, quotes: &BTreeMap<Symbol, engine_types::Quote>, now: DateTime<Utc>) {
        let open_positions = self.monitor.snapshot();
        if open_positions.iter().any(|p| p.symbol == signal.symbol) {
            tracing::debug!(symbol = %signal.symbol, "signal skipped: position already open for this symbol");
            return;
        }

        let snapshot = match self.market_data.account_snapshot(&open_positions, quotes, now).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                tracing::warn!(symbol = %signal.symbol, error = %e, "account snapshot unavailable, skipping signal");
                return;
            }
        };

        let daily_realized_loss_pct = self.daily_realized_loss_pct(snapshot.total_account_value);
        let lifetime_realized_return_pct = self.lifetime_realized_return_pct(snapshot.total_account_value);
        let drawdown_vs_peak_pct = snapshot.drawdown_vs_peak_pct().to_f64().unwrap_or(0.0);

        let ctx = RiskContext {
            signal: signal.clone(),
            available_cash: snapshot.available_cash,
            open_managed_value: self.monitor.open_managed_value(),
            open_positions_count: open_positions.len() as u32,
            daily_realized_loss_pct,
            drawdown_vs_peak_pct,
            lifetime_realized_return_pct,
            consecutive_winning_trades: self.consecutive_wins.load(Ordering::SeqCst),
        };

        match self.risk.evaluate(&ctx, now) {
            RiskDecision::Approved { quantity, stop_price, take_profit_price, .. } => {
                self.metrics.record_signal_approved();
                let request = OpenRequest {
                    signal: &signal,
                    quantity,
                    stop_price,
                    take_profit_price,
                    reference_price: signal.entry_reference_price,
                    account_key: self.account_key.clone(),
                };
                match self.executor.open(request, now).await {
                    Ok((position, alert)) => {
                        self.monitor.register(position);
                        self.metrics.record_trade_executed();
                        self.notifications.send_alert(Alert::Entry(alert));
                    }
                    Err(e) => {
                        self.metrics.record_trade_failed();
                        tracing::warn!(symbol = %signal.symbol, error = %e, "order placement failed");
                        self.notifications.send_alert(Alert::OrderRejected {
                            symbol: signal.symbol.clone(),
                            reason: e.to_string(),
                            at: now,
                        });
                    }
                }
            }
            RiskDecision::Rejected { reason } => {
                self.metrics.record_signal_filtered();
                tracing::debug!(symbol = %signal.symbol, ?reason, "signal rejected by risk manager");
            }
        }
    }

    async fn monitor_pass(self: Arc<Self>, now: DateTime<Utc>, phase: Phase) {
        let symbols = self.monitor.symbols();
        if symbols.is_empty() {
            return;
        }
        let quotes_result = self.market_data.quotes(&symbols, now, phase).await;
        self.features.observe_all(&quotes_result.quotes, now);

        let tick_features: BTreeMap<Symbol, position_monitor::TickFeatures> = symbols
            .iter()
            .map(|s| {
                let volume = quotes_result.quotes.get(s).map(|q| q.volume).unwrap_or(0);
                (s.clone(), self.features.tick_features(s, volume))
            })
            .collect();

        let minutes_to_close = if phase == Phase::Regular {
            let (_, close_at) = self.clock.next_transition(now);
            Some((close_at - now).num_minutes())
        } else {
            None
        };

        let closed = self.monitor.tick(&quotes_result.quotes, &tick_features, now, minutes_to_close, &self.config);
        for closed_position in closed {
            self.handle_closed_position(closed_position, now).await;
        }
    }

    /// Close order fails once: wait 5s and try exactly once more before
    /// accepting the failure, instead of leaving the retry to whatever the
    /// next coarse monitor pass happens to be.
    async fn try_close_with_retry(
        &self,
        position: &Position,
        reason: ExitReason,
        price: Decimal,
        now: DateTime<Utc>,
    ) -> Result<(TradeRecord, ExitAlert), EngineError> {
        match self.executor.close(position, reason, price, &self.account_key, now).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                tracing::warn!(symbol = %position.symbol, error = %e, "close failed, retrying in 5s");
                tokio::time::sleep(CLOSE_RETRY_DELAY).await;
                self.executor.close(position, reason, price, &self.account_key, Utc::now()).await
            }
        }
    }

    /// Failed-close handling: a close that still fails after the dedicated
    /// 5s retry above retains the position as open (via `reopen`, flagged)
    /// for the next monitor pass and pages the operator immediately.
    async fn handle_closed_position(&self, closed: position_monitor::ClosedPosition, now: DateTime<Utc>) {
        let position_monitor::ClosedPosition { position, decision } = closed;
        match self.try_close_with_retry(&position, decision.reason, decision.price, now).await {
            Ok((record, alert)) => {
                self.monitor.remove(&position.symbol);
                self.record_closed_trade(record.clone(), now);
                self.metrics.record_closed_trade(record.pnl_abs.to_f64().unwrap_or(0.0));
                self.journal.append(&record).await;
                self.notifications.send_alert(Alert::Exit(alert));
            }
            Err(e) => {
                tracing::warn!(symbol = %position.symbol, error = %e, "close failed after retry, retaining position as open");
                self.notifications.send_alert(Alert::CloseFailed { symbol: position.symbol.clone(), at: now });
                self.monitor.reopen(position);
            }
        }
    }

    fn record_closed_trade(&self, record: TradeRecord, now: DateTime<Utc>) {
        let et_date = now.with_timezone(&Eastern).date_naive();
        let mut state = self.performance.lock().expect("performance lock poisoned");
        if state.daily_date != Some(et_date) {
            state.daily_date = Some(et_date);
            state.daily_pnl_abs = Decimal::ZERO;
            state.todays_trades.clear();
        }
        state.daily_pnl_abs += record.pnl_abs;
        state.lifetime_pnl_abs += record.pnl_abs;
        let is_win = record.is_win();
        state.todays_trades.push(record);
        drop(state);
        if is_win {
            self.consecutive_wins.fetch_add(1, Ordering::SeqCst);
        } else {
            self.consecutive_wins.store(0, Ordering::SeqCst);
        }
    }

    fn daily_realized_loss_pct(&self, total_account_value: Decimal) -> f64 {
        let state = self.performance.lock().expect("performance lock poisoned");
        if state.daily_pnl_abs >= Decimal::ZERO || total_account_value <= Decimal::ZERO {
            return 0.0;
        }
        (-state.daily_pnl_abs / total_account_value * Decimal::from(100)).to_f64().unwrap_or(0.0)
    }

    /// Approximates the starting-capital denominator with the current
    /// account value: no persisted starting balance survives a restart, the
    /// same boundary that keeps `/status`'s metrics process-scoped.
    fn lifetime_realized_return_pct(&self, total_account_value: Decimal) -> f64 {
        let state = self.performance.lock().expect("performance lock poisoned");
        if total_account_value <= Decimal::ZERO {
            return 0.0;
        }
        (state.lifetime_pnl_abs / total_account_value * Decimal::from(100)).to_f64().unwrap_or(0.0)
    }

    async fn maybe_heartbeat(&self, now: DateTime<Utc>) {
        if self.config.heartbeat_interval_cycles == 0 {
            return;
        }
        let cycles = self.metrics.cycles_run();
        if cycles % self.config.heartbeat_interval_cycles as u64 != 0 {
            return;
        }
        let mut last = self.last_heartbeat_cycle.lock().expect("heartbeat lock poisoned");
        if *last == Some(cycles) {
            return;
        }
        *last = Some(cycles);
        drop(last);
        let heartbeat = Heartbeat {
            cycle: cycles,
            open_positions: self.monitor.open_positions_count() as u32,
            safe_mode: self.risk.is_safe_mode(),
            at: now,
        };
        self.notifications.send_alert(Alert::Heartbeat(heartbeat));
    }

    async fn maybe_daily_report(&self, now: DateTime<Utc>, et_date: NaiveDate, ah_elapsed_min: Option<i64>) {
        if ah_elapsed_min.unwrap_or(-1) < AFTER_HOURS_SETTLE_MINUTES {
            return;
        }
        {
            let mut last = self.last_daily_report_date.lock().expect("daily report lock poisoned");
            if *last == Some(et_date) {
                return;
            }
            *last = Some(et_date);
        }
        let report = self.build_daily_report(et_date);
        self.notifications.send_alert(Alert::DailyReport(report));
        let _ = now;
    }

    fn build_daily_report(&self, date: NaiveDate) -> DailyReport {
        let state = self.performance.lock().expect("performance lock poisoned");
        let trades = &state.todays_trades;
        let wins = trades.iter().filter(|t| t.is_win()).count() as u32;
        let losses = trades.len() as u32 - wins;
        let realized_pnl_abs: Decimal = trades.iter().map(|t| t.pnl_abs).sum();
        let realized_pnl_pct = if trades.is_empty() {
            0.0
        } else {
            trades.iter().map(|t| t.pnl_pct.to_f64().unwrap_or(0.0)).sum::<f64>() / trades.len() as f64
        };
        DailyReport { date, trades_closed: trades.len() as u32, wins, losses, realized_pnl_abs, realized_pnl_pct }
    }
}
