use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// In-process telemetry accumulator, exposed read-only via `/status`.
/// Not persisted across restarts — counters reset on every process start,
/// same as the corpus's cycle-scoped metrics struct, but built from atomics
/// since `/status` reads it concurrently with the scheduler's own writes.
pub struct Metrics {
    cycles_run: AtomicU64,
    signals_generated: AtomicU64,
    signals_filtered: AtomicU64,
    signals_approved: AtomicU64,
    trades_executed: AtomicU64,
    trades_failed: AtomicU64,
    wins: AtomicU64,
    losses: AtomicU64,
    alerts_dropped: AtomicU64,
    recent_trades: Mutex<VecDeque<f64>>,
}

const RECENT_WINDOW: usize = 20;

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            cycles_run: AtomicU64::new(0),
            signals_generated: AtomicU64::new(0),
            signals_filtered: AtomicU64::new(0),
            signals_approved: AtomicU64::new(0),
            trades_executed: AtomicU64::new(0),
            trades_failed: AtomicU64::new(0),
            wins: AtomicU64::new(0),
            losses: AtomicU64::new(0),
            alerts_dropped: AtomicU64::new(0),
            recent_trades: Mutex::new(VecDeque::with_capacity(RECENT_WINDOW)),
        }
    }

    pub fn record_cycle(&self) {
        self.cycles_run.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_signal_generated(&self) {
        self.signals_generated.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_signal_filtered(&self) {
        self.signals_filtered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_signal_approved(&self) {
        self.signals_approved.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_trade_executed(&self) {
        self.trades_executed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_trade_failed(&self) {
        self.trades_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_closed_trade(&self, pnl_abs: f64) {
        if pnl_abs > 0.0 {
            self.wins.fetch_add(1, Ordering::Relaxed);
        } else {
            self.losses.fetch_add(1, Ordering::Relaxed);
        }
        let mut recent = self.recent_trades.lock().expect("recent trades lock poisoned");
        if recent.len() == RECENT_WINDOW {
            recent.pop_front();
        }
        recent.push_back(pnl_abs);
    }

    pub fn record_alerts_dropped(&self, count: u64) {
        self.alerts_dropped.store(count, Ordering::Relaxed);
    }

    pub fn cycles_run(&self) -> u64 {
        self.cycles_run.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let recent = self.recent_trades.lock().expect("recent trades lock poisoned");
        let recent_win_rate = if recent.is_empty() {
            None
        } else {
            Some(recent.iter().filter(|pnl| **pnl > 0.0).count() as f64 / recent.len() as f64)
        };
        MetricsSnapshot {
            cycles_run: self.cycles_run.load(Ordering::Relaxed),
            signals_generated: self.signals_generated.load(Ordering::Relaxed),
            signals_filtered: self.signals_filtered.load(Ordering::Relaxed),
            signals_approved: self.signals_approved.load(Ordering::Relaxed),
            trades_executed: self.trades_executed.load(Ordering::Relaxed),
            trades_failed: self.trades_failed.load(Ordering::Relaxed),
            wins: self.wins.load(Ordering::Relaxed),
            losses: self.losses.load(Ordering::Relaxed),
            alerts_dropped: self.alerts_dropped.load(Ordering::Relaxed),
            recent_win_rate,
        }
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct MetricsSnapshot {
    pub cycles_run: u64,
    pub signals_generated: u64,
    pub signals_filtered: u64,
    pub signals_approved: u64,
    pub trades_executed: u64,
    pub trades_failed: u64,
    pub wins: u64,
    pub losses: u64,
    pub alerts_dropped: u64,
    pub recent_win_rate: Option<f64>,
}
