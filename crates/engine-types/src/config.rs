use crate::signal::{EtradeMode, StrategyMode, SystemMode};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Flat set of named options loaded once at startup. The struct lives
/// here so every component crate can depend on its shape without depending on
/// the env/file loading machinery, which lives in the `trading-engine` binary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub strategy_mode: StrategyMode,
    pub system_mode: SystemMode,
    pub etrade_mode: EtradeMode,

    pub base_position_pct: f64,
    pub max_position_pct: f64,
    pub min_position_value_usd: f64,
    pub trading_cash_pct: f64,
    pub cash_reserve_pct: f64,
    pub max_positions: u32,
    pub max_daily_loss_pct: f64,
    pub max_drawdown_pct: f64,

    pub ultra_high_conf_threshold: f64,
    pub ultra_high_conf_mult: f64,
    pub high_conf_threshold: f64,
    pub high_conf_mult: f64,
    pub medium_conf_threshold: f64,
    pub medium_conf_mult: f64,

    pub agreement_medium_bonus: f64,
    pub agreement_high_bonus: f64,
    pub agreement_max_bonus: f64,

    pub profit_scaling_200_mult: f64,
    pub profit_scaling_100_mult: f64,
    pub profit_scaling_50_mult: f64,
    pub profit_scaling_25_mult: f64,

    /// Reserved win-streak multiplier hook; identity in v1.
    pub win_streak_mult: f64,

    pub breakeven_activation_pct: f64,
    pub breakeven_offset_pct: f64,
    pub trailing_activation_pct: f64,
    pub trailing_distance_pct: f64,
    pub stop_loss_pct: f64,
    pub take_profit_pct: f64,

    pub watchlist_scan_interval_sec: u64,
    pub position_monitor_interval_sec: u64,
    pub symbol_refresh_interval_sec: u64,
    pub quote_batch_size: usize,
    pub daily_api_call_budget: u64,
    pub quote_cache_ttl_intraday_sec: i64,
    pub quote_cache_ttl_idle_sec: i64,

    pub working_set_size: usize,

    pub position_cooldown_minutes: i64,
    pub max_hold_hours: i64,
    pub force_after_hours: bool,
    pub close_on_shutdown: bool,

    pub heartbeat_interval_cycles: u32,
    pub alert_throttle_per_minute: u32,

    pub http_bind_addr: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            strategy_mode: StrategyMode::Standard,
            system_mode: SystemMode::SignalOnly,
            etrade_mode: EtradeMode::Sandbox,

            base_position_pct: 10.0,
            max_position_pct: 35.0,
            min_position_value_usd: 50.0,
            trading_cash_pct: 80.0,
            cash_reserve_pct: 20.0,
            max_positions: 20,
            max_daily_loss_pct: 5.0,
            max_drawdown_pct: 10.0,

            ultra_high_conf_threshold: 0.95,
            ultra_high_conf_mult: 2.5,
            high_conf_threshold: 0.90,
            high_conf_mult: 2.0,
            medium_conf_threshold: 0.85,
            medium_conf_mult: 1.0,

            agreement_medium_bonus: 0.25,
            agreement_high_bonus: 0.50,
            agreement_max_bonus: 1.00,

            profit_scaling_200_mult: 1.8,
            profit_scaling_100_mult: 1.4,
            profit_scaling_50_mult: 1.2,
            profit_scaling_25_mult: 1.1,

            win_streak_mult: 1.0,

            breakeven_activation_pct: 0.5,
            breakeven_offset_pct: 0.2,
            trailing_activation_pct: 0.8,
            trailing_distance_pct: 0.8,
            stop_loss_pct: 3.0,
            take_profit_pct: 5.0,

            watchlist_scan_interval_sec: 120,
            position_monitor_interval_sec: 60,
            symbol_refresh_interval_sec: 3600,
            quote_batch_size: 25,
            daily_api_call_budget: 10_000,
            quote_cache_ttl_intraday_sec: 30,
            quote_cache_ttl_idle_sec: 300,

            working_set_size: 50,

            position_cooldown_minutes: 15,
            max_hold_hours: 4,
            force_after_hours: false,
            close_on_shutdown: false,

            heartbeat_interval_cycles: 30,
            alert_throttle_per_minute: 30,

            http_bind_addr: "0.0.0.0:8080".to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cash_reserve_pct ({cash_reserve_pct}) must equal 100 - trading_cash_pct ({trading_cash_pct})")]
    CashSplitMismatch {
        cash_reserve_pct: f64,
        trading_cash_pct: f64,
    },
    #[error("max_position_pct ({max}) must be >= base_position_pct ({base})")]
    PositionCapBelowBase { max: f64, base: f64 },
    #[error("{field} must be within [0, 1], got {value}")]
    OutOfUnitRange { field: &'static str, value: f64 },
    #[error("quote_batch_size must be > 0")]
    ZeroBatchSize,
}

impl EngineConfig {
    /// Validation gate (`ConfigError` -> caller exits with code 2).
    pub fn validate(&self) -> Result<(), ConfigError> {
        if (self.cash_reserve_pct - (100.0 - self.trading_cash_pct)).abs() > 1e-6 {
            return Err(ConfigError::CashSplitMismatch {
                cash_reserve_pct: self.cash_reserve_pct,
                trading_cash_pct: self.trading_cash_pct,
            });
        }
        if self.max_position_pct < self.base_position_pct {
            return Err(ConfigError::PositionCapBelowBase {
                max: self.max_position_pct,
                base: self.base_position_pct,
            });
        }
        for (field, value) in [
            ("ultra_high_conf_threshold", self.ultra_high_conf_threshold),
            ("high_conf_threshold", self.high_conf_threshold),
            ("medium_conf_threshold", self.medium_conf_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::OutOfUnitRange { field, value });
            }
        }
        if self.quote_batch_size == 0 {
            return Err(ConfigError::ZeroBatchSize);
        }
        Ok(())
    }

    pub fn min_signal_confidence(&self) -> f64 {
        self.strategy_mode.min_signal_confidence()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_mismatched_cash_split() {
        let mut cfg = EngineConfig::default();
        cfg.cash_reserve_pct = 10.0;
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::CashSplitMismatch { .. })
        ));
    }

    #[test]
    fn rejects_position_cap_below_base() {
        let mut cfg = EngineConfig::default();
        cfg.max_position_pct = 5.0;
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::PositionCapBelowBase { .. })
        ));
    }
}
