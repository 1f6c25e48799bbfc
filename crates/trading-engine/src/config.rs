use std::env;

use anyhow::{Context, Result};
use engine_types::config::EngineConfig;
use engine_types::signal::{EtradeMode, StrategyMode, SystemMode};

/// Everything the binary needs beyond the `EngineConfig` shape components
/// depend on: broker credentials, the data directory, and the HTTP bind
/// address override. `EngineConfig` itself stays serializable and free of
/// env/file concerns so every crate can depend on its shape.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub engine: EngineConfig,
    pub etrade_consumer_key: String,
    pub etrade_consumer_secret: String,
    pub etrade_access_token: String,
    pub etrade_access_token_secret: String,
    pub data_dir: String,
}

fn env_f64(key: &str, default: f64) -> Result<f64> {
    match env::var(key) {
        Ok(v) => v.parse().with_context(|| format!("{key} is not a valid number")),
        Err(_) => Ok(default),
    }
}

fn env_u32(key: &str, default: u32) -> Result<u32> {
    match env::var(key) {
        Ok(v) => v.parse().with_context(|| format!("{key} is not a valid integer")),
        Err(_) => Ok(default),
    }
}

fn env_u64(key: &str, default: u64) -> Result<u64> {
    match env::var(key) {
        Ok(v) => v.parse().with_context(|| format!("{key} is not a valid integer")),
        Err(_) => Ok(default),
    }
}

fn env_i64(key: &str, default: i64) -> Result<i64> {
    match env::var(key) {
        Ok(v) => v.parse().with_context(|| format!("{key} is not a valid integer")),
        Err(_) => Ok(default),
    }
}

fn env_usize(key: &str, default: usize) -> Result<usize> {
    match env::var(key) {
        Ok(v) => v.parse().with_context(|| format!("{key} is not a valid integer")),
        Err(_) => Ok(default),
    }
}

fn env_bool(key: &str, default: bool) -> bool {
    env::var(key).ok().map(|v| v.eq_ignore_ascii_case("true") || v == "1").unwrap_or(default)
}

/// Loads `EngineConfig` plus the broker/filesystem settings it doesn't own,
/// following the flat `env::var("X").unwrap_or_else(..).parse()?` idiom used
/// throughout the corpus's agent config loader. Defaults are the ones baked
/// into `EngineConfig::default()`.
pub fn load() -> Result<RuntimeConfig> {
    let defaults = EngineConfig::default();

    let strategy_mode = match env::var("STRATEGY_MODE").unwrap_or_default().to_lowercase().as_str() {
        "advanced" => StrategyMode::Advanced,
        "quantum" => StrategyMode::Quantum,
        _ => StrategyMode::Standard,
    };
    let system_mode = match env::var("SYSTEM_MODE").unwrap_or_default().to_lowercase().as_str() {
        "full_trading" | "live" => SystemMode::FullTrading,
        _ => SystemMode::SignalOnly,
    };
    let etrade_mode = match env::var("ETRADE_MODE").unwrap_or_default().to_lowercase().as_str() {
        "live" => EtradeMode::Live,
        _ => EtradeMode::Sandbox,
    };

    let engine = EngineConfig {
        strategy_mode,
        system_mode,
        etrade_mode,

        base_position_pct: env_f64("BASE_POSITION_PCT", defaults.base_position_pct)?,
        max_position_pct: env_f64("MAX_POSITION_PCT", defaults.max_position_pct)?,
        min_position_value_usd: env_f64("MIN_POSITION_VALUE_USD", defaults.min_position_value_usd)?,
        trading_cash_pct: env_f64("TRADING_CASH_PCT", defaults.trading_cash_pct)?,
        cash_reserve_pct: env_f64("CASH_RESERVE_PCT", defaults.cash_reserve_pct)?,
        max_positions: env_u32("MAX_POSITIONS", defaults.max_positions)?,
        max_daily_loss_pct: env_f64("MAX_DAILY_LOSS_PCT", defaults.max_daily_loss_pct)?,
        max_drawdown_pct: env_f64("MAX_DRAWDOWN_PCT", defaults.max_drawdown_pct)?,

        ultra_high_conf_threshold: env_f64("ULTRA_HIGH_CONF_THRESHOLD", defaults.ultra_high_conf_threshold)?,
        ultra_high_conf_mult: env_f64("ULTRA_HIGH_CONF_MULT", defaults.ultra_high_conf_mult)?,
        high_conf_threshold: env_f64("HIGH_CONF_THRESHOLD", defaults.high_conf_threshold)?,
        high_conf_mult: env_f64("HIGH_CONF_MULT", defaults.high_conf_mult)?,
        medium_conf_threshold: env_f64("MEDIUM_CONF_THRESHOLD", defaults.medium_conf_threshold)?,
        medium_conf_mult: env_f64("MEDIUM_CONF_MULT", defaults.medium_conf_mult)?,

        agreement_medium_bonus: env_f64("AGREEMENT_MEDIUM_BONUS", defaults.agreement_medium_bonus)?,
        agreement_high_bonus: env_f64("AGREEMENT_HIGH_BONUS", defaults.agreement_high_bonus)?,
        agreement_max_bonus: env_f64("AGREEMENT_MAX_BONUS", defaults.agreement_max_bonus)?,

        profit_scaling_200_mult: env_f64("PROFIT_SCALING_200_MULT", defaults.profit_scaling_200_mult)?,
        profit_scaling_100_mult: env_f64("PROFIT_SCALING_100_MULT", defaults.profit_scaling_100_mult)?,
        profit_scaling_50_mult: env_f64("PROFIT_SCALING_50_MULT", defaults.profit_scaling_50_mult)?,
        profit_scaling_25_mult: env_f64("PROFIT_SCALING_25_MULT", defaults.profit_scaling_25_mult)?,

        win_streak_mult: env_f64("WIN_STREAK_MULT", defaults.win_streak_mult)?,

        breakeven_activation_pct: env_f64("BREAKEVEN_ACTIVATION_PCT", defaults.breakeven_activation_pct)?,
        breakeven_offset_pct: env_f64("BREAKEVEN_OFFSET_PCT", defaults.breakeven_offset_pct)?,
        trailing_activation_pct: env_f64("TRAILING_ACTIVATION_PCT", defaults.trailing_activation_pct)?,
        trailing_distance_pct: env_f64("TRAILING_DISTANCE_PCT", defaults.trailing_distance_pct)?,
        stop_loss_pct: env_f64("STOP_LOSS_PCT", defaults.stop_loss_pct)?,
        take_profit_pct: env_f64("TAKE_PROFIT_PCT", defaults.take_profit_pct)?,

        watchlist_scan_interval_sec: env_u64("WATCHLIST_SCAN_INTERVAL_SEC", defaults.watchlist_scan_interval_sec)?,
        position_monitor_interval_sec: env_u64("POSITION_MONITOR_INTERVAL_SEC", defaults.position_monitor_interval_sec)?,
        symbol_refresh_interval_sec: env_u64("SYMBOL_REFRESH_INTERVAL_SEC", defaults.symbol_refresh_interval_sec)?,
        quote_batch_size: env_usize("QUOTE_BATCH_SIZE", defaults.quote_batch_size)?,
        daily_api_call_budget: env_u64("DAILY_API_CALL_BUDGET", defaults.daily_api_call_budget)?,
        quote_cache_ttl_intraday_sec: env_i64("QUOTE_CACHE_TTL_INTRADAY_SEC", defaults.quote_cache_ttl_intraday_sec)?,
        quote_cache_ttl_idle_sec: env_i64("QUOTE_CACHE_TTL_IDLE_SEC", defaults.quote_cache_ttl_idle_sec)?,

        working_set_size: env_usize("WORKING_SET_SIZE", defaults.working_set_size)?,

        position_cooldown_minutes: env_i64("POSITION_COOLDOWN_MINUTES", defaults.position_cooldown_minutes)?,
        max_hold_hours: env_i64("MAX_HOLD_HOURS", defaults.max_hold_hours)?,
        force_after_hours: env_bool("FORCE_AFTER_HOURS", defaults.force_after_hours),
        close_on_shutdown: env_bool("CLOSE_ON_SHUTDOWN", defaults.close_on_shutdown),

        heartbeat_interval_cycles: env_u32("HEARTBEAT_INTERVAL_CYCLES", defaults.heartbeat_interval_cycles)?,
        alert_throttle_per_minute: env_u32("ALERT_THROTTLE_PER_MINUTE", defaults.alert_throttle_per_minute)?,

        http_bind_addr: env::var("HTTP_BIND_ADDR").unwrap_or(defaults.http_bind_addr),
    };

    Ok(RuntimeConfig {
        engine,
        etrade_consumer_key: env::var("ETRADE_CONSUMER_KEY").unwrap_or_default(),
        etrade_consumer_secret: env::var("ETRADE_CONSUMER_SECRET").unwrap_or_default(),
        etrade_access_token: env::var("ETRADE_ACCESS_TOKEN").unwrap_or_default(),
        etrade_access_token_secret: env::var("ETRADE_ACCESS_TOKEN_SECRET").unwrap_or_default(),
        data_dir: env::var("DATA_DIR").unwrap_or_else(|_| "./data".to_string()),
    })
}
