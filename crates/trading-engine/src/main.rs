use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use tokio::signal::unix::SignalKind;

use engine_types::{EtradeMode, SystemMode};
use notification_service::{NotificationConfig, NotificationService};
use oauth_broker::client::etrade::EtradeClient;
use oauth_broker::tokens::{Environment, TokenManager, TokenSet};
use oauth_broker::BrokerClient;
use position_monitor::PositionMonitor;
use risk_manager::RiskManager;
use trade_executor::TradeExecutor;

mod config;
mod features;
mod http;
mod journal;
mod metrics;
mod scheduler;
mod watchlist;

use scheduler::Scheduler;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    std::panic::set_hook(Box::new(|info| {
        eprintln!("PANIC: {info}");
        tracing::error!("PANIC: {info}");
    }));

    tracing::info!("starting trading engine");

    let runtime = match config::load() {
        Ok(runtime) => runtime,
        Err(e) => {
            tracing::error!(error = %e, "configuration failed to load");
            std::process::exit(2);
        }
    };
    if let Err(e) = runtime.engine.validate() {
        tracing::error!(error = %e, "configuration failed validation");
        std::process::exit(2);
    }
    tracing::info!(
        strategy_mode = ?runtime.engine.strategy_mode,
        system_mode = ?runtime.engine.system_mode,
        etrade_mode = ?runtime.engine.etrade_mode,
        "configuration loaded"
    );

    let etrade_env = match runtime.engine.etrade_mode {
        EtradeMode::Live => Environment::Live,
        EtradeMode::Sandbox => Environment::Sandbox,
    };

    if matches!(runtime.engine.system_mode, SystemMode::FullTrading) && matches!(etrade_env, Environment::Live) {
        let approved = std::env::var("LIVE_TRADING_APPROVED").map(|v| v.eq_ignore_ascii_case("yes")).unwrap_or(false);
        if !approved {
            tracing::error!(
                "ETRADE_MODE=live with SYSTEM_MODE=full_trading requires LIVE_TRADING_APPROVED=yes to start"
            );
            std::process::exit(1);
        }
        tracing::warn!("LIVE TRADING MODE — real orders will be placed");
    }

    let process_start_id = uuid::Uuid::new_v4().to_string();

    let tokens = Arc::new(TokenManager::new());
    let now = Utc::now();
    if !runtime.etrade_consumer_key.is_empty() {
        tokens.load_at_startup(
            etrade_env,
            Some(TokenSet {
                consumer_key: runtime.etrade_consumer_key.clone(),
                consumer_secret: runtime.etrade_consumer_secret.clone(),
                access_token: runtime.etrade_access_token.clone(),
                access_token_secret: runtime.etrade_access_token_secret.clone(),
                request_token: None,
                issued_at: now,
                last_used_at: now,
            }),
            now,
        );
    }

    let broker = Arc::new(EtradeClient::new(
        EtradeClient::base_url_for(&runtime.engine),
        tokens.clone(),
        etrade_env,
        matches!(etrade_env, Environment::Sandbox),
    ));

    let broker_dyn: Arc<dyn BrokerClient> = broker.clone();
    let market_data = Arc::new(market_data::MarketDataService::new(
        broker_dyn,
        runtime.engine.daily_api_call_budget,
        runtime.engine.quote_batch_size,
        runtime.engine.quote_cache_ttl_intraday_sec,
        runtime.engine.quote_cache_ttl_idle_sec,
        now,
    ));

    let account_key = match market_data.resolve_account_key().await {
        Ok(key) => {
            tracing::info!("startup check: broker account resolved");
            key
        }
        Err(e) => {
            tracing::error!(error = %e, "startup check: unable to resolve a brokerage account, exiting");
            std::process::exit(1);
        }
    };

    match broker.get_balance(&account_key).await {
        Ok(balance) => tracing::info!(cash = %balance.available_cash, "startup check: broker balance OK"),
        Err(e) => tracing::warn!(error = %e, "startup check: balance probe failed, continuing anyway"),
    }

    let risk = Arc::new(RiskManager::new(runtime.engine.clone()));
    let executor = Arc::new(TradeExecutor::new(broker.clone(), runtime.engine.system_mode, process_start_id.clone()));
    if tokens.state(etrade_env) == oauth_broker::tokens::TokenState::Expired {
        tracing::warn!(?etrade_env, "token state is EXPIRED at startup, forcing simulated mode");
        executor.set_forced_signal_only(true);
    }
    let monitor = Arc::new(PositionMonitor::new());
    let notification_config = NotificationConfig::from_env();
    let notifications = Arc::new(NotificationService::new(&notification_config));

    let watchlist_store = watchlist::WatchlistStore::new(&runtime.data_dir);
    let initial_watchlist = watchlist_store.load();
    tracing::info!(count = initial_watchlist.len(), "loaded persisted watchlist");

    let scheduler = Arc::new(Scheduler::new(
        runtime.engine.clone(),
        process_start_id,
        account_key,
        market_data,
        broker,
        tokens,
        etrade_env,
        risk,
        executor,
        monitor,
        notifications.clone(),
        &runtime.data_dir,
        initial_watchlist,
    ));

    notifications.send_alert_async(engine_types::Alert::Heartbeat(engine_types::Heartbeat {
        cycle: 0,
        open_positions: 0,
        safe_mode: false,
        at: now,
    })).await;

    let bind_addr = runtime.engine.http_bind_addr.clone();
    let listener = tokio::net::TcpListener::bind(&bind_addr).await.with_context(|| format!("binding HTTP surface at {bind_addr}"))?;
    tracing::info!(addr = %bind_addr, "HTTP surface listening");
    let app = http::router(scheduler.clone());
    let http_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "HTTP server exited with an error");
        }
    });

    let mut sigterm = tokio::signal::unix::signal(SignalKind::terminate())?;
    let shutdown = async {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("received SIGINT");
            }
            _ = sigterm.recv() => {
                tracing::info!("received SIGTERM");
            }
        }
    };

    scheduler.run(shutdown).await;
    http_handle.abort();

    tracing::info!("trading engine stopped");
    Ok(())
}

fn init_tracing() {
    let json_logging = std::env::var("RUST_LOG_FORMAT").map(|v| v.eq_ignore_ascii_case("json")).unwrap_or(false);
    let filter = || {
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
    };
    if json_logging {
        tracing_subscriber::fmt().json().with_env_filter(filter()).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter()).init();
    }
}
