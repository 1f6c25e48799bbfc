mod smtp;
mod templates;

pub use smtp::SmtpNotifier;
pub use templates::EmailTemplate;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use engine_types::Alert;

/// An outbound alert paired with the title/message derived from it, the
/// shape every `NotificationChannel` actually renders.
#[derive(Debug, Clone)]
pub struct AlertEnvelope {
    pub alert: Alert,
    pub timestamp: DateTime<Utc>,
    pub title: String,
    pub message: String,
}

impl AlertEnvelope {
    pub fn new(alert: Alert) -> Self {
        let (title, message) = describe(&alert);
        Self { alert, timestamp: Utc::now(), title, message }
    }
}

fn describe(alert: &Alert) -> (String, String) {
    match alert {
        Alert::Entry(e) => {
            let kind = if e.simulated { "Simulated entry" } else { "Entry" };
            (
                format!("{kind}: {} x{}", e.symbol, e.quantity),
                format!("Opened {} shares of {} at ${} (stop ${}, target ${}, confidence {:.0}%)", e.quantity, e.symbol, e.entry_price, e.stop_price, e.take_profit_price, e.confidence * 100.0),
            )
        }
        Alert::Exit(x) => (
            format!("Exit: {} ({:?})", x.symbol, x.exit_reason),
            format!("Closed {} at ${}: P&L ${} ({:.2}%) over {} min", x.symbol, x.exit_price, x.pnl_abs, x.pnl_pct, x.duration_secs / 60),
        ),
        Alert::SafeModeTripped { reason, .. } => ("Safe mode tripped".to_string(), reason.clone()),
        Alert::SafeModeCleared { reason, .. } => ("Safe mode cleared".to_string(), reason.clone()),
        Alert::OrderRejected { symbol, reason, .. } => (format!("Order rejected: {symbol}"), reason.clone()),
        Alert::CloseFailed { symbol, .. } => (
            format!("Close failed: {symbol}"),
            "Two consecutive close attempts failed; position remains open and will retry.".to_string(),
        ),
        Alert::TokenExpired { reason, .. } => (
            "E*TRADE token expired".to_string(),
            format!("{reason}. Real ordering disabled; running simulated until the token is restored."),
        ),
        Alert::Heartbeat(hb) => (
            format!("Heartbeat #{}", hb.cycle),
            format!("{} open positions, safe_mode={}", hb.open_positions, hb.safe_mode),
        ),
        Alert::DailyReport(r) => (
            format!("Daily report: {}", r.date),
            format!("{} trades closed ({} wins / {} losses), P&L ${} ({:.2}%)", r.trades_closed, r.wins, r.losses, r.realized_pnl_abs, r.realized_pnl_pct),
        ),
    }
}

/// Trait for notification channels.
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    async fn send(&self, alert: &AlertEnvelope) -> Result<(), NotificationError>;
    fn name(&self) -> &str;
}

/// Errors from the notification system.
#[derive(Debug, thiserror::Error)]
pub enum NotificationError {
    #[error("SMTP error: {0}")]
    Smtp(String),
    #[error("Discord webhook error: {0}")]
    Discord(String),
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Configuration for the notification service.
#[derive(Debug, Clone)]
pub struct NotificationConfig {
    pub smtp_host: Option<String>,
    pub smtp_port: u16,
    pub smtp_username: Option<String>,
    pub smtp_password: Option<String>,
    pub smtp_from: Option<String>,
    pub smtp_to: Vec<String>,
    pub smtp_tls: SmtpTls,
    pub discord_webhook_url: Option<String>,
    /// Throttle: alerts beyond this many per rolling minute are
    /// dropped, not queued.
    pub throttle_per_minute: u32,
}

#[derive(Debug, Clone, Default)]
pub enum SmtpTls {
    #[default]
    StartTls,
    Tls,
    None,
}

impl NotificationConfig {
    /// Load from environment variables.
    pub fn from_env() -> Self {
        let smtp_to = std::env::var("NOTIFICATION_EMAIL_TO")
            .unwrap_or_default()
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let smtp_tls = match std::env::var("SMTP_TLS").unwrap_or_default().as_str() {
            "tls" => SmtpTls::Tls,
            "none" => SmtpTls::None,
            _ => SmtpTls::StartTls,
        };

        Self {
            smtp_host: std::env::var("SMTP_HOST").ok().filter(|s| !s.is_empty()),
            smtp_port: std::env::var("SMTP_PORT").ok().and_then(|s| s.parse().ok()).unwrap_or(587),
            smtp_username: std::env::var("SMTP_USERNAME").ok().filter(|s| !s.is_empty()),
            smtp_password: std::env::var("SMTP_PASSWORD").ok().filter(|s| !s.is_empty()),
            smtp_from: std::env::var("SMTP_FROM_ADDRESS").ok().filter(|s| !s.is_empty()),
            smtp_to,
            smtp_tls,
            discord_webhook_url: std::env::var("DISCORD_WEBHOOK_URL").ok().filter(|s| !s.is_empty()),
            throttle_per_minute: std::env::var("ALERT_THROTTLE_PER_MINUTE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(30),
        }
    }
}

struct ThrottleState {
    window_start: DateTime<Utc>,
    count: u32,
}

/// Fixed-window rate limiter: at most `limit` alerts per rolling
/// minute get through; the rest are dropped and counted, never queued.
struct Throttle {
    limit: u32,
    state: Mutex<ThrottleState>,
    dropped: AtomicU64,
}

impl Throttle {
    fn new(limit: u32) -> Self {
        Self { limit, state: Mutex::new(ThrottleState { window_start: Utc::now(), count: 0 }), dropped: AtomicU64::new(0) }
    }

    fn allow(&self, now: DateTime<Utc>) -> bool {
        let mut state = self.state.lock().expect("throttle state poisoned");
        if now - state.window_start >= Duration::minutes(1) {
            state.window_start = now;
            state.count = 0;
        }
        if state.count >= self.limit {
            self.dropped.fetch_add(1, Ordering::SeqCst);
            false
        } else {
            state.count += 1;
            true
        }
    }

    fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::SeqCst)
    }
}

/// The main notification service — dispatches alerts to all configured channels.
pub struct NotificationService {
    channels: std::sync::Arc<Vec<Box<dyn NotificationChannel>>>,
    throttle: std::sync::Arc<Throttle>,
}

impl NotificationService {
    pub fn new(config: &NotificationConfig) -> Self {
        let mut channels: Vec<Box<dyn NotificationChannel>> = Vec::new();

        if config.smtp_host.is_some() && config.smtp_from.is_some() && !config.smtp_to.is_empty() {
            match SmtpNotifier::new(config) {
                Ok(notifier) => {
                    tracing::info!("Email notifications enabled (SMTP -> {} recipients)", config.smtp_to.len());
                    channels.push(Box::new(notifier));
                }
                Err(e) => {
                    tracing::warn!("Failed to initialize SMTP notifier: {}", e);
                }
            }
        }

        if let Some(ref webhook_url) = config.discord_webhook_url {
            channels.push(Box::new(DiscordWebhookNotifier { webhook_url: webhook_url.clone(), client: reqwest::Client::new() }));
            tracing::info!("Discord webhook notifications enabled");
        }

        if channels.is_empty() {
            tracing::info!("No notification channels configured (set SMTP_HOST or DISCORD_WEBHOOK_URL)");
        }

        Self { channels: std::sync::Arc::new(channels), throttle: std::sync::Arc::new(Throttle::new(config.throttle_per_minute)) }
    }

    pub fn dropped_alert_count(&self) -> u64 {
        self.throttle.dropped_count()
    }

    /// Send an alert to all configured channels (fire-and-forget via tokio::spawn).
    /// Drops silently (incrementing the counter) once the per-minute budget
    /// is exhausted — notifications are best-effort, never back-pressure.
    pub fn send_alert(&self, alert: Alert) {
        if !self.throttle.allow(Utc::now()) {
            tracing::warn!("alert throttled, dropped_total={}", self.throttle.dropped_count());
            return;
        }
        let envelope = AlertEnvelope::new(alert);
        let channels = self.channels.clone();
        tokio::spawn(async move {
            for channel in channels.iter() {
                match channel.send(&envelope).await {
                    Ok(()) => tracing::debug!("Sent notification via {}", channel.name()),
                    Err(e) => tracing::warn!("Failed to send notification via {}: {}", channel.name(), e),
                }
            }
        });
    }

    /// Send alert to all channels, awaiting completion. Still throttled.
    pub async fn send_alert_async(&self, alert: Alert) {
        if !self.throttle.allow(Utc::now()) {
            tracing::warn!("alert throttled, dropped_total={}", self.throttle.dropped_count());
            return;
        }
        let envelope = AlertEnvelope::new(alert);
        for channel in self.channels.iter() {
            match channel.send(&envelope).await {
                Ok(()) => tracing::debug!("Sent notification via {}", channel.name()),
                Err(e) => tracing::warn!("Failed to send notification via {}: {}", channel.name(), e),
            }
        }
    }
}

/// Discord webhook notifier.
struct DiscordWebhookNotifier {
    webhook_url: String,
    client: reqwest::Client,
}

#[async_trait]
impl NotificationChannel for DiscordWebhookNotifier {
    async fn send(&self, envelope: &AlertEnvelope) -> Result<(), NotificationError> {
        let color = match &envelope.alert {
            Alert::Entry(_) => 0x00ff00,
            Alert::Exit(x) => {
                if x.pnl_abs.is_sign_negative() {
                    0xff0000
                } else {
                    0x00ff00
                }
            }
            Alert::SafeModeTripped { .. } | Alert::CloseFailed { .. } | Alert::TokenExpired { .. } => 0xff0000,
            Alert::SafeModeCleared { .. } => 0x00ff00,
            Alert::OrderRejected { .. } => 0xff6600,
            Alert::Heartbeat(_) => 0x64748b,
            Alert::DailyReport(r) => {
                if r.realized_pnl_abs.is_sign_negative() {
                    0xff0000
                } else {
                    0x00ff00
                }
            }
        };

        let payload = serde_json::json!({
            "embeds": [{
                "title": envelope.title,
                "description": envelope.message,
                "color": color,
                "timestamp": envelope.timestamp.to_rfc3339(),
            }]
        });

        self.client
            .post(&self.webhook_url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| NotificationError::Discord(e.to_string()))?;

        Ok(())
    }

    fn name(&self) -> &str {
        "discord-webhook"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use engine_types::{EntryAlert, Symbol};
    use rust_decimal_macros::dec;

    fn sample_entry_alert() -> Alert {
        Alert::Entry(EntryAlert {
            symbol: Symbol::new("AAPL").unwrap(),
            quantity: 10,
            entry_price: dec!(100.00),
            simulated: true,
            stop_price: dec!(97.00),
            take_profit_price: dec!(105.00),
            confidence: 0.95,
            expected_return_pct: 3.0,
            at: Utc::now(),
        })
    }

    #[test]
    fn throttle_allows_up_to_limit_then_drops() {
        let throttle = Throttle::new(2);
        let now = Utc::now();
        assert!(throttle.allow(now));
        assert!(throttle.allow(now));
        assert!(!throttle.allow(now));
        assert_eq!(throttle.dropped_count(), 1);
    }

    #[test]
    fn throttle_resets_after_window_elapses() {
        let throttle = Throttle::new(1);
        let now = Utc::now();
        assert!(throttle.allow(now));
        assert!(!throttle.allow(now));
        let later = now + Duration::minutes(2);
        assert!(throttle.allow(later));
    }

    #[test]
    fn envelope_describes_entry_alert() {
        let envelope = AlertEnvelope::new(sample_entry_alert());
        assert!(envelope.title.contains("AAPL"));
        assert!(envelope.message.contains("100.00"));
    }
}
