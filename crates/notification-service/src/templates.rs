use crate::AlertEnvelope;
use engine_types::Alert;

pub struct EmailTemplate;

impl EmailTemplate {
    pub fn render(envelope: &AlertEnvelope) -> String {
        let body_content = match &envelope.alert {
            Alert::Entry(entry) => {
                let kind = if entry.simulated { "SIGNAL (simulated)" } else { "BUY" };
                format!(
                    r#"<div style="background:#22c55e;color:#fff;padding:12px 20px;border-radius:8px 8px 0 0;font-size:18px;font-weight:700;">{kind} {symbol}</div>
<table style="width:100%;border-collapse:collapse;">
  <tr><td style="padding:8px 12px;color:#94a3b8;">Symbol</td><td style="padding:8px 12px;font-weight:600;">{symbol}</td></tr>
  <tr style="background:#f8fafc;"><td style="padding:8px 12px;color:#94a3b8;">Quantity</td><td style="padding:8px 12px;font-weight:600;">{quantity}</td></tr>
  <tr><td style="padding:8px 12px;color:#94a3b8;">Entry Price</td><td style="padding:8px 12px;font-weight:600;">${entry_price}</td></tr>
  <tr style="background:#f8fafc;"><td style="padding:8px 12px;color:#94a3b8;">Stop</td><td style="padding:8px 12px;font-weight:600;">${stop}</td></tr>
  <tr><td style="padding:8px 12px;color:#94a3b8;">Take Profit</td><td style="padding:8px 12px;font-weight:600;">${tp}</td></tr>
  <tr style="background:#f8fafc;"><td style="padding:8px 12px;color:#94a3b8;">Confidence</td><td style="padding:8px 12px;font-weight:600;">{confidence:.0}%</td></tr>
</table>"#,
                    symbol = entry.symbol,
                    quantity = entry.quantity,
                    entry_price = entry.entry_price,
                    stop = entry.stop_price,
                    tp = entry.take_profit_price,
                    confidence = entry.confidence * 100.0,
                )
            }
            Alert::Exit(exit) => {
                let color = if exit.pnl_abs.is_sign_negative() { "#ef4444" } else { "#22c55e" };
                format!(
                    r#"<div style="background:{color};color:#fff;padding:12px 20px;border-radius:8px 8px 0 0;font-size:18px;font-weight:700;">EXIT {symbol} &mdash; {reason:?}</div>
<table style="width:100%;border-collapse:collapse;">
  <tr><td style="padding:8px 12px;color:#94a3b8;">Symbol</td><td style="padding:8px 12px;font-weight:600;">{symbol}</td></tr>
  <tr style="background:#f8fafc;"><td style="padding:8px 12px;color:#94a3b8;">Exit Price</td><td style="padding:8px 12px;font-weight:600;">${exit_price}</td></tr>
  <tr><td style="padding:8px 12px;color:#94a3b8;">P&amp;L</td><td style="padding:8px 12px;font-weight:600;color:{color};">${pnl_abs} ({pnl_pct:.2}%)</td></tr>
  <tr style="background:#f8fafc;"><td style="padding:8px 12px;color:#94a3b8;">Held</td><td style="padding:8px 12px;font-weight:600;">{duration_min} min</td></tr>
</table>"#,
                    symbol = exit.symbol,
                    reason = exit.exit_reason,
                    exit_price = exit.exit_price,
                    pnl_abs = exit.pnl_abs,
                    pnl_pct = exit.pnl_pct,
                    duration_min = exit.duration_secs / 60,
                )
            }
            Alert::SafeModeTripped { reason, .. } => {
                format!(
                    r#"<div style="background:#ef4444;color:#fff;padding:12px 20px;border-radius:8px 8px 0 0;font-size:18px;font-weight:700;">SAFE MODE TRIPPED</div>
<div style="padding:16px 20px;"><p style="color:#ef4444;font-weight:600;margin:0 0 8px;">Trading has been halted</p><p style="color:#334155;margin:0;">{reason}</p></div>"#
                )
            }
            Alert::SafeModeCleared { reason, .. } => {
                format!(
                    r#"<div style="background:#22c55e;color:#fff;padding:12px 20px;border-radius:8px 8px 0 0;font-size:18px;font-weight:700;">SAFE MODE CLEARED</div>
<div style="padding:16px 20px;"><p style="color:#334155;margin:0;">{reason}</p></div>"#
                )
            }
            Alert::OrderRejected { symbol, reason, .. } => {
                format!(
                    r#"<div style="background:#f97316;color:#fff;padding:12px 20px;border-radius:8px 8px 0 0;font-size:18px;font-weight:700;">ORDER REJECTED &mdash; {symbol}</div>
<div style="padding:16px 20px;"><p style="color:#334155;margin:0;">{reason}</p></div>"#
                )
            }
            Alert::CloseFailed { symbol, .. } => {
                format!(
                    r#"<div style="background:#ef4444;color:#fff;padding:12px 20px;border-radius:8px 8px 0 0;font-size:18px;font-weight:700;">CLOSE FAILED &mdash; {symbol}</div>
<div style="padding:16px 20px;"><p style="color:#334155;margin:0;">Position retained open after two failed close attempts; will retry on the next tick.</p></div>"#
                )
            }
            Alert::Heartbeat(hb) => {
                format!(
                    r#"<div style="background:#1e293b;color:#fff;padding:12px 20px;border-radius:8px 8px 0 0;font-size:18px;font-weight:700;">Heartbeat &mdash; cycle {cycle}</div>
<table style="width:100%;border-collapse:collapse;">
  <tr><td style="padding:8px 12px;color:#94a3b8;">Open positions</td><td style="padding:8px 12px;font-weight:600;">{open}</td></tr>
  <tr style="background:#f8fafc;"><td style="padding:8px 12px;color:#94a3b8;">Safe mode</td><td style="padding:8px 12px;font-weight:600;">{safe_mode}</td></tr>
</table>"#,
                    cycle = hb.cycle,
                    open = hb.open_positions,
                    safe_mode = hb.safe_mode,
                )
            }
            Alert::DailyReport(report) => {
                let pnl_color = if report.realized_pnl_abs.is_sign_negative() { "#ef4444" } else { "#22c55e" };
                format!(
                    r#"<div style="background:#1e293b;color:#fff;padding:12px 20px;border-radius:8px 8px 0 0;font-size:18px;font-weight:700;">Daily Report &mdash; {date}</div>
<table style="width:100%;border-collapse:collapse;">
  <tr><td style="padding:8px 12px;color:#94a3b8;">P&amp;L</td><td style="padding:8px 12px;font-weight:600;color:{pnl_color};">${pnl} ({pnl_pct:.2}%)</td></tr>
  <tr style="background:#f8fafc;"><td style="padding:8px 12px;color:#94a3b8;">Trades closed</td><td style="padding:8px 12px;font-weight:600;">{closed}</td></tr>
  <tr><td style="padding:8px 12px;color:#94a3b8;">Wins / Losses</td><td style="padding:8px 12px;font-weight:600;">{wins} / {losses}</td></tr>
</table>"#,
                    date = report.date,
                    pnl = report.realized_pnl_abs,
                    pnl_pct = report.realized_pnl_pct,
                    closed = report.trades_closed,
                    wins = report.wins,
                    losses = report.losses,
                )
            }
        };

        format!(
            r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"><meta name="viewport" content="width=device-width,initial-scale=1"></head>
<body style="margin:0;padding:0;background:#f1f5f9;font-family:-apple-system,BlinkMacSystemFont,'Segoe UI',Roboto,sans-serif;">
<table width="100%" cellpadding="0" cellspacing="0" style="background:#f1f5f9;padding:32px 0;">
  <tr><td align="center">
    <table width="600" cellpadding="0" cellspacing="0" style="background:#ffffff;border-radius:8px;overflow:hidden;box-shadow:0 1px 3px rgba(0,0,0,0.1);">
      <tr><td>
        {body_content}
      </td></tr>
      <tr><td style="padding:16px 20px;border-top:1px solid #e2e8f0;">
        <p style="margin:0;color:#94a3b8;font-size:12px;">
          {msg}
          <br>Sent at {ts} UTC
        </p>
      </td></tr>
    </table>
    <p style="color:#94a3b8;font-size:11px;margin-top:16px;">Trading Engine Notifications</p>
  </td></tr>
</table>
</body>
</html>"#,
            msg = envelope.message.replace('<', "&lt;").replace('>', "&gt;"),
            ts = envelope.timestamp.format("%Y-%m-%d %H:%M:%S"),
        )
    }
}
