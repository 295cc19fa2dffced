use std::time::Duration;

use async_trait::async_trait;

use crate::broker::Notifier;
use crate::config::non_empty_var;
use crate::position_manager::{ManagementAction, StopReason};
use crate::types::{RiskParameters, Side};

const BASE_URL: &str = "https://api.telegram.org";
const SEND_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone)]
pub struct TelegramNotifier {
    client: reqwest::Client,
    url: String,
    chat_id: String,
}

impl TelegramNotifier {
    /// `None` unless both `TELEGRAM_TOKEN` and `TELEGRAM_CHAT_ID` are set.
    pub fn from_env() -> Option<Self> {
        let token = non_empty_var("TELEGRAM_TOKEN")?;
        let chat_id = non_empty_var("TELEGRAM_CHAT_ID")?;
        Self::with_endpoint(BASE_URL, &token, chat_id, SEND_TIMEOUT)
    }

    /// Every send is bounded by `timeout` so a stalled endpoint cannot hold
    /// up the caller.
    pub fn with_endpoint(base_url: &str, token: &str, chat_id: String, timeout: Duration) -> Option<Self> {
        let client = match reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout.min(Duration::from_secs(3)))
            .build()
        {
            Ok(c) => c,
            Err(e) => {
                log::warn!("Telegram client build failed: {} — notifications disabled", e);
                return None;
            }
        };
        Some(TelegramNotifier { client, url: format!("{}/bot{}/sendMessage", base_url, token), chat_id })
    }

    pub async fn send(&self, text: &str) {
        let body = serde_json::json!({
            "chat_id": self.chat_id,
            "text": text,
            "parse_mode": "HTML"
        });

        match self.client.post(&self.url).json(&body).send().await {
            Ok(resp) if resp.status().is_success() => {
                let preview: String = text.chars().take(80).collect();
                log::info!("Telegram sent: {}", preview.replace('\n', " "));
            }
            Ok(resp) => {
                log::warn!("Telegram error status: {}", resp.status());
            }
            Err(e) => {
                log::warn!("Telegram send failed: {}", e);
            }
        }
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn notify(&self, message: &str) {
        self.send(message).await;
    }
}

// ── Message formatting ────────────────────────────────────────────────────────

pub fn start_message(symbols: &[String], entry_tf: &str, balance: f64) -> String {
    format!(
        "🤖 <b>Fibo Trader started</b>\nPairs: {} | TF: {} | Balance: <code>{:.2}</code>",
        symbols.join(", "),
        entry_tf,
        balance
    )
}

pub fn trade_open_message(symbol: &str, side: Side, price: f64, risk: &RiskParameters) -> String {
    let emoji = if side == Side::Buy { "🟢" } else { "🔴" };
    format!(
        "{emoji} <b>Trade Opened — {side} {symbol}</b>\n\
         Lot:    <code>{lot}</code>\n\
         Entry:  <code>{price}</code>\n\
         SL:     <code>{sl}</code>\n\
         TP:     <code>{tp}</code>",
        lot = risk.lot_size,
        sl = risk.stop_loss,
        tp = risk.take_profit,
    )
}

pub fn rejection_message(symbol: &str, action: &str, code: i64, detail: &str) -> String {
    format!("❌ <b>{action} rejected — {symbol}</b>\nCode: <code>{code}</code>\n{detail}")
}

pub fn symbol_error_message(symbol: &str, error: &str) -> String {
    format!("⚠️ <b>{symbol} skipped this cycle</b>\n{error}")
}

/// Trailing moves happen every cycle and are only logged.
pub fn management_message(symbol: &str, action: &ManagementAction) -> Option<String> {
    match action {
        ManagementAction::ClosePartial { volume, .. } => {
            Some(format!("✂️ <b>Partial close — {symbol}</b>\nVolume: <code>{volume}</code>"))
        }
        ManagementAction::MoveStopLoss { stop_loss, reason: StopReason::BreakEven, .. } => {
            Some(format!("🛡 <b>Break-even — {symbol}</b>\nSL: <code>{stop_loss}</code>"))
        }
        ManagementAction::MoveStopLoss { reason: StopReason::Trailing, .. } => None,
    }
}

pub fn risk_alert_message(message: &str) -> String {
    format!("⚠️ <b>Risk Alert</b>\n{message}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trade_open_lists_levels() {
        let risk = RiskParameters { lot_size: 0.05, stop_loss: 1990.0, take_profit: 2020.0 };
        let msg = trade_open_message("XAUUSDT", Side::Buy, 2000.5, &risk);
        assert!(msg.contains("Buy XAUUSDT"));
        assert!(msg.contains("<code>0.05</code>"));
        assert!(msg.contains("<code>1990</code>"));
    }

    #[test]
    fn start_message_joins_symbols() {
        let msg = start_message(&["XAUUSDT".into(), "EURUSDT".into()], "15", 10_000.0);
        assert!(msg.contains("XAUUSDT, EURUSDT"));
        assert!(msg.contains("10000.00"));
    }

    #[test]
    fn management_notices_skip_trailing_moves() {
        let partial = ManagementAction::ClosePartial { ticket: "XAUUSDT".into(), volume: 0.02 };
        let trail = ManagementAction::MoveStopLoss {
            ticket: "XAUUSDT".into(),
            stop_loss: 2001.5,
            reason: StopReason::Trailing,
        };
        assert!(management_message("XAUUSDT", &partial).unwrap().contains("<code>0.02</code>"));
        assert!(management_message("XAUUSDT", &trail).is_none());
    }

    #[tokio::test]
    async fn notify_gives_up_on_silent_endpoint() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        // Accept connections and hold them open without ever answering.
        let server = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((sock, _)) = listener.accept().await {
                held.push(sock);
            }
        });

        let notifier = TelegramNotifier::with_endpoint(
            &format!("http://{}", addr),
            "token",
            "42".into(),
            Duration::from_millis(300),
        )
        .unwrap();
        let finished = tokio::time::timeout(Duration::from_secs(5), notifier.notify("hello")).await;
        assert!(finished.is_ok());
        server.abort();
    }
}
