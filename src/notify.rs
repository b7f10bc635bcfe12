//! Notification channel: pure message chunking plus the Telegram Bot
//! API sender.

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::info;

use crate::config::TelegramSettings;
use crate::error::{MonitorError, Result};

/// Splits lines into chunks that stay within `max_chars`, joining with
/// newlines. A single line longer than the budget becomes its own
/// chunk rather than being merged with neighbors.
pub fn chunk_lines<S: AsRef<str>>(lines: &[S], max_chars: usize) -> Vec<String> {
    let mut chunks: Vec<String> = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    let mut current_len = 0usize;

    for line in lines {
        let line = line.as_ref();
        let line_len = line.chars().count();
        let separator = usize::from(!current.is_empty());
        let projected = current_len + line_len + separator;

        if projected > max_chars && !current.is_empty() {
            chunks.push(current.join("\n"));
            current = vec![line];
            current_len = line_len;
            continue;
        }
        if line_len > max_chars && current.is_empty() {
            chunks.push(line.to_string());
            continue;
        }
        current.push(line);
        current_len = projected;
    }

    if !current.is_empty() {
        chunks.push(current.join("\n"));
    }
    chunks
}

#[async_trait]
pub trait Notifier: Send + Sync {
    /// Delivers one message chunk. Fails loudly on a non-success
    /// status; rate limiting is a distinguished failure kind.
    async fn send(&self, text: &str) -> Result<()>;
}

pub struct TelegramNotifier {
    client: reqwest::Client,
    api_base: String,
    bot_token: String,
    chat_id: String,
}

impl TelegramNotifier {
    pub fn new(settings: &TelegramSettings) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_base: settings.api_base.trim_end_matches('/').to_string(),
            bot_token: settings.bot_token.clone(),
            chat_id: settings.chat_id.clone(),
        }
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn send(&self, text: &str) -> Result<()> {
        let url = format!("{}/bot{}/sendMessage", self.api_base, self.bot_token);
        let response = self
            .client
            .post(&url)
            .json(&json!({
                "chat_id": self.chat_id,
                "text": text,
                "parse_mode": "HTML",
                "disable_web_page_preview": true,
            }))
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            info!("notification chunk delivered");
            return Ok(());
        }

        let body: Value = response.json().await.unwrap_or(Value::Null);
        if status.as_u16() == 429 {
            let retry_after = body["parameters"]["retry_after"].as_u64().unwrap_or(0);
            return Err(MonitorError::NotifyRateLimited { retry_after });
        }
        let message = body["description"]
            .as_str()
            .unwrap_or("no error description")
            .to_string();
        Err(MonitorError::Notify {
            status: status.as_u16(),
            message,
        })
    }
}
