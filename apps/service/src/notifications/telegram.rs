use anyhow::{Result, anyhow};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use super::MessageSender;
use crate::models::{ChannelKind, NotificationChannel};

pub const DEFAULT_API_BASE: &str = "https://api.telegram.org";

#[derive(Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
    disable_web_page_preview: bool,
}

#[derive(Deserialize)]
struct ApiResponse {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
}

/// Delivers messages through the Telegram Bot API
pub struct TelegramSender {
    client: reqwest::Client,
    api_base: String,
}

impl TelegramSender {
    pub fn new(api_base: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(Duration::from_secs(15)).build()?;
        Ok(Self { client, api_base: api_base.into() })
    }

    fn endpoint(&self, token: &str) -> String {
        format!("{}/bot{}/sendMessage", self.api_base.trim_end_matches('/'), token)
    }
}

#[async_trait]
impl MessageSender for TelegramSender {
    fn supports(&self, kind: ChannelKind) -> bool {
        kind == ChannelKind::Telegram
    }

    async fn send(&self, channel: &NotificationChannel, credential: &str, text: &str) -> Result<()> {
        let body = SendMessage { chat_id: &channel.destination, text, disable_web_page_preview: true };
        let response = self
            .client
            .post(self.endpoint(credential.trim()))
            .json(&body)
            .send()
            .await
            .map_err(|e| anyhow!("Telegram request failed: {}", e.without_url()))?;

        let status = response.status();
        let reply: Option<ApiResponse> = response.json().await.ok();
        match reply {
            Some(ApiResponse { ok: true, .. }) if status.is_success() => {
                debug!(channel = %channel.name, "Telegram message delivered");
                Ok(())
            }
            Some(ApiResponse { description: Some(description), .. }) => {
                Err(anyhow!("Telegram rejected message ({}): {}", status, description))
            }
            _ => Err(anyhow!("Telegram rejected message ({})", status)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_includes_token() {
        let sender = TelegramSender::new("https://api.telegram.org/").unwrap();
        assert_eq!(sender.endpoint("123:abc"), "https://api.telegram.org/bot123:abc/sendMessage");
    }

    #[test]
    fn only_telegram_channels() {
        let sender = TelegramSender::new(DEFAULT_API_BASE).unwrap();
        assert!(sender.supports(ChannelKind::Telegram));
        assert!(!sender.supports(ChannelKind::Slack));
    }
}
