//! Telegram bot notifier.

use super::{check_status, host_label, Notifier, REQUEST_TIMEOUT};
use crate::utils::errors::NotifyError;
use async_trait::async_trait;
use serde_json::json;

const API_BASE: &str = "https://api.telegram.org";

pub struct TelegramNotifier {
    bot_token: String,
    chat_id: String,
    api_base: String,
    client: reqwest::Client,
}

impl TelegramNotifier {
    pub fn new(bot_token: String, chat_id: String) -> Self {
        Self {
            bot_token,
            chat_id,
            api_base: API_BASE.to_string(),
            client: reqwest::Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .unwrap_or_default(),
        }
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    async fn send_message(&self, text: String) -> Result<(), NotifyError> {
        let url = format!("{}/bot{}/sendMessage", self.api_base, self.bot_token);
        let response = self
            .client
            .post(url)
            .json(&json!({ "chat_id": self.chat_id, "text": text }))
            .send()
            .await?;
        check_status("telegram", &response)
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn success(&self, message: &str) -> Result<(), NotifyError> {
        self.send_message(format!("✅ Backup succeeded on {}\n\n{}", host_label(), message))
            .await
    }

    async fn error(&self, message: &str) -> Result<(), NotifyError> {
        self.send_message(format!(
            "❌ Backup failed on {}\n\nError details:\n{}",
            host_label(),
            message
        ))
        .await
    }
}
