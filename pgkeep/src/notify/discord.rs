//! Discord webhook notifier.

use super::{check_status, host_label, Notifier, REQUEST_TIMEOUT};
use crate::utils::errors::NotifyError;
use async_trait::async_trait;
use serde_json::json;

pub struct DiscordNotifier {
    webhook_url: String,
    client: reqwest::Client,
}

impl DiscordNotifier {
    pub fn new(webhook_url: String) -> Self {
        Self {
            webhook_url,
            client: reqwest::Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .unwrap_or_default(),
        }
    }

    async fn send(&self, content: String) -> Result<(), NotifyError> {
        let response = self
            .client
            .post(&self.webhook_url)
            .json(&json!({ "content": content }))
            .send()
            .await?;
        check_status("discord", &response)
    }
}

#[async_trait]
impl Notifier for DiscordNotifier {
    async fn success(&self, message: &str) -> Result<(), NotifyError> {
        self.send(format!("✅ **Backup succeeded** on `{}`\n{}", host_label(), message))
            .await
    }

    async fn error(&self, message: &str) -> Result<(), NotifyError> {
        self.send(format!(
            "❌ **Backup failed** on `{}`\n```\n{}\n```",
            host_label(),
            message
        ))
        .await
    }
}
