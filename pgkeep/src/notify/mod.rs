//! Backup outcome notifications.

pub mod discord;
pub mod telegram;

pub use discord::DiscordNotifier;
pub use telegram::TelegramNotifier;

use crate::config::NotificationConfig;
use crate::utils::errors::NotifyError;
use async_trait::async_trait;
use futures_util::future::join_all;
use std::time::Duration;
use tracing::warn;

/// Timeout for a single notification request
pub(crate) const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn success(&self, message: &str) -> Result<(), NotifyError>;

    async fn error(&self, message: &str) -> Result<(), NotifyError>;
}

/// Fans out to every configured channel, honoring the success/error toggles.
///
/// Fails only when every channel failed.
pub struct MultiNotifier {
    notifiers: Vec<Box<dyn Notifier>>,
    success_enabled: bool,
    error_enabled: bool,
}

impl MultiNotifier {
    pub fn new(success_enabled: bool, error_enabled: bool) -> Self {
        Self {
            notifiers: Vec::new(),
            success_enabled,
            error_enabled,
        }
    }

    pub fn from_config(config: &NotificationConfig) -> Self {
        let mut multi = Self::new(config.success_enabled, config.error_enabled);
        if let Some(url) = &config.discord_webhook_url {
            multi.add(DiscordNotifier::new(url.clone()));
        }
        if let (Some(token), Some(chat_id)) =
            (&config.telegram_bot_token, &config.telegram_chat_id)
        {
            multi.add(TelegramNotifier::new(token.clone(), chat_id.clone()));
        }
        multi
    }

    pub fn add(&mut self, notifier: impl Notifier + 'static) {
        self.notifiers.push(Box::new(notifier));
    }

    pub fn is_empty(&self) -> bool {
        self.notifiers.is_empty()
    }

    fn collect(results: Vec<Result<(), NotifyError>>) -> Result<(), NotifyError> {
        let total = results.len();
        let errors: Vec<String> = results
            .into_iter()
            .filter_map(|r| r.err())
            .inspect(|e| warn!("Notifier failed: {}", e))
            .map(|e| e.to_string())
            .collect();

        if total > 0 && errors.len() == total {
            return Err(NotifyError::AllFailed(errors.join("; ")));
        }
        Ok(())
    }
}

#[async_trait]
impl Notifier for MultiNotifier {
    async fn success(&self, message: &str) -> Result<(), NotifyError> {
        if !self.success_enabled {
            return Ok(());
        }
        let results = join_all(self.notifiers.iter().map(|n| n.success(message))).await;
        Self::collect(results)
    }

    async fn error(&self, message: &str) -> Result<(), NotifyError> {
        if !self.error_enabled {
            return Ok(());
        }
        let results = join_all(self.notifiers.iter().map(|n| n.error(message))).await;
        Self::collect(results)
    }
}

/// Name of this machine, used to tell instances apart in chat channels.
pub(crate) fn host_label() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown-host".to_string())
}

pub(crate) fn check_status(
    service: &'static str,
    response: &reqwest::Response,
) -> Result<(), NotifyError> {
    let status = response.status();
    if status.is_success() {
        Ok(())
    } else {
        Err(NotifyError::Status {
            service,
            status: status.as_u16(),
        })
    }
}
