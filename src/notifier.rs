use anyhow::{anyhow, Result};
use reqwest::Client;
use serde::Serialize;
use tracing::warn;

use crate::state::CliSettings;

const TELEGRAM_API: &str = "https://api.telegram.org";

#[derive(Debug, Clone)]
struct Telegram {
    bot_token: String,
    chat_id: String,
}

/// Fan-out of alert text to the Discord webhook and Telegram bot, when configured.
#[derive(Clone)]
pub struct Notifier {
    discord_webhook: Option<String>,
    telegram: Option<Telegram>,
    http: Client,
}

#[derive(Serialize)]
struct DiscordPayload<'a> {
    content: &'a str,
}

#[derive(Serialize)]
struct TelegramPayload<'a> {
    chat_id: &'a str,
    text: &'a str,
    parse_mode: &'a str,
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty()).map(str::to_string)
}

impl Notifier {
    pub fn new(discord_webhook: Option<String>, telegram_bot_token: Option<String>, telegram_chat_id: Option<String>) -> Self {
        let telegram = match (non_empty(&telegram_bot_token), non_empty(&telegram_chat_id)) {
            (Some(bot_token), Some(chat_id)) => Some(Telegram { bot_token, chat_id }),
            _ => None,
        };
        Self {
            discord_webhook: non_empty(&discord_webhook),
            telegram,
            http: Client::new(),
        }
    }

    pub fn from_settings(settings: &CliSettings) -> Self {
        Self::new(
            settings.discord_webhook.clone(),
            settings.telegram_bot_token.clone(),
            settings.telegram_chat_id.clone(),
        )
    }

    pub fn is_configured(&self) -> bool {
        self.discord_webhook.is_some() || self.telegram.is_some()
    }

    /// Sends to every configured channel; one failing channel does not stop the other.
    pub async fn alert(&self, text: &str) -> Result<()> {
        let mut failures = Vec::new();

        if let Some(url) = self.discord_webhook.as_deref() {
            if let Err(err) = self.discord(url, text).await {
                warn!(error = %err, "notifier.discord_failed");
                failures.push(format!("discord: {err}"));
            }
        }
        if let Some(telegram) = &self.telegram {
            if let Err(err) = self.telegram(telegram, text).await {
                warn!(error = %err, "notifier.telegram_failed");
                failures.push(format!("telegram: {err}"));
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(anyhow!(failures.join("; ")))
        }
    }

    async fn discord(&self, url: &str, text: &str) -> Result<()> {
        let resp = self
            .http
            .post(url)
            .json(&DiscordPayload { content: text })
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(anyhow!("discord webhook failed: {}", resp.status()));
        }
        Ok(())
    }

    async fn telegram(&self, telegram: &Telegram, text: &str) -> Result<()> {
        let url = format!("{TELEGRAM_API}/bot{}/sendMessage", telegram.bot_token);
        let resp = self
            .http
            .post(url)
            .json(&TelegramPayload {
                chat_id: &telegram.chat_id,
                text,
                parse_mode: "HTML",
            })
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(anyhow!("telegram sendMessage failed: {}", resp.status()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unconfigured_notifier_is_a_no_op() {
        let notifier = Notifier::from_settings(&CliSettings::default());
        assert!(!notifier.is_configured());
        notifier.alert("filled").await.unwrap();
    }

    #[test]
    fn telegram_needs_both_token_and_chat() {
        let half = Notifier::new(None, Some("123:abc".into()), Some("  ".into()));
        assert!(!half.is_configured());
        let full = Notifier::new(None, Some("123:abc".into()), Some("42".into()));
        assert!(full.is_configured());
    }
}
