//! Telegram Bot API sink.
//!
//! Tokens are used round-robin: each send starts at the next token and
//! walks the list at most once, so a revoked or rate-limited bot costs a
//! single extra request instead of a lost alert.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, error, warn};

use pingward_core::NotifyConfig;

use crate::{Channel, NotificationSink, NotifyError};

/// Sends alerts through `sendMessage` on a rotating set of bots.
pub struct TelegramSink {
    http: reqwest::Client,
    api_base: String,
    tokens: Vec<String>,
    next: AtomicUsize,
    chats: HashMap<Channel, String>,
}

impl TelegramSink {
    pub fn new(api_base: &str, tokens: Vec<String>, timeout: Duration) -> Self {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            http,
            api_base: api_base.trim_end_matches('/').to_string(),
            tokens,
            next: AtomicUsize::new(0),
            chats: HashMap::new(),
        }
    }

    pub fn from_config(config: &NotifyConfig) -> Self {
        let mut sink = Self::new(&config.api_base, config.bot_tokens.clone(), config.timeout());
        if !config.updates_channel.is_empty() {
            sink = sink.with_chat(Channel::Updates, &config.updates_channel);
        }
        // Failures go to the updates chat unless they have their own.
        let failures = if config.failures_channel.is_empty() {
            &config.updates_channel
        } else {
            &config.failures_channel
        };
        if !failures.is_empty() {
            sink = sink.with_chat(Channel::HttpFailures, failures);
        }
        sink
    }

    /// Route `channel` to `chat_id`.
    pub fn with_chat(mut self, channel: Channel, chat_id: &str) -> Self {
        self.chats.insert(channel, chat_id.to_string());
        self
    }

    /// Deliver one message, trying each token at most once.
    pub async fn try_send(&self, channel: Channel, text: &str) -> Result<(), NotifyError> {
        if self.tokens.is_empty() {
            return Err(NotifyError::NoTokens);
        }
        let chat_id = self.chats.get(&channel).ok_or(NotifyError::NoChat(channel))?;

        let count = self.tokens.len();
        let start = self.next.fetch_add(1, Ordering::Relaxed) % count;

        for offset in 0..count {
            let index = (start + offset) % count;
            let url = format!("{}/bot{}/sendMessage", self.api_base, self.tokens[index]);
            let body = serde_json::json!({
                "chat_id": chat_id,
                "text": text,
                "disable_web_page_preview": true,
            });

            match self.http.post(&url).json(&body).send().await {
                Ok(resp) if resp.status().is_success() => {
                    debug!(%channel, bot = index, "alert delivered");
                    return Ok(());
                }
                Ok(resp) => {
                    warn!(%channel, bot = index, status = %resp.status(), "alert rejected, trying next bot");
                }
                Err(e) => {
                    warn!(%channel, bot = index, error = %e, "alert send failed, trying next bot");
                }
            }
        }

        Err(NotifyError::Exhausted { attempts: count })
    }
}

#[async_trait]
impl NotificationSink for TelegramSink {
    async fn send(&self, channel: Channel, text: &str) {
        if let Err(e) = self.try_send(channel, text).await {
            error!(%channel, error = %e, alert = %text, "alert not delivered");
        }
    }
}
