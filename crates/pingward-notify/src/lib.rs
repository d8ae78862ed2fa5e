//! pingward-notify — operator alerts.
//!
//! Every component that needs to tell a human something goes through a
//! [`NotificationSink`]. Sinks absorb their own delivery failures: an
//! alert that cannot be delivered is logged and dropped, never raised.
//!
//! # Sinks
//!
//! ```text
//! NotificationSink
//!   ├── TelegramSink  (rotating bot tokens, per-channel chat ids)
//!   ├── LogSink       (tracing only, used when no tokens are configured)
//!   └── MemorySink    (records alerts, for tests and embedding)
//! ```

pub mod filter;
pub mod memory;
pub mod telegram;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::info;

pub use filter::AlertFilter;
pub use memory::MemorySink;
pub use telegram::TelegramSink;

/// Destination class for an alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    /// Fleet status: restarts, unresponsive clients, registry refreshes.
    Updates,
    /// Outbound request failures reported by the fetch layer.
    HttpFailures,
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Channel::Updates => f.write_str("updates"),
            Channel::HttpFailures => f.write_str("http_failures"),
        }
    }
}

/// A "send alert text" capability.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Deliver `text` to `channel`. Never fails from the caller's view.
    async fn send(&self, channel: Channel, text: &str);
}

/// Shared handle to a sink.
pub type SharedSink = Arc<dyn NotificationSink>;

/// Errors surfaced by sinks that report delivery outcome.
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("no bot tokens configured")]
    NoTokens,

    #[error("no chat configured for channel {0}")]
    NoChat(Channel),

    #[error("delivery failed on all {attempts} bot tokens")]
    Exhausted { attempts: usize },
}

/// Sink that only logs.
#[derive(Debug, Default, Clone)]
pub struct LogSink;

#[async_trait]
impl NotificationSink for LogSink {
    async fn send(&self, channel: Channel, text: &str) {
        info!(%channel, alert = %text, "alert");
    }
}

/// Build the sink described by the notify config.
///
/// Falls back to [`LogSink`] when no bot tokens are configured.
pub fn sink_from_config(config: &pingward_core::NotifyConfig) -> SharedSink {
    if config.bot_tokens.is_empty() {
        info!("no bot tokens configured, alerts are log-only");
        return Arc::new(LogSink);
    }
    Arc::new(TelegramSink::from_config(config))
}
