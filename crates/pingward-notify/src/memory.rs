//! In-memory sink that records every alert.

use std::sync::Mutex;

use async_trait::async_trait;

use crate::{Channel, NotificationSink};

/// Records alerts instead of delivering them.
#[derive(Debug, Default)]
pub struct MemorySink {
    alerts: Mutex<Vec<(Channel, String)>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// All recorded alerts in send order.
    pub fn alerts(&self) -> Vec<(Channel, String)> {
        self.alerts
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }

    /// Alert texts sent to `channel`.
    pub fn texts(&self, channel: Channel) -> Vec<String> {
        self.alerts()
            .into_iter()
            .filter(|(c, _)| *c == channel)
            .map(|(_, text)| text)
            .collect()
    }

    /// Number of alerts (any channel) whose text contains `needle`.
    pub fn count_containing(&self, needle: &str) -> usize {
        self.alerts()
            .iter()
            .filter(|(_, text)| text.contains(needle))
            .count()
    }

    pub fn len(&self) -> usize {
        self.alerts.lock().map(|guard| guard.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        if let Ok(mut guard) = self.alerts.lock() {
            guard.clear();
        }
    }
}

#[async_trait]
impl NotificationSink for MemorySink {
    async fn send(&self, channel: Channel, text: &str) {
        if let Ok(mut guard) = self.alerts.lock() {
            guard.push((channel, text.to_string()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn records_in_order_per_channel() {
        let sink = MemorySink::new();
        sink.send(Channel::Updates, "Restarted alpha").await;
        sink.send(Channel::HttpFailures, "Attempt 0 failed").await;
        sink.send(Channel::Updates, "Restarted beta").await;

        assert_eq!(sink.len(), 3);
        assert_eq!(
            sink.texts(Channel::Updates),
            vec!["Restarted alpha", "Restarted beta"]
        );
        assert_eq!(sink.count_containing("Restarted"), 2);

        sink.clear();
        assert!(sink.is_empty());
    }
}
