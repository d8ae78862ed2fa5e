//! ConnectionSequencer — brings clients online one at a time.
//!
//! Activated clients are queued by id. A drain pops entries in FIFO order
//! and runs the staged handshake for each: `tryToConnect` inline, then a
//! detached follow-up that calls `promote` and `markasread` after their
//! delays. Drains never overlap; a drain started while another is running
//! is a no-op.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

use pingward_core::SequencerConfig;
use pingward_state::{ClientId, ClientRegistry};

use crate::busy::BusyFlag;
use crate::remote::RemoteClientApi;

/// A queued handshake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionEntry {
    pub client_id: ClientId,
    pub process_id: String,
}

/// What one drain did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub connected: usize,
    pub failed: usize,
    /// Entries whose client vanished from the registry before their turn.
    pub skipped: usize,
}

/// FIFO handshake queue with a single-drain guard.
pub struct ConnectionSequencer {
    queue: Mutex<VecDeque<ConnectionEntry>>,
    draining: BusyFlag,
    registry: ClientRegistry,
    remote: Arc<dyn RemoteClientApi>,
    connect_timeout: Duration,
    item_delay: Duration,
    promote_delay: Duration,
    mark_read_delay: Duration,
}

impl ConnectionSequencer {
    pub fn new(
        registry: ClientRegistry,
        remote: Arc<dyn RemoteClientApi>,
        config: &SequencerConfig,
    ) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            draining: BusyFlag::default(),
            registry,
            remote,
            connect_timeout: config.connect_timeout(),
            item_delay: config.item_delay(),
            promote_delay: config.promote_delay(),
            mark_read_delay: config.mark_read_delay(),
        }
    }

    /// Queue a handshake for `client_id`.
    ///
    /// An entry already queued for the same client keeps its position and
    /// takes the new process id. Returns the queue length.
    pub fn enqueue(&self, client_id: &str, process_id: &str) -> usize {
        let Ok(mut queue) = self.queue.lock() else {
            warn!(%client_id, "connection queue poisoned, entry dropped");
            return 0;
        };
        match queue.iter_mut().find(|e| e.client_id == client_id) {
            Some(entry) => {
                debug!(%client_id, %process_id, "queued handshake updated");
                entry.process_id = process_id.to_string();
            }
            None => {
                queue.push_back(ConnectionEntry {
                    client_id: client_id.to_string(),
                    process_id: process_id.to_string(),
                });
                debug!(%client_id, %process_id, len = queue.len(), "handshake queued");
            }
        }
        queue.len()
    }

    /// Snapshot of the queue, head first.
    pub fn pending(&self) -> Vec<ConnectionEntry> {
        self.queue
            .lock()
            .map(|q| q.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.queue.lock().map(|q| q.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_draining(&self) -> bool {
        self.draining.is_set()
    }

    fn pop(&self) -> Option<ConnectionEntry> {
        self.queue.lock().ok().and_then(|mut q| q.pop_front())
    }

    /// Drain the queue until empty.
    ///
    /// Returns `None` without doing anything when the queue is empty or
    /// another drain holds the guard.
    pub async fn drain_tick(&self) -> Option<DrainReport> {
        if self.is_empty() {
            return None;
        }
        let Some(_guard) = self.draining.try_enter() else {
            debug!("drain already in progress");
            return None;
        };

        let mut report = DrainReport::default();
        info!(pending = self.len(), "draining connection queue");

        while let Some(entry) = self.pop() {
            let Some(record) = self.registry.get(&entry.client_id).await else {
                warn!(client_id = %entry.client_id, "queued client no longer registered");
                report.skipped += 1;
                continue;
            };

            if self
                .remote
                .try_to_connect(&record.endpoint, &entry.process_id, self.connect_timeout)
                .await
            {
                info!(client_id = %entry.client_id, process_id = %entry.process_id, "client connected");
                report.connected += 1;
                self.spawn_follow_up(entry.client_id, record.endpoint);
            } else {
                warn!(client_id = %entry.client_id, process_id = %entry.process_id, "connect stage failed");
                report.failed += 1;
            }

            tokio::time::sleep(self.item_delay).await;
        }

        info!(
            connected = report.connected,
            failed = report.failed,
            skipped = report.skipped,
            "connection queue drained"
        );
        Some(report)
    }

    fn spawn_follow_up(&self, client_id: ClientId, endpoint: String) {
        let remote = self.remote.clone();
        let promote_delay = self.promote_delay;
        let mark_read_delay = self.mark_read_delay;
        tokio::spawn(async move {
            tokio::time::sleep(promote_delay).await;
            if !remote.promote(&endpoint).await {
                warn!(%client_id, "promote stage failed");
            }
            tokio::time::sleep(mark_read_delay).await;
            if !remote.mark_as_read(&endpoint).await {
                warn!(%client_id, "mark-read stage failed");
            }
            debug!(%client_id, "handshake follow-up finished");
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scripted::{RemoteCall, ScriptedRemote};
    use pingward_state::ClientSpec;
    use tokio::time::Instant;

    async fn setup(ids: &[&str]) -> (Arc<ConnectionSequencer>, Arc<ScriptedRemote>) {
        let registry = ClientRegistry::new();
        registry
            .upsert_all(
                ids.iter()
                    .map(|id| ClientSpec::new(id, &format!("https://{id}.example"), ""))
                    .collect(),
            )
            .await;
        let remote = Arc::new(ScriptedRemote::new());
        let sequencer = Arc::new(ConnectionSequencer::new(
            registry,
            remote.clone(),
            &SequencerConfig::default(),
        ));
        (sequencer, remote)
    }

    #[tokio::test]
    async fn enqueue_dedups_in_place() {
        let (sequencer, _) = setup(&["a", "b"]).await;
        assert_eq!(sequencer.enqueue("a", "p1"), 1);
        assert_eq!(sequencer.enqueue("b", "p2"), 2);
        assert_eq!(sequencer.enqueue("a", "p3"), 2);

        let pending = sequencer.pending();
        assert_eq!(pending[0].client_id, "a");
        assert_eq!(pending[0].process_id, "p3");
        assert_eq!(pending[1].client_id, "b");
    }

    #[tokio::test]
    async fn empty_queue_drain_is_noop() {
        let (sequencer, remote) = setup(&["a"]).await;
        assert_eq!(sequencer.drain_tick().await, None);
        assert!(remote.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn drains_fifo_with_item_delay() {
        let (sequencer, remote) = setup(&["a", "b", "c"]).await;
        sequencer.enqueue("b", "pb");
        sequencer.enqueue("a", "pa");
        sequencer.enqueue("c", "pc");

        let start = Instant::now();
        let report = sequencer.drain_tick().await.unwrap();
        assert_eq!(report, DrainReport { connected: 3, failed: 0, skipped: 0 });
        assert_eq!(start.elapsed(), Duration::from_secs(15));
        assert!(sequencer.is_empty());
        assert!(!sequencer.is_draining());

        let order: Vec<_> = remote
            .calls()
            .into_iter()
            .filter_map(|c| match c {
                RemoteCall::TryToConnect { process_id, .. } => Some(process_id),
                _ => None,
            })
            .collect();
        assert_eq!(order, vec!["pb", "pa", "pc"]);
    }

    #[tokio::test(start_paused = true)]
    async fn follow_up_runs_promote_then_mark_read() {
        let (sequencer, remote) = setup(&["a"]).await;
        sequencer.enqueue("a", "pa");
        sequencer.drain_tick().await.unwrap();

        // 5s item delay already elapsed; promote lands at 35s.
        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(remote.count(|c| matches!(c, RemoteCall::Promote(_))), 1);
        assert_eq!(remote.count(|c| matches!(c, RemoteCall::MarkAsRead(_))), 0);

        tokio::time::sleep(Duration::from_secs(35)).await;
        assert_eq!(
            remote.count(|c| *c == RemoteCall::MarkAsRead("https://a.example".to_string())),
            1
        );
    }

    #[tokio::test(start_paused = true)]
    async fn failed_connect_does_not_stall_queue() {
        let (sequencer, remote) = setup(&["a", "b"]).await;
        remote.refuse_connect("https://a.example");
        sequencer.enqueue("a", "pa");
        sequencer.enqueue("b", "pb");

        let report = sequencer.drain_tick().await.unwrap();
        assert_eq!(report, DrainReport { connected: 1, failed: 1, skipped: 0 });

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(
            remote.count(|c| *c == RemoteCall::Promote("https://a.example".to_string())),
            0
        );
        assert_eq!(
            remote.count(|c| *c == RemoteCall::Promote("https://b.example".to_string())),
            1
        );
    }

    #[tokio::test(start_paused = true)]
    async fn unregistered_client_is_skipped() {
        let (sequencer, remote) = setup(&["a"]).await;
        sequencer.enqueue("ghost", "pg");
        sequencer.enqueue("a", "pa");

        let report = sequencer.drain_tick().await.unwrap();
        assert_eq!(report, DrainReport { connected: 1, failed: 0, skipped: 1 });
        assert_eq!(remote.count(|c| matches!(c, RemoteCall::TryToConnect { .. })), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_drain_is_noop() {
        let (sequencer, remote) = setup(&["a", "b"]).await;
        sequencer.enqueue("a", "pa");
        sequencer.enqueue("b", "pb");

        let first = tokio::spawn({
            let sequencer = sequencer.clone();
            async move { sequencer.drain_tick().await }
        });
        // Let the first drain claim the guard and park on its item delay.
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(sequencer.is_draining());

        sequencer.enqueue("a", "pa2");
        assert_eq!(sequencer.drain_tick().await, None);

        let report = first.await.unwrap().unwrap();
        // The first drain picks up the re-queued entry as well.
        assert_eq!(report.connected, 3);
        assert_eq!(remote.count(|c| matches!(c, RemoteCall::TryToConnect { .. })), 3);
        assert!(!sequencer.is_draining());
    }
}
