//! ClientRegistry — authoritative client id → record map.
//!
//! Iteration order is by client id. No operation creates a record
//! implicitly: heartbeats, probes and handshakes for unknown ids fail with
//! [`StateError::UnknownClient`] and the caller decides how to report it.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::error::{StateError, StateResult};
use crate::types::*;

/// Outcome of a wholesale refresh.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct RefreshSummary {
    pub added: usize,
    pub kept: usize,
    pub removed: usize,
    pub skipped: usize,
}

/// Thread-safe, in-memory client registry.
#[derive(Clone, Default)]
pub struct ClientRegistry {
    clients: Arc<RwLock<BTreeMap<ClientId, ClientRecord>>>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the full client set.
    ///
    /// Ids present before and after keep their downtime counter and
    /// clocks; new ids start healthy; ids missing from `specs` are dropped.
    /// Invalid specs are skipped. When an id repeats, the last spec wins.
    pub async fn upsert_all(&self, specs: Vec<ClientSpec>) -> RefreshSummary {
        let mut summary = RefreshSummary::default();
        let mut clients = self.clients.write().await;
        let mut previous = std::mem::take(&mut *clients);

        for spec in specs {
            if let Err(e) = spec.validate() {
                warn!(error = %e, "skipping client spec");
                summary.skipped += 1;
                continue;
            }
            let id = spec.client_id.clone();
            if let Some(existing) = clients.get_mut(&id) {
                existing.refresh_from(spec);
                continue;
            }
            let record = match previous.remove(&id) {
                Some(mut existing) => {
                    existing.refresh_from(spec);
                    summary.kept += 1;
                    existing
                }
                None => {
                    summary.added += 1;
                    ClientRecord::from_spec(spec)
                }
            };
            clients.insert(id, record);
        }

        summary.removed = previous.len();
        for id in previous.keys() {
            debug!(client_id = %id, "client retired by refresh");
        }
        info!(
            total = clients.len(),
            added = summary.added,
            kept = summary.kept,
            removed = summary.removed,
            skipped = summary.skipped,
            "client registry refreshed"
        );
        summary
    }

    /// Snapshot of one record.
    pub async fn get(&self, client_id: &str) -> Option<ClientRecord> {
        self.clients.read().await.get(client_id).cloned()
    }

    /// Apply `change` to the current record and return the result.
    ///
    /// Fields `change` does not touch are preserved. The client id cannot
    /// be changed through this call.
    pub async fn update<F>(&self, client_id: &str, change: F) -> StateResult<ClientRecord>
    where
        F: FnOnce(&mut ClientRecord),
    {
        let mut clients = self.clients.write().await;
        let record = clients
            .get_mut(client_id)
            .ok_or_else(|| StateError::UnknownClient(client_id.to_string()))?;
        change(record);
        record.client_id = client_id.to_string();
        record.updated_at = epoch_millis();
        Ok(record.clone())
    }

    /// Snapshot of every record, ordered by id.
    pub async fn list(&self) -> Vec<ClientRecord> {
        self.clients.read().await.values().cloned().collect()
    }

    /// Every client id, ordered.
    pub async fn ids(&self) -> Vec<ClientId> {
        self.clients.read().await.keys().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.clients.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.clients.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(id: &str) -> ClientSpec {
        ClientSpec::new(id, &format!("https://{id}.example"), &format!("https://deploy.example/{id}"))
    }

    #[tokio::test]
    async fn upsert_all_populates_registry() {
        let registry = ClientRegistry::new();
        let summary = registry.upsert_all(vec![spec("b"), spec("a")]).await;

        assert_eq!(summary.added, 2);
        assert_eq!(registry.len().await, 2);
        assert_eq!(registry.ids().await, vec!["a", "b"]);
        let record = registry.get("a").await.unwrap();
        assert_eq!(record.endpoint, "https://a.example");
        assert_eq!(record.downtime, 0);
    }

    #[tokio::test]
    async fn refresh_keeps_liveness_state_of_surviving_clients() {
        let registry = ClientRegistry::new();
        registry.upsert_all(vec![spec("a"), spec("b")]).await;
        registry
            .update("a", |r| {
                r.downtime = 3;
                r.last_heartbeat_at = Some(42);
            })
            .await
            .unwrap();

        let mut moved = spec("a");
        moved.endpoint = "https://a2.example".to_string();
        let summary = registry.upsert_all(vec![moved, spec("c")]).await;

        assert_eq!(summary, RefreshSummary { added: 1, kept: 1, removed: 1, skipped: 0 });
        let a = registry.get("a").await.unwrap();
        assert_eq!(a.endpoint, "https://a2.example");
        assert_eq!(a.downtime, 3);
        assert_eq!(a.last_heartbeat_at, Some(42));
        assert!(registry.get("b").await.is_none());
        assert_eq!(registry.get("c").await.unwrap().downtime, 0);
    }

    #[tokio::test]
    async fn duplicate_ids_collapse_to_one_record() {
        let registry = ClientRegistry::new();
        let mut second = spec("a");
        second.restart_key = "latest".to_string();
        let summary = registry.upsert_all(vec![spec("a"), second]).await;

        assert_eq!(summary.added, 1);
        assert_eq!(registry.len().await, 1);
        assert_eq!(registry.get("a").await.unwrap().restart_key, "latest");
    }

    #[tokio::test]
    async fn invalid_specs_are_skipped() {
        let registry = ClientRegistry::new();
        let summary = registry
            .upsert_all(vec![spec("a"), ClientSpec::new("", "https://x.example", "")])
            .await;
        assert_eq!(summary.skipped, 1);
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn update_preserves_untouched_fields() {
        let registry = ClientRegistry::new();
        registry.upsert_all(vec![spec("a")]).await;
        registry
            .update("a", |r| r.last_heartbeat_at = Some(1_000))
            .await
            .unwrap();

        let updated = registry
            .update("a", |r| r.last_probe_ok_at = Some(2_000))
            .await
            .unwrap();
        assert_eq!(updated.last_heartbeat_at, Some(1_000));
        assert_eq!(updated.last_probe_ok_at, Some(2_000));
        assert_eq!(updated.restart_key, "https://deploy.example/a");
    }

    #[tokio::test]
    async fn update_cannot_rename_client() {
        let registry = ClientRegistry::new();
        registry.upsert_all(vec![spec("a")]).await;
        let updated = registry
            .update("a", |r| r.client_id = "z".to_string())
            .await
            .unwrap();
        assert_eq!(updated.client_id, "a");
        assert!(registry.get("z").await.is_none());
    }

    #[tokio::test]
    async fn unknown_client_is_never_created() {
        let registry = ClientRegistry::new();
        let err = registry.update("ghost", |r| r.downtime = 0).await.unwrap_err();
        assert_eq!(err, StateError::UnknownClient("ghost".to_string()));
        assert!(registry.is_empty().await);
    }
}
