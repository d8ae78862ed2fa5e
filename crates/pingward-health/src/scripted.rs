//! Scripted [`RemoteClientApi`] for tests.
//!
//! Available to other crates through the `test-util` feature.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use pingward_fetch::{FailureKind, FetchFailure};

use crate::remote::RemoteClientApi;

/// A call observed by [`ScriptedRemote`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteCall {
    Probe(String),
    Restart(String),
    ProcessId(String),
    TryToConnect { endpoint: String, process_id: String },
    Promote(String),
    MarkAsRead(String),
}

/// Scripted [`RemoteClientApi`]: everything is reachable and succeeds
/// unless told otherwise.
#[derive(Debug, Default)]
pub struct ScriptedRemote {
    down: Mutex<HashSet<String>>,
    failing_restarts: Mutex<HashSet<String>>,
    refused: Mutex<HashSet<String>>,
    process_ids: Mutex<HashMap<String, String>>,
    calls: Mutex<Vec<RemoteCall>>,
}

impl ScriptedRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make probes of `url` fail (or succeed again).
    pub fn set_down(&self, url: &str, down: bool) {
        if let Ok(mut set) = self.down.lock() {
            if down {
                set.insert(url.to_string());
            } else {
                set.remove(url);
            }
        }
    }

    pub fn fail_restart(&self, target: &str) {
        if let Ok(mut set) = self.failing_restarts.lock() {
            set.insert(target.to_string());
        }
    }

    /// Make `tryToConnect` against `endpoint` fail.
    pub fn refuse_connect(&self, endpoint: &str) {
        if let Ok(mut set) = self.refused.lock() {
            set.insert(endpoint.to_string());
        }
    }

    pub fn set_process_id(&self, endpoint: &str, process_id: &str) {
        if let Ok(mut map) = self.process_ids.lock() {
            map.insert(endpoint.to_string(), process_id.to_string());
        }
    }

    /// Every call in order.
    pub fn calls(&self) -> Vec<RemoteCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn count(&self, predicate: impl Fn(&RemoteCall) -> bool) -> usize {
        self.calls().iter().filter(|c| predicate(*c)).count()
    }

    pub fn restarts(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                RemoteCall::Restart(target) => Some(target),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: RemoteCall) {
        debug!(?call, "scripted remote call");
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call);
        }
    }

    fn contains(set: &Mutex<HashSet<String>>, key: &str) -> bool {
        set.lock().map(|s| s.contains(key)).unwrap_or(false)
    }
}

#[async_trait]
impl RemoteClientApi for ScriptedRemote {
    async fn probe(&self, url: &str, _timeout: Duration) -> Result<(), FetchFailure> {
        self.record(RemoteCall::Probe(url.to_string()));
        if Self::contains(&self.down, url) {
            Err(FetchFailure::new(FailureKind::Network, "connection refused"))
        } else {
            Ok(())
        }
    }

    async fn restart(&self, target: &str, _timeout: Duration) -> bool {
        self.record(RemoteCall::Restart(target.to_string()));
        !Self::contains(&self.failing_restarts, target)
    }

    async fn process_id(&self, endpoint: &str, _timeout: Duration) -> Option<String> {
        self.record(RemoteCall::ProcessId(endpoint.to_string()));
        self.process_ids
            .lock()
            .ok()
            .and_then(|map| map.get(endpoint).cloned())
    }

    async fn try_to_connect(&self, endpoint: &str, process_id: &str, _timeout: Duration) -> bool {
        self.record(RemoteCall::TryToConnect {
            endpoint: endpoint.to_string(),
            process_id: process_id.to_string(),
        });
        !Self::contains(&self.refused, endpoint)
    }

    async fn promote(&self, endpoint: &str) -> bool {
        self.record(RemoteCall::Promote(endpoint.to_string()));
        true
    }

    async fn mark_as_read(&self, endpoint: &str) -> bool {
        self.record(RemoteCall::MarkAsRead(endpoint.to_string()));
        true
    }
}
