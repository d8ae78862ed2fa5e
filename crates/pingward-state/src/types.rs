//! Domain types for the client registry.
//!
//! Timestamps are Unix epoch milliseconds.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::{StateError, StateResult};

/// Unique identifier for a client.
pub type ClientId = String;

/// Identity of a client as delivered by a registry refresh.
///
/// Accepts the upstream field names (`repl`, `deployKey`) as aliases and
/// ignores any other fields the upstream sends along.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ClientSpec {
    pub client_id: ClientId,
    /// Base URL of the client service.
    #[serde(alias = "repl")]
    pub endpoint: String,
    /// Deploy hook URL used to restart the client.
    #[serde(alias = "deployKey", default)]
    pub restart_key: String,
}

impl ClientSpec {
    pub fn new(client_id: &str, endpoint: &str, restart_key: &str) -> Self {
        Self {
            client_id: client_id.to_string(),
            endpoint: endpoint.to_string(),
            restart_key: restart_key.to_string(),
        }
    }

    pub fn validate(&self) -> StateResult<()> {
        if self.client_id.trim().is_empty() {
            return Err(StateError::InvalidSpec("empty client id".to_string()));
        }
        if self.endpoint.trim().is_empty() {
            return Err(StateError::InvalidSpec(format!(
                "client {} has no endpoint",
                self.client_id
            )));
        }
        Ok(())
    }
}

/// Everything the watchdog knows about one client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ClientRecord {
    pub client_id: ClientId,
    pub endpoint: String,
    pub restart_key: String,
    /// Consecutive failed probes; negative while restarts are suppressed.
    pub downtime: i32,
    /// Last externally reported heartbeat.
    pub last_heartbeat_at: Option<u64>,
    /// Last successful reachability probe.
    pub last_probe_ok_at: Option<u64>,
    pub updated_at: u64,
}

impl ClientRecord {
    /// Fresh record: healthy, no clocks.
    pub fn from_spec(spec: ClientSpec) -> Self {
        Self {
            client_id: spec.client_id,
            endpoint: spec.endpoint.trim_end_matches('/').to_string(),
            restart_key: spec.restart_key,
            downtime: 0,
            last_heartbeat_at: None,
            last_probe_ok_at: None,
            updated_at: epoch_millis(),
        }
    }

    /// Replace identity fields from a refresh, keeping liveness state.
    pub fn refresh_from(&mut self, spec: ClientSpec) {
        self.endpoint = spec.endpoint.trim_end_matches('/').to_string();
        self.restart_key = spec.restart_key;
        self.updated_at = epoch_millis();
    }

    /// Most recent evidence of life from either clock.
    pub fn last_alive_at(&self) -> Option<u64> {
        match (self.last_heartbeat_at, self.last_probe_ok_at) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        }
    }

    /// Time since the last evidence of life, `None` if never seen.
    pub fn staleness(&self, now: u64) -> Option<Duration> {
        self.last_alive_at()
            .map(|at| Duration::from_millis(now.saturating_sub(at)))
    }
}

/// Current Unix time in milliseconds.
pub fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spec_accepts_upstream_field_names() {
        let json = r#"{
            "clientId": "alpha1",
            "repl": "https://alpha.example/",
            "deployKey": "https://deploy.example/hook?key=1",
            "channelLink": "ignored",
            "downTime": 3
        }"#;
        let spec: ClientSpec = serde_json::from_str(json).unwrap();
        assert_eq!(spec.client_id, "alpha1");
        assert_eq!(spec.endpoint, "https://alpha.example/");
        assert_eq!(spec.restart_key, "https://deploy.example/hook?key=1");
    }

    #[test]
    fn spec_accepts_native_field_names() {
        let json = r#"{"clientId":"b","endpoint":"https://b.example","restartKey":"k"}"#;
        let spec: ClientSpec = serde_json::from_str(json).unwrap();
        assert_eq!(spec, ClientSpec::new("b", "https://b.example", "k"));
    }

    #[test]
    fn spec_validation() {
        assert!(ClientSpec::new("a", "https://a.example", "").validate().is_ok());
        assert!(matches!(
            ClientSpec::new(" ", "https://a.example", "").validate(),
            Err(StateError::InvalidSpec(_))
        ));
        assert!(matches!(
            ClientSpec::new("a", "", "").validate(),
            Err(StateError::InvalidSpec(_))
        ));
    }

    #[test]
    fn record_trims_trailing_slash() {
        let record = ClientRecord::from_spec(ClientSpec::new("a", "https://a.example/", "k"));
        assert_eq!(record.endpoint, "https://a.example");
        assert_eq!(record.downtime, 0);
        assert_eq!(record.last_alive_at(), None);
    }

    #[test]
    fn staleness_uses_latest_clock() {
        let mut record = ClientRecord::from_spec(ClientSpec::new("a", "https://a.example", "k"));
        assert_eq!(record.staleness(10_000), None);

        record.last_heartbeat_at = Some(1_000);
        assert_eq!(record.staleness(10_000), Some(Duration::from_millis(9_000)));

        record.last_probe_ok_at = Some(4_000);
        assert_eq!(record.staleness(10_000), Some(Duration::from_millis(6_000)));

        // Clock skew never yields negative staleness.
        assert_eq!(record.staleness(0), Some(Duration::ZERO));
    }

    #[test]
    fn record_serializes_camel_case() {
        let record = ClientRecord::from_spec(ClientSpec::new("a", "https://a.example", "k"));
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["clientId"], "a");
        assert_eq!(value["restartKey"], "k");
        assert!(value.get("lastHeartbeatAt").is_some());
    }
}
