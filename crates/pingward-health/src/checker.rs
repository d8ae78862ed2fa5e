//! Escalation policy.
//!
//! Pure decision logic: how a probe outcome moves a client's downtime
//! counter, when a restart fires, how stale a client is, and where its
//! restart hook lives. Nothing here performs I/O.

use std::time::Duration;

use serde::Serialize;
use tracing::{debug, warn};

use pingward_core::MonitorConfig;
use pingward_state::ClientRecord;

/// Result of a single reachability probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// The endpoint answered 2xx.
    Reachable,
    /// Non-2xx, timeout, or connection failure.
    Unreachable,
}

/// Where a client sits in the escalation cycle, derived from its counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LivenessPhase {
    /// Counter is zero.
    Healthy,
    /// Failures accumulating toward a restart.
    Degrading,
    /// A restart was just fired (counter at the sentinel).
    RestartTriggered,
    /// Climbing back from the sentinel; restarts suppressed.
    RecoveringSuppressed,
}

/// Staleness class of a client's last evidence of life.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Staleness {
    /// Neither clock has ever been set.
    Unknown,
    Fresh(Duration),
    /// Past the warn threshold: soft alert only.
    Warn(Duration),
    /// Past the critical threshold: check and remediate.
    Critical(Duration),
}

/// Counter transition produced by one probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeVerdict {
    pub downtime: i32,
    /// A restart must be fired in this step.
    pub restart: bool,
}

/// Thresholds driving escalation.
#[derive(Debug, Clone)]
pub struct EscalationPolicy {
    restart_threshold: i32,
    restart_sentinel: i32,
    warn_after: Duration,
    critical_after: Duration,
    exit_hosts: Vec<String>,
}

impl Default for EscalationPolicy {
    fn default() -> Self {
        Self::from_config(&MonitorConfig::default())
    }
}

impl EscalationPolicy {
    pub fn from_config(config: &MonitorConfig) -> Self {
        Self {
            restart_threshold: config.restart_threshold,
            restart_sentinel: config.restart_sentinel,
            warn_after: config.warn_after(),
            critical_after: config.critical_after(),
            exit_hosts: config.exit_hosts.clone(),
        }
    }

    /// Policy with custom counter bounds (for testing).
    pub fn with_thresholds(restart_threshold: i32, restart_sentinel: i32) -> Self {
        Self {
            restart_threshold,
            restart_sentinel,
            ..Self::default()
        }
    }

    /// Apply one probe outcome to `downtime`.
    ///
    /// Success always resets to zero, sentinel included. Failure
    /// increments; once the new value exceeds the threshold the counter
    /// drops to the sentinel and a restart fires in the same step.
    pub fn record_probe(&self, downtime: i32, outcome: ProbeOutcome) -> ProbeVerdict {
        match outcome {
            ProbeOutcome::Reachable => {
                if downtime != 0 {
                    debug!(previous = downtime, "client recovered");
                }
                ProbeVerdict {
                    downtime: 0,
                    restart: false,
                }
            }
            ProbeOutcome::Unreachable => {
                let next = downtime.saturating_add(1);
                if next > self.restart_threshold {
                    warn!(
                        failures = next,
                        threshold = self.restart_threshold,
                        "restart threshold exceeded"
                    );
                    ProbeVerdict {
                        downtime: self.restart_sentinel,
                        restart: true,
                    }
                } else {
                    ProbeVerdict {
                        downtime: next,
                        restart: false,
                    }
                }
            }
        }
    }

    pub fn phase(&self, downtime: i32) -> LivenessPhase {
        match downtime {
            0 => LivenessPhase::Healthy,
            d if d > 0 => LivenessPhase::Degrading,
            d if d <= self.restart_sentinel => LivenessPhase::RestartTriggered,
            _ => LivenessPhase::RecoveringSuppressed,
        }
    }

    /// Classify how long `record` has been silent as of `now` (epoch ms).
    pub fn staleness(&self, record: &ClientRecord, now: u64) -> Staleness {
        match record.staleness(now) {
            None => Staleness::Unknown,
            Some(age) if age > self.critical_after => Staleness::Critical(age),
            Some(age) if age > self.warn_after => Staleness::Warn(age),
            Some(age) => Staleness::Fresh(age),
        }
    }

    /// Restart hook for `record`: `{endpoint}/exit` on exit-class hosts,
    /// otherwise the restart key. `None` when neither is available.
    pub fn restart_target(&self, record: &ClientRecord) -> Option<String> {
        if self.is_exit_host(&record.endpoint) {
            return Some(format!("{}/exit", record.endpoint.trim_end_matches('/')));
        }
        let key = record.restart_key.trim();
        (!key.is_empty()).then(|| key.to_string())
    }

    fn is_exit_host(&self, endpoint: &str) -> bool {
        let host = url::Url::parse(endpoint)
            .ok()
            .and_then(|u| u.host_str().map(str::to_ascii_lowercase));
        match host {
            Some(host) => self
                .exit_hosts
                .iter()
                .any(|class| !class.is_empty() && host.contains(&class.to_ascii_lowercase())),
            None => false,
        }
    }
}
