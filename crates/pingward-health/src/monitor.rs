//! Liveness monitor — the periodic sweep over every registered client.
//!
//! For each client, in registry order and one at a time:
//!
//! ```text
//! staleness ── critical ──► probe ── fail ──► restart + "Not responding"
//!     │
//!     └────── warn ───────► "not responding - N min"
//!
//! probe (reused from above when already done)
//!     ├── ok   ──► downtime = 0, stamp probe clock
//!     └── fail ──► downtime += 1, past threshold ──► sentinel + restart
//!
//! sleep client_delay
//! ```
//!
//! After the clients, the auxiliary services are probed and restarted
//! under the same probe → alert → restart → alert policy.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use pingward_core::{AuxServiceConfig, MonitorConfig};
use pingward_notify::{Channel, SharedSink};
use pingward_state::{ClientRecord, ClientRegistry, epoch_millis};

use crate::checker::{EscalationPolicy, ProbeOutcome, Staleness};
use crate::remote::RemoteClientApi;

/// Counts from one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub checked: usize,
    pub warned: usize,
    pub critical: usize,
    pub unreachable: usize,
    pub restarts: usize,
    pub restart_failures: usize,
    pub services_down: usize,
}

/// Runs sweeps; holds no per-client state of its own.
pub struct LivenessMonitor {
    registry: ClientRegistry,
    remote: Arc<dyn RemoteClientApi>,
    sink: SharedSink,
    policy: EscalationPolicy,
    probe_timeout: Duration,
    restart_timeout: Duration,
    client_delay: Duration,
    services: Vec<AuxServiceConfig>,
}

impl LivenessMonitor {
    pub fn new(
        registry: ClientRegistry,
        remote: Arc<dyn RemoteClientApi>,
        sink: SharedSink,
        config: &MonitorConfig,
    ) -> Self {
        Self {
            registry,
            remote,
            sink,
            policy: EscalationPolicy::from_config(config),
            probe_timeout: config.probe_timeout(),
            restart_timeout: config.restart_timeout(),
            client_delay: config.client_delay(),
            services: Vec::new(),
        }
    }

    /// Supervise `services` after each client sweep.
    pub fn with_services(mut self, services: Vec<AuxServiceConfig>) -> Self {
        self.services = services;
        self
    }

    pub fn policy(&self) -> &EscalationPolicy {
        &self.policy
    }

    /// One full pass over clients and auxiliary services.
    pub async fn sweep(&self) -> SweepReport {
        let mut report = SweepReport::default();
        let ids = self.registry.ids().await;
        info!(clients = ids.len(), services = self.services.len(), "sweep starting");

        for id in ids {
            // A refresh may have retired the client since the id list was taken.
            let Some(record) = self.registry.get(&id).await else {
                debug!(client_id = %id, "client retired mid-sweep");
                continue;
            };
            self.check_client(&record, &mut report).await;
            tokio::time::sleep(self.client_delay).await;
        }

        for service in &self.services {
            self.check_service(service, &mut report).await;
        }

        info!(
            checked = report.checked,
            warned = report.warned,
            critical = report.critical,
            unreachable = report.unreachable,
            restarts = report.restarts,
            services_down = report.services_down,
            "sweep finished"
        );
        report
    }

    async fn check_client(&self, record: &ClientRecord, report: &mut SweepReport) {
        let id = record.client_id.as_str();
        report.checked += 1;

        let mut probed: Option<ProbeOutcome> = None;
        let mut restarted = false;
        match self.policy.staleness(record, epoch_millis()) {
            Staleness::Critical(age) => {
                report.critical += 1;
                warn!(client_id = %id, stale_secs = age.as_secs(), "client critically stale");
                let outcome = self.probe(record).await;
                probed = Some(outcome);
                if outcome == ProbeOutcome::Unreachable {
                    self.restart_client(record, report).await;
                    restarted = true;
                    self.alert(format!(
                        "{id} : Not responding | url = {}",
                        record.endpoint
                    ))
                    .await;
                }
            }
            Staleness::Warn(age) => {
                report.warned += 1;
                self.alert(format!("{id} : not responding - {} min", age.as_secs() / 60))
                    .await;
            }
            Staleness::Fresh(_) | Staleness::Unknown => {}
        }

        let outcome = match probed {
            Some(outcome) => outcome,
            None => self.probe(record).await,
        };

        let mut restart = false;
        let applied = self
            .registry
            .update(id, |r| {
                let verdict = self.policy.record_probe(r.downtime, outcome);
                r.downtime = verdict.downtime;
                if outcome == ProbeOutcome::Reachable {
                    r.last_probe_ok_at = Some(epoch_millis());
                }
                restart = verdict.restart;
            })
            .await;

        match applied {
            Ok(updated) => {
                debug!(client_id = %id, downtime = updated.downtime, ?outcome, "probe recorded");
            }
            Err(e) => {
                debug!(client_id = %id, error = %e, "probe result dropped");
                return;
            }
        }

        if outcome == ProbeOutcome::Unreachable {
            report.unreachable += 1;
        }
        // At most one restart per client per sweep; the counter still moves
        // to the sentinel when the critical path already fired.
        if restart && !restarted {
            self.restart_client(record, report).await;
        }
    }

    async fn probe(&self, record: &ClientRecord) -> ProbeOutcome {
        match self.remote.probe(&record.endpoint, self.probe_timeout).await {
            Ok(()) => ProbeOutcome::Reachable,
            Err(failure) => {
                warn!(
                    client_id = %record.client_id,
                    kind = %failure.kind,
                    error = %failure.message,
                    "probe failed"
                );
                ProbeOutcome::Unreachable
            }
        }
    }

    async fn restart_client(&self, record: &ClientRecord, report: &mut SweepReport) {
        let id = record.client_id.as_str();
        let restarted = match self.policy.restart_target(record) {
            Some(target) => {
                info!(client_id = %id, %target, "restarting client");
                self.remote.restart(&target, self.restart_timeout).await
            }
            None => {
                warn!(client_id = %id, "no restart hook configured");
                false
            }
        };

        if restarted {
            report.restarts += 1;
            self.alert(format!("Restarted {id}")).await;
        } else {
            report.restart_failures += 1;
            self.alert(format!("Failed to Restart {id}")).await;
        }
    }

    async fn check_service(&self, service: &AuxServiceConfig, report: &mut SweepReport) {
        let timeout = service.timeout();
        if let Err(failure) = self.remote.probe(&service.url, timeout).await {
            report.services_down += 1;
            warn!(url = %service.url, kind = %failure.kind, "auxiliary service unreachable");
            self.alert(format!("{} NOT Reachable", service.url)).await;

            if self.remote.restart(&service.restart_target(), timeout).await {
                self.alert(format!("Restarted {}", service.url)).await;
            } else {
                self.alert(format!("Cannot restart {} server", service.url))
                    .await;
            }
        }
    }

    async fn alert(&self, text: String) {
        info!(alert = %text, "sending fleet alert");
        self.sink.send(Channel::Updates, &text).await;
    }
}
