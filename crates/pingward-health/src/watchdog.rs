//! The watchdog context.
//!
//! Built once at process start and handed to the inbound API and the
//! timers. Cloning is cheap; every clone shares the same registry, queue
//! and guards.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use pingward_core::PingwardConfig;
use pingward_fetch::{FetchOptions, ResilientFetch};
use pingward_notify::SharedSink;
use pingward_state::{ClientRecord, ClientRegistry, StateError, StateResult, epoch_millis};

use crate::busy::BusyFlag;
use crate::checker::LivenessPhase;
use crate::monitor::{LivenessMonitor, SweepReport};
use crate::refresher::{RefreshError, RegistryRefresher};
use crate::remote::{HttpRemote, RemoteClientApi};
use crate::sequencer::ConnectionSequencer;

/// A client record with its derived liveness view.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientStatus {
    #[serde(flatten)]
    pub record: ClientRecord,
    pub phase: LivenessPhase,
    /// Seconds since the last heartbeat or probe success.
    pub stale_secs: Option<u64>,
    /// Whether a handshake is queued for this client.
    pub queued: bool,
}

#[derive(Clone)]
pub struct Watchdog {
    registry: ClientRegistry,
    sequencer: Arc<ConnectionSequencer>,
    monitor: Arc<LivenessMonitor>,
    refresher: RegistryRefresher,
    remote: Arc<dyn RemoteClientApi>,
    fetch: ResilientFetch,
    sweeping: BusyFlag,
    events_url: Option<String>,
    connect_timeout: Duration,
    sweep_every: u64,
}

impl Watchdog {
    /// Production wiring: reqwest-backed fetch and HTTP remote.
    pub fn from_config(config: &PingwardConfig, sink: SharedSink) -> Self {
        let fetch = ResilientFetch::from_config(&config.fetch, sink.clone())
            .with_origin(&config.notify.service_name);
        let remote = Arc::new(HttpRemote::new(fetch.clone()));
        Self::new(config, fetch, remote, sink)
    }

    /// Wire the context over explicit collaborators.
    pub fn new(
        config: &PingwardConfig,
        fetch: ResilientFetch,
        remote: Arc<dyn RemoteClientApi>,
        sink: SharedSink,
    ) -> Self {
        let registry = ClientRegistry::new();
        let sequencer = Arc::new(ConnectionSequencer::new(
            registry.clone(),
            remote.clone(),
            &config.sequencer,
        ));
        let monitor = Arc::new(
            LivenessMonitor::new(registry.clone(), remote.clone(), sink.clone(), &config.monitor)
                .with_services(config.services.clone()),
        );
        let refresher = RegistryRefresher::new(
            fetch.clone(),
            registry.clone(),
            sink,
            config.upstream.registry_url.clone(),
            &config.notify.service_name,
        );

        Self {
            registry,
            sequencer,
            monitor,
            refresher,
            remote,
            fetch,
            sweeping: BusyFlag::default(),
            events_url: config.upstream.events_url.clone(),
            connect_timeout: config.sequencer.connect_timeout(),
            sweep_every: config.monitor.sweep_every.max(1),
        }
    }

    pub fn registry(&self) -> &ClientRegistry {
        &self.registry
    }

    pub fn sequencer(&self) -> &ConnectionSequencer {
        &self.sequencer
    }

    pub fn monitor(&self) -> &LivenessMonitor {
        &self.monitor
    }

    pub fn refresher(&self) -> &RegistryRefresher {
        &self.refresher
    }

    /// Record an externally reported heartbeat.
    pub async fn heartbeat(&self, client_id: &str) -> StateResult<ClientRecord> {
        let record = self
            .registry
            .update(client_id, |r| r.last_heartbeat_at = Some(epoch_millis()))
            .await?;
        debug!(%client_id, "heartbeat received");
        Ok(record)
    }

    /// A client reports `process_id` as its active instance.
    ///
    /// Confirmed against the client's own `/getprocessid`; on match the
    /// heartbeat clock is stamped and the client queued for the handshake.
    pub async fn activate(&self, client_id: &str, process_id: &str) -> StateResult<bool> {
        let record = self
            .registry
            .get(client_id)
            .await
            .ok_or_else(|| StateError::UnknownClient(client_id.to_string()))?;

        let reported = self
            .remote
            .process_id(&record.endpoint, self.connect_timeout)
            .await;
        if reported.as_deref() != Some(process_id) {
            info!(%client_id, %process_id, ?reported, "process id mismatch, activation ignored");
            return Ok(false);
        }

        // The downtime counter only moves on probe outcomes.
        self.registry
            .update(client_id, |r| r.last_heartbeat_at = Some(epoch_millis()))
            .await?;
        let queued = self.sequencer.enqueue(client_id, process_id);
        info!(%client_id, %process_id, queued, "client activated");
        Ok(true)
    }

    /// Forward a call request for a known client to the events service.
    pub async fn request_call(&self, client_id: &str, chat_id: &str, kind: &str) -> StateResult<bool> {
        if self.registry.get(client_id).await.is_none() {
            return Err(StateError::UnknownClient(client_id.to_string()));
        }
        let Some(events_url) = self.events_url.as_deref() else {
            warn!(%client_id, "call request dropped, no events URL configured");
            return Ok(false);
        };

        let body = serde_json::json!({
            "chatId": chat_id,
            "profile": client_id,
            "type": kind,
        });
        let forwarded = self
            .fetch
            .fetch(events_url, FetchOptions::post_json(body), 3)
            .await
            .is_some();
        info!(%client_id, %chat_id, %kind, forwarded, "call request forwarded");
        Ok(forwarded)
    }

    pub async fn refresh(&self) -> Result<pingward_state::RefreshSummary, RefreshError> {
        self.refresher.refresh().await
    }

    pub async fn status(&self, client_id: &str) -> Option<ClientStatus> {
        let record = self.registry.get(client_id).await?;
        Some(self.describe(record))
    }

    pub async fn statuses(&self) -> Vec<ClientStatus> {
        self.registry
            .list()
            .await
            .into_iter()
            .map(|r| self.describe(r))
            .collect()
    }

    fn describe(&self, record: ClientRecord) -> ClientStatus {
        let queued = self
            .sequencer
            .pending()
            .iter()
            .any(|e| e.client_id == record.client_id);
        ClientStatus {
            phase: self.monitor.policy().phase(record.downtime),
            stale_secs: record.staleness(epoch_millis()).map(|d| d.as_secs()),
            queued,
            record,
        }
    }

    /// Run one sweep unless another is in flight.
    pub async fn sweep_once(&self) -> Option<SweepReport> {
        let Some(_guard) = self.sweeping.try_enter() else {
            debug!("sweep already in progress");
            return None;
        };
        Some(self.monitor.sweep().await)
    }

    /// Handle tick number `tick` (zero-based).
    ///
    /// Every tick starts a drain; ticks 0, n, 2n, ... also start a sweep.
    /// Both run detached and are guarded against overlap.
    pub fn on_tick(&self, tick: u64) {
        let sequencer = self.sequencer.clone();
        tokio::spawn(async move {
            sequencer.drain_tick().await;
        });

        if tick % self.sweep_every == 0 {
            let watchdog = self.clone();
            tokio::spawn(async move {
                watchdog.sweep_once().await;
            });
        }
    }

    /// Drive ticks every `interval` until shutdown.
    pub async fn run(self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(
            interval_secs = interval.as_secs(),
            sweep_every = self.sweep_every,
            "watchdog loop started"
        );

        let mut tick: u64 = 0;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.on_tick(tick);
                    tick = tick.wrapping_add(1);
                }
                _ = shutdown.changed() => {
                    debug!("watchdog loop shutting down");
                    break;
                }
            }
        }
    }
}
