//! Registry refresh from the upstream client list.

use std::time::Duration;

use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, error, info};

use pingward_fetch::ResilientFetch;
use pingward_notify::{Channel, SharedSink};
use pingward_state::{ClientRegistry, ClientSpec, RefreshSummary};

#[derive(Debug, Error)]
pub enum RefreshError {
    #[error("no registry URL configured")]
    NotConfigured,

    #[error("registry source unavailable: {0}")]
    Unavailable(String),

    #[error("malformed client list: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Pulls the client list and replaces the registry contents with it.
#[derive(Clone)]
pub struct RegistryRefresher {
    fetch: ResilientFetch,
    registry: ClientRegistry,
    sink: SharedSink,
    registry_url: Option<String>,
    service_name: String,
}

impl RegistryRefresher {
    pub fn new(
        fetch: ResilientFetch,
        registry: ClientRegistry,
        sink: SharedSink,
        registry_url: Option<String>,
        service_name: &str,
    ) -> Self {
        Self {
            fetch,
            registry,
            sink,
            registry_url,
            service_name: service_name.to_string(),
        }
    }

    /// Fetch and apply the upstream list once.
    ///
    /// The registry is left untouched on any failure.
    pub async fn refresh(&self) -> Result<RefreshSummary, RefreshError> {
        let url = self
            .registry_url
            .as_deref()
            .ok_or(RefreshError::NotConfigured)?;

        let resp = self
            .fetch
            .get(url)
            .await
            .ok_or_else(|| RefreshError::Unavailable(url.to_string()))?;
        let specs: Vec<ClientSpec> = resp.json()?;
        debug!(count = specs.len(), "client list fetched");

        let summary = self.registry.upsert_all(specs).await;
        self.sink
            .send(
                Channel::Updates,
                &format!("Refreshed Map :: {}", self.service_name),
            )
            .await;
        Ok(summary)
    }

    /// Refresh now and then every `interval` until shutdown.
    pub async fn run(self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(interval_secs = interval.as_secs(), "registry refresher started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.refresh().await {
                        Ok(summary) => debug!(?summary, "registry refresh applied"),
                        Err(RefreshError::NotConfigured) => {
                            debug!("registry refresh skipped, no source configured");
                        }
                        Err(e) => error!(error = %e, "registry refresh failed"),
                    }
                }
                _ = shutdown.changed() => {
                    debug!("registry refresher shutting down");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use pingward_fetch::ReqwestTransport;
    use pingward_notify::MemorySink;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn refresher(url: Option<String>, registry: ClientRegistry, sink: Arc<MemorySink>) -> RegistryRefresher {
        let fetch = ResilientFetch::new(Arc::new(ReqwestTransport::default()), sink.clone());
        RegistryRefresher::new(fetch, registry, sink, url, "pingward-eu")
    }

    #[tokio::test]
    async fn refresh_applies_upstream_list() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/clients"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {"clientId": "a", "repl": "https://a.example", "deployKey": "https://deploy.example/a", "plan": "pro"},
                {"clientId": "b", "endpoint": "https://b.example", "restartKey": "https://deploy.example/b"}
            ])))
            .expect(1)
            .mount(&server)
            .await;

        let registry = ClientRegistry::new();
        let sink = Arc::new(MemorySink::new());
        let summary = refresher(Some(format!("{}/clients", server.uri())), registry.clone(), sink.clone())
            .refresh()
            .await
            .unwrap();

        assert_eq!(summary.added, 2);
        assert_eq!(registry.get("a").await.unwrap().restart_key, "https://deploy.example/a");
        assert_eq!(registry.get("b").await.unwrap().endpoint, "https://b.example");
        assert_eq!(sink.texts(Channel::Updates), vec!["Refreshed Map :: pingward-eu"]);
    }

    #[tokio::test]
    async fn malformed_list_leaves_registry_untouched() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>maintenance</html>"))
            .mount(&server)
            .await;

        let registry = ClientRegistry::new();
        registry
            .upsert_all(vec![ClientSpec::new("keep", "https://keep.example", "")])
            .await;
        let sink = Arc::new(MemorySink::new());
        let err = refresher(Some(server.uri()), registry.clone(), sink.clone())
            .refresh()
            .await
            .unwrap_err();

        assert!(matches!(err, RefreshError::Decode(_)));
        assert_eq!(registry.ids().await, vec!["keep"]);
        assert_eq!(sink.count_containing("Refreshed Map"), 0);
    }

    #[tokio::test]
    async fn missing_source_is_not_configured() {
        let err = refresher(None, ClientRegistry::new(), Arc::new(MemorySink::new()))
            .refresh()
            .await
            .unwrap_err();
        assert!(matches!(err, RefreshError::NotConfigured));
    }

    #[tokio::test]
    async fn run_refreshes_at_startup_and_stops_on_shutdown() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {"clientId": "a", "repl": "https://a.example"}
            ])))
            .mount(&server)
            .await;

        let registry = ClientRegistry::new();
        let (tx, rx) = watch::channel(false);
        let task = tokio::spawn(
            refresher(Some(server.uri()), registry.clone(), Arc::new(MemorySink::new()))
                .run(Duration::from_secs(600), rx),
        );

        for _ in 0..50 {
            if !registry.is_empty().await {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(registry.ids().await, vec!["a"]);

        tx.send(true).unwrap();
        task.await.unwrap();
    }
}
