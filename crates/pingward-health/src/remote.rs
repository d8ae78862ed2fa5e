//! The endpoints a client exposes, as seen from the watchdog.
//!
//! [`RemoteClientApi`] is the seam the monitor and sequencer talk through.
//! [`HttpRemote`] is the production implementation over
//! [`ResilientFetch`].

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::warn;

use pingward_fetch::{FetchFailure, FetchOptions, ResilientFetch};

/// Calls the watchdog makes against a client (or auxiliary service).
#[async_trait]
pub trait RemoteClientApi: Send + Sync {
    /// Single reachability check, no retries, no alerts.
    async fn probe(&self, url: &str, timeout: Duration) -> Result<(), FetchFailure>;

    /// Hit a restart hook. `true` on HTTP 200/201.
    async fn restart(&self, target: &str, timeout: Duration) -> bool;

    /// The process identity the client currently runs as.
    async fn process_id(&self, endpoint: &str, timeout: Duration) -> Option<String>;

    /// First handshake stage.
    async fn try_to_connect(&self, endpoint: &str, process_id: &str, timeout: Duration) -> bool;

    async fn promote(&self, endpoint: &str) -> bool;

    async fn mark_as_read(&self, endpoint: &str) -> bool;
}

#[derive(Debug, Deserialize)]
struct ProcessIdBody {
    #[serde(rename = "ProcessId")]
    process_id: String,
}

/// [`RemoteClientApi`] over HTTP.
#[derive(Clone)]
pub struct HttpRemote {
    fetch: ResilientFetch,
}

impl HttpRemote {
    pub fn new(fetch: ResilientFetch) -> Self {
        Self { fetch }
    }
}

fn join(endpoint: &str, path: &str) -> String {
    format!("{}/{}", endpoint.trim_end_matches('/'), path)
}

#[async_trait]
impl RemoteClientApi for HttpRemote {
    async fn probe(&self, url: &str, timeout: Duration) -> Result<(), FetchFailure> {
        self.fetch.probe(url, timeout).await.map(|_| ())
    }

    async fn restart(&self, target: &str, timeout: Duration) -> bool {
        // Retrying a deploy hook can queue several deploys; one attempt only.
        match self
            .fetch
            .fetch(target, FetchOptions::get().timeout(timeout), 0)
            .await
        {
            Some(resp) => matches!(resp.status, 200 | 201),
            None => false,
        }
    }

    async fn process_id(&self, endpoint: &str, timeout: Duration) -> Option<String> {
        let resp = self
            .fetch
            .fetch(
                &join(endpoint, "getprocessid"),
                FetchOptions::get().timeout(timeout),
                0,
            )
            .await?;
        match resp.json::<ProcessIdBody>() {
            Ok(body) => Some(body.process_id),
            Err(e) => {
                warn!(%endpoint, error = %e, "malformed process id response");
                None
            }
        }
    }

    async fn try_to_connect(&self, endpoint: &str, process_id: &str, timeout: Duration) -> bool {
        let url = join(endpoint, &format!("tryToConnect/{process_id}"));
        self.fetch
            .fetch(&url, FetchOptions::get().timeout(timeout), 0)
            .await
            .is_some()
    }

    async fn promote(&self, endpoint: &str) -> bool {
        self.fetch.get(&join(endpoint, "promote")).await.is_some()
    }

    async fn mark_as_read(&self, endpoint: &str) -> bool {
        self.fetch.get(&join(endpoint, "markasread")).await.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use pingward_fetch::{FailureKind, ReqwestTransport};
    use pingward_notify::MemorySink;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn remote(sink: Arc<MemorySink>) -> HttpRemote {
        HttpRemote::new(ResilientFetch::new(Arc::new(ReqwestTransport::default()), sink))
    }

    #[tokio::test]
    async fn process_id_reads_field() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/getprocessid"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "ProcessId": "proc-7",
                "uptime": 12
            })))
            .expect(1)
            .mount(&server)
            .await;

        let sink = Arc::new(MemorySink::new());
        let pid = remote(sink.clone())
            .process_id(&format!("{}/", server.uri()), Duration::from_secs(10))
            .await;
        assert_eq!(pid.as_deref(), Some("proc-7"));
        assert!(sink.is_empty());
    }

    #[tokio::test]
    async fn malformed_process_id_is_none() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/getprocessid"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .mount(&server)
            .await;

        let pid = remote(Arc::new(MemorySink::new()))
            .process_id(&server.uri(), Duration::from_secs(10))
            .await;
        assert_eq!(pid, None);
    }

    #[tokio::test]
    async fn restart_accepts_200_and_201_only() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/deploy/ok"))
            .respond_with(ResponseTemplate::new(201))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/deploy/accepted"))
            .respond_with(ResponseTemplate::new(202))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/deploy/broken"))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&server)
            .await;

        let sink = Arc::new(MemorySink::new());
        let remote = remote(sink.clone());
        let timeout = Duration::from_secs(5);
        assert!(remote.restart(&format!("{}/deploy/ok", server.uri()), timeout).await);
        assert!(!remote.restart(&format!("{}/deploy/accepted", server.uri()), timeout).await);
        assert!(!remote.restart(&format!("{}/deploy/broken", server.uri()), timeout).await);
        assert_eq!(sink.count_containing("Attempt 0 failed"), 1);
    }

    #[tokio::test]
    async fn handshake_paths() {
        let server = MockServer::start().await;
        for p in ["/tryToConnect/proc-7", "/promote", "/markasread"] {
            Mock::given(method("GET"))
                .and(path(p))
                .respond_with(ResponseTemplate::new(200))
                .expect(1)
                .mount(&server)
                .await;
        }

        let remote = remote(Arc::new(MemorySink::new()));
        let endpoint = server.uri();
        assert!(remote.try_to_connect(&endpoint, "proc-7", Duration::from_secs(10)).await);
        assert!(remote.promote(&endpoint).await);
        assert!(remote.mark_as_read(&endpoint).await);
    }

    #[tokio::test]
    async fn probe_is_silent() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .expect(1)
            .mount(&server)
            .await;

        let sink = Arc::new(MemorySink::new());
        let failure = remote(sink.clone())
            .probe(&server.uri(), Duration::from_secs(5))
            .await
            .unwrap_err();
        assert_eq!(failure.kind, FailureKind::ServerError);
        assert!(sink.is_empty());
    }
}
