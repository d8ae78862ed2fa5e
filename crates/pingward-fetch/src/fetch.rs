//! Resilient outbound fetch.
//!
//! [`ResilientFetch::fetch`] never fails from the caller's view: it returns
//! a response or `None`, and reports every failed step to the failures
//! channel of the notification sink.

use std::sync::Arc;
use std::time::Duration;

use reqwest::Method;
use tracing::{debug, info, warn};
use url::Url;

use pingward_core::FetchConfig;
use pingward_notify::{AlertFilter, Channel, SharedSink};

use crate::backoff::BackoffPolicy;
use crate::bypass::{RelayPayload, ResponseType, mark_binary, relay_request};
use crate::classify::{FailureKind, FetchFailure};
use crate::transport::{FetchRequest, FetchResponse, ReqwestTransport, Transport};

/// Alert details longer than this are elided.
const MAX_DETAIL_LEN: usize = 250;

/// Per-call options.
#[derive(Debug, Clone)]
pub struct FetchOptions {
    pub method: Method,
    pub headers: Vec<(String, String)>,
    pub body: Option<serde_json::Value>,
    pub params: Vec<(String, String)>,
    /// Base timeout for the first attempt; the configured default when unset.
    pub timeout: Option<Duration>,
    pub response_type: ResponseType,
    pub max_redirects: usize,
    /// Relay override for this call.
    pub bypass_url: Option<String>,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            method: Method::GET,
            headers: Vec::new(),
            body: None,
            params: Vec::new(),
            timeout: None,
            response_type: ResponseType::Json,
            max_redirects: 5,
            bypass_url: None,
        }
    }
}

impl FetchOptions {
    pub fn get() -> Self {
        Self::default()
    }

    pub fn post_json(body: serde_json::Value) -> Self {
        Self {
            method: Method::POST,
            body: Some(body),
            ..Self::default()
        }
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn param(mut self, name: &str, value: &str) -> Self {
        self.params.push((name.to_string(), value.to_string()));
        self
    }

    pub fn response_type(mut self, response_type: ResponseType) -> Self {
        self.response_type = response_type;
        self
    }

    pub fn bypass_url(mut self, url: &str) -> Self {
        self.bypass_url = Some(url.to_string());
        self
    }
}

/// Retrying HTTP client with timeout escalation and edge bypass.
#[derive(Clone)]
pub struct ResilientFetch {
    transport: Arc<dyn Transport>,
    sink: SharedSink,
    filter: AlertFilter,
    backoff: BackoffPolicy,
    base_timeout: Duration,
    timeout_step: Duration,
    default_retries: u32,
    bypass_url: Option<String>,
    /// Names this watchdog in alert text.
    origin: String,
}

impl ResilientFetch {
    /// Fetcher with default policy over `transport`.
    pub fn new(transport: Arc<dyn Transport>, sink: SharedSink) -> Self {
        Self {
            transport,
            sink,
            filter: AlertFilter::default(),
            backoff: BackoffPolicy::default(),
            base_timeout: Duration::from_secs(30),
            timeout_step: Duration::from_secs(5),
            default_retries: 3,
            bypass_url: None,
            origin: "pingward".to_string(),
        }
    }

    /// Production fetcher over reqwest, configured from `[fetch]`.
    pub fn from_config(config: &FetchConfig, sink: SharedSink) -> Self {
        let transport = ReqwestTransport::new(config.max_redirects, Duration::from_secs(600));
        let mut fetch = Self::new(Arc::new(transport), sink);
        fetch.base_timeout = config.base_timeout();
        fetch.timeout_step = config.timeout_step();
        fetch.default_retries = config.max_retries;
        fetch.bypass_url = config.bypass_url.clone();
        fetch
    }

    pub fn with_origin(mut self, origin: &str) -> Self {
        self.origin = origin.to_string();
        self
    }

    pub fn with_bypass_url(mut self, url: Option<String>) -> Self {
        self.bypass_url = url;
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_filter(mut self, filter: AlertFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_timeouts(mut self, base: Duration, step: Duration) -> Self {
        self.base_timeout = base;
        self.timeout_step = step;
        self
    }

    pub fn default_retries(&self) -> u32 {
        self.default_retries
    }

    /// Deadline for the given attempt: base + attempt × step.
    pub fn attempt_timeout(&self, base: Duration, attempt: u32) -> Duration {
        base + self.timeout_step * attempt
    }

    /// GET `url` with default options and retries.
    pub async fn get(&self, url: &str) -> Option<FetchResponse> {
        self.fetch(url, FetchOptions::get(), self.default_retries).await
    }

    /// Issue a request with up to `max_retries` retries.
    ///
    /// Returns `None` when the URL is invalid, a non-retryable failure
    /// occurs, retries are exhausted, or an edge-blocked request could not
    /// be relayed.
    pub async fn fetch(
        &self,
        url: &str,
        options: FetchOptions,
        max_retries: u32,
    ) -> Option<FetchResponse> {
        let target = match Target::parse(url) {
            Some(target) => target,
            None => {
                warn!(%url, "invalid URL, request skipped");
                return None;
            }
        };

        let request = FetchRequest {
            url: url.to_string(),
            method: options.method.clone(),
            headers: options.headers.clone(),
            body: options.body.clone(),
            params: options.params.clone(),
        };
        let base = options.timeout.unwrap_or(self.base_timeout);
        let mut last_failure: Option<FetchFailure> = None;

        debug!(%url, method = %request.method, max_retries, "fetch starting");

        for attempt in 0..=max_retries {
            let timeout = self.attempt_timeout(base, attempt);
            let failure = match self.attempt(&request, timeout).await {
                Ok(resp) => {
                    debug!(%url, attempt, status = resp.status, "fetch succeeded");
                    return Some(resp);
                }
                Err(failure) => failure,
            };

            if failure.kind == FailureKind::EdgeBlocked {
                return self.bypass(&request, &options, base, &target).await;
            }

            if failure.kind == FailureKind::Timeout {
                self.report(
                    &format!("Timeout on attempt {attempt}"),
                    &format!(
                        "{} host={}\nendpoint={}\ntimeout={}ms",
                        self.origin,
                        target.host,
                        target.endpoint,
                        timeout.as_millis()
                    ),
                    failure.status,
                )
                .await;
            } else {
                self.report(
                    &format!("Attempt {attempt} failed"),
                    &format!(
                        "{} host={}\nendpoint={}\n{}",
                        self.origin,
                        target.host,
                        target.endpoint,
                        elide(&failure.message)
                    ),
                    failure.status,
                )
                .await;
            }

            if !failure.kind.is_retryable() {
                debug!(%url, attempt, kind = %failure.kind, "failure not retryable");
                return None;
            }

            last_failure = Some(failure);
            if attempt < max_retries {
                let delay = self.backoff.next(attempt);
                info!(%url, attempt = attempt + 1, max_retries, delay_ms = delay.as_millis() as u64, "retrying request");
                tokio::time::sleep(delay).await;
            }
        }

        let (message, status) = match &last_failure {
            Some(failure) => (failure.message.as_str(), failure.status),
            None => ("no attempt made", None),
        };
        self.report(
            &format!("All {max_retries} retries exhausted"),
            &format!(
                "{} host={}\nendpoint={}\n{}",
                self.origin,
                target.host,
                target.endpoint,
                elide(message)
            ),
            status,
        )
        .await;
        None
    }

    /// One attempt with no retries and no alerts, for reachability checks.
    pub async fn probe(&self, url: &str, timeout: Duration) -> Result<FetchResponse, FetchFailure> {
        if Target::parse(url).is_none() {
            return Err(FetchFailure::new(FailureKind::Other, format!("invalid URL: {url:?}")));
        }
        self.attempt(&FetchRequest::get(url), timeout).await
    }

    async fn attempt(
        &self,
        request: &FetchRequest,
        timeout: Duration,
    ) -> Result<FetchResponse, FetchFailure> {
        match tokio::time::timeout(timeout, self.transport.send(request)).await {
            Err(_) => Err(FetchFailure::timeout(timeout)),
            Ok(Err(failure)) => Err(failure),
            Ok(Ok(resp)) if resp.is_success() => Ok(resp),
            Ok(Ok(resp)) => Err(FetchFailure::from_status(resp.status, &resp.body)),
        }
    }

    async fn bypass(
        &self,
        request: &FetchRequest,
        options: &FetchOptions,
        timeout: Duration,
        target: &Target,
    ) -> Option<FetchResponse> {
        let location = format!("host={}\nendpoint={}", target.host, target.endpoint);
        self.report(
            "Attempting bypass for",
            &format!("{} {location}", self.origin),
            None,
        )
        .await;

        let relay_url = match options.bypass_url.as_ref().or(self.bypass_url.as_ref()) {
            Some(url) => url,
            None => {
                self.report(
                    "Bypass attempt failed",
                    &format!("{location}\nmsg: bypass relay URL is not configured"),
                    None,
                )
                .await;
                return None;
            }
        };

        let payload =
            RelayPayload::describe(request, options.response_type, timeout, options.max_redirects);
        let relay = relay_request(relay_url, &payload, request);

        match self.attempt(&relay, timeout).await {
            Ok(resp) => {
                self.report(
                    "Successfully executed 403 request",
                    &format!("{} {location}", self.origin),
                    None,
                )
                .await;
                Some(mark_binary(resp, options.response_type))
            }
            Err(failure) => {
                self.report(
                    "Bypass attempt failed",
                    &format!("{location}\n{}", elide(&failure.message)),
                    failure.status,
                )
                .await;
                None
            }
        }
    }

    /// Log a failure step and alert unless the filter suppresses it.
    async fn report(&self, prefix: &str, detail: &str, status: Option<u16>) {
        let text = format!("{prefix}\n\n{detail}");
        warn!(?status, "{}", text.replace('\n', " | "));
        if self.filter.should_send(&text, status) {
            self.sink.send(Channel::HttpFailures, &text).await;
        } else {
            debug!(?status, %prefix, "alert suppressed");
        }
    }
}

/// Host and path+query of a validated URL, for alert text.
struct Target {
    host: String,
    endpoint: String,
}

impl Target {
    fn parse(url: &str) -> Option<Self> {
        if url.trim().is_empty() {
            return None;
        }
        let parsed = Url::parse(url).ok()?;
        let host = match (parsed.host_str(), parsed.port()) {
            (Some(host), Some(port)) => format!("{host}:{port}"),
            (Some(host), None) => host.to_string(),
            (None, _) => return None,
        };
        let endpoint = match parsed.query() {
            Some(query) => format!("{}?{query}", parsed.path()),
            None => parsed.path().to_string(),
        };
        Some(Self { host, endpoint })
    }
}

fn elide(message: &str) -> String {
    if message.len() < MAX_DETAIL_LEN {
        format!("msg: {message}")
    } else {
        "msg: Message too long".to_string()
    }
}
