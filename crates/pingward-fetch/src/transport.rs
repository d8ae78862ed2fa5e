//! The wire seam under [`ResilientFetch`](crate::ResilientFetch).
//!
//! A [`Transport`] performs exactly one request and reports what happened.
//! It does not retry, time out, or judge status codes; the fetch layer
//! owns all of that.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Method;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::classify::FetchFailure;

/// One outbound request.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchRequest {
    pub url: String,
    pub method: Method,
    pub headers: Vec<(String, String)>,
    /// JSON body, if any.
    pub body: Option<serde_json::Value>,
    /// Query parameters appended to `url`.
    pub params: Vec<(String, String)>,
}

impl FetchRequest {
    pub fn get(url: &str) -> Self {
        Self {
            url: url.to_string(),
            method: Method::GET,
            headers: Vec::new(),
            body: None,
            params: Vec::new(),
        }
    }
}

/// A response of any status.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchResponse {
    pub status: u16,
    /// Header names are lowercased.
    pub headers: HashMap<String, String>,
    pub body: Bytes,
    /// Set when the body is binary content rather than text or JSON.
    pub binary: bool,
}

impl FetchResponse {
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: HashMap::new(),
            body: body.into(),
            binary: false,
        }
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.to_string());
        self
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn content_type(&self) -> Option<&str> {
        self.headers.get("content-type").map(String::as_str)
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Performs a single request.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send `request`. Any HTTP response is `Ok`; only transport-level
    /// failures are `Err`.
    async fn send(&self, request: &FetchRequest) -> Result<FetchResponse, FetchFailure>;
}

/// Production transport backed by reqwest.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Build a transport that follows at most `max_redirects` redirects.
    ///
    /// `ceiling` is a last-resort client timeout; per-attempt deadlines are
    /// enforced above the transport.
    pub fn new(max_redirects: usize, ceiling: Duration) -> Self {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::limited(max_redirects))
            .timeout(ceiling)
            .user_agent(concat!("pingward/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { client }
    }

    pub fn from_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl Default for ReqwestTransport {
    fn default() -> Self {
        Self::new(5, Duration::from_secs(600))
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: &FetchRequest) -> Result<FetchResponse, FetchFailure> {
        let mut builder = self.client.request(request.method.clone(), &request.url);
        if !request.params.is_empty() {
            builder = builder.query(&request.params);
        }
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let resp = builder
            .send()
            .await
            .map_err(|e| FetchFailure::from_reqwest(&e))?;

        let status = resp.status().as_u16();
        let headers = resp
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
            })
            .collect();
        let body = resp
            .bytes()
            .await
            .map_err(|e| FetchFailure::from_reqwest(&e))?;

        debug!(url = %request.url, status, bytes = body.len(), "response received");
        Ok(FetchResponse {
            status,
            headers,
            body,
            binary: false,
        })
    }
}
