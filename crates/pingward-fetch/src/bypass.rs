//! Edge-bypass relay.
//!
//! Requests rejected by edge protection (403/495) are re-issued once by a
//! relay service that performs the call server-side. The relay accepts a
//! JSON description of the original request and answers with the
//! upstream's response.

use std::time::Duration;

use reqwest::Method;
use serde::Serialize;

use crate::transport::{FetchRequest, FetchResponse};

/// How the caller wants the response body treated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub enum ResponseType {
    #[default]
    #[serde(rename = "json")]
    Json,
    #[serde(rename = "text")]
    Text,
    /// Raw bytes.
    #[serde(rename = "arraybuffer")]
    Bytes,
}

/// Wire body POSTed to the relay.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayPayload {
    pub url: String,
    pub method: String,
    pub headers: serde_json::Map<String, serde_json::Value>,
    pub data: Option<serde_json::Value>,
    pub params: serde_json::Map<String, serde_json::Value>,
    pub response_type: ResponseType,
    /// Milliseconds.
    pub timeout: u64,
    pub follow_redirects: bool,
    pub max_redirects: usize,
}

impl RelayPayload {
    pub fn describe(
        original: &FetchRequest,
        response_type: ResponseType,
        timeout: Duration,
        max_redirects: usize,
    ) -> Self {
        let to_map = |pairs: &[(String, String)]| {
            pairs
                .iter()
                .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
                .collect::<serde_json::Map<_, _>>()
        };
        Self {
            url: original.url.clone(),
            method: original.method.as_str().to_string(),
            headers: to_map(&original.headers),
            data: original.body.clone(),
            params: to_map(&original.params),
            response_type,
            timeout: timeout.as_millis() as u64,
            follow_redirects: max_redirects != 0,
            max_redirects,
        }
    }
}

/// Build the relay request for `original`.
///
/// The caller's headers ride along on the relay call after the JSON
/// content type, so a caller-supplied `content-type` wins.
pub fn relay_request(relay_url: &str, payload: &RelayPayload, original: &FetchRequest) -> FetchRequest {
    let mut headers = vec![("content-type".to_string(), "application/json".to_string())];
    for (name, value) in &original.headers {
        headers.retain(|(existing, _)| !existing.eq_ignore_ascii_case(name));
        headers.push((name.clone(), value.clone()));
    }

    FetchRequest {
        url: relay_url.to_string(),
        method: Method::POST,
        headers,
        body: serde_json::to_value(payload).ok(),
        params: Vec::new(),
    }
}

/// Content types returned to callers as raw bytes.
pub fn is_binary_content_type(content_type: &str) -> bool {
    let ct = content_type.to_ascii_lowercase();
    ct.contains("application/octet-stream")
        || ct.contains("image/")
        || ct.contains("audio/")
        || ct.contains("video/")
        || ct.contains("application/pdf")
}

/// Flag a relay response as binary when the caller asked for bytes or the
/// relay answered with binary content.
pub fn mark_binary(mut resp: FetchResponse, response_type: ResponseType) -> FetchResponse {
    resp.binary = response_type == ResponseType::Bytes
        || resp.content_type().is_some_and(is_binary_content_type);
    resp
}
