//! Failure classification for outbound requests.
//!
//! Every decision the fetch layer makes (retry, bypass, alert) is taken on
//! a [`FailureKind`], never on the raw error text.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Closed set of outbound failure kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The attempt exceeded its deadline.
    Timeout,
    /// Connection refused/reset/unreachable or DNS failure.
    Network,
    /// Blocked by edge protection (HTTP 403/495).
    EdgeBlocked,
    /// HTTP 429.
    RateLimited,
    /// HTTP 408/500/502/503/504.
    ServerError,
    /// Anything else.
    Other,
}

impl FailureKind {
    /// Whether the normal attempt loop may try again.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            FailureKind::Timeout
                | FailureKind::Network
                | FailureKind::RateLimited
                | FailureKind::ServerError
        )
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FailureKind::Timeout => "timeout",
            FailureKind::Network => "network",
            FailureKind::EdgeBlocked => "edge blocked",
            FailureKind::RateLimited => "rate limited",
            FailureKind::ServerError => "server error",
            FailureKind::Other => "other",
        };
        f.write_str(name)
    }
}

/// Map an HTTP status to a failure kind.
pub fn classify_status(status: u16) -> FailureKind {
    match status {
        403 | 495 => FailureKind::EdgeBlocked,
        429 => FailureKind::RateLimited,
        408 | 500 | 502 | 503 | 504 => FailureKind::ServerError,
        _ => FailureKind::Other,
    }
}

/// A classified outbound failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct FetchFailure {
    pub kind: FailureKind,
    /// HTTP status when the server answered.
    pub status: Option<u16>,
    pub message: String,
}

impl FetchFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            status: None,
            message: message.into(),
        }
    }

    pub fn timeout(after: Duration) -> Self {
        Self::new(
            FailureKind::Timeout,
            format!("request timed out after {}ms", after.as_millis()),
        )
    }

    /// Failure for a non-2xx response, with the most useful message found in its body.
    pub fn from_status(status: u16, body: &[u8]) -> Self {
        Self {
            kind: classify_status(status),
            status: Some(status),
            message: describe_body(status, body),
        }
    }

    /// Classify a transport error from reqwest.
    pub fn from_reqwest(err: &reqwest::Error) -> Self {
        let message = error_chain(err);
        let lowered = message.to_lowercase();

        let kind = if err.is_timeout() || lowered.contains("timed out") {
            FailureKind::Timeout
        } else if err.is_connect() || err.is_request() || looks_like_network(&lowered) {
            FailureKind::Network
        } else {
            FailureKind::Other
        };

        match err.status() {
            Some(status) => Self {
                kind: classify_status(status.as_u16()),
                status: Some(status.as_u16()),
                message,
            },
            None => Self::new(kind, message),
        }
    }
}

fn looks_like_network(lowered: &str) -> bool {
    [
        "connection refused",
        "connection reset",
        "unreachable",
        "dns error",
        "failed to lookup address",
        "broken pipe",
    ]
    .iter()
    .any(|needle| lowered.contains(needle))
}

/// Flatten an error and its sources into one line.
fn error_chain(err: &dyn std::error::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        let text = cause.to_string();
        if !message.contains(&text) {
            message.push_str(": ");
            message.push_str(&text);
        }
        source = cause.source();
    }
    message
}

/// Keys commonly carrying a human-readable error in JSON bodies.
const MESSAGE_KEYS: &[&str] = &[
    "message",
    "errors",
    "ErrorMessage",
    "errorMessage",
    "UserMessage",
    "error",
    "description",
];

fn describe_body(status: u16, body: &[u8]) -> String {
    if let Ok(value) = serde_json::from_slice::<serde_json::Value>(body) {
        for key in MESSAGE_KEYS {
            match value.get(*key) {
                Some(serde_json::Value::String(s)) if !s.is_empty() => return s.clone(),
                Some(serde_json::Value::Null) | None => {}
                Some(other) => return other.to_string(),
            }
        }
    }

    let text = String::from_utf8_lossy(body);
    let text = text.trim();
    if !text.is_empty() && text.len() <= 500 {
        return text.to_string();
    }

    match reqwest::StatusCode::from_u16(status)
        .ok()
        .and_then(|s| s.canonical_reason())
    {
        Some(reason) => format!("HTTP {status} {reason}"),
        None => format!("HTTP {status}"),
    }
}
