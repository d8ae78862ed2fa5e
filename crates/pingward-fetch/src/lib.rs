//! pingward-fetch — the outbound HTTP layer used by every probe, restart,
//! handshake call, and registry refresh.
//!
//! # Attempt loop
//!
//! ```text
//! fetch(url, options, max_retries)
//!   ├── validate URL            → None on empty/unparseable
//!   └── for attempt in 0..=max_retries
//!       ├── send with deadline base + attempt × step
//!       ├── 2xx                  → Some(response)
//!       ├── 403 / 495            → one relay call → Some / None (no retry)
//!       ├── report failure       (429 and noisy messages are not alerted)
//!       ├── not retryable        → None
//!       └── sleep min(500ms × 2^attempt, 30s) + up to 20% jitter
//! ```
//!
//! Failures never propagate to the caller; they surface as `None` plus
//! alerts on the `HttpFailures` channel.

pub mod backoff;
pub mod bypass;
pub mod classify;
pub mod fetch;
pub mod transport;

pub use backoff::BackoffPolicy;
pub use bypass::{ResponseType, is_binary_content_type};
pub use classify::{FailureKind, FetchFailure, classify_status};
pub use fetch::{FetchOptions, ResilientFetch};
pub use transport::{FetchRequest, FetchResponse, ReqwestTransport, Transport};
