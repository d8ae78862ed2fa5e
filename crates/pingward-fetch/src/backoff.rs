//! Retry backoff with proportional jitter.
//!
//! The delay for attempt `n` is `first × factor^n`, clamped to `max`, plus a
//! random extra of up to `jitter × base`. The base depends only on the
//! attempt number, so jitter never compounds across attempts.

use std::time::Duration;

use rand::Rng;

/// Retry backoff policy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    /// Delay before the first retry.
    pub first: Duration,
    /// Cap on the base delay (jitter is added on top).
    pub max: Duration,
    /// Multiplicative growth per attempt.
    pub factor: f64,
    /// Upper bound of the random extra, as a fraction of the base.
    pub jitter: f64,
}

impl Default for BackoffPolicy {
    /// 500ms doubling to a 30s cap, with up to 20% jitter.
    fn default() -> Self {
        Self {
            first: Duration::from_millis(500),
            max: Duration::from_secs(30),
            factor: 2.0,
            jitter: 0.2,
        }
    }
}

impl BackoffPolicy {
    /// Base delay for `attempt` (0-indexed), before jitter.
    pub fn base(&self, attempt: u32) -> Duration {
        let exp = attempt.min(i32::MAX as u32) as i32;
        let secs = self.first.as_secs_f64() * self.factor.powi(exp);
        if !secs.is_finite() || secs < 0.0 || secs > self.max.as_secs_f64() {
            self.max
        } else {
            Duration::from_secs_f64(secs)
        }
    }

    /// Delay for `attempt` with random jitter.
    pub fn next(&self, attempt: u32) -> Duration {
        let unit: f64 = rand::thread_rng().gen_range(0.0..1.0);
        self.with_jitter_unit(attempt, unit)
    }

    /// Delay for `attempt` given a jitter draw `unit` in `[0, 1)`.
    ///
    /// Truncated to whole milliseconds.
    pub fn with_jitter_unit(&self, attempt: u32, unit: f64) -> Duration {
        let base = self.base(attempt);
        let extra = base.as_secs_f64() * self.jitter * unit.clamp(0.0, 1.0);
        let total = base + Duration::from_secs_f64(extra);
        Duration::from_millis(total.as_millis() as u64)
    }
}
