//! Alert noise policy.
//!
//! Rate-limited responses and a handful of expected, benign failures are
//! logged but never sent to operators.

/// Substrings matched case-sensitively.
const EXACT_NOISE: &[&str] = &["INPUT_USER_DEACTIVATED", "ECONNREFUSED"];

/// Substrings matched against the lowercased text.
const FOLDED_NOISE: &[&str] = &["too many req", "could not find", "connection refused"];

/// Decides whether an alert is worth sending.
#[derive(Debug, Clone)]
pub struct AlertFilter {
    exact: Vec<String>,
    folded: Vec<String>,
}

impl Default for AlertFilter {
    fn default() -> Self {
        Self {
            exact: EXACT_NOISE.iter().map(|s| s.to_string()).collect(),
            folded: FOLDED_NOISE.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl AlertFilter {
    /// Add a case-insensitive noise substring.
    pub fn with_noise(mut self, substring: &str) -> Self {
        self.folded.push(substring.to_lowercase());
        self
    }

    /// True when the alert should reach the sink.
    pub fn should_send(&self, text: &str, status: Option<u16>) -> bool {
        if status == Some(429) {
            return false;
        }
        if self.exact.iter().any(|noise| text.contains(noise.as_str())) {
            return false;
        }
        let lowered = text.to_lowercase();
        !self
            .folded
            .iter()
            .any(|noise| lowered.contains(noise.as_str()))
    }
}
