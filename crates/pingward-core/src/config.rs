//! pingward.toml configuration parser.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use thiserror::Error;

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Read(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid duration for `{field}`: {value:?}")]
    Duration { field: &'static str, value: String },

    #[error("invalid value for `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PingwardConfig {
    pub server: ServerConfig,
    pub upstream: UpstreamConfig,
    pub notify: NotifyConfig,
    pub fetch: FetchConfig,
    pub monitor: MonitorConfig,
    pub sequencer: SequencerConfig,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub services: Vec<AuxServiceConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { port: 9000 }
    }
}

/// Where the client set comes from and where call requests go.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// URL returning the JSON array of clients. Refresh is disabled when unset.
    pub registry_url: Option<String>,
    pub refresh_interval: String,
    /// Scheduler endpoint that receives forwarded call requests.
    pub events_url: Option<String>,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            registry_url: None,
            refresh_interval: "10m".to_string(),
            events_url: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifyConfig {
    /// Name used in operator-facing alerts ("Refreshed Map :: {service_name}").
    pub service_name: String,
    /// Bot tokens, rotated on every send. No tokens means log-only alerts.
    pub bot_tokens: Vec<String>,
    pub updates_channel: String,
    pub failures_channel: String,
    pub api_base: String,
    pub timeout: String,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            service_name: "pingward".to_string(),
            bot_tokens: Vec::new(),
            updates_channel: String::new(),
            failures_channel: String::new(),
            api_base: "https://api.telegram.org".to_string(),
            timeout: "10s".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    pub base_timeout: String,
    /// Added to the timeout once per retry attempt.
    pub timeout_step: String,
    pub max_retries: u32,
    pub bypass_url: Option<String>,
    pub max_redirects: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            base_timeout: "30s".to_string(),
            timeout_step: "5s".to_string(),
            max_retries: 3,
            bypass_url: None,
            max_redirects: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub tick_interval: String,
    /// A sweep runs on ticks 1, 1 + n, 1 + 2n, ...
    pub sweep_every: u64,
    pub warn_after: String,
    pub critical_after: String,
    pub probe_timeout: String,
    pub restart_timeout: String,
    pub client_delay: String,
    pub restart_threshold: i32,
    pub restart_sentinel: i32,
    /// Endpoint substrings identifying hosts restarted through `{endpoint}/exit`.
    pub exit_hosts: Vec<String>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            tick_interval: "30s".to_string(),
            sweep_every: 4,
            warn_after: "5m".to_string(),
            critical_after: "7m".to_string(),
            probe_timeout: "2m".to_string(),
            restart_timeout: "2m".to_string(),
            client_delay: "2s".to_string(),
            restart_threshold: 5,
            restart_sentinel: -5,
            exit_hosts: vec!["glitch".to_string()],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SequencerConfig {
    pub connect_timeout: String,
    pub item_delay: String,
    pub promote_delay: String,
    pub mark_read_delay: String,
}

impl Default for SequencerConfig {
    fn default() -> Self {
        Self {
            connect_timeout: "10s".to_string(),
            item_delay: "5s".to_string(),
            promote_delay: "35s".to_string(),
            mark_read_delay: "35s".to_string(),
        }
    }
}

/// An external service supervised alongside the client fleet.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuxServiceConfig {
    pub url: String,
    /// Deploy hook; `{url}/exit` is used when absent.
    pub restart_url: Option<String>,
    #[serde(default = "default_aux_timeout")]
    pub timeout: String,
}

fn default_aux_timeout() -> String {
    "55s".to_string()
}

impl PingwardConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: PingwardConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Apply `PINGWARD_*` overrides from the process environment.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary lookup (the environment in production).
    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(port) = lookup("PINGWARD_PORT") {
            self.server.port = port.trim().parse().map_err(|_| ConfigError::Invalid {
                field: "PINGWARD_PORT",
                reason: format!("{port:?} is not a port number"),
            })?;
        }
        if let Some(url) = lookup("PINGWARD_REGISTRY_URL") {
            self.upstream.registry_url = non_empty(url);
        }
        if let Some(url) = lookup("PINGWARD_EVENTS_URL") {
            self.upstream.events_url = non_empty(url);
        }
        if let Some(url) = lookup("PINGWARD_BYPASS_URL") {
            self.fetch.bypass_url = non_empty(url);
        }
        if let Some(tokens) = lookup("PINGWARD_BOT_TOKENS") {
            self.notify.bot_tokens = tokens
                .split(',')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(chat) = lookup("PINGWARD_UPDATES_CHANNEL") {
            self.notify.updates_channel = chat;
        }
        if let Some(chat) = lookup("PINGWARD_FAILURES_CHANNEL") {
            self.notify.failures_channel = chat;
        }
        self.validate()
    }

    /// Check every duration string and numeric bound.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let durations = [
            ("upstream.refresh_interval", &self.upstream.refresh_interval),
            ("notify.timeout", &self.notify.timeout),
            ("fetch.base_timeout", &self.fetch.base_timeout),
            ("fetch.timeout_step", &self.fetch.timeout_step),
            ("monitor.tick_interval", &self.monitor.tick_interval),
            ("monitor.warn_after", &self.monitor.warn_after),
            ("monitor.critical_after", &self.monitor.critical_after),
            ("monitor.probe_timeout", &self.monitor.probe_timeout),
            ("monitor.restart_timeout", &self.monitor.restart_timeout),
            ("monitor.client_delay", &self.monitor.client_delay),
            ("sequencer.connect_timeout", &self.sequencer.connect_timeout),
            ("sequencer.item_delay", &self.sequencer.item_delay),
            ("sequencer.promote_delay", &self.sequencer.promote_delay),
            ("sequencer.mark_read_delay", &self.sequencer.mark_read_delay),
        ];
        for (field, value) in durations {
            require_duration(field, value)?;
        }
        for service in &self.services {
            require_duration("services.timeout", &service.timeout)?;
        }

        // Interval timers panic on a zero period.
        let periods = [
            ("upstream.refresh_interval", &self.upstream.refresh_interval),
            ("monitor.tick_interval", &self.monitor.tick_interval),
            ("sequencer.item_delay", &self.sequencer.item_delay),
        ];
        for (field, value) in periods {
            if require_duration(field, value)?.is_zero() {
                return Err(ConfigError::Invalid {
                    field,
                    reason: "must be greater than zero".to_string(),
                });
            }
        }

        if self.monitor.sweep_every == 0 {
            return Err(ConfigError::Invalid {
                field: "monitor.sweep_every",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.monitor.restart_sentinel >= 0 {
            return Err(ConfigError::Invalid {
                field: "monitor.restart_sentinel",
                reason: "must be negative".to_string(),
            });
        }
        if self.monitor.critical_after() < self.monitor.warn_after() {
            return Err(ConfigError::Invalid {
                field: "monitor.critical_after",
                reason: "must not be shorter than monitor.warn_after".to_string(),
            });
        }
        Ok(())
    }
}

impl UpstreamConfig {
    pub fn refresh_interval(&self) -> Duration {
        duration_or(&self.refresh_interval, Duration::from_secs(600))
    }
}

impl NotifyConfig {
    pub fn timeout(&self) -> Duration {
        duration_or(&self.timeout, Duration::from_secs(10))
    }
}

impl FetchConfig {
    pub fn base_timeout(&self) -> Duration {
        duration_or(&self.base_timeout, Duration::from_secs(30))
    }

    pub fn timeout_step(&self) -> Duration {
        duration_or(&self.timeout_step, Duration::from_secs(5))
    }
}

impl MonitorConfig {
    pub fn tick_interval(&self) -> Duration {
        duration_or(&self.tick_interval, Duration::from_secs(30))
    }

    pub fn warn_after(&self) -> Duration {
        duration_or(&self.warn_after, Duration::from_secs(5 * 60))
    }

    pub fn critical_after(&self) -> Duration {
        duration_or(&self.critical_after, Duration::from_secs(7 * 60))
    }

    pub fn probe_timeout(&self) -> Duration {
        duration_or(&self.probe_timeout, Duration::from_secs(120))
    }

    pub fn restart_timeout(&self) -> Duration {
        duration_or(&self.restart_timeout, Duration::from_secs(120))
    }

    pub fn client_delay(&self) -> Duration {
        duration_or(&self.client_delay, Duration::from_secs(2))
    }
}

impl SequencerConfig {
    pub fn connect_timeout(&self) -> Duration {
        duration_or(&self.connect_timeout, Duration::from_secs(10))
    }

    pub fn item_delay(&self) -> Duration {
        duration_or(&self.item_delay, Duration::from_secs(5))
    }

    pub fn promote_delay(&self) -> Duration {
        duration_or(&self.promote_delay, Duration::from_secs(35))
    }

    pub fn mark_read_delay(&self) -> Duration {
        duration_or(&self.mark_read_delay, Duration::from_secs(35))
    }
}

impl AuxServiceConfig {
    pub fn timeout(&self) -> Duration {
        duration_or(&self.timeout, Duration::from_secs(55))
    }

    /// Restart hook for this service.
    pub fn restart_target(&self) -> String {
        match &self.restart_url {
            Some(url) => url.clone(),
            None => format!("{}/exit", self.url.trim_end_matches('/')),
        }
    }
}

/// Parse a duration string like "5s", "500ms", "2m", "1h".
///
/// A bare number is read as seconds.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(ms) = s.strip_suffix("ms") {
        ms.trim().parse::<u64>().ok().map(Duration::from_millis)
    } else if let Some(secs) = s.strip_suffix('s') {
        secs.trim().parse::<u64>().ok().map(Duration::from_secs)
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.trim()
            .parse::<u64>()
            .ok()
            .and_then(|m| m.checked_mul(60))
            .map(Duration::from_secs)
    } else if let Some(hours) = s.strip_suffix('h') {
        hours
            .trim()
            .parse::<u64>()
            .ok()
            .and_then(|h| h.checked_mul(3600))
            .map(Duration::from_secs)
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    }
}

fn require_duration(field: &'static str, value: &str) -> Result<Duration, ConfigError> {
    parse_duration(value).ok_or_else(|| ConfigError::Duration {
        field,
        value: value.to_string(),
    })
}

fn duration_or(value: &str, fallback: Duration) -> Duration {
    parse_duration(value).unwrap_or(fallback)
}

fn non_empty(value: String) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
