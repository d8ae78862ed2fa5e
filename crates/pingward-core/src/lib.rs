//! pingward-core — configuration shared by every pingward crate.
//!
//! The daemon reads a single `pingward.toml`; every section is optional
//! and falls back to the watchdog's built-in timing policy.

pub mod config;

pub use config::{
    AuxServiceConfig, ConfigError, FetchConfig, MonitorConfig, NotifyConfig, PingwardConfig,
    SequencerConfig, ServerConfig, UpstreamConfig, parse_duration,
};
