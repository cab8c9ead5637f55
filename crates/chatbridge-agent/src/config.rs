//! Agent configuration loading from file and environment variables.

use crate::link::LinkSettings;
use chatbridge_dedup::TrackerSettings;
use chatbridge_types::{DEFAULT_MAX_FRAME_BYTES, DEFAULT_RECONNECT_DELAY_MS};
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub link: LinkConfig,

    #[serde(default)]
    pub dedup: DedupConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Transport link settings.
#[derive(Debug, Clone, Deserialize)]
pub struct LinkConfig {
    /// WebSocket URL of the relay's link endpoint.
    #[serde(default = "default_url")]
    pub url: String,

    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Delay before reconnecting after the link drops.
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,

    /// Interval between liveness pings while the link is live.
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,

    /// How long to wait for a pong before dropping the link.
    #[serde(default = "default_pong_timeout_secs")]
    pub pong_timeout_secs: u64,

    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,

    /// Envelopes held while the link is not live; the oldest is dropped
    /// beyond this.
    #[serde(default = "default_pending_limit")]
    pub pending_limit: usize,
}

/// Dedup tracker settings.
#[derive(Debug, Clone, Deserialize)]
pub struct DedupConfig {
    /// Fingerprint retention in seconds; 0 keeps them for the process
    /// lifetime.
    #[serde(default)]
    pub retention_secs: u64,

    #[serde(default = "default_buckets")]
    pub buckets: usize,

    #[serde(default = "default_node_cache_capacity")]
    pub node_cache_capacity: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub json: bool,
}

fn default_url() -> String {
    "ws://127.0.0.1:8080/ws".to_string()
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_reconnect_delay_ms() -> u64 {
    DEFAULT_RECONNECT_DELAY_MS
}

fn default_heartbeat_interval_secs() -> u64 {
    30
}

fn default_pong_timeout_secs() -> u64 {
    10
}

fn default_max_frame_bytes() -> usize {
    DEFAULT_MAX_FRAME_BYTES
}

fn default_pending_limit() -> usize {
    1024
}

fn default_buckets() -> usize {
    12
}

fn default_node_cache_capacity() -> usize {
    4096
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            connect_timeout_secs: default_connect_timeout_secs(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
            pong_timeout_secs: default_pong_timeout_secs(),
            max_frame_bytes: default_max_frame_bytes(),
            pending_limit: default_pending_limit(),
        }
    }
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            retention_secs: 0,
            buckets: default_buckets(),
            node_cache_capacity: default_node_cache_capacity(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl LinkConfig {
    pub fn settings(&self) -> LinkSettings {
        LinkSettings {
            url: self.url.clone(),
            connect_timeout: Duration::from_secs(self.connect_timeout_secs.max(1)),
            reconnect_delay: Duration::from_millis(self.reconnect_delay_ms),
            heartbeat_interval: Duration::from_secs(self.heartbeat_interval_secs.max(1)),
            pong_timeout: Duration::from_secs(self.pong_timeout_secs.max(1)),
            max_frame_bytes: self.max_frame_bytes,
            pending_limit: self.pending_limit.max(1),
        }
    }
}

impl DedupConfig {
    pub fn tracker_settings(&self) -> TrackerSettings {
        TrackerSettings {
            retention: (self.retention_secs > 0).then(|| Duration::from_secs(self.retention_secs)),
            buckets: self.buckets.max(1),
            node_cache_capacity: self.node_cache_capacity,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid link url {url}: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
}

/// Loads configuration from a TOML file, falling back to defaults.
///
/// Environment variable overrides:
/// - `CHATBRIDGE_LINK_URL` (or `WS_URL`) overrides `link.url`
/// - `CHATBRIDGE_LOG_LEVEL` overrides `logging.level`
/// - `CHATBRIDGE_LOG_JSON` overrides `logging.json`
///
/// # Errors
///
/// Returns `ConfigError` if the file exists but cannot be read or parsed, or
/// if the resulting link URL is not a valid URL.
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    let mut config = match path {
        Some(p) => match std::fs::read_to_string(p) {
            Ok(contents) => toml::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = p, "config file not found, using defaults");
                Config::default()
            }
            Err(e) => return Err(ConfigError::FileRead(e)),
        },
        None => Config::default(),
    };

    apply_env_overrides(&mut config, |key| std::env::var(key).ok());

    url::Url::parse(&config.link.url).map_err(|source| ConfigError::InvalidUrl {
        url: config.link.url.clone(),
        source,
    })?;
    Ok(config)
}

fn apply_env_overrides(config: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(url) = lookup("CHATBRIDGE_LINK_URL").or_else(|| lookup("WS_URL")) {
        config.link.url = url;
    }
    if let Some(level) = lookup("CHATBRIDGE_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Some(json) = lookup("CHATBRIDGE_LOG_JSON") {
        config.logging.json = json == "true" || json == "1";
    }
}
