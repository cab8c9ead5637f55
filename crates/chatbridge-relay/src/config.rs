//! Relay configuration loading from file and environment variables.

use chatbridge_types::DEFAULT_MAX_FRAME_BYTES;
use serde::Deserialize;
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;
use thiserror::Error;

/// Top-level relay configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Listener settings for the agent link and the event ingest endpoint.
    #[serde(default)]
    pub server: ServerConfig,

    /// Target platform credentials and request tuning.
    #[serde(default)]
    pub platform: PlatformConfig,

    /// Delivery pump settings.
    #[serde(default)]
    pub relay: RelayConfig,

    /// Transport link settings.
    #[serde(default)]
    pub link: LinkConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Network configuration for the relay listener.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind to.
    #[serde(default = "default_host")]
    pub host: IpAddr,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,
}

/// Target platform configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct PlatformConfig {
    /// Base URL of the platform REST API.
    #[serde(default = "default_api_base")]
    pub api_base: String,

    /// Bot token. Required.
    #[serde(default)]
    pub token: Option<String>,

    /// Workspace (guild) in which containers are created. Required.
    #[serde(default)]
    pub workspace_id: Option<String>,

    /// The relay's own author id; events authored by it are not echoed back.
    #[serde(default)]
    pub self_id: Option<String>,

    /// Upper bound for every outbound platform call, in seconds.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

/// Delivery pump configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RelayConfig {
    /// Largest attachment the relay fetches or forwards, in bytes.
    #[serde(default = "default_max_attachment_bytes")]
    pub max_attachment_bytes: usize,

    /// Timeout for a single attachment download, in seconds.
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,

    /// Seconds a per-conversation delivery lane stays alive while idle.
    #[serde(default = "default_lane_idle_secs")]
    pub lane_idle_secs: u64,
}

/// Transport link configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LinkConfig {
    /// Maximum size of a single link frame, in bytes.
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,

    /// Outbound frames buffered for the agent before new ones are dropped.
    #[serde(default = "default_queue_depth")]
    pub queue_depth: usize,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "chatbridge_relay=debug,info").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to output logs in JSON format.
    #[serde(default)]
    pub json: bool,
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))
}

fn default_port() -> u16 {
    8080
}

fn default_api_base() -> String {
    "https://discord.com/api/v10".to_string()
}

fn default_request_timeout_secs() -> u64 {
    15
}

fn default_max_attachment_bytes() -> usize {
    25 * 1024 * 1024
}

fn default_fetch_timeout_secs() -> u64 {
    15
}

fn default_lane_idle_secs() -> u64 {
    300
}

fn default_max_frame_bytes() -> usize {
    DEFAULT_MAX_FRAME_BYTES
}

fn default_queue_depth() -> usize {
    256
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            token: None,
            workspace_id: None,
            self_id: None,
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            max_attachment_bytes: default_max_attachment_bytes(),
            fetch_timeout_secs: default_fetch_timeout_secs(),
            lane_idle_secs: default_lane_idle_secs(),
        }
    }
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            max_frame_bytes: default_max_frame_bytes(),
            queue_depth: default_queue_depth(),
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

impl PlatformConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }
}

impl RelayConfig {
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs.max(1))
    }

    pub fn lane_idle(&self) -> Duration {
        Duration::from_secs(self.lane_idle_secs.max(1))
    }
}

/// Credentials the relay cannot start without.
#[derive(Debug, Clone)]
pub struct PlatformCredentials {
    pub token: String,
    pub workspace_id: String,
}

impl Config {
    /// Checks that required startup inputs are present.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Missing` naming the first absent setting.
    pub fn credentials(&self) -> Result<PlatformCredentials, ConfigError> {
        let token = non_empty(self.platform.token.as_deref())
            .ok_or(ConfigError::Missing("platform.token"))?;
        let workspace_id = non_empty(self.platform.workspace_id.as_deref())
            .ok_or(ConfigError::Missing("platform.workspace_id"))?;
        Ok(PlatformCredentials {
            token: token.to_string(),
            workspace_id: workspace_id.to_string(),
        })
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    /// Failed to parse the configuration file.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// A required setting is absent.
    #[error("missing required setting: {0}")]
    Missing(&'static str),
}

/// Loads configuration from a TOML file, falling back to defaults.
///
/// Environment variable overrides:
/// - `CHATBRIDGE_HOST` overrides `server.host`
/// - `CHATBRIDGE_PORT` (or `WS_PORT`) overrides `server.port`
/// - `CHATBRIDGE_PLATFORM_TOKEN` (or `DISCORD_TOKEN`) overrides `platform.token`
/// - `CHATBRIDGE_WORKSPACE_ID` (or `GUILD_ID`) overrides `platform.workspace_id`
/// - `CHATBRIDGE_SELF_ID` overrides `platform.self_id`
/// - `CHATBRIDGE_API_BASE` overrides `platform.api_base`
/// - `CHATBRIDGE_LOG_LEVEL` overrides `logging.level`
/// - `CHATBRIDGE_LOG_JSON` overrides `logging.json` (set to "true" to enable)
///
/// # Errors
///
/// Returns `ConfigError` if the file exists but cannot be read or parsed.
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
    Ok(config)
}

/// Applies environment overrides read through `lookup`.
///
/// The first key of each pair wins over the legacy alias.
fn apply_env_overrides(config: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    let first = |keys: &[&str]| keys.iter().find_map(|k| lookup(k));

    if let Some(host) = first(&["CHATBRIDGE_HOST"]) {
        if let Ok(parsed) = host.parse() {
            config.server.host = parsed;
        }
    }
    if let Some(port) = first(&["CHATBRIDGE_PORT", "WS_PORT"]) {
        if let Ok(parsed) = port.parse() {
            config.server.port = parsed;
        }
    }
    if let Some(token) = first(&["CHATBRIDGE_PLATFORM_TOKEN", "DISCORD_TOKEN"]) {
        config.platform.token = Some(token);
    }
    if let Some(workspace) = first(&["CHATBRIDGE_WORKSPACE_ID", "GUILD_ID"]) {
        config.platform.workspace_id = Some(workspace);
    }
    if let Some(self_id) = first(&["CHATBRIDGE_SELF_ID"]) {
        config.platform.self_id = Some(self_id);
    }
    if let Some(api_base) = first(&["CHATBRIDGE_API_BASE"]) {
        config.platform.api_base = api_base;
    }
    if let Some(level) = first(&["CHATBRIDGE_LOG_LEVEL"]) {
        config.logging.level = level;
    }
    if let Some(json) = first(&["CHATBRIDGE_LOG_JSON"]) {
        config.logging.json = json == "true" || json == "1";
    }
}
