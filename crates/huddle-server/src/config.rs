//! Server configuration.
//!
//! Configuration is layered:
//! - Built-in defaults
//! - TOML configuration file (first of `huddle.toml`, `/etc/huddle/huddle.toml`,
//!   `~/.config/huddle/huddle.toml`)
//! - Environment variables (`HUDDLE__PORT`, `HUDDLE__PRESENCE__TYPING_TTL_MS`, ...)

use anyhow::{Context, Result};
use huddle_core::EngineConfig;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

const CONFIG_PATHS: [&str; 3] = [
    "huddle.toml",
    "/etc/huddle/huddle.toml",
    "~/.config/huddle/huddle.toml",
];

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Origins allowed by CORS. Empty allows any origin.
    #[serde(default)]
    pub cors_origins: Vec<String>,

    /// Transport configuration.
    #[serde(default)]
    pub transport: TransportConfig,

    /// Resource limits.
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Typing presence.
    #[serde(default)]
    pub presence: PresenceConfig,

    /// Room lifecycle.
    #[serde(default)]
    pub rooms: RoomsConfig,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Path for WebSocket endpoint.
    #[serde(default = "default_ws_path")]
    pub websocket_path: String,
}

/// Resource limits configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Maximum number of connections.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Maximum inbound frame size in bytes.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,

    /// Maximum message length in characters.
    #[serde(default = "default_max_content_chars")]
    pub max_content_chars: usize,

    /// Messages included in a join snapshot.
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,

    /// Outbound events queued per connection.
    #[serde(default = "default_outbox_capacity")]
    pub outbox_capacity: usize,
}

/// Typing presence configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresenceConfig {
    /// How long one typing signal stays live, in milliseconds.
    #[serde(default = "default_typing_ttl")]
    pub typing_ttl_ms: u64,

    /// Expiry sweep interval in milliseconds.
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_ms: u64,
}

/// Room lifecycle configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomsConfig {
    /// How long an empty room is kept, in milliseconds.
    #[serde(default = "default_idle_grace")]
    pub idle_grace_ms: u64,

    /// Idle room sweep interval in milliseconds.
    #[serde(default = "default_reap_interval")]
    pub reap_interval_ms: u64,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable metrics export.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Metrics port.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

// Default value functions
fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_true() -> bool {
    true
}

fn default_ws_path() -> String {
    "/ws".to_string()
}

fn default_max_connections() -> usize {
    100_000
}

fn default_max_message_size() -> usize {
    64 * 1024 // 64 KB
}

fn default_max_content_chars() -> usize {
    huddle_protocol::MAX_CONTENT_CHARS
}

fn default_history_limit() -> usize {
    50
}

fn default_outbox_capacity() -> usize {
    256
}

fn default_typing_ttl() -> u64 {
    1_500
}

fn default_sweep_interval() -> u64 {
    1_000
}

fn default_idle_grace() -> u64 {
    300_000 // 5 minutes
}

fn default_reap_interval() -> u64 {
    30_000
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_origins: Vec::new(),
            transport: TransportConfig::default(),
            limits: LimitsConfig::default(),
            presence: PresenceConfig::default(),
            rooms: RoomsConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            websocket_path: default_ws_path(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            max_message_size: default_max_message_size(),
            max_content_chars: default_max_content_chars(),
            history_limit: default_history_limit(),
            outbox_capacity: default_outbox_capacity(),
        }
    }
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            typing_ttl_ms: default_typing_ttl(),
            sweep_interval_ms: default_sweep_interval(),
        }
    }
}

impl Default for RoomsConfig {
    fn default() -> Self {
        Self {
            idle_grace_ms: default_idle_grace(),
            reap_interval_ms: default_reap_interval(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_metrics_port(),
        }
    }
}

impl Config {
    /// The first existing file on the config search path.
    #[must_use]
    pub fn locate() -> Option<PathBuf> {
        CONFIG_PATHS
            .iter()
            .map(|path| PathBuf::from(shellexpand::tilde(path).as_ref()))
            .find(|path| path.exists())
    }

    /// Load configuration from `file`, or from defaults alone when there is
    /// none, then apply `HUDDLE__*` environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or an override
    /// has the wrong type.
    pub fn load_from(file: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = file {
            builder = builder.add_source(config::File::from(path));
        }

        let settings = builder
            .add_source(
                config::Environment::with_prefix("HUDDLE")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("cors_origins")
                    .try_parsing(true),
            )
            .build()
            .with_context(|| match file {
                Some(path) => format!("Failed to load config file: {}", path.display()),
                None => "Failed to load configuration".to_string(),
            })?;

        settings
            .try_deserialize()
            .context("Invalid configuration")
    }

    /// Get the socket address to bind to.
    ///
    /// # Errors
    ///
    /// Returns an error if `host:port` is not a socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("Invalid host:port {}:{}", self.host, self.port))
    }

    /// Engine settings derived from this configuration.
    #[must_use]
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            typing_ttl: Duration::from_millis(self.presence.typing_ttl_ms),
            sweep_interval: Duration::from_millis(self.presence.sweep_interval_ms.max(1)),
            idle_grace: Duration::from_millis(self.rooms.idle_grace_ms),
            reap_interval: Duration::from_millis(self.rooms.reap_interval_ms.max(1)),
            history_limit: self.limits.history_limit,
            max_content_chars: self.limits.max_content_chars,
            outbox_capacity: self.limits.outbox_capacity,
        }
    }
}
