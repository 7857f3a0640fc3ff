//! Server configuration.
//!
//! Configuration can be loaded from:
//! - Environment variables (`HYPE_HOST`, `HYPE_PORT`)
//! - TOML configuration file
//!
//! Every field has a default, so an empty file is a valid configuration.

use anyhow::{Context, Result};
use hype_core::HubConfig;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Transport configuration.
    #[serde(default)]
    pub transport: TransportConfig,

    /// Resource limits.
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Heartbeat configuration.
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,

    /// Call signaling configuration.
    #[serde(default)]
    pub calls: CallsConfig,

    /// Persistence configuration.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Identity configuration.
    #[serde(default)]
    pub identity: IdentityConfig,

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

    /// How long a new socket may take to send `connect`, in milliseconds.
    #[serde(default = "default_handshake_timeout")]
    pub handshake_timeout_ms: u64,
}

/// Resource limits configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Maximum number of connections.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Maximum inbound message size in bytes.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,

    /// Maximum number of messages returned by one history request.
    #[serde(default = "default_history_limit")]
    pub history_limit: u32,

    /// Outbound queue capacity per connection.
    #[serde(default = "default_outbound_buffer")]
    pub outbound_buffer: usize,
}

/// Heartbeat configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    /// Heartbeat interval in milliseconds.
    #[serde(default = "default_heartbeat_interval")]
    pub interval_ms: u64,

    /// Connection timeout in milliseconds.
    #[serde(default = "default_heartbeat_timeout")]
    pub timeout_ms: u64,
}

/// Call signaling configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallsConfig {
    /// How long an offer may stay unanswered, in milliseconds. 0 disables.
    #[serde(default = "default_offer_timeout")]
    pub offer_timeout_ms: u64,

    /// How often unanswered offers are swept, in milliseconds.
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_ms: u64,
}

/// Storage backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// Keep everything in memory.
    Memory,
    /// Persist to a SQLite file.
    Sqlite,
}

/// Persistence configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Backend to use.
    #[serde(default = "default_backend")]
    pub backend: StorageBackend,

    /// Database file for the SQLite backend.
    #[serde(default = "default_db_path")]
    pub path: String,
}

/// Identity configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityConfig {
    /// Register unknown names on first connect.
    #[serde(default = "default_true")]
    pub auto_register: bool,
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
    std::env::var("HYPE_HOST").unwrap_or_else(|_| "127.0.0.1".to_string())
}

fn default_port() -> u16 {
    std::env::var("HYPE_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8080)
}

fn default_true() -> bool {
    true
}

fn default_ws_path() -> String {
    "/ws".to_string()
}

fn default_handshake_timeout() -> u64 {
    10_000
}

fn default_max_connections() -> usize {
    10_000
}

fn default_max_message_size() -> usize {
    64 * 1024 // 64 KB
}

fn default_history_limit() -> u32 {
    200
}

fn default_outbound_buffer() -> usize {
    hype_core::DEFAULT_OUTBOUND_CAPACITY
}

fn default_heartbeat_interval() -> u64 {
    30_000 // 30 seconds
}

fn default_heartbeat_timeout() -> u64 {
    60_000 // 60 seconds
}

fn default_offer_timeout() -> u64 {
    60_000
}

fn default_sweep_interval() -> u64 {
    5_000
}

fn default_backend() -> StorageBackend {
    StorageBackend::Memory
}

fn default_db_path() -> String {
    "hype.db".to_string()
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            transport: TransportConfig::default(),
            limits: LimitsConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            calls: CallsConfig::default(),
            storage: StorageConfig::default(),
            identity: IdentityConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            websocket_path: default_ws_path(),
            handshake_timeout_ms: default_handshake_timeout(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            max_message_size: default_max_message_size(),
            history_limit: default_history_limit(),
            outbound_buffer: default_outbound_buffer(),
        }
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_heartbeat_interval(),
            timeout_ms: default_heartbeat_timeout(),
        }
    }
}

impl Default for CallsConfig {
    fn default() -> Self {
        Self {
            offer_timeout_ms: default_offer_timeout(),
            sweep_interval_ms: default_sweep_interval(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            path: default_db_path(),
        }
    }
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            auto_register: true,
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
    /// Load configuration from file or defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed.
    pub fn load() -> Result<Self> {
        let config_paths = [
            "hype.toml",
            "/etc/hype/hype.toml",
            "~/.config/hype/hype.toml",
        ];

        for path in &config_paths {
            let expanded = shellexpand::tilde(path);
            if Path::new(expanded.as_ref()).exists() {
                return Self::from_file(expanded.as_ref());
            }
        }

        // Fall back to defaults with environment overrides
        Ok(Self::default())
    }

    /// Load configuration from a specific file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Get the socket address to bind to.
    ///
    /// # Errors
    ///
    /// Returns an error if host and port do not form a socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("Invalid bind address {}:{}", self.host, self.port))
    }

    /// Settings for the shared hub.
    #[must_use]
    pub fn hub_config(&self) -> HubConfig {
        HubConfig {
            history_limit: self.limits.history_limit,
            heartbeat_interval_ms: u32::try_from(self.heartbeat.interval_ms).unwrap_or(u32::MAX),
            offer_timeout: Duration::from_millis(self.calls.offer_timeout_ms),
        }
    }

    /// Database file with `~` expanded.
    #[must_use]
    pub fn database_path(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.storage.path).as_ref())
    }
}
