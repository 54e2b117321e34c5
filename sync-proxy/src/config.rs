//! Configuration loading for sync-proxy.
//!
//! Configuration is loaded from a TOML file (default: `proxy.toml`). Every
//! section and field is optional.

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration for sync-proxy.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Server configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// List and long-poll configuration.
    #[serde(default)]
    pub sync: SyncConfig,
    /// Rate limiting configuration.
    #[serde(default)]
    pub limits: LimitsConfig,
    /// Cleanup task configuration.
    #[serde(default)]
    pub cleanup: CleanupConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Bind address for the HTTP endpoints (default: 0.0.0.0:8008).
    #[serde(default = "default_http_bind")]
    pub http_bind_address: String,
}

/// List and long-poll configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
    /// How long a request waits for changes before returning empty
    /// (default: 30000 ms).
    #[serde(default = "default_long_poll_timeout_ms")]
    pub long_poll_timeout_ms: u64,
    /// Changed rooms per list above which the list is answered with a full
    /// SYNC instead of incremental ops (default: 64).
    #[serde(default = "default_max_incremental_deltas")]
    pub max_incremental_deltas: usize,
    /// Maximum ranges per list (default: 16).
    #[serde(default = "default_max_ranges_per_list")]
    pub max_ranges_per_list: usize,
    /// Maximum lists per request (default: 32).
    #[serde(default = "default_max_lists")]
    pub max_lists: usize,
}

impl SyncConfig {
    /// Long-poll timeout as a duration.
    pub fn long_poll_timeout(&self) -> Duration {
        Duration::from_millis(self.long_poll_timeout_ms)
    }
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LimitsConfig {
    /// Maximum requests per user per minute (default: 600).
    #[serde(default = "default_requests_per_minute")]
    pub requests_per_minute: u32,
    /// Maximum requests per second across all users (default: 1000).
    #[serde(default = "default_global_requests_per_second")]
    pub global_requests_per_second: u32,
    /// Maximum live connections (default: 10000).
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

/// Cleanup task configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct CleanupConfig {
    /// Cleanup interval in seconds (default: 300).
    #[serde(default = "default_cleanup_interval")]
    pub interval_secs: u64,
    /// Connections idle longer than this are dropped (default: 1800).
    #[serde(default = "default_connection_ttl")]
    pub connection_ttl_secs: u64,
    /// Enable cleanup task (default: true).
    #[serde(default = "default_cleanup_enabled")]
    pub enabled: bool,
}

impl CleanupConfig {
    /// Idle connection TTL as a duration.
    pub fn connection_ttl(&self) -> Duration {
        Duration::from_secs(self.connection_ttl_secs)
    }
}

// Default value functions
fn default_http_bind() -> String {
    "0.0.0.0:8008".to_string()
}

fn default_long_poll_timeout_ms() -> u64 {
    30_000
}

fn default_max_incremental_deltas() -> usize {
    sync_core::DEFAULT_MAX_INCREMENTAL_DELTAS
}

fn default_max_ranges_per_list() -> usize {
    16
}

fn default_max_lists() -> usize {
    32
}

fn default_requests_per_minute() -> u32 {
    600
}

fn default_global_requests_per_second() -> u32 {
    1000
}

fn default_max_connections() -> usize {
    10_000
}

fn default_cleanup_interval() -> u64 {
    300 // 5 minutes
}

fn default_connection_ttl() -> u64 {
    30 * 60 // 30 minutes
}

fn default_cleanup_enabled() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_bind_address: default_http_bind(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            long_poll_timeout_ms: default_long_poll_timeout_ms(),
            max_incremental_deltas: default_max_incremental_deltas(),
            max_ranges_per_list: default_max_ranges_per_list(),
            max_lists: default_max_lists(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: default_requests_per_minute(),
            global_requests_per_second: default_global_requests_per_second(),
            max_connections: default_max_connections(),
        }
    }
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_cleanup_interval(),
            connection_ttl_secs: default_connection_ttl(),
            enabled: default_cleanup_enabled(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Failed to parse configuration file.
    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying TOML parse error.
        source: toml::de::Error,
    },
}
