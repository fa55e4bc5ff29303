//! Configuration management for RAX Cloud Server
//!
//! Separates startup configuration (requires restart) from runtime configuration
//! (shared behind a lock and read on every request).

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::storage::DEFAULT_RECENT_LIMIT;

/// Locations searched for `config.toml`, in order.
const CONFIG_PATHS: [&str; 2] = [
    "rax-cloud-server/config", // Docker production: /app/rax-cloud-server/config.toml
    "config",                  // Local development: ./config.toml
];

const ENV_PREFIX: &str = "RAX_CLOUD";

/// Complete server configuration with startup/runtime separation
#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(flatten)]
    pub startup: StartupConfig,

    #[serde(flatten)]
    pub runtime: RuntimeConfig,
}

/// Configuration that requires server restart to take effect
#[derive(Debug, Deserialize, Clone)]
pub struct StartupConfig {
    // ═══ NETWORK (Environment Override Supported) ═══
    /// IP address the HTTP API binds to
    pub bind_address: String,

    /// Port for the HTTP API
    pub http_port: u16,

    // ═══ STORAGE ═══
    /// Directory exposed to clients; created with its trash subtree on startup
    pub storage_root: String,

    // ═══ ARCHIVE STREAMING (TOML Only) ═══
    /// Bytes buffered by the archive producer before handing a chunk to the response
    pub archive_chunk_size: usize,

    /// Chunks the archive producer may run ahead of a slow client
    pub archive_channel_capacity: usize,
}

/// Configuration read per request
#[derive(Debug, Deserialize, Clone)]
pub struct RuntimeConfig {
    /// Maximum upload size in MB
    /// Environment: RAX_CLOUD_MAX_UPLOAD_SIZE_MB
    pub max_upload_size_mb: u64,

    /// Entries returned by the recent-files scan
    /// Environment: RAX_CLOUD_RECENT_LIMIT
    pub recent_limit: usize,
}

/// Thread-safe runtime configuration wrapper
pub type SharedRuntimeConfig = Arc<RwLock<RuntimeConfig>>;

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            startup: StartupConfig {
                bind_address: "127.0.0.1".to_string(),
                http_port: 4000,
                storage_root: "./nas-storage".to_string(),
                archive_chunk_size: 64 * 1024,
                archive_channel_capacity: 8,
            },
            runtime: RuntimeConfig {
                max_upload_size_mb: 1024,
                recent_limit: DEFAULT_RECENT_LIMIT,
            },
        }
    }
}

impl ServerConfig {
    /// Load configuration from config.toml (if present) with environment overrides
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = CONFIG_PATHS
            .iter()
            .find(|path| PathBuf::from(format!("{path}.toml")).is_file())
            .copied();

        let defaults = Self::default();
        let mut builder = Config::builder()
            .set_default("bind_address", defaults.startup.bind_address)?
            .set_default("http_port", i64::from(defaults.startup.http_port))?
            .set_default("storage_root", defaults.startup.storage_root)?
            .set_default(
                "archive_chunk_size",
                defaults.startup.archive_chunk_size as i64,
            )?
            .set_default(
                "archive_channel_capacity",
                defaults.startup.archive_channel_capacity as i64,
            )?
            .set_default(
                "max_upload_size_mb",
                defaults.runtime.max_upload_size_mb as i64,
            )?
            .set_default("recent_limit", defaults.runtime.recent_limit as i64)?;

        if let Some(path) = config_path {
            builder = builder.add_source(File::with_name(path));
        }

        let settings = builder
            .add_source(Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()?;

        let config: ServerConfig = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Split into startup (immutable) and runtime (shared) parts
    pub fn split(self) -> (StartupConfig, SharedRuntimeConfig) {
        let runtime = Arc::new(RwLock::new(self.runtime));
        (self.startup, runtime)
    }

    /// Validation for all configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.startup.http_port == 0 {
            return Err(ConfigError::Message("http_port cannot be 0".into()));
        }

        if self.startup.storage_root.trim().is_empty() {
            return Err(ConfigError::Message("storage_root cannot be empty".into()));
        }

        if self.startup.archive_chunk_size == 0 {
            return Err(ConfigError::Message(
                "archive_chunk_size must be greater than 0".into(),
            ));
        }

        if self.startup.archive_channel_capacity == 0 {
            return Err(ConfigError::Message(
                "archive_channel_capacity must be greater than 0".into(),
            ));
        }

        if self.runtime.max_upload_size_mb == 0 {
            return Err(ConfigError::Message(
                "max_upload_size_mb must be greater than 0".into(),
            ));
        }

        if self.runtime.recent_limit == 0 {
            return Err(ConfigError::Message(
                "recent_limit must be greater than 0".into(),
            ));
        }

        Ok(())
    }
}

impl StartupConfig {
    /// Get bind address and HTTP port as socket address
    pub fn http_socket(&self) -> String {
        format!("{}:{}", self.bind_address, self.http_port)
    }

    /// Get storage root as PathBuf
    pub fn storage_root_path(&self) -> PathBuf {
        PathBuf::from(&self.storage_root)
    }
}

impl RuntimeConfig {
    /// Get maximum upload size in bytes
    pub fn max_upload_size_bytes(&self) -> u64 {
        self.max_upload_size_mb * 1024 * 1024
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_pass_validation() {
        assert!(ServerConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_zero_port() {
        let mut config = ServerConfig::default();
        config.startup.http_port = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_blank_storage_root() {
        let mut config = ServerConfig::default();
        config.startup.storage_root = "  ".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_zero_recent_limit() {
        let mut config = ServerConfig::default();
        config.runtime.recent_limit = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn upload_limit_is_in_mebibytes() {
        let runtime = RuntimeConfig {
            max_upload_size_mb: 2,
            recent_limit: 20,
        };
        assert_eq!(runtime.max_upload_size_bytes(), 2 * 1024 * 1024);
    }

    #[test]
    fn recent_limit_defaults_to_scanner_limit() {
        let config = ServerConfig::default();
        assert_eq!(config.runtime.recent_limit, DEFAULT_RECENT_LIMIT);
    }

    #[test]
    fn socket_joins_address_and_port() {
        let config = ServerConfig::default();
        assert_eq!(config.startup.http_socket(), "127.0.0.1:4000");
    }
}
