//! Configuration management.
//!
//! Configuration is assembled from defaults, an optional config file and
//! `NOTE__`-prefixed environment variables, with a handful of well-known
//! variables (`JWT_SECRET`, `NOTE_DATA_DIR`) applied on top.

use serde::{Deserialize, Serialize};

/// Main application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Server configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// Identity token configuration.
    #[serde(default)]
    pub auth: AuthConfig,
    /// Storage paths (tenant databases, uploaded blobs).
    #[serde(default)]
    pub storage: StorageConfig,
    /// Sync channel configuration.
    #[serde(default)]
    pub sync: SyncConfig,
    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load configuration from environment and config files.
    ///
    /// Sources, in order: defaults, `config/note-station.{toml,yaml,...}`
    /// if present, then `NOTE__*` environment variables.
    pub fn load() -> anyhow::Result<Self> {
        // Load .env file if present
        let _ = dotenvy::dotenv();

        let config = config::Config::builder()
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 4000)?
            .set_default("storage.data_dir", "./data/db")?
            .set_default("storage.uploads_dir", "./data/uploads")?
            .add_source(config::File::with_name("config/note-station").required(false))
            .add_source(
                config::Environment::with_prefix("NOTE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let mut app_config: AppConfig = config.try_deserialize().unwrap_or_default();

        if let Ok(secret) = std::env::var("JWT_SECRET") {
            app_config.auth.jwt_secret = Some(secret);
        }
        if let Ok(dir) = std::env::var("NOTE_DATA_DIR") {
            app_config.storage.data_dir = dir;
        }
        if let Ok(dir) = std::env::var("NOTE_UPLOADS_DIR") {
            app_config.storage.uploads_dir = dir;
        }

        Ok(app_config)
    }
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,
    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    4000
}

fn default_timeout() -> u64 {
    300
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            timeout_secs: default_timeout(),
        }
    }
}

/// Identity token configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Secret used to sign and validate identity tokens.
    pub jwt_secret: Option<String>,
    /// Token lifetime in seconds.
    #[serde(default = "default_token_expiry")]
    pub token_expiry_secs: u64,
}

fn default_token_expiry() -> u64 {
    7 * 24 * 60 * 60 // 7 days
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: None,
            token_expiry_secs: default_token_expiry(),
        }
    }
}

/// Storage paths.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory holding one SQLite file per tenant plus the identity database.
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    /// Directory holding content-addressed uploads.
    #[serde(default = "default_uploads_dir")]
    pub uploads_dir: String,
}

fn default_data_dir() -> String {
    "./data/db".to_string()
}

fn default_uploads_dir() -> String {
    "./data/uploads".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            uploads_dir: default_uploads_dir(),
        }
    }
}

/// Sync channel configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Liveness probe interval in seconds.
    #[serde(default = "default_heartbeat")]
    pub heartbeat_secs: u64,
}

fn default_heartbeat() -> u64 {
    30
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            heartbeat_secs: default_heartbeat(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter.
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.server.port, 4000);
        assert_eq!(config.sync.heartbeat_secs, 30);
        assert_eq!(config.auth.token_expiry_secs, 7 * 24 * 60 * 60);
        assert!(config.auth.jwt_secret.is_none());
    }
}
