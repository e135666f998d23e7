//! Configuration management
//!
//! Loads configuration from:
//! 1. Default values
//! 2. Configuration file (config/default.toml, config/local.toml)
//! 3. Environment variables (override)

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub thumbnails: ThumbnailConfig,
    pub stats: StatsConfig,
    pub transfer: TransferConfig,
    pub logging: LoggingConfig,
}

/// Dashboard API server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Bind address (e.g., "127.0.0.1")
    pub host: String,
    /// Port number (e.g., 8787)
    pub port: u16,
    /// Origin allowed to call the API cross-origin (the extension dashboard)
    pub allowed_origin: Option<String>,
}

/// Database configuration (SQLite only)
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to SQLite database file
    pub path: PathBuf,
    /// Connection pool size
    pub max_connections: u32,
    /// How long a writer waits on a locked database before failing
    pub busy_timeout_ms: u64,
}

/// Thumbnail cache configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ThumbnailConfig {
    /// TTL for successfully fetched thumbnails (default: 604800 = 7 days)
    pub success_ttl_seconds: u64,
    /// TTL for negative-cache entries (default: 86400 = 24h)
    pub error_ttl_seconds: u64,
    /// Re-encode cached images when it makes them smaller
    pub recompress: bool,
    /// Per-request fetch timeout
    pub fetch_timeout_seconds: u64,
    /// Delay between successive fetches during cache population
    pub fetch_delay_ms: u64,
    /// User-Agent sent when fetching thumbnails
    pub user_agent: String,
}

impl ThumbnailConfig {
    pub fn success_ttl(&self) -> Duration {
        Duration::from_secs(self.success_ttl_seconds)
    }

    pub fn error_ttl(&self) -> Duration {
        Duration::from_secs(self.error_ttl_seconds)
    }
}

impl Default for ThumbnailConfig {
    fn default() -> Self {
        Self {
            success_ttl_seconds: 7 * 24 * 3600,
            error_ttl_seconds: 24 * 3600,
            recompress: true,
            fetch_timeout_seconds: 15,
            fetch_delay_ms: 300,
            user_agent: default_user_agent(),
        }
    }
}

fn default_user_agent() -> String {
    format!("ScrapeVault/{}", env!("CARGO_PKG_VERSION"))
}

/// Statistics aggregator configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StatsConfig {
    /// Fast snapshot reuse window (default: 60)
    pub fast_ttl_seconds: u64,
    /// Detailed snapshot reuse window (default: 300)
    pub detailed_ttl_seconds: u64,
    /// Records per detailed-scan chunk (default: 500)
    pub chunk_size: usize,
    /// Pause between detailed-scan chunks
    pub chunk_pause_ms: u64,
    /// Recursion cap for the size estimate walk
    pub max_depth: usize,
    /// Hash cached blobs to count byte-identical thumbnails (detailed path only)
    pub content_hashing: bool,
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            fast_ttl_seconds: 60,
            detailed_ttl_seconds: 300,
            chunk_size: 500,
            chunk_pause_ms: 10,
            max_depth: 8,
            content_hashing: false,
        }
    }
}

/// Bulk import/export configuration
#[derive(Debug, Clone, Deserialize)]
pub struct TransferConfig {
    /// Records per exportStore page when building full dumps
    pub page_size: usize,
    /// Largest accepted import body
    pub max_import_bytes: usize,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            page_size: 500,
            max_import_bytes: 64 * 1024 * 1024,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    pub level: String,
    /// Log format: "pretty" or "json"
    pub format: String,
}

impl AppConfig {
    /// Load configuration from file and environment
    ///
    /// # Loading Order
    /// 1. Default values
    /// 2. config/default.toml (if exists)
    /// 3. config/local.toml (if exists)
    /// 4. Environment variables (SCRAPEVAULT__*)
    ///
    /// # Errors
    /// Returns error if configuration is invalid
    pub fn load() -> Result<Self, crate::error::StorageError> {
        use config::{Config, Environment, File};

        let config = Config::builder()
            // Start with default values
            .set_default("server.host", "127.0.0.1")?
            .set_default("server.port", 8787)?
            .set_default("database.path", "data/scrapevault.db")?
            .set_default("database.max_connections", 4)?
            .set_default("database.busy_timeout_ms", 5000)?
            .set_default("thumbnails.success_ttl_seconds", 604800)?
            .set_default("thumbnails.error_ttl_seconds", 86400)?
            .set_default("thumbnails.recompress", true)?
            .set_default("thumbnails.fetch_timeout_seconds", 15)?
            .set_default("thumbnails.fetch_delay_ms", 300)?
            .set_default("thumbnails.user_agent", default_user_agent())?
            .set_default("stats.fast_ttl_seconds", 60)?
            .set_default("stats.detailed_ttl_seconds", 300)?
            .set_default("stats.chunk_size", 500)?
            .set_default("stats.chunk_pause_ms", 10)?
            .set_default("stats.max_depth", 8)?
            .set_default("stats.content_hashing", false)?
            .set_default("transfer.page_size", 500)?
            .set_default("transfer.max_import_bytes", 64 * 1024 * 1024)?
            .set_default("logging.level", "info")?
            .set_default("logging.format", "pretty")?
            // Load from config/default.toml if it exists
            .add_source(File::with_name("config/default").required(false))
            // Load from config/local.toml if it exists (overrides default)
            .add_source(File::with_name("config/local").required(false))
            // Load from environment variables (SCRAPEVAULT__*)
            .add_source(
                Environment::with_prefix("SCRAPEVAULT")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| crate::error::StorageError::Config(e.to_string()))?;

        let app_config: Self = config
            .try_deserialize()
            .map_err(|e| crate::error::StorageError::Config(e.to_string()))?;
        app_config.validate()?;
        Ok(app_config)
    }

    pub(crate) fn validate(&self) -> Result<(), crate::error::StorageError> {
        use crate::error::StorageError;

        if self.server.port == 0 {
            return Err(StorageError::Config(
                "server.port must be greater than 0".to_string(),
            ));
        }

        if self.database.max_connections == 0 {
            return Err(StorageError::Config(
                "database.max_connections must be greater than 0".to_string(),
            ));
        }

        if self.thumbnails.success_ttl_seconds == 0 || self.thumbnails.error_ttl_seconds == 0 {
            return Err(StorageError::Config(
                "thumbnails TTLs must be greater than 0".to_string(),
            ));
        }

        if self.stats.fast_ttl_seconds == 0 || self.stats.detailed_ttl_seconds == 0 {
            return Err(StorageError::Config(
                "stats TTLs must be greater than 0".to_string(),
            ));
        }

        if self.stats.chunk_size == 0 {
            return Err(StorageError::Config(
                "stats.chunk_size must be greater than 0".to_string(),
            ));
        }

        if self.transfer.page_size == 0 {
            return Err(StorageError::Config(
                "transfer.page_size must be greater than 0".to_string(),
            ));
        }

        if self.thumbnails.error_ttl_seconds > self.thumbnails.success_ttl_seconds {
            tracing::warn!(
                error_ttl = self.thumbnails.error_ttl_seconds,
                success_ttl = self.thumbnails.success_ttl_seconds,
                "Negative cache entries outlive successful ones"
            );
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> AppConfig {
        AppConfig {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8787,
                allowed_origin: None,
            },
            database: DatabaseConfig {
                path: PathBuf::from("/tmp/scrapevault-test.db"),
                max_connections: 4,
                busy_timeout_ms: 5000,
            },
            thumbnails: ThumbnailConfig::default(),
            stats: StatsConfig::default(),
            transfer: TransferConfig::default(),
            logging: LoggingConfig {
                level: "info".to_string(),
                format: "pretty".to_string(),
            },
        }
    }

    #[test]
    fn validate_accepts_defaults() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn default_ttls_match_cache_policy() {
        let thumbnails = ThumbnailConfig::default();
        assert_eq!(thumbnails.success_ttl(), Duration::from_secs(604_800));
        assert_eq!(thumbnails.error_ttl(), Duration::from_secs(86_400));
    }

    #[test]
    fn validate_rejects_zero_chunk_size() {
        let mut config = valid_config();
        config.stats.chunk_size = 0;

        let error = config
            .validate()
            .expect_err("zero chunk size must fail");
        assert!(matches!(
            error,
            crate::error::StorageError::Config(message)
                if message.contains("stats.chunk_size")
        ));
    }

    #[test]
    fn validate_rejects_zero_ttl() {
        let mut config = valid_config();
        config.thumbnails.error_ttl_seconds = 0;

        assert!(config.validate().is_err());
    }
}
