//! # Configuration Management Module
//!
//! ## Purpose
//! Centralized configuration for the image cache subsystem, supporting TOML files
//! and environment variable overrides with validation and type-safe access.
//!
//! ## Input/Output Specification
//! - **Input**: Configuration files (TOML), environment variables
//! - **Output**: Validated configuration structs with defaults and overrides
//! - **Validation**: Range checks on pool size, entry limits, and byte budgets
//!
//! ## Configuration Sources (in order of precedence)
//! 1. Environment variables (highest priority)
//! 2. Configuration files
//! 3. Default values (lowest priority)
//!
//! ## Usage
//! ```rust,no_run
//! use recipe_image_cache::config::Config;
//!
//! # fn main() -> recipe_image_cache::errors::Result<()> {
//! // Load from default location
//! let config = Config::load()?;
//! println!("Cache directory: {:?}", config.cache.directory);
//! # Ok(())
//! # }
//! ```

use crate::errors::{CacheError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main configuration structure containing all cache settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Image cache behavior
    pub cache: CacheSettings,
    /// HTTP client settings for downloads
    pub http: HttpSettings,
    /// Logging configuration
    pub logging: LoggingSettings,
}

/// Image cache behavior settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSettings {
    /// Enable caching; when false every resolve is a direct load
    pub enabled: bool,
    /// Time to live for cache entries in minutes; zero or negative disables
    /// freshness entirely, forcing a re-fetch on every request
    pub ttl_minutes: i64,
    /// Maximum number of entries kept on disk
    pub max_entries: usize,
    /// Number of concurrent background downloads
    pub worker_pool_size: usize,
    /// Per-file byte budget; larger downloads are aborted
    pub max_file_bytes: u64,
    /// Cache directory path
    pub directory: PathBuf,
    /// Seconds to wait when joining an in-flight download before falling back
    pub join_timeout_secs: u64,
    /// Grace period in seconds for in-flight downloads during shutdown
    pub shutdown_grace_secs: u64,
}

/// HTTP client settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpSettings {
    /// User agent sent with download requests
    pub user_agent: String,
    /// Total request timeout in seconds
    pub request_timeout_seconds: u64,
    /// Connection timeout in seconds
    pub connect_timeout_seconds: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Enable structured JSON logging
    pub json_format: bool,
}

impl Config {
    /// Load configuration from the default location
    pub fn load() -> Result<Self> {
        Self::from_file("image-cache.toml")
    }

    /// Load configuration from a specific file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            tracing::warn!("Configuration file not found: {:?}, using defaults", path);
            let mut config = Self::default();
            config.apply_env_overrides()?;
            config.validate()?;
            return Ok(config);
        }

        let content = std::fs::read_to_string(path).map_err(|e| CacheError::Config {
            message: format!("Failed to read config file {:?}: {}", path, e),
        })?;

        let mut config: Config = toml::from_str(&content)?;

        config.apply_env_overrides()?;
        config.validate()?;

        Ok(config)
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(enabled) = std::env::var("MEALPLAN_CACHE_ENABLED") {
            self.cache.enabled = enabled.parse().map_err(|_| CacheError::Config {
                message: "Invalid boolean in MEALPLAN_CACHE_ENABLED".to_string(),
            })?;
        }
        if let Ok(dir) = std::env::var("MEALPLAN_CACHE_DIR") {
            self.cache.directory = PathBuf::from(dir);
        }
        if let Ok(ttl) = std::env::var("MEALPLAN_CACHE_TTL_MINUTES") {
            self.cache.ttl_minutes = ttl.parse().map_err(|_| CacheError::Config {
                message: "Invalid number in MEALPLAN_CACHE_TTL_MINUTES".to_string(),
            })?;
        }
        if let Ok(max) = std::env::var("MEALPLAN_CACHE_MAX_ENTRIES") {
            self.cache.max_entries = max.parse().map_err(|_| CacheError::Config {
                message: "Invalid number in MEALPLAN_CACHE_MAX_ENTRIES".to_string(),
            })?;
        }
        if let Ok(level) = std::env::var("MEALPLAN_LOG_LEVEL") {
            self.logging.level = level;
        }

        Ok(())
    }

    /// Validate configuration values
    fn validate(&self) -> Result<()> {
        if self.cache.max_entries == 0 {
            return Err(CacheError::Config {
                message: "cache.max_entries must be greater than zero".to_string(),
            });
        }

        if self.cache.worker_pool_size == 0 {
            return Err(CacheError::Config {
                message: "cache.worker_pool_size must be greater than zero".to_string(),
            });
        }

        if self.cache.max_file_bytes == 0 {
            return Err(CacheError::Config {
                message: "cache.max_file_bytes must be greater than zero".to_string(),
            });
        }

        if self.cache.directory.as_os_str().is_empty() {
            return Err(CacheError::Config {
                message: "cache.directory cannot be empty".to_string(),
            });
        }

        if self.http.request_timeout_seconds == 0 {
            return Err(CacheError::Config {
                message: "http.request_timeout_seconds must be greater than zero".to_string(),
            });
        }

        Ok(())
    }

    /// Get configuration as TOML string
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| CacheError::Config {
            message: format!("Failed to serialize config to TOML: {}", e),
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cache: CacheSettings {
                enabled: true,
                ttl_minutes: 24 * 60,
                max_entries: 500,
                worker_pool_size: 5,
                max_file_bytes: 10 * 1024 * 1024,
                directory: PathBuf::from("./data/image_cache"),
                join_timeout_secs: 5,
                shutdown_grace_secs: 5,
            },
            http: HttpSettings {
                user_agent: format!("recipe-image-cache/{}", env!("CARGO_PKG_VERSION")),
                request_timeout_seconds: 30,
                connect_timeout_seconds: 10,
            },
            logging: LoggingSettings {
                level: "info".to_string(),
                json_format: false,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert!(config.cache.enabled);
        assert_eq!(config.cache.worker_pool_size, 5);
        assert_eq!(config.cache.max_file_bytes, 10 * 1024 * 1024);
        assert_eq!(config.cache.join_timeout_secs, 5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_toml() {
        let toml_str = r#"
            [cache]
            enabled = true
            ttl_minutes = 60
            max_entries = 2
            worker_pool_size = 3
            max_file_bytes = 1048576
            directory = "/tmp/images"
            join_timeout_secs = 5
            shutdown_grace_secs = 5

            [http]
            user_agent = "test-agent"
            request_timeout_seconds = 10
            connect_timeout_seconds = 5

            [logging]
            level = "debug"
            json_format = false
        "#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.cache.ttl_minutes, 60);
        assert_eq!(config.cache.max_entries, 2);
        assert_eq!(config.http.user_agent, "test-agent");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_zero_limits() {
        let mut config = Config::default();
        config.cache.max_entries = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.cache.worker_pool_size = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.cache.directory = PathBuf::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_toml_round_trip() {
        let config = Config::default();
        let serialized = config.to_toml().unwrap();
        let parsed: Config = toml::from_str(&serialized).unwrap();
        assert_eq!(parsed.cache.max_entries, config.cache.max_entries);
        assert_eq!(parsed.logging.level, config.logging.level);
    }

    #[test]
    fn test_invalid_toml_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("image-cache.toml");
        std::fs::write(&path, "cache = [not valid").unwrap();

        let err = Config::from_file(&path).err().unwrap();
        assert!(matches!(err, CacheError::Toml(_)));
        assert_eq!(err.category(), "configuration");
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_env_override() {
        std::env::set_var("MEALPLAN_CACHE_MAX_ENTRIES", "42");
        let mut config = Config::default();
        config.apply_env_overrides().unwrap();
        std::env::remove_var("MEALPLAN_CACHE_MAX_ENTRIES");
        assert_eq!(config.cache.max_entries, 42);
    }
}
