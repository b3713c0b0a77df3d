//! # Error Handling Module
//!
//! ## Purpose
//! Centralized error handling for the image cache subsystem, providing structured
//! error types for every failure class the cache can encounter.
//!
//! ## Input/Output Specification
//! - **Input**: Error conditions from filesystem, network, and configuration code
//! - **Output**: Structured error types with context and error chains
//! - **Error Categories**: Configuration, Fetch, Store, Coordination
//!
//! ## Propagation Policy
//! Only the startup directory-creation failure is unrecoverable and surfaces to
//! the application. Every per-request failure is logged and degrades to an
//! uncached load; consumers of `resolve` never observe an error.
//!
//! ## Usage
//! ```rust
//! use recipe_image_cache::errors::{Result, CacheError};
//!
//! fn check_budget(written: u64, limit: u64) -> Result<()> {
//!     if written > limit {
//!         return Err(CacheError::SizeBudgetExceeded {
//!             identifier: "https://example.com/img.jpg".to_string(),
//!             limit_bytes: limit,
//!         });
//!     }
//!     Ok(())
//! }
//! ```

use std::path::PathBuf;
use thiserror::Error;

/// Result type used throughout the cache subsystem
pub type Result<T> = std::result::Result<T, CacheError>;

/// Error types for the image cache subsystem
#[derive(Debug, Error)]
pub enum CacheError {
    /// Cache directory could not be created at startup. The one fatal error.
    #[error("Failed to create cache directory {path:?}: {source}")]
    DirectoryCreation {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Network or HTTP failure during a background download
    #[error("Download failed for '{identifier}': {details}")]
    Fetch { identifier: String, details: String },

    /// Identifier scheme is not http/https; the job aborts without caching
    #[error("Unsupported scheme '{scheme}' for '{identifier}'")]
    UnsupportedScheme { scheme: String, identifier: String },

    /// Download body exceeded the configured per-file byte budget
    #[error("Download for '{identifier}' exceeded the {limit_bytes} byte budget")]
    SizeBudgetExceeded { identifier: String, limit_bytes: u64 },

    /// An existing cache file is unreadable; treated as a miss after deletion
    #[error("Corrupted cache entry at {path:?}: {details}")]
    Corruption { path: PathBuf, details: String },

    /// Waiting on an in-flight download exceeded the join timeout
    #[error("Timed out after {timeout_ms}ms joining in-flight download of '{identifier}'")]
    JoinTimeout { identifier: String, timeout_ms: u64 },

    /// Generic I/O errors
    #[error("I/O error: {0}")]
    Io(std::io::Error),

    /// HTTP client construction or transport errors
    #[error("HTTP error: {0}")]
    Http(reqwest::Error),

    /// TOML parsing errors
    #[error("TOML error: {0}")]
    Toml(toml::de::Error),
}

impl CacheError {
    /// Check if the error is recoverable by falling back to an uncached load
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            CacheError::DirectoryCreation { .. } | CacheError::Config { .. } | CacheError::Toml(_)
        )
    }

    /// Get error category for metrics and logging
    pub fn category(&self) -> &'static str {
        match self {
            CacheError::DirectoryCreation { .. }
            | CacheError::Config { .. }
            | CacheError::Toml(_) => "configuration",
            CacheError::Fetch { .. }
            | CacheError::UnsupportedScheme { .. }
            | CacheError::SizeBudgetExceeded { .. }
            | CacheError::Http(_) => "fetch",
            CacheError::Corruption { .. } | CacheError::Io(_) => "store",
            CacheError::JoinTimeout { .. } => "coordination",
        }
    }
}

// Conversion from common error types
impl From<std::io::Error> for CacheError {
    fn from(err: std::io::Error) -> Self {
        CacheError::Io(err)
    }
}

impl From<reqwest::Error> for CacheError {
    fn from(err: reqwest::Error) -> Self {
        CacheError::Http(err)
    }
}

impl From<toml::de::Error> for CacheError {
    fn from(err: toml::de::Error) -> Self {
        CacheError::Toml(err)
    }
}
