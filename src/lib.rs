//! # Recipe Image Cache
//!
//! ## Overview
//! Disk-backed image caching subsystem for the meal planner desktop
//! application. Remote recipe images are downloaded once, persisted under
//! content-derived filenames, expired by age, and bounded by a
//! least-recently-used eviction policy.
//!
//! ## Architecture
//! The system is composed of several key modules:
//! - `key`: stable, collision-resistant cache filenames from identifiers
//! - `ttl`: pure freshness predicate over entry age
//! - `store`: filesystem lookup, validity checks, deletion, enumeration
//! - `eviction`: LRU-by-mtime entry limit and expired-entry sweeps
//! - `download`: single-flight coordination and bounded background fetches
//! - `manager`: process-wide facade composing the above
//! - `config`: configuration loading and validation
//! - `errors`: centralized error handling and types
//!
//! ## Input/Output Specification
//! - **Input**: Image identifiers, either `http(s)://` URLs or bundled paths
//! - **Output**: An immediately-usable [`ImageHandle`] for every request
//! - **Guarantees**: Single fetch per identifier per epoch, atomic entry
//!   visibility, entry count bounded by configuration
//!
//! ## Usage
//! ```rust,no_run
//! use recipe_image_cache::{CacheManager, Config};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_file("image-cache.toml")?;
//!     let cache = CacheManager::new(&config)?;
//!     let handle = cache.resolve("https://example.com/recipes/curry.jpg").await;
//!     println!("Loaded {:?}", handle);
//!     cache.shutdown().await;
//!     Ok(())
//! }
//! ```

// Core modules
pub mod config;
pub mod download;
pub mod errors;
pub mod eviction;
pub mod key;
pub mod manager;
pub mod store;
pub mod ttl;

// Re-exports for convenience
pub use config::Config;
pub use errors::{CacheError, Result};
pub use manager::{CacheManager, CacheStats};

use serde::Serialize;
use std::path::PathBuf;

/// Opaque, immediately-usable image handle returned by every resolve call.
///
/// Consumers must treat the handle as final for that call: the very first
/// request for a previously-unseen identifier yields a direct load even
/// though the identifier will be cached for future calls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ImageHandle {
    /// Backed by a finished cache entry on disk
    Cached(PathBuf),
    /// Load the original remote identifier directly; nothing cached this time
    Remote(String),
    /// A bundled application resource, never cached
    Bundled(PathBuf),
}

impl ImageHandle {
    /// Whether this handle is backed by the disk cache
    pub fn is_cached(&self) -> bool {
        matches!(self, ImageHandle::Cached(_))
    }

    /// The location a consumer should load, as a display string
    pub fn location(&self) -> String {
        match self {
            ImageHandle::Cached(path) | ImageHandle::Bundled(path) => {
                path.to_string_lossy().into_owned()
            }
            ImageHandle::Remote(url) => url.clone(),
        }
    }
}
