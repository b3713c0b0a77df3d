//! # Cache Manager Module
//!
//! ## Purpose
//! Process-wide entry point for the image cache: owns configuration, the cache
//! directory lifecycle, the startup sweep, the download worker pool, and the
//! public `resolve` operation composing every other component.
//!
//! ## Input/Output Specification
//! - **Input**: Validated [`Config`], image identifiers from consumers
//! - **Output**: [`ImageHandle`]s, cache statistics, lifecycle effects
//! - **Fatal condition**: Cache directory creation failure at construction;
//!   everything else degrades to uncached loads
//!
//! ## Key Features
//! - Constructed once in the application's composition root and passed to
//!   consumers explicitly; no global accessor
//! - Startup sweep deletes expired entries and enforces the entry limit
//! - Graceful shutdown with a bounded grace period, then forced cancellation
//!
//! ## Usage
//! ```rust,no_run
//! use recipe_image_cache::{CacheManager, Config};
//!
//! #[tokio::main]
//! async fn main() -> recipe_image_cache::errors::Result<()> {
//!     let config = Config::load()?;
//!     let cache = CacheManager::new(&config)?;
//!     let handle = cache.resolve("https://example.com/recipes/stew.jpg").await;
//!     println!("Resolved to {:?}", handle);
//!     cache.shutdown().await;
//!     Ok(())
//! }
//! ```

use crate::config::{CacheSettings, Config};
use crate::download::{DownloadCoordinator, DownloadCounters};
use crate::errors::{CacheError, Result};
use crate::eviction::EvictionManager;
use crate::store::CacheStore;
use crate::ImageHandle;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;
use tracing::info;

/// Snapshot of cache contents and lifetime counters
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    /// Finished entries currently on disk
    pub entry_count: usize,
    /// Total bytes held by finished entries
    pub total_size_bytes: u64,
    /// Modification time of the oldest entry
    pub oldest_entry: Option<DateTime<Utc>>,
    /// Modification time of the newest entry
    pub newest_entry: Option<DateTime<Utc>>,
    /// Resolve and download counters since construction
    pub counters: DownloadCounters,
}

/// Facade over the image cache subsystem
pub struct CacheManager {
    settings: CacheSettings,
    store: CacheStore,
    eviction: EvictionManager,
    coordinator: DownloadCoordinator,
}

impl CacheManager {
    /// Create the cache manager: directory creation, startup sweep, and
    /// worker pool construction.
    ///
    /// Directory creation failure is the one unrecoverable error of the
    /// subsystem and is returned to the application.
    pub fn new(config: &Config) -> Result<Self> {
        let settings = config.cache.clone();

        std::fs::create_dir_all(&settings.directory).map_err(|e| {
            CacheError::DirectoryCreation {
                path: settings.directory.clone(),
                source: e,
            }
        })?;

        let client = reqwest::Client::builder()
            .user_agent(&config.http.user_agent)
            .timeout(Duration::from_secs(config.http.request_timeout_seconds))
            .connect_timeout(Duration::from_secs(config.http.connect_timeout_seconds))
            .build()?;

        let store = CacheStore::new(settings.directory.clone());
        let eviction = EvictionManager::new(store.clone());

        if settings.enabled {
            let removed = eviction.sweep_expired(settings.ttl_minutes);
            eviction.enforce_limit(settings.max_entries);
            info!(
                "Image cache ready at {:?} ({} expired entries swept)",
                settings.directory, removed
            );
        } else {
            info!("Image cache disabled; every resolve loads directly");
        }

        let coordinator =
            DownloadCoordinator::new(settings.clone(), client, store.clone(), eviction.clone());

        Ok(Self {
            settings,
            store,
            eviction,
            coordinator,
        })
    }

    /// Resolve an identifier to a usable image handle.
    ///
    /// Always returns immediately with something the consumer can load: the
    /// cached file on a hit, the original identifier otherwise. Cache-layer
    /// failures are never visible here.
    pub async fn resolve(&self, identifier: &str) -> ImageHandle {
        self.coordinator.resolve(identifier).await
    }

    /// Delete expired entries and enforce the entry limit, independent of
    /// whether caching is enabled.
    ///
    /// Returns the number of expired entries removed.
    pub fn sweep(&self) -> usize {
        let removed = self.eviction.sweep_expired(self.settings.ttl_minutes);
        self.eviction.enforce_limit(self.settings.max_entries);
        removed
    }

    /// Synchronously delete every entry and stray download artifact
    pub fn clear_cache(&self) {
        let mut removed = 0;
        for entry in self.store.list_entries() {
            self.store.delete(&entry.path);
            removed += 1;
        }
        for artifact in self.store.list_temp_artifacts() {
            self.store.delete(&artifact.path);
        }
        info!("Cleared {} cache entries", removed);
    }

    /// Snapshot current cache contents and counters
    pub fn stats(&self) -> CacheStats {
        let entries = self.store.list_entries();
        let total_size_bytes = entries.iter().map(|entry| entry.size_bytes).sum();
        let oldest_entry = entries
            .iter()
            .map(|entry| entry.modified)
            .min()
            .map(DateTime::<Utc>::from);
        let newest_entry = entries
            .iter()
            .map(|entry| entry.modified)
            .max()
            .map(DateTime::<Utc>::from);

        CacheStats {
            entry_count: entries.len(),
            total_size_bytes,
            oldest_entry,
            newest_entry,
            counters: self.coordinator.counters(),
        }
    }

    /// Request orderly pool termination with the configured grace period,
    /// then force-cancel remaining downloads
    pub async fn shutdown(&self) {
        let grace = Duration::from_secs(self.settings.shutdown_grace_secs);
        self.coordinator.shutdown(grace).await;
        info!("Image cache shut down");
    }
}
