//! # Eviction Management Module
//!
//! ## Purpose
//! Bounds disk usage of the image cache by deleting the oldest-modified entries
//! once the configured entry limit is exceeded, and sweeps out entries that
//! have outlived their TTL.
//!
//! ## Input/Output Specification
//! - **Input**: Entry limit, TTL in minutes, the cache directory contents
//! - **Output**: Deletions on disk; counts for logging
//! - **Ordering**: LRU approximated by file modification time, oldest first
//!
//! ## Key Features
//! - Runs after every successful download and once at startup
//! - Deletion failures are tolerated; eviction never fails its calling path
//! - Startup sweep also clears orphaned `.tmp` artifacts from interrupted
//!   downloads

use crate::store::CacheStore;
use crate::ttl;
use std::time::Duration;
use tracing::{debug, info};

/// Orphaned `.tmp` artifacts older than this are assumed dead and removed.
/// Live downloads are bounded by the byte budget and finish well within it.
const TEMP_ARTIFACT_GRACE: Duration = Duration::from_secs(60 * 60);

/// Enforces entry-count and age bounds over a cache directory
#[derive(Debug, Clone)]
pub struct EvictionManager {
    store: CacheStore,
}

impl EvictionManager {
    /// Create an eviction manager over a store
    pub fn new(store: CacheStore) -> Self {
        Self { store }
    }

    /// Delete oldest-modified entries until at most `max_entries` remain.
    ///
    /// Never blocks or fails the calling path; deletion failures are logged
    /// inside the store and otherwise ignored.
    pub fn enforce_limit(&self, max_entries: usize) {
        let mut entries = self.store.list_entries();
        if entries.len() <= max_entries {
            return;
        }

        entries.sort_by_key(|entry| entry.modified);
        let excess = entries.len() - max_entries;
        for entry in entries.iter().take(excess) {
            debug!("Evicting oldest cache entry {:?}", entry.path);
            self.store.delete(&entry.path);
        }

        info!(
            "Evicted {} cache entries to honor the {} entry limit",
            excess, max_entries
        );
    }

    /// Delete every entry that fails the TTL policy, independent of count,
    /// plus orphaned `.tmp` artifacts past the grace interval.
    ///
    /// Returns the number of expired entries removed.
    pub fn sweep_expired(&self, ttl_minutes: i64) -> usize {
        let mut removed = 0;
        for entry in self.store.list_entries() {
            if !ttl::is_fresh(entry.modified, ttl_minutes) {
                self.store.delete(&entry.path);
                removed += 1;
            }
        }

        for artifact in self.store.list_temp_artifacts() {
            let age = std::time::SystemTime::now()
                .duration_since(artifact.modified)
                .unwrap_or(Duration::ZERO);
            if age > TEMP_ARTIFACT_GRACE {
                debug!("Removing orphaned download artifact {:?}", artifact.path);
                self.store.delete(&artifact.path);
            }
        }

        if removed > 0 {
            info!("Swept {} expired cache entries", removed);
        }
        removed
    }
}
