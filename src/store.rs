//! # Cache Store Module
//!
//! ## Purpose
//! Filesystem accessor for the image cache directory: lookup, validity checks,
//! best-effort deletion, and entry enumeration. The directory itself is the
//! source of truth; no separate index is kept or consulted.
//!
//! ## Input/Output Specification
//! - **Input**: Cache keys (content-derived filenames) and entry paths
//! - **Output**: Resolved paths, freshness verdicts, entry listings
//! - **Storage**: Flat directory of `{sha256}.{ext}` files plus transient
//!   `.tmp` artifacts owned by in-progress downloads
//!
//! ## Key Features
//! - Hit/miss decided solely by file existence plus TTL validity
//! - Unreadable entries treated as corruption: deleted and reported as a miss
//! - Deletion failures logged and swallowed, never propagated to the caller
//! - `.tmp` artifacts invisible to lookups and entry listings

use crate::errors::CacheError;
use crate::ttl;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, warn};

/// Extension used for in-progress download artifacts
const TEMP_EXTENSION: &str = "tmp";

/// A finished entry on disk
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// Absolute path of the cached file
    pub path: PathBuf,
    /// Last modification time
    pub modified: SystemTime,
    /// Size in bytes
    pub size_bytes: u64,
}

/// Filesystem accessor for a single cache directory
#[derive(Debug, Clone)]
pub struct CacheStore {
    directory: PathBuf,
}

impl CacheStore {
    /// Create a store over an existing cache directory
    pub fn new(directory: PathBuf) -> Self {
        Self { directory }
    }

    /// Cache directory this store operates on
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Final on-disk path for a cache key
    pub fn entry_path(&self, key: &str) -> PathBuf {
        self.directory.join(key)
    }

    /// Sibling temporary path for a cache key, used during downloads
    pub fn temp_path(&self, key: &str) -> PathBuf {
        let mut name = self.directory.join(key).into_os_string();
        name.push(".");
        name.push(TEMP_EXTENSION);
        PathBuf::from(name)
    }

    /// Resolve a key to its path, if a finished entry exists
    pub fn lookup(&self, key: &str) -> Option<PathBuf> {
        let path = self.entry_path(key);
        match std::fs::metadata(&path) {
            Ok(meta) if meta.is_file() => Some(path),
            _ => None,
        }
    }

    /// Resolve a key to its path if the entry is both present and fresh.
    ///
    /// Stats the entry once and answers existence and TTL together. An entry
    /// whose modification time cannot be read is treated as corrupted: it is
    /// deleted and reported as a miss so the caller triggers a fresh download.
    pub fn valid_entry(&self, key: &str, ttl_minutes: i64) -> Option<PathBuf> {
        let path = self.entry_path(key);
        let meta = match std::fs::metadata(&path) {
            Ok(meta) if meta.is_file() => meta,
            _ => return None,
        };

        match meta.modified() {
            Ok(modified) if ttl::is_fresh(modified, ttl_minutes) => Some(path),
            Ok(_) => None,
            Err(e) => {
                let err = CacheError::Corruption {
                    path: path.clone(),
                    details: e.to_string(),
                };
                warn!("{}, removing", err);
                self.delete(&path);
                None
            }
        }
    }

    /// Check whether a key resolves to an entry that is both present and fresh
    pub fn is_currently_valid(&self, key: &str, ttl_minutes: i64) -> bool {
        self.valid_entry(key, ttl_minutes).is_some()
    }

    /// Best-effort deletion; failures are logged and never propagated
    pub fn delete(&self, path: &Path) {
        match std::fs::remove_file(path) {
            Ok(()) => debug!("Deleted cache file {:?}", path),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to delete cache file {:?}: {}", path, e),
        }
    }

    /// Enumerate finished entries, skipping `.tmp` artifacts and anything
    /// whose metadata cannot be read
    pub fn list_entries(&self) -> Vec<CacheEntry> {
        self.list_files(false)
    }

    /// Enumerate `.tmp` artifacts left behind by in-progress or interrupted
    /// downloads
    pub fn list_temp_artifacts(&self) -> Vec<CacheEntry> {
        self.list_files(true)
    }

    fn list_files(&self, temps: bool) -> Vec<CacheEntry> {
        let read_dir = match std::fs::read_dir(&self.directory) {
            Ok(read_dir) => read_dir,
            Err(e) => {
                warn!("Failed to read cache directory {:?}: {}", self.directory, e);
                return Vec::new();
            }
        };

        let mut entries = Vec::new();
        for dir_entry in read_dir.flatten() {
            let path = dir_entry.path();
            let is_temp = path
                .extension()
                .map(|ext| ext == TEMP_EXTENSION)
                .unwrap_or(false);
            if is_temp != temps {
                continue;
            }

            let Ok(meta) = dir_entry.metadata() else {
                continue;
            };
            if !meta.is_file() {
                continue;
            }
            let Ok(modified) = meta.modified() else {
                continue;
            };

            entries.push(CacheEntry {
                path,
                modified,
                size_bytes: meta.len(),
            });
        }

        entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::tempdir;

    fn store_in(dir: &tempfile::TempDir) -> CacheStore {
        CacheStore::new(dir.path().to_path_buf())
    }

    #[test]
    fn test_lookup_hit_and_miss() {
        let dir = tempdir().unwrap();
        let store = store_in(&dir);

        assert!(store.lookup("abc.jpg").is_none());

        std::fs::write(dir.path().join("abc.jpg"), b"image bytes").unwrap();
        let path = store.lookup("abc.jpg").unwrap();
        assert_eq!(path, dir.path().join("abc.jpg"));
    }

    #[test]
    fn test_lookup_ignores_directories() {
        let dir = tempdir().unwrap();
        let store = store_in(&dir);

        std::fs::create_dir(dir.path().join("abc.jpg")).unwrap();
        assert!(store.lookup("abc.jpg").is_none());
    }

    #[test]
    fn test_validity_combines_lookup_and_ttl() {
        let dir = tempdir().unwrap();
        let store = store_in(&dir);
        let path = dir.path().join("abc.jpg");

        assert!(!store.is_currently_valid("abc.jpg", 60));

        std::fs::write(&path, b"image bytes").unwrap();
        assert!(store.is_currently_valid("abc.jpg", 60));
        assert_eq!(store.valid_entry("abc.jpg", 60), Some(path.clone()));
        assert!(!store.is_currently_valid("abc.jpg", 0));
        assert_eq!(store.valid_entry("abc.jpg", 0), None);

        // Backdate beyond the TTL
        let stale = SystemTime::now() - Duration::from_secs(2 * 60 * 60);
        std::fs::File::options()
            .write(true)
            .open(&path)
            .unwrap()
            .set_modified(stale)
            .unwrap();
        assert!(!store.is_currently_valid("abc.jpg", 60));
    }

    #[test]
    fn test_delete_is_best_effort() {
        let dir = tempdir().unwrap();
        let store = store_in(&dir);

        // Deleting something that does not exist must not panic or error
        store.delete(&dir.path().join("missing.jpg"));

        let path = dir.path().join("abc.jpg");
        std::fs::write(&path, b"image bytes").unwrap();
        store.delete(&path);
        assert!(!path.exists());
    }

    #[test]
    fn test_list_entries_skips_temp_artifacts() {
        let dir = tempdir().unwrap();
        let store = store_in(&dir);

        std::fs::write(dir.path().join("a.jpg"), b"a").unwrap();
        std::fs::write(dir.path().join("b.png"), b"bb").unwrap();
        std::fs::write(dir.path().join("c.jpg.tmp"), b"partial").unwrap();

        let entries = store.list_entries();
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().all(|e| e.path.extension().unwrap() != "tmp"));

        let temps = store.list_temp_artifacts();
        assert_eq!(temps.len(), 1);
        assert_eq!(temps[0].path, dir.path().join("c.jpg.tmp"));
    }

    #[test]
    fn test_temp_path_is_sibling_of_entry() {
        let dir = tempdir().unwrap();
        let store = store_in(&dir);

        let entry = store.entry_path("abc.jpg");
        let temp = store.temp_path("abc.jpg");
        assert_eq!(temp, dir.path().join("abc.jpg.tmp"));
        assert_eq!(entry.parent(), temp.parent());
    }
}
