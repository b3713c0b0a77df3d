//! # Download Coordination Module
//!
//! ## Purpose
//! Single-flight download engine for remote images: deduplicates concurrent
//! fetches per identifier, performs network fetches through a bounded worker
//! pool, writes atomically, and triggers eviction after every success.
//!
//! ## Input/Output Specification
//! - **Input**: Image identifiers (remote URLs or bundled paths)
//! - **Output**: An [`ImageHandle`] the caller can use immediately
//! - **Guarantee**: At most one network fetch in flight per identifier
//!
//! ## Key Features
//! - Atomic check-and-insert on the pending registry preserves single-flight
//! - Concurrent callers join the in-flight result, bounded by a join timeout
//! - Streaming writes to a sibling `.tmp` file under a per-file byte budget
//! - Atomic rename is the only point an entry becomes visible to readers
//! - No failure in this component ever surfaces to the `resolve` caller; the
//!   worst outcome is an uncached load this time
//!
//! ## Per-Identifier Lifecycle
//! `IDLE -> DOWNLOADING -> {COMPLETED | FAILED} -> removed from registry`

use crate::config::CacheSettings;
use crate::errors::{CacheError, Result};
use crate::eviction::EvictionManager;
use crate::key;
use crate::store::CacheStore;
use crate::ImageHandle;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::StreamExt;
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, warn};

/// Outcome of an in-flight download, broadcast to joined waiters
#[derive(Debug, Clone)]
pub enum DownloadStatus {
    /// Fetch submitted or running
    InFlight,
    /// Entry is on disk at the given path
    Completed(PathBuf),
    /// Fetch failed; the identifier remains uncached this epoch
    Failed,
}

/// Counter snapshot for cache observability
#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct DownloadCounters {
    /// Resolves answered from disk
    pub hits: u64,
    /// Resolves that found no valid entry
    pub misses: u64,
    /// Background downloads that produced a cache entry
    pub completed: u64,
    /// Background downloads that failed or were aborted
    pub failed: u64,
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
}

/// Shared state captured by background fetch tasks
struct Inner {
    settings: CacheSettings,
    client: reqwest::Client,
    store: CacheStore,
    eviction: EvictionManager,
    pending: DashMap<String, watch::Receiver<DownloadStatus>>,
    permits: Semaphore,
    counters: Counters,
}

/// Single-flight download coordinator
pub struct DownloadCoordinator {
    inner: Arc<Inner>,
    tasks: Mutex<JoinSet<()>>,
}

impl DownloadCoordinator {
    /// Create a coordinator with a bounded worker pool
    pub fn new(
        settings: CacheSettings,
        client: reqwest::Client,
        store: CacheStore,
        eviction: EvictionManager,
    ) -> Self {
        let permits = Semaphore::new(settings.worker_pool_size);
        Self {
            inner: Arc::new(Inner {
                settings,
                client,
                store,
                eviction,
                pending: DashMap::new(),
                permits,
                counters: Counters::default(),
            }),
            tasks: Mutex::new(JoinSet::new()),
        }
    }

    /// Resolve an identifier to a usable image handle.
    ///
    /// Never fails and never blocks on network I/O, except when joining an
    /// already in-flight download, and then only up to the join timeout.
    pub async fn resolve(&self, identifier: &str) -> ImageHandle {
        // Bundled resources load directly and are never cached
        if !is_remote(identifier) {
            return ImageHandle::Bundled(PathBuf::from(identifier));
        }

        if !self.inner.settings.enabled {
            return ImageHandle::Remote(identifier.to_string());
        }

        let cache_key = key::cache_key(identifier);
        if let Some(path) = self
            .inner
            .store
            .valid_entry(&cache_key, self.inner.settings.ttl_minutes)
        {
            self.inner.counters.hits.fetch_add(1, Ordering::Relaxed);
            debug!("Cache hit for {}", identifier);
            return ImageHandle::Cached(path);
        }

        self.inner.counters.misses.fetch_add(1, Ordering::Relaxed);

        // Check-and-insert must be one atomic operation to preserve
        // single-flight; the entry API holds the shard lock across both
        match self.inner.pending.entry(identifier.to_string()) {
            Entry::Occupied(entry) => {
                let receiver = entry.get().clone();
                drop(entry);
                self.join_in_flight(identifier, receiver).await
            }
            Entry::Vacant(entry) => {
                let (sender, receiver) = watch::channel(DownloadStatus::InFlight);
                drop(entry.insert(receiver));
                self.spawn_fetch(identifier.to_string(), cache_key, sender);

                // The triggering caller gets a direct load; only later
                // requests benefit from the entry this fetch produces
                ImageHandle::Remote(identifier.to_string())
            }
        }
    }

    /// Wait on an in-flight download up to the join timeout
    async fn join_in_flight(
        &self,
        identifier: &str,
        mut receiver: watch::Receiver<DownloadStatus>,
    ) -> ImageHandle {
        let timeout = Duration::from_secs(self.inner.settings.join_timeout_secs);
        let settled = receiver.wait_for(|status| !matches!(status, DownloadStatus::InFlight));

        match tokio::time::timeout(timeout, settled).await {
            Ok(Ok(status)) => {
                if let DownloadStatus::Completed(path) = &*status {
                    debug!("Joined in-flight download of {}", identifier);
                    return ImageHandle::Cached(path.clone());
                }
                ImageHandle::Remote(identifier.to_string())
            }
            // Sender dropped (task aborted during shutdown)
            Ok(Err(_)) => ImageHandle::Remote(identifier.to_string()),
            Err(_) => {
                let err = CacheError::JoinTimeout {
                    identifier: identifier.to_string(),
                    timeout_ms: timeout.as_millis() as u64,
                };
                debug!("{}, falling back to direct load", err);
                ImageHandle::Remote(identifier.to_string())
            }
        }
    }

    /// Submit a background fetch job for an identifier that won the
    /// single-flight race
    fn spawn_fetch(
        &self,
        identifier: String,
        cache_key: String,
        sender: watch::Sender<DownloadStatus>,
    ) {
        let inner = Arc::clone(&self.inner);
        self.tasks.lock().spawn(async move {
            let status = match inner.permits.acquire().await {
                Ok(_permit) => match inner.fetch_and_store(&identifier, &cache_key).await {
                    Ok(path) => {
                        inner.counters.completed.fetch_add(1, Ordering::Relaxed);
                        inner.eviction.enforce_limit(inner.settings.max_entries);
                        DownloadStatus::Completed(path)
                    }
                    Err(e) => {
                        inner.counters.failed.fetch_add(1, Ordering::Relaxed);
                        warn!("Image download not cached ({}): {}", e.category(), e);
                        DownloadStatus::Failed
                    }
                },
                // Semaphore closed: shutdown in progress
                Err(_) => DownloadStatus::Failed,
            };

            let _ = sender.send(status);
            // Always clear the registry so future requests can retry
            inner.pending.remove(&identifier);
        });
    }

    /// Counter snapshot for stats reporting
    pub fn counters(&self) -> DownloadCounters {
        DownloadCounters {
            hits: self.inner.counters.hits.load(Ordering::Relaxed),
            misses: self.inner.counters.misses.load(Ordering::Relaxed),
            completed: self.inner.counters.completed.load(Ordering::Relaxed),
            failed: self.inner.counters.failed.load(Ordering::Relaxed),
        }
    }

    /// Request orderly pool termination: close the semaphore so no queued job
    /// starts a fetch, let running downloads finish within the grace period,
    /// then force-cancel whatever remains
    pub async fn shutdown(&self, grace: Duration) {
        // Jobs still waiting on a permit fail their acquisition instead of
        // opening new connections
        self.inner.permits.close();

        let mut tasks = std::mem::take(&mut *self.tasks.lock());
        let drained = tokio::time::timeout(grace, async {
            while tasks.join_next().await.is_some() {}
        })
        .await;

        if drained.is_err() {
            warn!("Shutdown grace period elapsed, cancelling remaining downloads");
            tasks.abort_all();
            while tasks.join_next().await.is_some() {}
        }

        // Aborted tasks never reach their own registry cleanup
        self.inner.pending.clear();
    }
}

impl Inner {
    /// Fetch one image and make it visible in the cache.
    ///
    /// Streams the body to `{key}.tmp` under the byte budget, then renames it
    /// over the final path. On any failure the temp artifact is removed and no
    /// entry is created.
    async fn fetch_and_store(&self, identifier: &str, cache_key: &str) -> Result<PathBuf> {
        let url = reqwest::Url::parse(identifier).map_err(|e| CacheError::Fetch {
            identifier: identifier.to_string(),
            details: e.to_string(),
        })?;

        if !matches!(url.scheme(), "http" | "https") {
            return Err(CacheError::UnsupportedScheme {
                scheme: url.scheme().to_string(),
                identifier: identifier.to_string(),
            });
        }

        let response = self
            .client
            .get(url)
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|e| CacheError::Fetch {
                identifier: identifier.to_string(),
                details: e.to_string(),
            })?;

        // A declared oversized body is rejected before streaming anything
        if let Some(length) = response.content_length() {
            if length > self.settings.max_file_bytes {
                return Err(CacheError::SizeBudgetExceeded {
                    identifier: identifier.to_string(),
                    limit_bytes: self.settings.max_file_bytes,
                });
            }
        }

        let final_path = self.store.entry_path(cache_key);
        let temp_path = self.store.temp_path(cache_key);

        let written = match self.stream_to_temp(response, &temp_path, identifier).await {
            Ok(written) => written,
            Err(e) => {
                let _ = tokio::fs::remove_file(&temp_path).await;
                return Err(e);
            }
        };

        // The rename is the only point the entry becomes visible to readers
        if let Err(e) = tokio::fs::rename(&temp_path, &final_path).await {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(CacheError::Io(e));
        }

        debug!(
            "Cached {} as {:?} ({} bytes)",
            identifier, final_path, written
        );
        Ok(final_path)
    }

    /// Stream a response body to a temporary file, enforcing the byte budget
    async fn stream_to_temp(
        &self,
        response: reqwest::Response,
        temp_path: &std::path::Path,
        identifier: &str,
    ) -> Result<u64> {
        let mut file = tokio::fs::File::create(temp_path).await?;
        let mut stream = response.bytes_stream();
        let mut written: u64 = 0;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| CacheError::Fetch {
                identifier: identifier.to_string(),
                details: e.to_string(),
            })?;

            written += chunk.len() as u64;
            if written > self.settings.max_file_bytes {
                return Err(CacheError::SizeBudgetExceeded {
                    identifier: identifier.to_string(),
                    limit_bytes: self.settings.max_file_bytes,
                });
            }

            file.write_all(&chunk).await?;
        }

        file.sync_all().await?;
        Ok(written)
    }
}

/// Remote identifiers carry a scheme; everything else is a bundled resource
fn is_remote(identifier: &str) -> bool {
    identifier.contains("://")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use std::path::Path;
    use std::time::SystemTime;
    use tempfile::{tempdir, TempDir};
    use wiremock::matchers::{method, path as url_path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn coordinator_in(dir: &TempDir, tweak: impl FnOnce(&mut CacheSettings)) -> DownloadCoordinator {
        let mut settings = Config::default().cache;
        settings.directory = dir.path().to_path_buf();
        settings.ttl_minutes = 60;
        tweak(&mut settings);

        let store = CacheStore::new(settings.directory.clone());
        let eviction = EvictionManager::new(store.clone());
        DownloadCoordinator::new(settings, reqwest::Client::new(), store, eviction)
    }

    async fn wait_for_file(path: &Path) {
        for _ in 0..250 {
            if path.exists() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("timed out waiting for {:?}", path);
    }

    /// Wait until every background job removed itself from the registry
    async fn wait_for_idle(coordinator: &DownloadCoordinator) {
        for _ in 0..250 {
            if coordinator.inner.pending.is_empty() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("timed out waiting for downloads to settle");
    }

    async fn mount_image(server: &MockServer, route: &str, body: Vec<u8>, expected_hits: u64) {
        Mock::given(method("GET"))
            .and(url_path(route))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(body))
            .expect(expected_hits)
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_bundled_identifier_never_cached() {
        let dir = tempdir().unwrap();
        let coordinator = coordinator_in(&dir, |_| {});

        let handle = coordinator.resolve("icons/placeholder.png").await;
        assert_eq!(
            handle,
            ImageHandle::Bundled(PathBuf::from("icons/placeholder.png"))
        );
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_disabled_cache_always_loads_directly() {
        let server = MockServer::start().await;
        mount_image(&server, "/img.jpg", vec![1u8; 64], 0).await;

        let dir = tempdir().unwrap();
        let coordinator = coordinator_in(&dir, |settings| settings.enabled = false);

        let url = format!("{}/img.jpg", server.uri());
        let handle = coordinator.resolve(&url).await;
        assert_eq!(handle, ImageHandle::Remote(url));

        coordinator.shutdown(Duration::from_secs(2)).await;
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_first_request_direct_then_cache_hits() {
        let server = MockServer::start().await;
        mount_image(&server, "/img.jpg", vec![1u8; 128], 1).await;

        let dir = tempdir().unwrap();
        let coordinator = coordinator_in(&dir, |_| {});
        let url = format!("{}/img.jpg", server.uri());

        // The triggering request never benefits from its own fetch
        let handle = coordinator.resolve(&url).await;
        assert_eq!(handle, ImageHandle::Remote(url.clone()));

        let entry = dir.path().join(key::cache_key(&url));
        wait_for_file(&entry).await;

        // Idempotent hits afterwards; the mock's expect(1) verifies no
        // further fetch happened
        for _ in 0..2 {
            let handle = coordinator.resolve(&url).await;
            assert_eq!(handle, ImageHandle::Cached(entry.clone()));
        }

        let counters = coordinator.counters();
        assert_eq!(counters.hits, 2);
        assert_eq!(counters.misses, 1);
        assert_eq!(counters.completed, 1);

        coordinator.shutdown(Duration::from_secs(2)).await;
    }

    #[tokio::test]
    async fn test_single_flight_under_concurrency() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(url_path("/img.jpg"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(vec![7u8; 256])
                    .set_delay(Duration::from_millis(200)),
            )
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempdir().unwrap();
        let coordinator = Arc::new(coordinator_in(&dir, |_| {}));
        let url = format!("{}/img.jpg", server.uri());

        let mut requests = Vec::new();
        for _ in 0..10 {
            let coordinator = Arc::clone(&coordinator);
            let url = url.clone();
            requests.push(tokio::spawn(
                async move { coordinator.resolve(&url).await },
            ));
        }

        let mut direct = 0;
        let mut cached = 0;
        for request in requests {
            match request.await.unwrap() {
                ImageHandle::Remote(_) => direct += 1,
                ImageHandle::Cached(_) => cached += 1,
                ImageHandle::Bundled(_) => panic!("unexpected bundled handle"),
            }
        }

        // Exactly one caller won the race and got the direct load; every
        // other caller joined the single fetch
        assert_eq!(direct, 1);
        assert_eq!(cached, 9);

        coordinator.shutdown(Duration::from_secs(2)).await;
        // MockServer verifies the fetch counter is exactly 1 on drop
    }

    #[tokio::test]
    async fn test_expired_entry_triggers_refetch() {
        let server = MockServer::start().await;
        mount_image(&server, "/img.jpg", vec![2u8; 64], 2).await;

        let dir = tempdir().unwrap();
        let coordinator = coordinator_in(&dir, |_| {});
        let url = format!("{}/img.jpg", server.uri());

        coordinator.resolve(&url).await;
        let entry = dir.path().join(key::cache_key(&url));
        wait_for_file(&entry).await;

        // Age the entry past the 60 minute TTL
        std::fs::File::options()
            .write(true)
            .open(&entry)
            .unwrap()
            .set_modified(SystemTime::now() - Duration::from_secs(2 * 60 * 60))
            .unwrap();

        let handle = coordinator.resolve(&url).await;
        assert_eq!(handle, ImageHandle::Remote(url.clone()));

        wait_for_idle(&coordinator).await;
        coordinator.shutdown(Duration::from_secs(2)).await;
        // expect(2) on the mock verifies the stale entry was re-fetched
    }

    #[tokio::test]
    async fn test_size_budget_aborts_without_artifacts() {
        let server = MockServer::start().await;
        mount_image(&server, "/huge.jpg", vec![3u8; 4096], 1).await;

        let dir = tempdir().unwrap();
        let coordinator = coordinator_in(&dir, |settings| settings.max_file_bytes = 512);
        let url = format!("{}/huge.jpg", server.uri());

        coordinator.resolve(&url).await;
        wait_for_idle(&coordinator).await;
        coordinator.shutdown(Duration::from_secs(2)).await;

        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
        assert_eq!(coordinator.counters().failed, 1);
    }

    #[tokio::test]
    async fn test_unsupported_scheme_is_a_noop() {
        let dir = tempdir().unwrap();
        let coordinator = coordinator_in(&dir, |_| {});

        let handle = coordinator.resolve("ftp://example.com/img.jpg").await;
        assert_eq!(
            handle,
            ImageHandle::Remote("ftp://example.com/img.jpg".to_string())
        );

        wait_for_idle(&coordinator).await;
        coordinator.shutdown(Duration::from_secs(2)).await;
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_failed_fetch_clears_registry_for_retry() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(url_path("/missing.jpg"))
            .respond_with(ResponseTemplate::new(404))
            .expect(2)
            .mount(&server)
            .await;

        let dir = tempdir().unwrap();
        let coordinator = coordinator_in(&dir, |_| {});
        let url = format!("{}/missing.jpg", server.uri());

        coordinator.resolve(&url).await;
        wait_for_idle(&coordinator).await;

        // A later request must be able to retry
        coordinator.resolve(&url).await;
        wait_for_idle(&coordinator).await;
        coordinator.shutdown(Duration::from_secs(2)).await;

        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
        assert_eq!(coordinator.counters().failed, 2);
    }

    #[tokio::test]
    async fn test_join_timeout_falls_back_to_direct_load() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(url_path("/slow.jpg"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(vec![6u8; 64])
                    .set_delay(Duration::from_secs(3)),
            )
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempdir().unwrap();
        let coordinator = coordinator_in(&dir, |settings| settings.join_timeout_secs = 1);
        let url = format!("{}/slow.jpg", server.uri());

        // The winner gets the direct load and starts the slow fetch
        assert_eq!(
            coordinator.resolve(&url).await,
            ImageHandle::Remote(url.clone())
        );

        // A joiner gives up after the join timeout instead of waiting out the
        // full response delay; completion would have produced a Cached handle
        let start = tokio::time::Instant::now();
        let handle = coordinator.resolve(&url).await;
        assert_eq!(handle, ImageHandle::Remote(url.clone()));
        assert!(start.elapsed() >= Duration::from_secs(1));

        // The abandoned fetch still finishes and caches the entry
        let entry = dir.path().join(key::cache_key(&url));
        wait_for_file(&entry).await;
        assert_eq!(coordinator.resolve(&url).await, ImageHandle::Cached(entry));

        coordinator.shutdown(Duration::from_secs(2)).await;
    }

    #[tokio::test]
    async fn test_shutdown_cancels_and_clears_registry() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(url_path("/stuck.jpg"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(vec![8u8; 64])
                    .set_delay(Duration::from_secs(30)),
            )
            .mount(&server)
            .await;

        let dir = tempdir().unwrap();
        let coordinator = coordinator_in(&dir, |_| {});
        let url = format!("{}/stuck.jpg", server.uri());

        coordinator.resolve(&url).await;
        // Let the job acquire its permit and block on the stuck response
        tokio::time::sleep(Duration::from_millis(100)).await;

        coordinator.shutdown(Duration::from_millis(300)).await;

        // The cancelled fetch left neither a registry entry nor an artifact,
        // so a restart starts from a clean slate
        assert!(coordinator.inner.pending.is_empty());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_eviction_runs_after_completed_download() {
        let server = MockServer::start().await;
        mount_image(&server, "/a.jpg", vec![4u8; 32], 1).await;
        mount_image(&server, "/b.jpg", vec![5u8; 32], 1).await;

        let dir = tempdir().unwrap();
        let coordinator = coordinator_in(&dir, |settings| settings.max_entries = 1);

        let url_a = format!("{}/a.jpg", server.uri());
        let url_b = format!("{}/b.jpg", server.uri());

        coordinator.resolve(&url_a).await;
        let entry_a = dir.path().join(key::cache_key(&url_a));
        wait_for_file(&entry_a).await;

        // Make the relative age unambiguous before caching the second image
        std::fs::File::options()
            .write(true)
            .open(&entry_a)
            .unwrap()
            .set_modified(SystemTime::now() - Duration::from_secs(120))
            .unwrap();

        coordinator.resolve(&url_b).await;
        let entry_b = dir.path().join(key::cache_key(&url_b));
        wait_for_file(&entry_b).await;
        coordinator.shutdown(Duration::from_secs(2)).await;

        assert!(!entry_a.exists());
        assert!(entry_b.exists());
    }
}
