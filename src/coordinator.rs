//! The coordinator (spec.md §4.6, §4.7, §4.8).
//!
//! Plays the role `peoci::ocidist_cache::Client` plays in the teacher
//! workspace — a single, `Clone`-able façade in front of several
//! independent caches (`peoci/src/ocidist_cache.rs:155-173`) — but adds one
//! outer `RwLock` gating every public operation instead of relying purely on
//! each cache's own interior locking, because spec.md §4.6/§5 requires a
//! coarse read/write ordering across caches that independent per-cache
//! locks (or `moka`'s internal locking) cannot provide on their own.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{Mutex as TokioMutex, RwLock};

use crate::blob_cache::BlobCache;
use crate::cancel::CancellationToken;
use crate::config::Config;
use crate::digest::Digest;
use crate::error::Result;
use crate::eviction::{Composite, EvictionStrategy, Lru, SizeBased, Ttl};
use crate::fs::Filesystem;
use crate::index::{Index, IndexEntry};
use crate::logger::{self, Logger, NoopLogger};
use crate::manifest_cache::{Manifest, ManifestCache};
use crate::metrics::{Metrics, MetricsSnapshot};
use crate::reference::Reference;
use crate::storage::Storage;
use crate::tag_cache::TagCache;
use crate::toc_cache::{TOCCacheEntry, TocCache};
use crate::verification_cache::{VerificationCache, VerificationResult};

fn blob_key(digest: &Digest) -> String {
    format!("blob:{digest}")
}
fn manifest_key(digest: &Digest) -> String {
    format!("manifest:{digest}")
}
fn tag_key(reference: &Reference) -> String {
    format!("tag:{reference}")
}
fn verify_key(digest: &Digest, policy_hash: &str) -> String {
    format!("verify:{digest}:{policy_hash}")
}
fn toc_key(digest: &Digest) -> String {
    format!("toc:{digest}")
}

/// Default composite eviction policy: expired entries go first regardless
/// of size, then the largest remaining entries, then least-recently-used.
fn default_eviction() -> Composite {
    Composite::new(vec![
        (Box::new(Ttl::new()), 0),
        (Box::new(SizeBased::new()), 10),
        (Box::new(Lru::new()), 20),
    ])
}

pub struct Coordinator<F: Filesystem> {
    config: Config,
    storage: Arc<Storage<F>>,
    index: Index,
    eviction: TokioMutex<Composite>,
    metrics: Metrics,
    logger: Box<dyn Logger>,
    blobs: BlobCache<F>,
    manifests: ManifestCache<F>,
    tags: TagCache<F>,
    verification: VerificationCache<F>,
    toc: TocCache<F>,
    lock: RwLock<()>,
}

impl<F: Filesystem> Coordinator<F> {
    pub async fn new(fs: F, config: Config) -> Result<Self> {
        Self::with_logger(fs, config, Box::new(NoopLogger)).await
    }

    pub async fn with_logger(fs: F, config: Config, logger: Box<dyn Logger>) -> Result<Self> {
        let storage = Arc::new(Storage::new(fs, config.root.clone()));
        let index_path = config.root.join("index.jsonl");
        let index = Index::new(index_path, config.max_entries, config.compaction_threshold);
        index.load(&CancellationToken::new()).await?;

        Ok(Coordinator {
            blobs: BlobCache::new(storage.clone()),
            manifests: ManifestCache::new(storage.clone()),
            tags: TagCache::new(storage.clone(), config.max_tag_history_size),
            verification: VerificationCache::new(storage.clone()),
            toc: TocCache::new(storage.clone()),
            storage,
            index,
            eviction: TokioMutex::new(default_eviction()),
            metrics: Metrics::new(),
            logger,
            config,
            lock: RwLock::new(()),
        })
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    // -- blobs ---------------------------------------------------------

    pub async fn put_blob(&self, digest: &Digest, data: &[u8], ttl_seconds: Option<u64>) -> Result<()> {
        let start = std::time::Instant::now();
        let _guard = self.lock.write().await;
        let now = Utc::now();
        self.blobs.put(digest, data, ttl_seconds, now).await?;

        let key = blob_key(digest);
        let entry = IndexEntry::new(&key, data.len() as u64, now).with_ttl(ttl_seconds);
        self.index.put(entry.clone()).await?;
        self.eviction.lock().await.on_add(&key, &entry);

        self.metrics.record_write(data.len() as u64, start.elapsed());
        logger::log_cache_operation(self.logger.as_ref(), "put_blob", &key);
        Ok(())
    }

    pub async fn get_blob(&self, digest: &Digest) -> Result<Option<Vec<u8>>> {
        let start = std::time::Instant::now();
        let _guard = self.lock.read().await;
        let now = Utc::now();
        let result = self.blobs.get(digest, now).await?;

        let key = blob_key(digest);
        match &result {
            Some(data) => {
                self.index.touch(&key, now).await?;
                self.eviction.lock().await.on_access(&key);
                self.metrics.record_hit(data.len() as u64, start.elapsed());
                logger::log_cache_hit(self.logger.as_ref(), &key);
            }
            None => {
                self.metrics.record_miss(start.elapsed());
                logger::log_cache_miss(self.logger.as_ref(), &key);
            }
        }
        Ok(result)
    }

    pub async fn delete_blob(&self, digest: &Digest) -> Result<()> {
        let _guard = self.lock.write().await;
        self.blobs.delete(digest).await?;
        let key = blob_key(digest);
        self.index.remove(&key).await?;
        self.eviction.lock().await.on_remove(&key);
        Ok(())
    }

    // -- manifests -------------------------------------------------------

    pub async fn put_manifest(&self, digest: &Digest, manifest: Manifest) -> Result<()> {
        let _guard = self.lock.write().await;
        let now = Utc::now();
        let size = serde_json::to_vec(&manifest)?.len() as u64;
        self.manifests.put(digest, manifest, now).await?;

        let key = manifest_key(digest);
        let entry = IndexEntry::new(&key, size, now);
        self.index.put(entry.clone()).await?;
        self.eviction.lock().await.on_add(&key, &entry);
        Ok(())
    }

    pub async fn get_manifest(&self, digest: &Digest) -> Result<Option<Manifest>> {
        let _guard = self.lock.read().await;
        let result = self.manifests.get(digest).await?;
        let key = manifest_key(digest);
        if result.is_some() {
            self.index.touch(&key, Utc::now()).await?;
            self.eviction.lock().await.on_access(&key);
        }
        Ok(result)
    }

    // -- tags --------------------------------------------------------------

    pub async fn put_tag(&self, reference: &Reference, digest: &str) -> Result<()> {
        let _guard = self.lock.write().await;
        let now = Utc::now();
        self.tags.put(reference, digest, now).await?;

        let key = tag_key(reference);
        let entry = IndexEntry::new(&key, digest.len() as u64, now);
        self.index.put(entry.clone()).await?;
        self.eviction.lock().await.on_add(&key, &entry);
        Ok(())
    }

    pub async fn get_tag(&self, reference: &Reference) -> Result<Option<String>> {
        let _guard = self.lock.read().await;
        self.tags.get(reference).await
    }

    // -- verification --------------------------------------------------------

    pub async fn put_verification(&self, result: &VerificationResult) -> Result<()> {
        let _guard = self.lock.write().await;
        self.verification.put(result).await?;

        let digest: Digest = result.digest.parse()?;
        let key = verify_key(&digest, &result.policy_hash);
        let entry = IndexEntry::new(&key, 1, result.verified_at);
        self.index.put(entry.clone()).await?;
        self.eviction.lock().await.on_add(&key, &entry);
        Ok(())
    }

    pub async fn get_verification(&self, digest: &Digest, policy_hash: &str) -> Result<Option<VerificationResult>> {
        let _guard = self.lock.read().await;
        self.verification.get(digest, policy_hash).await
    }

    // -- toc -----------------------------------------------------------------

    pub async fn put_toc(&self, digest: &Digest, file_count: u64, total_size: u64) -> Result<()> {
        let _guard = self.lock.write().await;
        let now = Utc::now();
        self.toc.put(digest, file_count, total_size, now).await?;

        let key = toc_key(digest);
        let entry = IndexEntry::new(&key, total_size, now);
        self.index.put(entry.clone()).await?;
        self.eviction.lock().await.on_add(&key, &entry);
        Ok(())
    }

    pub async fn get_toc(&self, digest: &Digest) -> Result<Option<TOCCacheEntry>> {
        let _guard = self.lock.read().await;
        self.toc.get(digest).await
    }

    /// Removes the entry named by an index key, regardless of which cache it
    /// belongs to (dispatches on the key's `<kind>:` prefix).
    async fn remove_by_key(&self, key: &str) -> Result<()> {
        if let Some(rest) = key.strip_prefix("blob:") {
            let digest: Digest = rest.parse()?;
            self.blobs.delete(&digest).await?;
        } else if let Some(rest) = key.strip_prefix("manifest:") {
            let digest: Digest = rest.parse()?;
            self.storage
                .remove(&PathBuf::from("manifests").join(digest.as_str().replace(':', "_")))
                .await
                .ok();
        } else if let Some(rest) = key.strip_prefix("tag:") {
            let reference: Reference = rest.parse()?;
            self.tags.delete(&reference).await?;
        } else if let Some(rest) = key.strip_prefix("verify:") {
            if let Some((digest_str, policy)) = rest.rsplit_once(':') {
                let digest: Digest = digest_str.parse()?;
                self.storage
                    .remove(&PathBuf::from("verify").join(format!("{}_{}", digest.shard(), digest.hex())).join(policy))
                    .await
                    .ok();
            }
        } else if let Some(rest) = key.strip_prefix("toc:") {
            let digest: Digest = rest.parse()?;
            self.storage
                .remove(&PathBuf::from("toc").join(digest.shard()).join(digest.hex()))
                .await
                .ok();
        }
        self.index.remove(key).await?;
        self.eviction.lock().await.on_remove(key);
        Ok(())
    }

    /// spec.md §4.7: snapshot expired entries under a read lock, release,
    /// then remove each one under the write lock.
    pub async fn cleanup_pass(&self) -> Result<usize> {
        let now = Utc::now();
        let expired: Vec<String> = {
            let _guard = self.lock.read().await;
            self.index
                .snapshot()
                .await
                .into_iter()
                .filter(|e| e.is_expired(now))
                .map(|e| e.key)
                .collect()
        };

        let removed = expired.len();
        if removed > 0 {
            let _guard = self.lock.write().await;
            for key in &expired {
                self.remove_by_key(key).await?;
            }
            logger::log_cleanup(self.logger.as_ref(), removed, 0);
        }
        Ok(removed)
    }

    /// spec.md §4.8: if the cache is over its configured size budget, evict
    /// entries (via the composite strategy) until it is back under budget.
    pub async fn eviction_pass(&self) -> Result<usize> {
        if self.config.max_total_size_bytes == 0 {
            return Ok(0);
        }

        let (entries, over_by) = {
            let _guard = self.lock.read().await;
            let stats = self.index.stats().await;
            if stats.total_size_bytes <= self.config.max_total_size_bytes {
                return Ok(0);
            }
            (
                self.index.snapshot().await,
                stats.total_size_bytes - self.config.max_total_size_bytes,
            )
        };

        let selected = {
            let eviction = self.eviction.lock().await;
            eviction.select_for_eviction(&entries, over_by, Utc::now())
        };

        if selected.is_empty() {
            return Ok(0);
        }

        let _guard = self.lock.write().await;
        for key in &selected {
            let start = std::time::Instant::now();
            self.remove_by_key(key).await?;
            self.metrics.record_eviction(start.elapsed());
            logger::log_eviction(self.logger.as_ref(), key, "over_capacity");
        }
        Ok(selected.len())
    }

    /// One maintenance cycle: expire, evict to budget, compact the index log
    /// if it has grown past its threshold, and record peak usage.
    pub async fn run_maintenance(&self) -> Result<()> {
        self.cleanup_pass().await?;
        self.eviction_pass().await?;

        let stats = self.index.stats().await;
        self.metrics
            .record_peak(stats.entry_count as u64, stats.total_size_bytes);

        if self.index.should_compact().await {
            self.index.compact(Utc::now()).await?;
        }
        logger::log_performance_metrics(self.logger.as_ref(), &self.metrics());
        Ok(())
    }

    pub async fn cleanup_temp(&self) -> Result<usize> {
        Ok(self.storage.cleanup_temp().await?)
    }

    /// A snapshot of the underlying index, for debug/integrity tooling
    /// (spec.md §4.12) that needs to walk every tracked entry.
    pub async fn index_snapshot(&self) -> Vec<IndexEntry> {
        self.index.snapshot().await
    }
}

/// A handle to a spawned background maintenance loop (spec.md §4.6).
/// `close` signals the task to stop and joins it so a final index
/// compaction runs before shutdown.
pub struct MaintenanceHandle {
    close_signal: Arc<tokio::sync::Notify>,
    join: tokio::task::JoinHandle<()>,
}

impl MaintenanceHandle {
    pub async fn close(self) {
        self.close_signal.notify_waiters();
        let _ = self.join.await;
    }
}

pub fn spawn_maintenance<F: Filesystem + 'static>(
    coordinator: Arc<Coordinator<F>>,
    interval: std::time::Duration,
) -> MaintenanceHandle {
    let close_signal = Arc::new(tokio::sync::Notify::new());
    let close_for_task = close_signal.clone();

    let join = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let _ = coordinator.run_maintenance().await;
                }
                _ = close_for_task.notified() => {
                    let _ = coordinator.run_maintenance().await;
                    break;
                }
            }
        }
    });

    MaintenanceHandle { close_signal, join }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::memory::MemoryFilesystem;
    use crate::manifest_cache::{ManifestConfig, ManifestLayer};

    async fn coordinator() -> Coordinator<MemoryFilesystem> {
        let config = Config::new("root");
        Coordinator::new(MemoryFilesystem::new(), config).await.unwrap()
    }

    #[tokio::test]
    async fn put_then_get_blob() {
        let c = coordinator().await;
        let digest = Digest::sha256_of(b"hello");
        c.put_blob(&digest, b"hello", None).await.unwrap();
        assert_eq!(c.get_blob(&digest).await.unwrap(), Some(b"hello".to_vec()));
        assert_eq!(c.metrics().hits, 1);
    }

    #[tokio::test]
    async fn delete_blob_removes_from_index() {
        let c = coordinator().await;
        let digest = Digest::sha256_of(b"hello");
        c.put_blob(&digest, b"hello", None).await.unwrap();
        c.delete_blob(&digest).await.unwrap();
        assert_eq!(c.get_blob(&digest).await.unwrap(), None);
        assert_eq!(c.index.len().await, 0);
    }

    #[tokio::test]
    async fn cleanup_pass_removes_expired_blobs() {
        let mut config = Config::new("root");
        config.max_entries = 0;
        let c = Coordinator::new(MemoryFilesystem::new(), config).await.unwrap();
        let digest = Digest::sha256_of(b"hello");
        c.put_blob(&digest, b"hello", Some(0)).await.unwrap();

        tokio::time::pause();
        tokio::time::advance(std::time::Duration::from_secs(5)).await;

        let removed = c.cleanup_pass().await.unwrap();
        assert_eq!(removed, 1);
        assert_eq!(c.get_blob(&digest).await.unwrap(), None);
    }

    #[tokio::test]
    async fn eviction_pass_evicts_down_to_budget() {
        let mut config = Config::new("root");
        config.max_total_size_bytes = 10;
        let c = Coordinator::new(MemoryFilesystem::new(), config).await.unwrap();

        let a = Digest::sha256_of(b"aaaaaaaaaa");
        let b = Digest::sha256_of(b"bbbbbbbbbb");
        c.put_blob(&a, b"aaaaaaaaaa", None).await.unwrap();
        c.put_blob(&b, b"bbbbbbbbbb", None).await.unwrap();

        let removed = c.eviction_pass().await.unwrap();
        assert!(removed >= 1);
        let stats = c.index.stats().await;
        assert!(stats.total_size_bytes <= 10);
    }

    #[tokio::test]
    async fn manifest_round_trips_through_coordinator() {
        let c = coordinator().await;
        let digest = Digest::sha256_of(b"manifest");
        let manifest = Manifest {
            schema_version: 2,
            media_type: "application/vnd.oci.image.manifest.v1+json".to_string(),
            config: ManifestConfig {
                media_type: "application/vnd.oci.image.config.v1+json".to_string(),
                size: 1,
                digest: digest.to_string(),
            },
            layers: vec![ManifestLayer {
                media_type: "application/vnd.oci.image.layer.v1.tar+gzip".to_string(),
                size: 1,
                digest: digest.to_string(),
            }],
        };
        c.put_manifest(&digest, manifest.clone()).await.unwrap();
        assert_eq!(c.get_manifest(&digest).await.unwrap(), Some(manifest));
    }
}
