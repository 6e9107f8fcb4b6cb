//! Reference-counted blob cache (spec.md §4.5.2, §3.1).
//!
//! Grounded on `peoci/src/ocidist_cache.rs::retrieve_blob`'s
//! "increment if already cached, else stream it down and create the entry"
//! shape, and on `peoci/src/blobcache.rs::BlobKey::as_path`'s sharded
//! on-disk layout — this crate shards on the first two hex characters of
//! the digest (`Digest::shard`) rather than `peoci`'s `algo/hex` split,
//! since spec.md §4.5/§6 calls for a flat two-level fanout regardless of
//! algorithm.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::digest::Digest;
use crate::error::{Error, Result};
use crate::fs::Filesystem;
use crate::storage::Storage;

/// The 4-line newline-separated on-disk ref format (spec.md §3.1):
/// digest, created_at (RFC3339), ttl_seconds ("none" or a number), ref_count.
#[derive(Debug, Clone, PartialEq)]
pub struct BlobRef {
    pub digest: Digest,
    pub created_at: DateTime<Utc>,
    pub ttl_seconds: Option<u64>,
    pub ref_count: u64,
}

impl BlobRef {
    fn encode(&self) -> Vec<u8> {
        let ttl = self
            .ttl_seconds
            .map(|t| t.to_string())
            .unwrap_or_else(|| "none".to_string());
        format!(
            "{}\n{}\n{}\n{}",
            self.digest,
            self.created_at.to_rfc3339(),
            ttl,
            self.ref_count
        )
        .into_bytes()
    }

    fn decode(raw: &[u8], path: &std::path::Path) -> Result<BlobRef> {
        let text = std::str::from_utf8(raw).map_err(|_| Error::Corrupted(path.to_path_buf()))?;
        let mut lines = text.splitn(4, '\n');
        let digest = lines
            .next()
            .ok_or_else(|| Error::Corrupted(path.to_path_buf()))?
            .parse::<Digest>()?;
        let created_at = lines
            .next()
            .ok_or_else(|| Error::Corrupted(path.to_path_buf()))?;
        let created_at = DateTime::parse_from_rfc3339(created_at)
            .map_err(|_| Error::Corrupted(path.to_path_buf()))?
            .with_timezone(&Utc);
        let ttl = lines
            .next()
            .ok_or_else(|| Error::Corrupted(path.to_path_buf()))?;
        let ttl_seconds = if ttl == "none" {
            None
        } else {
            Some(
                ttl.parse::<u64>()
                    .map_err(|_| Error::Corrupted(path.to_path_buf()))?,
            )
        };
        let ref_count = lines
            .next()
            .ok_or_else(|| Error::Corrupted(path.to_path_buf()))?
            .parse::<u64>()
            .map_err(|_| Error::Corrupted(path.to_path_buf()))?;
        Ok(BlobRef {
            digest,
            created_at,
            ttl_seconds,
            ref_count,
        })
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match self.ttl_seconds {
            Some(ttl) => (now - self.created_at).num_seconds() >= ttl as i64,
            None => false,
        }
    }
}

fn blob_path(digest: &Digest) -> PathBuf {
    PathBuf::from("blobs").join(digest.shard()).join(digest.hex())
}

fn ref_path(digest: &Digest) -> PathBuf {
    PathBuf::from("refs").join(digest.shard()).join(digest.hex())
}

pub struct BlobCache<F: Filesystem> {
    storage: Arc<Storage<F>>,
    ref_lock: Mutex<()>,
}

impl<F: Filesystem> BlobCache<F> {
    pub fn new(storage: Arc<Storage<F>>) -> Self {
        BlobCache {
            storage,
            ref_lock: Mutex::new(()),
        }
    }

    async fn read_ref(&self, digest: &Digest) -> Result<Option<BlobRef>> {
        match self.storage.read_verified(&ref_path(digest)).await {
            Ok(raw) => Ok(Some(BlobRef::decode(&raw, &ref_path(digest))?)),
            Err(crate::storage::Error::Fs(crate::fs::Error::NotFound(_))) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_ref(&self, blob_ref: &BlobRef) -> Result<()> {
        self.storage
            .write_atomic(&ref_path(&blob_ref.digest), &blob_ref.encode())
            .await?;
        Ok(())
    }

    /// Stores `data` under `digest`, incrementing the reference count if the
    /// blob is already present instead of rewriting it (spec.md §4.5.2).
    pub async fn put(&self, digest: &Digest, data: &[u8], ttl_seconds: Option<u64>, now: DateTime<Utc>) -> Result<()> {
        let _guard = self.ref_lock.lock().await;
        match self.read_ref(digest).await? {
            Some(mut existing) => {
                existing.ref_count += 1;
                self.write_ref(&existing).await
            }
            None => {
                self.storage.write_atomic(&blob_path(digest), data).await?;
                let blob_ref = BlobRef {
                    digest: digest.clone(),
                    created_at: now,
                    ttl_seconds,
                    ref_count: 1,
                };
                self.write_ref(&blob_ref).await
            }
        }
    }

    pub async fn get(&self, digest: &Digest, now: DateTime<Utc>) -> Result<Option<Vec<u8>>> {
        let Some(blob_ref) = self.read_ref(digest).await? else {
            return Ok(None);
        };
        if blob_ref.is_expired(now) {
            return Ok(None);
        }
        match self.storage.read_verified(&blob_path(digest)).await {
            Ok(data) => Ok(Some(data)),
            Err(crate::storage::Error::Fs(crate::fs::Error::NotFound(_))) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn has(&self, digest: &Digest) -> bool {
        self.storage.exists(&blob_path(digest)).await
    }

    /// Decrements the reference count; once it reaches zero, removes both
    /// the blob and its ref file.
    pub async fn delete(&self, digest: &Digest) -> Result<()> {
        let _guard = self.ref_lock.lock().await;
        let Some(mut blob_ref) = self.read_ref(digest).await? else {
            return Ok(());
        };
        if blob_ref.ref_count > 1 {
            blob_ref.ref_count -= 1;
            self.write_ref(&blob_ref).await
        } else {
            self.storage.remove(&ref_path(digest)).await.ok();
            self.storage.remove(&blob_path(digest)).await.ok();
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::memory::MemoryFilesystem;

    fn cache() -> BlobCache<MemoryFilesystem> {
        BlobCache::new(Arc::new(Storage::new(MemoryFilesystem::new(), "root")))
    }

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let cache = cache();
        let digest = Digest::sha256_of(b"hello");
        cache.put(&digest, b"hello", None, Utc::now()).await.unwrap();
        assert!(cache.has(&digest).await);
        assert_eq!(cache.get(&digest, Utc::now()).await.unwrap(), Some(b"hello".to_vec()));
    }

    #[tokio::test]
    async fn duplicate_put_increments_ref_count_without_rewriting() {
        let cache = cache();
        let digest = Digest::sha256_of(b"hello");
        let now = Utc::now();
        cache.put(&digest, b"hello", None, now).await.unwrap();
        cache.put(&digest, b"hello", None, now).await.unwrap();

        let blob_ref = cache.read_ref(&digest).await.unwrap().unwrap();
        assert_eq!(blob_ref.ref_count, 2);
    }

    #[tokio::test]
    async fn delete_decrements_then_removes() {
        let cache = cache();
        let digest = Digest::sha256_of(b"hello");
        let now = Utc::now();
        cache.put(&digest, b"hello", None, now).await.unwrap();
        cache.put(&digest, b"hello", None, now).await.unwrap();

        cache.delete(&digest).await.unwrap();
        assert!(cache.has(&digest).await);
        cache.delete(&digest).await.unwrap();
        assert!(!cache.has(&digest).await);
    }

    #[tokio::test]
    async fn expired_blob_is_not_returned() {
        let cache = cache();
        let digest = Digest::sha256_of(b"hello");
        let old = Utc::now() - chrono::Duration::seconds(1000);
        cache.put(&digest, b"hello", Some(10), old).await.unwrap();
        assert_eq!(cache.get(&digest, Utc::now()).await.unwrap(), None);
    }
}
