//! Table-of-contents cache (spec.md §4.5/§4.6 `get_toc`/`put_toc`).
//!
//! Caches the index metadata of a stargz/eStargz-style layer without storing
//! the layer bytes a second time; identical in shape to `ManifestCache` and
//! `VerificationCache` (one JSON document per digest). Parsing the TOC
//! format itself stays out of scope (spec.md §1's Non-goals) — this only
//! remembers the counts a caller already computed.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::digest::Digest;
use crate::error::Result;
use crate::fs::Filesystem;
use crate::storage::Storage;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TOCCacheEntry {
    pub digest: String,
    pub file_count: u64,
    pub total_size: u64,
    pub cached_at: DateTime<Utc>,
}

fn path_for(digest: &Digest) -> PathBuf {
    PathBuf::from("toc").join(digest.shard()).join(digest.hex())
}

pub struct TocCache<F: Filesystem> {
    storage: Arc<Storage<F>>,
}

impl<F: Filesystem> TocCache<F> {
    pub fn new(storage: Arc<Storage<F>>) -> Self {
        TocCache { storage }
    }

    pub async fn put(&self, digest: &Digest, file_count: u64, total_size: u64, now: DateTime<Utc>) -> Result<()> {
        let entry = TOCCacheEntry {
            digest: digest.to_string(),
            file_count,
            total_size,
            cached_at: now,
        };
        let json = serde_json::to_vec(&entry)?;
        self.storage.write_atomic(&path_for(digest), &json).await?;
        Ok(())
    }

    pub async fn get(&self, digest: &Digest) -> Result<Option<TOCCacheEntry>> {
        match self.storage.read_verified(&path_for(digest)).await {
            Ok(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
            Err(crate::storage::Error::Fs(crate::fs::Error::NotFound(_))) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::memory::MemoryFilesystem;

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let cache = TocCache::new(Arc::new(Storage::new(MemoryFilesystem::new(), "root")));
        let digest = Digest::sha256_of(b"layer");
        cache.put(&digest, 42, 1024, Utc::now()).await.unwrap();
        let got = cache.get(&digest).await.unwrap().unwrap();
        assert_eq!(got.file_count, 42);
        assert_eq!(got.total_size, 1024);
    }
}
