//! Manifest cache (spec.md §4.5.1).
//!
//! `Manifest` only captures the fields this crate actually validates and
//! serves, unlike `oci_spec::image::ImageManifest` which models the entire
//! OCI image-spec schema (annotations, artifact type, subject, etc.) the
//! teacher's `peoci/src/ocidist.rs` consumes for a full registry client.
//! This crate only caches and replays manifests it already trusts a
//! registry to have produced, so the narrower shape is enough; see
//! DESIGN.md "Dependency changes".

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::digest::Digest;
use crate::error::{Error, Result};
use crate::fs::Filesystem;
use crate::storage::Storage;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestLayer {
    pub media_type: String,
    pub size: u64,
    pub digest: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestConfig {
    pub media_type: String,
    pub size: u64,
    pub digest: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub schema_version: u32,
    pub media_type: String,
    pub config: ManifestConfig,
    pub layers: Vec<ManifestLayer>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Entry {
    manifest: Manifest,
    created_at: DateTime<Utc>,
    accessed_at: DateTime<Utc>,
}

fn path_for(digest: &Digest) -> std::path::PathBuf {
    std::path::PathBuf::from("manifests").join(digest.as_str().replace(':', "_"))
}

pub struct ManifestCache<F: Filesystem> {
    storage: std::sync::Arc<Storage<F>>,
}

impl<F: Filesystem> ManifestCache<F> {
    pub fn new(storage: std::sync::Arc<Storage<F>>) -> Self {
        ManifestCache { storage }
    }

    /// Structural validation (spec.md §4.5.1): a schema version of 2, a
    /// non-empty top-level and config media type, and every layer carrying
    /// both a media type and a size.
    pub fn validate_manifest(&self, manifest: &Manifest) -> Result<()> {
        if manifest.schema_version != 2 {
            return Err(Error::Corrupted(std::path::PathBuf::from("schema_version")));
        }
        if manifest.media_type.is_empty() || manifest.config.media_type.is_empty() {
            return Err(Error::Corrupted(std::path::PathBuf::from("media_type")));
        }
        for layer in &manifest.layers {
            if layer.media_type.is_empty() {
                return Err(Error::Corrupted(std::path::PathBuf::from("layers[].media_type")));
            }
        }
        Ok(())
    }

    pub async fn put(&self, digest: &Digest, manifest: Manifest, now: DateTime<Utc>) -> Result<()> {
        self.validate_manifest(&manifest)?;
        let entry = Entry {
            manifest,
            created_at: now,
            accessed_at: now,
        };
        let json = serde_json::to_vec(&entry)?;
        self.storage.write_atomic(&path_for(digest), &json).await?;
        Ok(())
    }

    pub async fn get(&self, digest: &Digest) -> Result<Option<Manifest>> {
        match self.storage.read_verified(&path_for(digest)).await {
            Ok(raw) => {
                let entry: Entry = serde_json::from_slice(&raw)?;
                Ok(Some(entry.manifest))
            }
            Err(crate::storage::Error::Fs(crate::fs::Error::NotFound(_))) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn has(&self, digest: &Digest) -> bool {
        self.storage.exists(&path_for(digest)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::memory::MemoryFilesystem;

    fn sample_manifest() -> Manifest {
        Manifest {
            schema_version: 2,
            media_type: "application/vnd.oci.image.manifest.v1+json".to_string(),
            config: ManifestConfig {
                media_type: "application/vnd.oci.image.config.v1+json".to_string(),
                size: 100,
                digest: "sha256:".to_string() + &"a".repeat(64),
            },
            layers: vec![ManifestLayer {
                media_type: "application/vnd.oci.image.layer.v1.tar+gzip".to_string(),
                size: 200,
                digest: "sha256:".to_string() + &"b".repeat(64),
            }],
        }
    }

    fn digest() -> Digest {
        format!("sha256:{}", "c".repeat(64)).parse().unwrap()
    }

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let storage = std::sync::Arc::new(Storage::new(MemoryFilesystem::new(), "root"));
        let cache = ManifestCache::new(storage);
        let digest = digest();
        cache.put(&digest, sample_manifest(), Utc::now()).await.unwrap();

        assert!(cache.has(&digest).await);
        let got = cache.get(&digest).await.unwrap().unwrap();
        assert_eq!(got, sample_manifest());
    }

    #[tokio::test]
    async fn get_missing_is_none() {
        let storage = std::sync::Arc::new(Storage::new(MemoryFilesystem::new(), "root"));
        let cache = ManifestCache::new(storage);
        assert!(cache.get(&digest()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn rejects_wrong_schema_version() {
        let storage = std::sync::Arc::new(Storage::new(MemoryFilesystem::new(), "root"));
        let cache = ManifestCache::new(storage);
        let mut manifest = sample_manifest();
        manifest.schema_version = 1;
        assert!(cache.put(&digest(), manifest, Utc::now()).await.is_err());
    }
}
