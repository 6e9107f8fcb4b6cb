//! Tag resolution (spec.md §4.11).
//!
//! The registry HTTP client itself stays out of scope (spec.md §1's
//! Non-goals name the registry protocol, not the resolution algorithm that
//! consumes it), so the algorithm is written against a small
//! `RegistryTransport` trait instead of `reqwest` directly — the same split
//! `peoci/src/ocidist.rs` would benefit from but doesn't have, since that
//! module owns its `reqwest::Client` outright. [`ReqwestTransport`] is the
//! production implementation, grounded on `peoci/src/ocidist.rs`'s own
//! `reqwest::Client` construction (`redirect::Policy::limited(2)`,
//! `peoci/src/ocidist.rs:206-233`) and its header-based digest extraction
//! (`peoci/src/ocidist.rs:380-424`), narrowed from a GET-with-body flow to
//! this crate's HEAD-only contract.

use std::sync::Arc;

use chrono::Utc;

use crate::error::{Error, Result};
use crate::fs::Filesystem;
use crate::manifest_cache::ManifestCache;
use crate::reference::Reference;
use crate::tag_cache::{TagCache, TagMove};

pub const MANIFEST_ACCEPT: &str =
    "application/vnd.oci.image.manifest.v1+json,application/vnd.docker.distribution.manifest.v2+json";

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("transport error: {0}")]
    Other(String),
}

#[derive(Debug, Clone, Default)]
pub struct TransportResponse {
    pub status: u16,
    /// Taken from `Docker-Content-Digest`, falling back to `OCI-Subject`.
    pub digest: Option<String>,
}

pub trait RegistryTransport: Send + Sync {
    fn head(
        &self,
        url: &str,
        accept: &str,
    ) -> impl Future<Output = std::result::Result<TransportResponse, TransportError>> + Send;
}

pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(config: &crate::config::TagResolverConfig) -> Self {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::limited(config.redirect_limit as usize))
            .timeout(config.request_timeout)
            .build()
            .expect("reqwest client config is always valid");
        ReqwestTransport { client }
    }
}

impl RegistryTransport for ReqwestTransport {
    async fn head(&self, url: &str, accept: &str) -> std::result::Result<TransportResponse, TransportError> {
        let resp = self
            .client
            .head(url)
            .header("Accept", accept)
            .send()
            .await
            .map_err(|e| TransportError::Other(e.to_string()))?;
        let status = resp.status().as_u16();
        let digest = resp
            .headers()
            .get("Docker-Content-Digest")
            .or_else(|| resp.headers().get("OCI-Subject"))
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        Ok(TransportResponse { status, digest })
    }
}

pub struct TagResolver<F: Filesystem, T: RegistryTransport> {
    tag_cache: Arc<TagCache<F>>,
    manifest_cache: Arc<ManifestCache<F>>,
    transport: T,
}

impl<F: Filesystem, T: RegistryTransport> TagResolver<F, T> {
    pub fn new(tag_cache: Arc<TagCache<F>>, manifest_cache: Arc<ManifestCache<F>>, transport: T) -> Self {
        TagResolver {
            tag_cache,
            manifest_cache,
            transport,
        }
    }

    fn manifest_url(&self, reference: &Reference) -> String {
        format!(
            "https://{}/v2/{}/manifests/{}",
            reference.resolve_registry(),
            reference.repository(),
            reference.tag_or_digest()
        )
    }

    /// Resolves `reference` to a content digest (spec.md §4.11). A
    /// digest-pinned reference is already resolved; otherwise a HEAD request
    /// is issued and `Docker-Content-Digest`/`OCI-Subject` is read off the
    /// response, then recorded in the tag cache.
    pub async fn resolve_tag(&self, reference: &Reference) -> Result<String> {
        if let Some(digest) = reference.digest() {
            return Ok(digest.to_string());
        }

        let url = self.manifest_url(reference);
        let response = self
            .transport
            .head(&url, MANIFEST_ACCEPT)
            .await
            .map_err(|e| Error::Invalidated(e.to_string()))?;
        let digest = response
            .digest
            .ok_or_else(|| Error::NotFound(reference.to_string()))?;

        self.tag_cache.put(reference, &digest, Utc::now()).await?;
        Ok(digest)
    }

    /// Re-resolves `reference` against the registry and reports whether the
    /// tag points somewhere new compared to what the tag cache already had.
    pub async fn detect_tag_movement(&self, reference: &Reference) -> Result<Option<TagMove>> {
        let previous = self.tag_cache.get(reference).await?;
        let current = self.resolve_tag(reference).await?;
        match previous {
            Some(previous) if previous != current => Ok(Some(TagMove {
                digest: previous,
                observed_at: Utc::now(),
            })),
            _ => Ok(None),
        }
    }

    pub async fn batch_resolve(&self, references: &[Reference]) -> Vec<Result<String>> {
        let mut out = Vec::with_capacity(references.len());
        for reference in references {
            out.push(self.resolve_tag(reference).await);
        }
        out
    }

    pub fn manifest_cache(&self) -> &ManifestCache<F> {
        &self.manifest_cache
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::memory::MemoryFilesystem;
    use crate::storage::Storage;
    use std::sync::Mutex;

    struct FakeTransport {
        digest: Mutex<Option<String>>,
    }

    impl RegistryTransport for FakeTransport {
        async fn head(&self, _url: &str, _accept: &str) -> std::result::Result<TransportResponse, TransportError> {
            Ok(TransportResponse {
                status: 200,
                digest: self.digest.lock().unwrap().clone(),
            })
        }
    }

    fn resolver(digest: Option<&str>) -> TagResolver<MemoryFilesystem, FakeTransport> {
        let storage = Arc::new(Storage::new(MemoryFilesystem::new(), "root"));
        let tag_cache = Arc::new(TagCache::new(storage.clone(), 10));
        let manifest_cache = Arc::new(ManifestCache::new(storage));
        let transport = FakeTransport {
            digest: Mutex::new(digest.map(str::to_string)),
        };
        TagResolver::new(tag_cache, manifest_cache, transport)
    }

    #[tokio::test]
    async fn digest_pinned_reference_resolves_without_a_request() {
        let resolver = resolver(None);
        let digest = format!("sha256:{}", "a".repeat(64));
        let reference: Reference = format!("library/nginx@{digest}").parse().unwrap();
        assert_eq!(resolver.resolve_tag(&reference).await.unwrap(), digest);
    }

    #[tokio::test]
    async fn resolve_tag_records_mapping() {
        let digest = format!("sha256:{}", "b".repeat(64));
        let resolver = resolver(Some(&digest));
        let reference: Reference = "library/nginx:latest".parse().unwrap();
        assert_eq!(resolver.resolve_tag(&reference).await.unwrap(), digest);
        assert_eq!(resolver.tag_cache.get(&reference).await.unwrap(), Some(digest));
    }

    #[tokio::test]
    async fn detect_tag_movement_reports_previous_digest() {
        let digest_a = format!("sha256:{}", "c".repeat(64));
        let resolver = resolver(Some(&digest_a));
        let reference: Reference = "library/nginx:latest".parse().unwrap();
        resolver.resolve_tag(&reference).await.unwrap();

        let digest_b = format!("sha256:{}", "d".repeat(64));
        *resolver.transport.digest.lock().unwrap() = Some(digest_b.clone());

        let movement = resolver.detect_tag_movement(&reference).await.unwrap();
        assert_eq!(movement.unwrap().digest, digest_a);
    }

    #[tokio::test]
    async fn missing_digest_header_is_not_found() {
        let resolver = resolver(None);
        let reference: Reference = "library/nginx:latest".parse().unwrap();
        assert!(resolver.resolve_tag(&reference).await.is_err());
    }
}
