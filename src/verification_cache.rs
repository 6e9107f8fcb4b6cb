//! Signature/policy verification result cache (spec.md §4.5.4, §3.1).
//!
//! Verifying a signature against a policy is assumed to be expensive enough
//! that a past verdict is worth caching keyed by `(digest, policy)`, the way
//! `ManifestCache` caches a parsed manifest keyed by digest alone. Actually
//! performing the verification stays out of scope (spec.md §1's
//! "Non-goals"); this only remembers the outcome.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::digest::Digest;
use crate::error::Result;
use crate::fs::Filesystem;
use crate::storage::Storage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Verdict {
    Verified,
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationResult {
    pub digest: String,
    pub policy_hash: String,
    pub verdict: Verdict,
    pub verified_at: DateTime<Utc>,
    pub detail: Option<String>,
}

fn path_for(digest: &Digest, policy_hash: &str) -> PathBuf {
    PathBuf::from("verify").join(format!("{}_{}", digest.shard(), digest.hex())).join(policy_hash)
}

pub struct VerificationCache<F: Filesystem> {
    storage: Arc<Storage<F>>,
}

impl<F: Filesystem> VerificationCache<F> {
    pub fn new(storage: Arc<Storage<F>>) -> Self {
        VerificationCache { storage }
    }

    pub async fn put(&self, result: &VerificationResult) -> Result<()> {
        let digest: Digest = result.digest.parse()?;
        let json = serde_json::to_vec(result)?;
        self.storage
            .write_atomic(&path_for(&digest, &result.policy_hash), &json)
            .await?;
        Ok(())
    }

    pub async fn get(&self, digest: &Digest, policy_hash: &str) -> Result<Option<VerificationResult>> {
        match self.storage.read_verified(&path_for(digest, policy_hash)).await {
            Ok(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
            Err(crate::storage::Error::Fs(crate::fs::Error::NotFound(_))) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
