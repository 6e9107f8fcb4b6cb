//! Tag-to-digest cache (spec.md §4.5.3).
//!
//! Stored as one JSON document per reference, the same "one file per key,
//! whole-document rewrite on update" shape `ManifestCache` and
//! `VerificationCache` use, with history capped to `max_history_size`
//! entries so a tag that gets force-pushed repeatedly doesn't grow its
//! record without bound.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::fs::Filesystem;
use crate::reference::Reference;
use crate::storage::Storage;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagMove {
    pub digest: String,
    pub observed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagMapping {
    pub reference: String,
    pub digest: String,
    pub updated_at: DateTime<Utc>,
    pub history: Vec<TagMove>,
}

fn safe_key(reference: &Reference) -> String {
    reference
        .to_string()
        .replace('/', "_")
        .replace(':', "_")
        .replace('@', "_")
}

fn path_for(reference: &Reference) -> PathBuf {
    PathBuf::from("tags").join(safe_key(reference))
}

pub struct TagCache<F: Filesystem> {
    storage: Arc<Storage<F>>,
    max_history_size: usize,
}

impl<F: Filesystem> TagCache<F> {
    pub fn new(storage: Arc<Storage<F>>, max_history_size: usize) -> Self {
        TagCache {
            storage,
            max_history_size,
        }
    }

    /// Records `digest` as the current target of `reference`, appending the
    /// previous mapping to `history` only when the digest actually changed.
    pub async fn put(&self, reference: &Reference, digest: &str, now: DateTime<Utc>) -> Result<()> {
        let existing = self.get_mapping(reference).await?;
        let mut history = existing.as_ref().map(|m| m.history.clone()).unwrap_or_default();

        if let Some(existing) = &existing {
            if existing.digest != digest {
                history.push(TagMove {
                    digest: existing.digest.clone(),
                    observed_at: existing.updated_at,
                });
                if history.len() > self.max_history_size {
                    let excess = history.len() - self.max_history_size;
                    history.drain(0..excess);
                }
            }
        }

        let mapping = TagMapping {
            reference: reference.to_string(),
            digest: digest.to_string(),
            updated_at: now,
            history,
        };
        let json = serde_json::to_vec(&mapping)?;
        self.storage.write_atomic(&path_for(reference), &json).await?;
        Ok(())
    }

    async fn get_mapping(&self, reference: &Reference) -> Result<Option<TagMapping>> {
        match self.storage.read_verified(&path_for(reference)).await {
            Ok(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
            Err(crate::storage::Error::Fs(crate::fs::Error::NotFound(_))) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn get(&self, reference: &Reference) -> Result<Option<String>> {
        Ok(self.get_mapping(reference).await?.map(|m| m.digest))
    }

    pub async fn has(&self, reference: &Reference) -> bool {
        self.storage.exists(&path_for(reference)).await
    }

    pub async fn delete(&self, reference: &Reference) -> Result<()> {
        match self.storage.remove(&path_for(reference)).await {
            Ok(()) | Err(crate::storage::Error::Fs(crate::fs::Error::NotFound(_))) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn get_history(&self, reference: &Reference) -> Result<Vec<TagMove>> {
        Ok(self
            .get_mapping(reference)
            .await?
            .map(|m| m.history)
            .unwrap_or_default())
    }
}
