//! The key -> metadata index (spec.md §4.3).
//!
//! Kept as one in-memory `HashMap` guarded by a `tokio::sync::RwLock`, the
//! same shape `peoci/src/ocidist_cache.rs` uses for its manifest/tag maps
//! (`Mutex<HashMap<...>>`, swapped here for a `RwLock` since index reads
//! vastly outnumber writes once a cache is warm). Persistence is append-only
//! JSON-lines rather than `peoci`'s `bincode` snapshot files
//! (`peoci/src/ocidist_cache.rs` bincode-serializes its whole cache to one
//! file on `Drop`): a log survives a crash mid-write with only the last
//! partial line lost, where a single bincode blob would be destroyed
//! entirely by a torn write. See DESIGN.md "Dependency changes".

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt};
use tokio::sync::RwLock;

use crate::cancel::CancellationToken;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("operation cancelled")]
    Cancelled,
}

/// Metadata tracked for every key the cache stores (spec.md §4.3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub key: String,
    pub size_bytes: u64,
    pub created_at: DateTime<Utc>,
    pub accessed_at: DateTime<Utc>,
    pub access_count: u64,
    pub ttl_seconds: Option<u64>,
}

impl IndexEntry {
    pub fn new(key: impl Into<String>, size_bytes: u64, now: DateTime<Utc>) -> Self {
        IndexEntry {
            key: key.into(),
            size_bytes,
            created_at: now,
            accessed_at: now,
            access_count: 0,
            ttl_seconds: None,
        }
    }

    pub fn with_ttl(mut self, ttl_seconds: Option<u64>) -> Self {
        self.ttl_seconds = ttl_seconds;
        self
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match self.ttl_seconds {
            Some(ttl) => (now - self.created_at).num_seconds() >= ttl as i64,
            None => false,
        }
    }
}

#[derive(Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum LogLine {
    Put { key: String, entry: IndexEntry },
    Remove { key: String },
}

struct State {
    entries: HashMap<String, IndexEntry>,
    last_compaction: Option<DateTime<Utc>>,
    ops_since_compaction: u64,
}

/// Statistics surfaced by [`Index::stats`].
#[derive(Debug, Clone, Copy, Default)]
pub struct IndexStats {
    pub entry_count: usize,
    pub total_size_bytes: u64,
}

pub struct Index {
    state: RwLock<State>,
    persistence_path: PathBuf,
    max_entries: usize,
    compaction_threshold: u64,
}

impl Index {
    pub fn new(
        persistence_path: impl Into<PathBuf>,
        max_entries: usize,
        compaction_threshold: u64,
    ) -> Self {
        Index {
            state: RwLock::new(State {
                entries: HashMap::new(),
                last_compaction: None,
                ops_since_compaction: 0,
            }),
            persistence_path: persistence_path.into(),
            max_entries,
            compaction_threshold,
        }
    }

    /// Replays the JSON-lines log, skipping lines that fail to parse or
    /// carry an empty key (spec.md §4.3 "corruption tolerance") and honoring
    /// `cancel` every 1000 lines so a very large log does not block shutdown.
    pub async fn load(&self, cancel: &CancellationToken) -> Result<(), Error> {
        let file = match tokio::fs::File::open(&self.persistence_path).await {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        let mut lines = tokio::io::BufReader::new(file).lines();
        let mut entries = HashMap::new();
        let mut count = 0u64;
        while let Some(line) = lines.next_line().await? {
            count += 1;
            if count % 1000 == 0 && cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            let Ok(parsed) = serde_json::from_str::<LogLine>(&line) else {
                continue;
            };
            match parsed {
                LogLine::Put { key, entry } if !key.is_empty() => {
                    entries.insert(key, entry);
                }
                LogLine::Remove { key } if !key.is_empty() => {
                    entries.remove(&key);
                }
                _ => continue,
            }
        }
        let mut state = self.state.write().await;
        state.entries = entries;
        Ok(())
    }

    async fn append(&self, line: &LogLine) -> Result<(), Error> {
        if let Some(parent) = self.persistence_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.persistence_path)
            .await?;
        let mut json = serde_json::to_string(line)?;
        json.push('\n');
        file.write_all(json.as_bytes()).await?;
        Ok(())
    }

    pub async fn get(&self, key: &str) -> Option<IndexEntry> {
        self.state.read().await.entries.get(key).cloned()
    }

    pub async fn contains(&self, key: &str) -> bool {
        self.state.read().await.entries.contains_key(key)
    }

    pub async fn put(&self, entry: IndexEntry) -> Result<(), Error> {
        let line = LogLine::Put {
            key: entry.key.clone(),
            entry: entry.clone(),
        };
        self.append(&line).await?;
        let mut state = self.state.write().await;
        state.entries.insert(entry.key.clone(), entry);
        state.ops_since_compaction += 1;
        Ok(())
    }

    pub async fn remove(&self, key: &str) -> Result<Option<IndexEntry>, Error> {
        self.append(&LogLine::Remove {
            key: key.to_string(),
        })
        .await?;
        let mut state = self.state.write().await;
        state.ops_since_compaction += 1;
        Ok(state.entries.remove(key))
    }

    pub async fn touch(&self, key: &str, now: DateTime<Utc>) -> Result<(), Error> {
        let entry = {
            let mut state = self.state.write().await;
            let Some(entry) = state.entries.get_mut(key) else {
                return Ok(());
            };
            entry.accessed_at = now;
            entry.access_count += 1;
            entry.clone()
        };
        self.append(&LogLine::Put {
            key: entry.key.clone(),
            entry,
        })
        .await
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.entries.len()
    }

    pub async fn is_over_capacity(&self) -> bool {
        self.max_entries > 0 && self.len().await > self.max_entries
    }

    pub async fn stats(&self) -> IndexStats {
        let state = self.state.read().await;
        IndexStats {
            entry_count: state.entries.len(),
            total_size_bytes: state.entries.values().map(|e| e.size_bytes).sum(),
        }
    }

    /// A point-in-time snapshot of every entry, for eviction scans.
    pub async fn snapshot(&self) -> Vec<IndexEntry> {
        self.state.read().await.entries.values().cloned().collect()
    }

    pub async fn should_compact(&self) -> bool {
        self.state.read().await.ops_since_compaction >= self.compaction_threshold
    }

    /// Rewrites the log as one `Put` per live entry, discarding the history
    /// of removes and superseded updates (spec.md §4.3 "compaction").
    pub async fn compact(&self, now: DateTime<Utc>) -> Result<(), Error> {
        let mut state = self.state.write().await;
        if let Some(parent) = self.persistence_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut out = String::new();
        for entry in state.entries.values() {
            out.push_str(&serde_json::to_string(&LogLine::Put {
                key: entry.key.clone(),
                entry: entry.clone(),
            })?);
            out.push('\n');
        }
        tokio::fs::write(&self.persistence_path, out).await?;
        state.last_compaction = Some(now);
        state.ops_since_compaction = 0;
        Ok(())
    }

    pub fn persistence_path(&self) -> &Path {
        &self.persistence_path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tmp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("ocicache-index-test-{name}-{}", std::process::id()))
    }

    #[tokio::test]
    async fn put_get_remove_round_trips() {
        let path = tmp_path("basic");
        let _ = tokio::fs::remove_file(&path).await;
        let index = Index::new(&path, 0, 1000);
        let now = Utc::now();
        index.put(IndexEntry::new("a", 10, now)).await.unwrap();
        assert!(index.contains("a").await);
        assert_eq!(index.get("a").await.unwrap().size_bytes, 10);
        index.remove("a").await.unwrap();
        assert!(!index.contains("a").await);
        let _ = tokio::fs::remove_file(&path).await;
    }

    #[tokio::test]
    async fn load_replays_log_and_skips_garbage() {
        let path = tmp_path("replay");
        let _ = tokio::fs::remove_file(&path).await;
        tokio::fs::write(
            &path,
            "{\"op\":\"put\",\"key\":\"a\",\"entry\":{\"key\":\"a\",\"size_bytes\":1,\"created_at\":\"2024-01-01T00:00:00Z\",\"accessed_at\":\"2024-01-01T00:00:00Z\",\"access_count\":0,\"ttl_seconds\":null}}\nnot json\n{\"op\":\"remove\",\"key\":\"missing\"}\n",
        )
        .await
        .unwrap();

        let index = Index::new(&path, 0, 1000);
        index.load(&CancellationToken::new()).await.unwrap();
        assert!(index.contains("a").await);
        assert_eq!(index.len().await, 1);
        let _ = tokio::fs::remove_file(&path).await;
    }

    #[tokio::test]
    async fn compact_rewrites_log_to_live_entries_only() {
        let path = tmp_path("compact");
        let _ = tokio::fs::remove_file(&path).await;
        let index = Index::new(&path, 0, 1000);
        let now = Utc::now();
        index.put(IndexEntry::new("a", 1, now)).await.unwrap();
        index.put(IndexEntry::new("b", 2, now)).await.unwrap();
        index.remove("a").await.unwrap();
        index.compact(now).await.unwrap();

        let reloaded = Index::new(&path, 0, 1000);
        reloaded.load(&CancellationToken::new()).await.unwrap();
        assert_eq!(reloaded.len().await, 1);
        assert!(reloaded.contains("b").await);
        let _ = tokio::fs::remove_file(&path).await;
    }

    #[test]
    fn is_expired_respects_ttl() {
        let now = Utc::now();
        let entry = IndexEntry::new("a", 1, now - chrono::Duration::seconds(100)).with_ttl(Some(10));
        assert!(entry.is_expired(now));
        let entry = IndexEntry::new("b", 1, now).with_ttl(Some(1000));
        assert!(!entry.is_expired(now));
    }
}
