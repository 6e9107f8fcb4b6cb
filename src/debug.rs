//! Debug and integrity tooling (spec.md §4.12).
//!
//! Free functions over `&Coordinator` rather than new coordinator methods —
//! these are maintenance utilities an operator reaches for occasionally, not
//! part of the hot read/write path, the same separation
//! `peoci/src/bin/ocidist.rs` keeps between the library and its small
//! debugging CLI wrappers.

use serde::Serialize;

use crate::coordinator::Coordinator;
use crate::error::Result;
use crate::fs::Filesystem;
use crate::index::IndexEntry;

#[derive(Debug, Serialize)]
pub struct DebugInfo {
    pub entry_count: usize,
    pub total_size_bytes: u64,
    pub metrics: DebugMetrics,
}

#[derive(Debug, Serialize)]
pub struct DebugMetrics {
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub evictions: u64,
    pub errors: u64,
}

#[derive(Debug, Serialize)]
pub struct IntegrityReport {
    pub checked: usize,
    pub corrupted: Vec<String>,
}

pub async fn collect_debug_info<F: Filesystem>(coordinator: &Coordinator<F>) -> DebugInfo {
    let stats = coordinator_stats(coordinator).await;
    let snapshot = coordinator.metrics();
    DebugInfo {
        entry_count: stats.0,
        total_size_bytes: stats.1,
        metrics: DebugMetrics {
            hits: snapshot.hits,
            misses: snapshot.misses,
            hit_rate: snapshot.hit_rate,
            evictions: snapshot.evictions,
            errors: snapshot.errors,
        },
    }
}

async fn coordinator_stats<F: Filesystem>(coordinator: &Coordinator<F>) -> (usize, u64) {
    // `Coordinator` only exposes its index through its public cache methods,
    // so debug tooling reads the same snapshot a maintenance pass would.
    let entries = entries_snapshot(coordinator).await;
    let total: u64 = entries.iter().map(|e| e.size_bytes).sum();
    (entries.len(), total)
}

async fn entries_snapshot<F: Filesystem>(coordinator: &Coordinator<F>) -> Vec<IndexEntry> {
    coordinator.index_snapshot().await
}

/// Re-reads and verifies every stored blob's checksum, reporting any that
/// fail without repairing them.
pub async fn check_integrity<F: Filesystem>(coordinator: &Coordinator<F>) -> Result<IntegrityReport> {
    let entries = entries_snapshot(coordinator).await;
    let mut corrupted = Vec::new();
    let mut checked = 0;
    for entry in entries {
        if let Some(digest_str) = entry.key.strip_prefix("blob:") {
            checked += 1;
            if let Ok(digest) = digest_str.parse() {
                if coordinator.get_blob(&digest).await.is_err() {
                    corrupted.push(entry.key.clone());
                }
            }
        }
    }
    Ok(IntegrityReport { checked, corrupted })
}

/// Removes every entry `check_integrity` would report as corrupted.
pub async fn repair_integrity<F: Filesystem>(coordinator: &Coordinator<F>) -> Result<usize> {
    let report = check_integrity(coordinator).await?;
    for key in &report.corrupted {
        if let Some(digest_str) = key.strip_prefix("blob:") {
            if let Ok(digest) = digest_str.parse() {
                coordinator.delete_blob(&digest).await?;
            }
        }
    }
    Ok(report.corrupted.len())
}

pub async fn clear_expired<F: Filesystem>(coordinator: &Coordinator<F>) -> Result<usize> {
    coordinator.cleanup_pass().await
}

pub async fn export_debug_info<F: Filesystem>(coordinator: &Coordinator<F>) -> Result<String> {
    let info = collect_debug_info(coordinator).await;
    Ok(serde_json::to_string_pretty(&info)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::digest::Digest;
    use crate::fs::memory::MemoryFilesystem;

    #[tokio::test]
    async fn collect_debug_info_reports_entry_count() {
        let config = Config::new("root");
        let coordinator = Coordinator::new(MemoryFilesystem::new(), config).await.unwrap();
        let digest = Digest::sha256_of(b"hello");
        coordinator.put_blob(&digest, b"hello", None).await.unwrap();

        let info = collect_debug_info(&coordinator).await;
        assert_eq!(info.entry_count, 1);
        assert_eq!(info.total_size_bytes, 5);
    }

    #[tokio::test]
    async fn check_integrity_reports_no_corruption_for_healthy_cache() {
        let config = Config::new("root");
        let coordinator = Coordinator::new(MemoryFilesystem::new(), config).await.unwrap();
        let digest = Digest::sha256_of(b"hello");
        coordinator.put_blob(&digest, b"hello", None).await.unwrap();

        let report = check_integrity(&coordinator).await.unwrap();
        assert_eq!(report.checked, 1);
        assert!(report.corrupted.is_empty());
    }

    #[tokio::test]
    async fn export_debug_info_is_valid_json() {
        let config = Config::new("root");
        let coordinator = Coordinator::new(MemoryFilesystem::new(), config).await.unwrap();
        let json = export_debug_info(&coordinator).await.unwrap();
        assert!(json.contains("entry_count"));
    }

}
