//! Pluggable eviction engine (spec.md §4.4).
//!
//! Nothing in the teacher workspace decomposes eviction into swappable
//! strategies — `peoci/src/ocidist_cache.rs` and `peoci/src/blobcache.rs`
//! both delegate all of that to `moka::Cache`'s built-in W-TinyLFU policy,
//! which is a black box with no `select_for_eviction`-style hook to drive
//! from an external capacity check. This module is new code, written in the
//! small-trait-object style the workspace uses elsewhere
//! (`peoci/src/blobcache.rs`'s own tiny structs), so a capacity check can
//! ask "which keys would free N bytes" without the engine doing the removal
//! itself.

mod composite;
mod lru;
mod size;
mod ttl;

pub use composite::Composite;
pub use lru::Lru;
pub use size::SizeBased;
pub use ttl::Ttl;

use chrono::{DateTime, Utc};

use crate::index::IndexEntry;

/// A pluggable policy for choosing which keys to evict to reclaim space.
///
/// `select_for_eviction` is read-only: it proposes keys from a snapshot of
/// the index, and the caller (the coordinator) is responsible for actually
/// removing them and then reporting that back through `on_remove` so the
/// strategy's own bookkeeping (e.g. LRU order) stays in sync.
pub trait EvictionStrategy: Send {
    fn select_for_eviction(
        &self,
        entries: &[IndexEntry],
        target_free_bytes: u64,
        now: DateTime<Utc>,
    ) -> Vec<String>;

    fn on_access(&mut self, key: &str);
    fn on_add(&mut self, key: &str, entry: &IndexEntry);
    fn on_remove(&mut self, key: &str);
}
