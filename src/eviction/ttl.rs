use chrono::{DateTime, Utc};

use super::EvictionStrategy;
use crate::index::IndexEntry;

/// Evicts expired entries first, oldest-expired first; ignores
/// `target_free_bytes` since an expired entry is never valid to keep
/// regardless of how much space is actually needed.
#[derive(Default)]
pub struct Ttl;

impl Ttl {
    pub fn new() -> Self {
        Ttl
    }
}

impl EvictionStrategy for Ttl {
    fn select_for_eviction(
        &self,
        entries: &[IndexEntry],
        _target_free_bytes: u64,
        now: DateTime<Utc>,
    ) -> Vec<String> {
        let mut expired: Vec<&IndexEntry> = entries.iter().filter(|e| e.is_expired(now)).collect();
        expired.sort_by_key(|e| e.created_at);
        expired.into_iter().map(|e| e.key.clone()).collect()
    }

    fn on_access(&mut self, _key: &str) {}
    fn on_add(&mut self, _key: &str, _entry: &IndexEntry) {}
    fn on_remove(&mut self, _key: &str) {}
}
