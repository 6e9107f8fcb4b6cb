use chrono::{DateTime, Utc};

use super::EvictionStrategy;
use crate::index::IndexEntry;

/// Evicts the largest entries first, so a single oversized blob gets
/// reclaimed instead of many small ones. Stateless: every call works from
/// the snapshot it's given.
#[derive(Default)]
pub struct SizeBased;

impl SizeBased {
    pub fn new() -> Self {
        SizeBased
    }
}

impl EvictionStrategy for SizeBased {
    fn select_for_eviction(
        &self,
        entries: &[IndexEntry],
        target_free_bytes: u64,
        _now: DateTime<Utc>,
    ) -> Vec<String> {
        let mut sorted: Vec<&IndexEntry> = entries.iter().collect();
        sorted.sort_by(|a, b| b.size_bytes.cmp(&a.size_bytes));

        let mut freed = 0u64;
        let mut out = Vec::new();
        for entry in sorted {
            if freed >= target_free_bytes {
                break;
            }
            out.push(entry.key.clone());
            freed += entry.size_bytes;
        }
        out
    }

    fn on_access(&mut self, _key: &str) {}
    fn on_add(&mut self, _key: &str, _entry: &IndexEntry) {}
    fn on_remove(&mut self, _key: &str) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(key: &str, size: u64) -> IndexEntry {
        IndexEntry::new(key, size, Utc::now())
    }

    #[test]
    fn evicts_largest_first() {
        let strategy = SizeBased::new();
        let entries = vec![entry("small", 5), entry("big", 100), entry("medium", 20)];
        let selected = strategy.select_for_eviction(&entries, 50, Utc::now());
        assert_eq!(selected, vec!["big".to_string()]);
    }

    #[test]
    fn keeps_selecting_until_target_met() {
        let strategy = SizeBased::new();
        let entries = vec![entry("a", 10), entry("b", 10), entry("c", 10)];
        let selected = strategy.select_for_eviction(&entries, 25, Utc::now());
        assert_eq!(selected.len(), 3);
    }
}
