use std::collections::VecDeque;

use chrono::{DateTime, Utc};

use super::EvictionStrategy;
use crate::index::IndexEntry;

/// Least-recently-used eviction. Order is kept as a simple deque (oldest at
/// the front) rather than an intrusive doubly-linked list; at the entry
/// counts this cache deals with, the O(n) `touch` is cheaper to reason about
/// than pointer juggling and doesn't show up next to the I/O it sits beside.
#[derive(Default)]
pub struct Lru {
    order: VecDeque<String>,
}

impl Lru {
    pub fn new() -> Self {
        Lru::default()
    }

    fn touch(&mut self, key: &str) {
        if let Some(pos) = self.order.iter().position(|k| k == key) {
            self.order.remove(pos);
        }
        self.order.push_back(key.to_string());
    }
}

impl EvictionStrategy for Lru {
    fn select_for_eviction(
        &self,
        entries: &[IndexEntry],
        target_free_bytes: u64,
        _now: DateTime<Utc>,
    ) -> Vec<String> {
        let sizes: std::collections::HashMap<&str, u64> =
            entries.iter().map(|e| (e.key.as_str(), e.size_bytes)).collect();
        let mut freed = 0u64;
        let mut out = Vec::new();
        for key in &self.order {
            if freed >= target_free_bytes {
                break;
            }
            if let Some(&size) = sizes.get(key.as_str()) {
                out.push(key.clone());
                freed += size;
            }
        }
        out
    }

    fn on_access(&mut self, key: &str) {
        self.touch(key);
    }

    fn on_add(&mut self, key: &str, _entry: &IndexEntry) {
        self.touch(key);
    }

    fn on_remove(&mut self, key: &str) {
        if let Some(pos) = self.order.iter().position(|k| k == key) {
            self.order.remove(pos);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(key: &str, size: u64) -> IndexEntry {
        IndexEntry::new(key, size, Utc::now())
    }

    #[test]
    fn evicts_oldest_first() {
        let mut lru = Lru::new();
        let entries = vec![entry("a", 10), entry("b", 10), entry("c", 10)];
        for e in &entries {
            lru.on_add(&e.key, e);
        }
        lru.on_access("a");

        let selected = lru.select_for_eviction(&entries, 15, Utc::now());
        assert_eq!(selected, vec!["b".to_string(), "c".to_string()]);
    }

    #[test]
    fn removed_keys_drop_out_of_order() {
        let mut lru = Lru::new();
        let entries = vec![entry("a", 10), entry("b", 10)];
        for e in &entries {
            lru.on_add(&e.key, e);
        }
        lru.on_remove("a");
        let remaining = vec![entry("b", 10)];
        let selected = lru.select_for_eviction(&remaining, 10, Utc::now());
        assert_eq!(selected, vec!["b".to_string()]);
    }
}
