use chrono::{DateTime, Utc};

use super::EvictionStrategy;
use crate::index::IndexEntry;

/// Runs a priority-ordered list of strategies and unions their proposals
/// until enough bytes would be freed, stopping as soon as the target is met
/// so a lower-priority strategy never evicts more than it has to.
pub struct Composite {
    strategies: Vec<(Box<dyn EvictionStrategy>, u32)>,
}

impl Composite {
    /// `strategies` is `(strategy, priority)`; lower priority numbers run
    /// first.
    pub fn new(mut strategies: Vec<(Box<dyn EvictionStrategy>, u32)>) -> Self {
        strategies.sort_by_key(|(_, priority)| *priority);
        Composite { strategies }
    }
}

impl EvictionStrategy for Composite {
    fn select_for_eviction(
        &self,
        entries: &[IndexEntry],
        target_free_bytes: u64,
        now: DateTime<Utc>,
    ) -> Vec<String> {
        let sizes: std::collections::HashMap<&str, u64> =
            entries.iter().map(|e| (e.key.as_str(), e.size_bytes)).collect();

        let mut seen = std::collections::HashSet::new();
        let mut out = Vec::new();
        let mut freed = 0u64;

        for (strategy, _) in &self.strategies {
            if freed >= target_free_bytes {
                break;
            }
            for key in strategy.select_for_eviction(entries, target_free_bytes - freed, now) {
                if !seen.insert(key.clone()) {
                    continue;
                }
                freed += sizes.get(key.as_str()).copied().unwrap_or(0);
                out.push(key);
                if freed >= target_free_bytes {
                    break;
                }
            }
        }
        out
    }

    fn on_access(&mut self, key: &str) {
        for (strategy, _) in &mut self.strategies {
            strategy.on_access(key);
        }
    }

    fn on_add(&mut self, key: &str, entry: &IndexEntry) {
        for (strategy, _) in &mut self.strategies {
            strategy.on_add(key, entry);
        }
    }

    fn on_remove(&mut self, key: &str) {
        for (strategy, _) in &mut self.strategies {
            strategy.on_remove(key);
        }
    }
}
