//! Cache configuration (spec.md §4.6's `Coordinator::new(config, ...)`).
//!
//! Plain struct plus builder-style setters, the way
//! `peoci::ocidist_cache::ClientBuilder` is constructed
//! (`peoci/src/ocidist_cache.rs:109-137,199-219`), rather than a new
//! config-file/env layer nothing in this crate's scope asks for.

use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub root: PathBuf,
    pub max_entries: usize,
    pub max_total_size_bytes: u64,
    pub compaction_threshold: u64,
    pub maintenance_interval: Duration,
    pub max_tag_history_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            root: PathBuf::from("."),
            max_entries: 0,
            max_total_size_bytes: 0,
            compaction_threshold: 1000,
            maintenance_interval: Duration::from_secs(30 * 60),
            max_tag_history_size: 20,
        }
    }
}

impl Config {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Config {
            root: root.into(),
            ..Default::default()
        }
    }

    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries;
        self
    }

    pub fn with_max_total_size_bytes(mut self, max_total_size_bytes: u64) -> Self {
        self.max_total_size_bytes = max_total_size_bytes;
        self
    }

    pub fn with_compaction_threshold(mut self, compaction_threshold: u64) -> Self {
        self.compaction_threshold = compaction_threshold;
        self
    }

    pub fn with_maintenance_interval(mut self, maintenance_interval: Duration) -> Self {
        self.maintenance_interval = maintenance_interval;
        self
    }

    pub fn with_max_tag_history_size(mut self, max_tag_history_size: usize) -> Self {
        self.max_tag_history_size = max_tag_history_size;
        self
    }
}

#[derive(Debug, Clone)]
pub struct TagResolverConfig {
    pub request_timeout: Duration,
    pub redirect_limit: u8,
}

impl Default for TagResolverConfig {
    fn default() -> Self {
        TagResolverConfig {
            request_timeout: Duration::from_secs(10),
            redirect_limit: 2,
        }
    }
}

impl TagResolverConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }

    pub fn with_redirect_limit(mut self, redirect_limit: u8) -> Self {
        self.redirect_limit = redirect_limit;
        self
    }
}
