//! Cache metrics (spec.md §4.9).
//!
//! Counters follow the same `AtomicU64` + small accessor idiom
//! `peoci/src/blobcache.rs` uses for its own `Counters` struct
//! (`atomic_inc`/`atomic_take` at `peoci/src/blobcache.rs:382-388`) and
//! `peoci/src/ocidist_cache.rs`'s cache-hit bookkeeping
//! (`peoci/src/ocidist_cache.rs:145-153,622-628`); the fixed-capacity
//! latency rings are new, since nothing in the teacher tracks latency
//! history, only point totals.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

const RING_CAPACITY: usize = 10_000;
const RING_TRUNCATE_TO: usize = 5_000;

#[derive(Default)]
struct LatencyRing {
    samples: VecDeque<Duration>,
}

impl LatencyRing {
    fn record(&mut self, d: Duration) {
        self.samples.push_back(d);
        if self.samples.len() > RING_CAPACITY {
            let excess = self.samples.len() - RING_TRUNCATE_TO;
            self.samples.drain(0..excess);
        }
    }

    fn average(&self) -> Duration {
        if self.samples.is_empty() {
            return Duration::ZERO;
        }
        let total: Duration = self.samples.iter().sum();
        total / self.samples.len() as u32
    }
}

pub struct Metrics {
    hits: AtomicU64,
    misses: AtomicU64,
    writes: AtomicU64,
    evictions: AtomicU64,
    errors: AtomicU64,
    bytes_served: AtomicU64,
    bytes_stored: AtomicU64,
    peak_entry_count: AtomicU64,
    peak_total_size_bytes: AtomicU64,
    get_latencies: Mutex<LatencyRing>,
    put_latencies: Mutex<LatencyRing>,
    eviction_latencies: Mutex<LatencyRing>,
}

impl Default for Metrics {
    fn default() -> Self {
        Metrics {
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            writes: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            bytes_served: AtomicU64::new(0),
            bytes_stored: AtomicU64::new(0),
            peak_entry_count: AtomicU64::new(0),
            peak_total_size_bytes: AtomicU64::new(0),
            get_latencies: Mutex::new(LatencyRing::default()),
            put_latencies: Mutex::new(LatencyRing::default()),
            eviction_latencies: Mutex::new(LatencyRing::default()),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct MetricsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub writes: u64,
    pub evictions: u64,
    pub errors: u64,
    pub bytes_served: u64,
    pub bytes_stored: u64,
    pub peak_entry_count: u64,
    pub peak_total_size_bytes: u64,
    pub avg_get_latency: Duration,
    pub avg_put_latency: Duration,
    pub avg_eviction_latency: Duration,
    /// `hits / (hits + misses)` as a percentage, 0 when there is no traffic.
    pub hit_rate: f64,
    /// Bytes served from cache that did not need a registry round trip.
    pub bandwidth_saved: u64,
}

impl Metrics {
    pub fn new() -> Self {
        Metrics::default()
    }

    pub fn record_hit(&self, bytes: u64, latency: Duration) {
        self.hits.fetch_add(1, Ordering::Relaxed);
        self.bytes_served.fetch_add(bytes, Ordering::Relaxed);
        self.get_latencies.lock().unwrap().record(latency);
    }

    pub fn record_miss(&self, latency: Duration) {
        self.misses.fetch_add(1, Ordering::Relaxed);
        self.get_latencies.lock().unwrap().record(latency);
    }

    pub fn record_write(&self, bytes: u64, latency: Duration) {
        self.writes.fetch_add(1, Ordering::Relaxed);
        self.bytes_stored.fetch_add(bytes, Ordering::Relaxed);
        self.put_latencies.lock().unwrap().record(latency);
    }

    pub fn record_eviction(&self, latency: Duration) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
        self.eviction_latencies.lock().unwrap().record(latency);
    }

    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_peak(&self, entry_count: u64, total_size_bytes: u64) {
        self.peak_entry_count.fetch_max(entry_count, Ordering::Relaxed);
        self.peak_total_size_bytes
            .fetch_max(total_size_bytes, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let bytes_served = self.bytes_served.load(Ordering::Relaxed);
        let total = hits + misses;
        let hit_rate = if total == 0 {
            0.0
        } else {
            (hits as f64 / total as f64) * 100.0
        };

        MetricsSnapshot {
            hits,
            misses,
            writes: self.writes.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            bytes_served,
            bytes_stored: self.bytes_stored.load(Ordering::Relaxed),
            peak_entry_count: self.peak_entry_count.load(Ordering::Relaxed),
            peak_total_size_bytes: self.peak_total_size_bytes.load(Ordering::Relaxed),
            avg_get_latency: self.get_latencies.lock().unwrap().average(),
            avg_put_latency: self.put_latencies.lock().unwrap().average(),
            avg_eviction_latency: self.eviction_latencies.lock().unwrap().average(),
            hit_rate,
            // bytes served on a hit are bytes that did not need a registry
            // fetch; integer division matches spec.md §4.9/§8's worked examples.
            bandwidth_saved: bytes_served,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hit_rate_is_zero_with_no_traffic() {
        let m = Metrics::new();
        assert_eq!(m.snapshot().hit_rate, 0.0);
    }

    #[test]
    fn hit_rate_and_bandwidth_saved() {
        let m = Metrics::new();
        m.record_hit(100, Duration::from_millis(1));
        m.record_hit(50, Duration::from_millis(2));
        m.record_miss(Duration::from_millis(3));

        let snap = m.snapshot();
        assert_eq!(snap.hits, 2);
        assert_eq!(snap.misses, 1);
        assert!((snap.hit_rate - 66.66666666666667).abs() < 1e-9);
        assert_eq!(snap.bandwidth_saved, 150);
    }

    #[test]
    fn ring_truncates_on_overflow() {
        let mut ring = LatencyRing::default();
        for _ in 0..(RING_CAPACITY + 1) {
            ring.record(Duration::from_millis(1));
        }
        assert_eq!(ring.samples.len(), RING_TRUNCATE_TO);
    }

    #[test]
    fn peak_tracks_maximum_observed() {
        let m = Metrics::new();
        m.record_peak(5, 500);
        m.record_peak(3, 900);
        let snap = m.snapshot();
        assert_eq!(snap.peak_entry_count, 5);
        assert_eq!(snap.peak_total_size_bytes, 900);
    }
}
