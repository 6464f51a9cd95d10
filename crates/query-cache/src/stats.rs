//! Cache statistics tracking

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Running request counters, updated lock-free on every cache operation
#[derive(Debug, Default)]
pub struct CacheMetrics {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
    invalidations: AtomicU64,
}

impl CacheMetrics {
    /// Create zeroed counters
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a cache hit
    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a cache miss
    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an eviction
    pub fn record_eviction(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
    }

    /// Record expired entries removed
    pub fn record_expirations(&self, count: u64) {
        self.expirations.fetch_add(count, Ordering::Relaxed);
    }

    /// Record invalidated entries
    pub fn record_invalidations(&self, count: u64) {
        self.invalidations.fetch_add(count, Ordering::Relaxed);
    }

    /// Get hit count
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Get miss count
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Get eviction count
    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    /// Get expiration count
    pub fn expirations(&self) -> u64 {
        self.expirations.load(Ordering::Relaxed)
    }

    /// Get invalidation count
    pub fn invalidations(&self) -> u64 {
        self.invalidations.load(Ordering::Relaxed)
    }

    /// Reset all counters
    pub fn reset(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.evictions.store(0, Ordering::Relaxed);
        self.expirations.store(0, Ordering::Relaxed);
        self.invalidations.store(0, Ordering::Relaxed);
    }
}

/// Point-in-time view of the cache, as returned by `QueryCache::get_stats`
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheStats {
    /// Entries in the table, live or not
    pub total_entries: usize,
    /// Entries that have not yet expired
    pub live_entries: usize,
    /// `total_hits / (total_hits + live_entries)` over live entries.
    ///
    /// This is an occupancy heuristic, not a request hit ratio; see
    /// [`CacheStats::request_hit_rate`] for the latter.
    pub hit_rate: f64,
    /// Serialized size of the entry table in bytes
    pub memory_usage_bytes: usize,
    /// Keys with tracked access history
    pub access_patterns: usize,
    /// Lookups that returned a live entry
    pub hits: u64,
    /// Lookups that found nothing or an expired entry
    pub misses: u64,
    /// Entries removed to make room
    pub evictions: u64,
    /// Expired entries removed lazily or by the sweep
    pub expirations: u64,
    /// Entries removed by invalidation
    pub invalidations: u64,
}

impl CacheStats {
    /// Heuristic hit rate from per-entry hit counts
    pub fn entry_hit_rate(total_hits: u64, live_entries: usize) -> f64 {
        if total_hits == 0 {
            0.0
        } else {
            total_hits as f64 / (total_hits as f64 + live_entries as f64)
        }
    }

    /// Hits over all lookups since the counters were last reset
    pub fn request_hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    /// Total lookups (hits + misses)
    pub fn total_requests(&self) -> u64 {
        self.hits + self.misses
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_recording() {
        let metrics = CacheMetrics::new();

        metrics.record_hit();
        metrics.record_hit();
        metrics.record_miss();
        metrics.record_expirations(3);
        metrics.record_invalidations(2);

        assert_eq!(metrics.hits(), 2);
        assert_eq!(metrics.misses(), 1);
        assert_eq!(metrics.expirations(), 3);
        assert_eq!(metrics.invalidations(), 2);
    }

    #[test]
    fn test_reset() {
        let metrics = CacheMetrics::new();
        metrics.record_hit();
        metrics.record_miss();
        metrics.record_eviction();

        metrics.reset();

        assert_eq!(metrics.hits(), 0);
        assert_eq!(metrics.misses(), 0);
        assert_eq!(metrics.evictions(), 0);
    }

    #[test]
    fn test_entry_hit_rate() {
        assert_eq!(CacheStats::entry_hit_rate(0, 5), 0.0);
        // 3 entries written once each: 3 / (3 + 3)
        assert!((CacheStats::entry_hit_rate(3, 3) - 0.5).abs() < f64::EPSILON);
        assert!((CacheStats::entry_hit_rate(9, 1) - 0.9).abs() < f64::EPSILON);
    }

    #[test]
    fn test_request_hit_rate() {
        let stats = CacheStats {
            hits: 2,
            misses: 2,
            ..Default::default()
        };
        assert!((stats.request_hit_rate() - 0.5).abs() < f64::EPSILON);
        assert_eq!(stats.total_requests(), 4);
        assert_eq!(CacheStats::default().request_hit_rate(), 0.0);
    }
}
